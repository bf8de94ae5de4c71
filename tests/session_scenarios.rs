use dirbuf::{EntryKind, EventQueue, PromptResponse, Session, SessionConfig, UiEvent};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn config() -> SessionConfig {
    SessionConfig {
        preview_debounce_ms: 20,
        search_flush_ms: 20,
        use_external_search: false,
        ..SessionConfig::default()
    }
}

fn open(dir: &Path, config: SessionConfig) -> (Session, EventQueue) {
    let events = EventQueue::new();
    let session = Session::new(dir, config, Box::new(events.clone())).unwrap();
    (session, events)
}

fn names(session: &Session) -> Vec<String> {
    session
        .snapshot()
        .entries()
        .iter()
        .map(|entry| entry.name.clone())
        .collect()
}

/// Pumps until `done` sees an event it likes or the deadline passes; returns
/// everything collected.
fn pump_until(
    session: &mut Session,
    events: &EventQueue,
    wait: Duration,
    done: impl Fn(&UiEvent) -> bool,
) -> Vec<UiEvent> {
    let deadline = Instant::now() + wait;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        session.pump(Duration::from_millis(20));
        let drained = events.drain();
        let finished = drained.iter().any(&done);
        seen.extend(drained);
        if finished {
            break;
        }
    }
    seen
}

fn d_fixture() -> (tempfile::TempDir, PathBuf) {
    let root = tempfile::tempdir().unwrap();
    let d = root.path().join("d");
    fs::create_dir(&d).unwrap();
    fs::write(d.join("a.txt"), "0123456789").unwrap();
    fs::create_dir(d.join("b")).unwrap();
    fs::write(d.join(".h"), "").unwrap();
    let d = d.canonicalize().unwrap();
    (root, d)
}

#[test]
fn test_listing_then_hidden_toggle() {
    let (_root, d) = d_fixture();
    let (mut session, _events) = open(&d, config());

    session.navigate(&d, None);
    assert_eq!(names(&session), vec!["b", "a.txt"]);
    assert_eq!(session.snapshot().selected_index(), 0);
    let entries = session.snapshot().entries();
    assert_eq!(entries[0].kind, EntryKind::Directory);
    assert_eq!(entries[1].kind, EntryKind::File);
    assert_eq!(entries[1].size_bytes, 10);

    session.toggle_hidden();
    assert_eq!(names(&session), vec!["b", ".h", "a.txt"]);
}

#[test]
fn test_deleting_last_entry_selects_new_last() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a", "b", "c"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    let (mut session, _events) = open(dir.path(), config());
    session.select_index(2);

    session.delete_selected();
    session.handle_prompt_response("delete_current_file", PromptResponse::Confirmed(true));

    assert_eq!(names(&session), vec!["a", "b"]);
    assert_eq!(session.snapshot().selected_index(), 1);
    assert_eq!(session.snapshot().selected_entry().unwrap().name, "b");
}

#[test]
fn test_deleting_marked_block_selects_neighbour() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a", "b", "c", "d"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    let (mut session, _events) = open(dir.path(), config());
    session.toggle_mark(1);
    session.toggle_mark(2);
    session.select_index(1);

    session.delete_marked();
    session.handle_prompt_response("delete_marked", PromptResponse::Confirmed(true));

    assert_eq!(names(&session), vec!["a", "d"]);
    assert_eq!(session.snapshot().selected_entry().unwrap().name, "d");
    assert!(session.marked_paths().is_empty());
}

#[test]
fn test_copy_directory_into_existing_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("X");
    fs::create_dir_all(src.join("sub")).unwrap();
    fs::write(src.join("sub/file.txt"), "payload").unwrap();
    fs::write(src.join("top.txt"), "top").unwrap();
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let (mut session, events) = open(dir.path(), config());
    let root = session.dir().to_path_buf();
    session.transfer_paths(true, vec![root.join("X")], root.join("dst"), false);

    assert_eq!(
        fs::read_to_string(dst.join("X/sub/file.txt")).unwrap(),
        "payload"
    );
    assert!(dst.join("X/top.txt").is_file());
    assert!(!dst.join("top.txt").exists());
    assert!(events
        .drain()
        .iter()
        .any(|event| matches!(event, UiEvent::Message(text) if text.starts_with("Copied 1"))));
}

#[test]
fn test_rename_round_trip_restores_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["p.txt", "q.txt"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    fs::create_dir(dir.path().join("sub")).unwrap();
    let (mut session, _events) = open(dir.path(), config());
    let root = session.dir().to_path_buf();

    let before: Vec<PathBuf> = session.snapshot().paths().map(Path::to_path_buf).collect();
    session.rename_path(root.join("p.txt"), "x.txt");
    assert!(session.snapshot().index_of(&root.join("x.txt")).is_some());
    session.rename_path(root.join("x.txt"), "p.txt");
    let after: Vec<PathBuf> = session.snapshot().paths().map(Path::to_path_buf).collect();

    assert_eq!(before, after);
}

#[test]
fn test_rapid_selection_delivers_only_latest_preview() {
    let (_root, d) = d_fixture();
    let slow = SessionConfig {
        preview_debounce_ms: 300,
        ..config()
    };
    let (mut session, events) = open(&d, slow);
    // b was requested by the initial navigate; a.txt replaces it in the window
    session.select_index(1);

    let deadline = Instant::now() + Duration::from_millis(1500);
    let mut previews = Vec::new();
    while Instant::now() < deadline {
        session.pump(Duration::from_millis(50));
        previews.extend(events.drain().into_iter().filter_map(|event| match event {
            UiEvent::SetPreview(preview) => Some(preview),
            _ => None,
        }));
    }

    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].path, d.join("a.txt"));
}

#[test]
fn test_search_streams_every_match_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut expected = HashSet::new();
    for group in 0..5 {
        let sub = dir.path().join(format!("group{}", group));
        fs::create_dir(&sub).unwrap();
        for i in 0..40 {
            let file = sub.join(format!("match_{}.log", i));
            fs::write(&file, "x").unwrap();
            expected.insert(file.canonicalize().unwrap());
            fs::write(sub.join(format!("other_{}.txt", i)), "y").unwrap();
        }
        fs::write(sub.join(".match_hidden.log"), "h").unwrap();
    }

    let (mut session, events) = open(dir.path(), config());
    let root = session.dir().to_path_buf();
    events.drain();
    session.search(&root, "match_");
    assert!(session.is_searching());

    let seen = pump_until(&mut session, &events, Duration::from_secs(20), |event| {
        matches!(event, UiEvent::FinishSearch { .. })
    });

    let mut streamed = Vec::new();
    let mut finished = None;
    for event in seen {
        match event {
            UiEvent::AppendSearchResults(entries) => {
                streamed.extend(entries.into_iter().map(|entry| entry.path))
            }
            UiEvent::FinishSearch { match_count, .. } => finished = Some(match_count),
            _ => {}
        }
    }

    assert_eq!(finished, Some(200));
    assert_eq!(streamed.len(), 200);
    let unique: HashSet<PathBuf> = streamed.into_iter().collect();
    assert_eq!(unique, expected);
    assert_eq!(session.snapshot().len(), 200);
    assert!(session
        .snapshot()
        .entries()
        .iter()
        .all(|entry| entry.name.starts_with("group")));
}

#[test]
fn test_second_search_supersedes_first() {
    let dir = tempfile::tempdir().unwrap();
    for group in 0..4 {
        let sub = dir.path().join(format!("g{}", group));
        fs::create_dir(&sub).unwrap();
        for i in 0..50 {
            fs::write(sub.join(format!("alpha_{}.txt", i)), "a").unwrap();
            fs::write(sub.join(format!("beta_{}.txt", i)), "b").unwrap();
        }
    }

    let (mut session, events) = open(dir.path(), config());
    let root = session.dir().to_path_buf();
    session.search(&root, "alpha_");
    session.pump(Duration::from_millis(30));
    session.search(&root, "beta_");
    events.drain();

    let seen = pump_until(&mut session, &events, Duration::from_secs(20), |event| {
        matches!(event, UiEvent::FinishSearch { .. })
    });

    let mut finished = Vec::new();
    for event in &seen {
        match event {
            UiEvent::AppendSearchResults(entries) => {
                assert!(entries.iter().all(|entry| entry.name.contains("beta_")));
            }
            UiEvent::FinishSearch {
                pattern,
                match_count,
                ..
            } => finished.push((pattern.clone(), *match_count)),
            _ => {}
        }
    }
    assert_eq!(finished, vec![("beta_".to_string(), 200)]);
    assert_eq!(session.snapshot().len(), 200);

    // nothing from the first search trickles in afterwards
    session.pump(Duration::from_millis(200));
    assert!(!events
        .drain()
        .iter()
        .any(|event| matches!(event, UiEvent::AppendSearchResults(_) | UiEvent::FinishSearch { .. })));
}

#[test]
fn test_search_without_matches_reports_notice() {
    let (_root, d) = d_fixture();
    let (mut session, events) = open(&d, config());
    events.drain();
    session.search(&d, "nothing-here");

    let seen = pump_until(&mut session, &events, Duration::from_secs(10), |event| {
        matches!(event, UiEvent::FinishSearch { .. })
    });
    assert!(seen
        .iter()
        .any(|event| matches!(event, UiEvent::FinishSearch { match_count: 0, .. })));
    assert!(seen
        .iter()
        .any(|event| matches!(event, UiEvent::Message(text) if text.starts_with("No file matches"))));

    session.search(&d, "");
    assert_eq!(session.state().name(), "browsing");
}

#[test]
fn test_repeated_navigate_is_idempotent() {
    let (_root, d) = d_fixture();
    let (mut session, _events) = open(&d, config());

    let shape = |session: &Session| -> Vec<(PathBuf, EntryKind, u64, u64)> {
        session
            .snapshot()
            .entries()
            .iter()
            .map(|entry| (entry.path.clone(), entry.kind, entry.size_bytes, entry.mtime))
            .collect()
    };

    session.navigate(&d, None);
    let first = shape(&session);
    session.navigate(&d, None);
    assert_eq!(shape(&session), first);
    assert_eq!(session.snapshot().selected_index(), 0);
}

#[test]
fn test_external_change_triggers_refresh() {
    let (_root, d) = d_fixture();
    let (mut session, events) = open(&d, config());
    // let the watcher register before touching the directory
    std::thread::sleep(Duration::from_millis(300));
    events.drain();

    fs::write(d.join("fresh.txt"), "new").unwrap();
    pump_until(&mut session, &events, Duration::from_secs(10), |event| {
        matches!(event, UiEvent::MarkChanged(_))
    });

    assert!(session.snapshot().index_of(&d.join("fresh.txt")).is_some());
    assert_eq!(session.changed_paths(), vec![d.join("fresh.txt")]);
}

#[test]
fn test_compress_and_extract_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("project");
    fs::create_dir(&project).unwrap();
    fs::write(project.join("one.txt"), "1").unwrap();
    fs::write(project.join("two.txt"), "2").unwrap();

    let (mut session, events) = open(dir.path(), config());
    let root = session.dir().to_path_buf();
    session.compress_selected();
    session.handle_prompt_response("compress", PromptResponse::Text("project.zip".into()));

    let seen = pump_until(&mut session, &events, Duration::from_secs(10), |event| {
        matches!(event, UiEvent::Message(text) if text.starts_with("Compressed to"))
    });
    assert!(seen
        .iter()
        .any(|event| matches!(event, UiEvent::ArchiveProgress { percent: 100, .. })));
    assert_eq!(
        session.snapshot().selected_entry().unwrap().path,
        root.join("project.zip")
    );

    session.decompress_selected();
    session.handle_prompt_response("decompress", PromptResponse::Text("out".into()));
    pump_until(&mut session, &events, Duration::from_secs(10), |event| {
        matches!(event, UiEvent::Message(text) if text.starts_with("Extracted to"))
    });
    assert_eq!(
        fs::read_to_string(root.join("out/project/two.txt")).unwrap(),
        "2"
    );
}
