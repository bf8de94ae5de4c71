use dirbuf::{EventQueue, Session, SessionConfig, UiEvent};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

fn describe(event: &UiEvent) -> String {
    match event {
        UiEvent::ChangePath {
            dir,
            entries,
            selected,
        } => format!(
            "change_path {} ({} entries, selected {})",
            dir.display(),
            entries.len(),
            selected
        ),
        UiEvent::AppendSearchResults(entries) => format!("append_search_results +{}", entries.len()),
        UiEvent::FinishSearch {
            pattern,
            match_count,
            ..
        } => format!("finish_search '{}' -> {} matches", pattern, match_count),
        UiEvent::SetPreview(preview) => format!(
            "set_preview {} [{}] {}",
            preview.path.display(),
            preview.content_kind(),
            preview.mime
        ),
        UiEvent::MarkChanged(indices) => format!("mark_changed {:?}", indices),
        UiEvent::ClearChanged(indices) => format!("clear_changed {:?}", indices),
        UiEvent::UpdateInfoLine(text) => format!("update_info_line {}", text),
        UiEvent::Message(text) => format!("message {}", text),
        UiEvent::Prompt(request) => format!("prompt {} {}", request.tag, request.message),
        UiEvent::BatchRename(items) => format!("batch_rename {} items", items.len()),
        UiEvent::ArchiveProgress { task, percent } => {
            format!("archive_progress task {} {}%", task, percent)
        }
    }
}

fn main() {
    let mut args = std::env::args().skip(1);
    let dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let config_path = args.next().map(PathBuf::from);

    let log_file = std::env::temp_dir().join("dirbuf-watch-session.log");
    match dirbuf::log::init_tracing(&log_file, "debug") {
        Ok(path) => println!("Logging to {}", path.display()),
        Err(e) => eprintln!("Logging disabled: {}", e),
    }

    let config = match config_path {
        Some(path) => match SessionConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => SessionConfig::default(),
    };

    let events = EventQueue::new();
    let mut session = match Session::new(&dir, config, Box::new(events.clone())) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to open session: {}", e);
            eprintln!("Failed to open {}: {}", dir.display(), e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Failed to install Ctrl-C handler: {}", e);
    }

    println!("Watching {} (Ctrl-C to stop)", session.dir().display());
    while running.load(Ordering::SeqCst) {
        session.pump(Duration::from_millis(200));
        for event in events.drain() {
            println!("{}", describe(&event));
        }
    }

    info!("watch_session shutting down");
    session.shutdown();
    println!("Stopped");
}
