use crate::config::SessionConfig;
use crate::host::{HostedSession, SessionHost};
use crate::session::Session;
use crate::types::{BatchRenameItem, SortKey};
use crate::ui::{PromptResponse, UiEvent};
use mlua::prelude::*;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::time::Duration;

static HOST: Lazy<SessionHost> = Lazy::new(SessionHost::new);

fn with_hosted<R>(id: u64, f: impl FnOnce(&mut HostedSession) -> R) -> LuaResult<R> {
    HOST.with(id, f).map_err(to_lua_error)
}

fn with_session<R>(id: u64, f: impl FnOnce(&mut Session) -> R) -> LuaResult<R> {
    with_hosted(id, |hosted| f(&mut hosted.session))
}

fn to_lua_error(err: crate::error::Error) -> LuaError {
    LuaError::RuntimeError(err.to_string())
}

/// 1-based Lua index to 0-based.
fn index(lua_index: usize) -> usize {
    lua_index.saturating_sub(1)
}

pub fn new_session(_: &Lua, (dir, config_toml): (String, Option<String>)) -> LuaResult<u64> {
    let config = match config_toml {
        Some(source) => SessionConfig::from_toml_str(&source).map_err(to_lua_error)?,
        None => SessionConfig::default(),
    };
    HOST.open(Path::new(&dir), config).map_err(to_lua_error)
}

pub fn close_session(_: &Lua, id: u64) -> LuaResult<bool> {
    HOST.close(id).map_err(to_lua_error)
}

/// Applies worker results for up to `timeout_ms` and returns queued UI events.
pub fn poll(_: &Lua, (id, timeout_ms): (u64, Option<u64>)) -> LuaResult<Vec<UiEvent>> {
    with_hosted(id, |hosted| {
        hosted
            .session
            .pump(Duration::from_millis(timeout_ms.unwrap_or(0)));
        hosted.events.drain()
    })
}

pub fn respond(_: &Lua, (id, tag, value): (u64, String, LuaValue)) -> LuaResult<()> {
    let response = match value {
        LuaValue::Nil => PromptResponse::Cancelled,
        LuaValue::Boolean(confirmed) => PromptResponse::Confirmed(confirmed),
        LuaValue::String(text) => PromptResponse::Text(text.to_string_lossy()),
        other => {
            return Err(LuaError::RuntimeError(format!(
                "Unsupported prompt answer of type {}",
                other.type_name()
            )))
        }
    };
    with_session(id, |session| session.handle_prompt_response(&tag, response))
}

pub fn sort_by(_: &Lua, (id, key): (u64, String)) -> LuaResult<()> {
    let key = SortKey::parse(&key)
        .ok_or_else(|| LuaError::RuntimeError(format!("Unknown sort key '{}'", key)))?;
    with_session(id, |session| session.sort_by(key))
}

pub fn init_tracing(_: &Lua, (log_file, level): (String, Option<String>)) -> LuaResult<String> {
    crate::log::init_tracing(Path::new(&log_file), level.as_deref().unwrap_or("info"))
        .map(|path| path.to_string_lossy().into_owned())
        .map_err(LuaError::RuntimeError)
}

#[mlua::lua_module]
fn dirbuf(lua: &Lua) -> LuaResult<LuaTable> {
    let exports = lua.create_table()?;
    exports.set("new_session", lua.create_function(new_session)?)?;
    exports.set("close_session", lua.create_function(close_session)?)?;
    exports.set("poll", lua.create_function(poll)?)?;
    exports.set("respond", lua.create_function(respond)?)?;
    exports.set("sort_by", lua.create_function(sort_by)?)?;
    exports.set("init_tracing", lua.create_function(init_tracing)?)?;

    exports.set(
        "navigate",
        lua.create_function(|_, (id, dir, select): (u64, String, Option<String>)| {
            with_session(id, |session| {
                let select = select.map(PathBuf::from);
                session.navigate(Path::new(&dir), select.as_deref())
            })
        })?,
    )?;
    exports.set(
        "navigate_up",
        lua.create_function(|_, (id, file): (u64, String)| {
            with_session(id, |session| session.navigate_up(Path::new(&file)))
        })?,
    )?;
    exports.set(
        "request_navigate",
        lua.create_function(|_, (id, path): (u64, String)| {
            with_session(id, |session| session.request_navigate(Path::new(&path)))
        })?,
    )?;
    exports.set(
        "search",
        lua.create_function(|_, (id, dir, pattern): (u64, String, String)| {
            with_session(id, |session| session.search(Path::new(&dir), &pattern))
        })?,
    )?;
    exports.set(
        "narrow",
        lua.create_function(|_, (id, rule): (u64, String)| {
            with_session(id, |session| session.request_narrow(&rule))
        })?,
    )?;
    exports.set(
        "select_index",
        lua.create_function(|_, (id, i): (u64, usize)| {
            with_session(id, |session| session.select_index(index(i)))
        })?,
    )?;
    exports.set(
        "toggle_mark",
        lua.create_function(|_, (id, i): (u64, usize)| {
            with_session(id, |session| session.toggle_mark(index(i)))
        })?,
    )?;
    exports.set(
        "set_preview_enabled",
        lua.create_function(|_, (id, enabled): (u64, bool)| {
            with_session(id, |session| session.set_preview_enabled(enabled))
        })?,
    )?;
    exports.set(
        "apply_batch_rename",
        lua.create_function(|_, (id, items): (u64, Vec<BatchRenameItem>)| {
            with_session(id, |session| session.apply_batch_rename(&items))
        })?,
    )?;
    exports.set(
        "copy_dir_path",
        lua.create_function(|_, id: u64| {
            with_session(id, |session| {
                session.copy_dir_path().to_string_lossy().into_owned()
            })
        })?,
    )?;

    let simple: [(&str, fn(&mut Session)); 16] = [
        ("refresh", Session::refresh),
        ("toggle_hidden", Session::toggle_hidden),
        ("mark_all", Session::mark_all),
        ("unmark_all", Session::unmark_all),
        ("new_file", Session::new_file),
        ("new_directory", Session::new_directory),
        ("rename_selected", Session::rename_selected),
        ("delete_selected", Session::delete_selected),
        ("delete_marked", Session::delete_marked),
        ("move_marked", Session::move_marked),
        ("copy_marked", Session::copy_marked),
        ("compress_selected", Session::compress_selected),
        ("decompress_selected", Session::decompress_selected),
        ("batch_rename", Session::begin_batch_rename),
        ("shutdown", Session::shutdown),
        ("cancel_search", |session: &mut Session| {
            let dir = session.dir().to_path_buf();
            session.navigate(&dir, None)
        }),
    ];
    for (name, action) in simple {
        exports.set(
            name,
            lua.create_function(move |_, id: u64| with_session(id, action))?,
        )?;
    }

    Ok(exports)
}
