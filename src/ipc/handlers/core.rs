use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use std::path::PathBuf;

fn workspace_path(state: &AppState) -> Option<String> {
    state
        .workspace
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
}

fn health(state: &AppState) -> Value {
    json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": workspace_path(state),
        "signedIn": state.session.is_some()
    })
}

fn workspace_select(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(params, "path")?);
    let conn = db::open_db(&path).map_err(|e| {
        tracing::error!(workspace = %path.display(), error = ?e, "workspace open failed");
        HandlerErr::new("db_open_failed", format!("{e:?}"))
    })?;

    tracing::info!(workspace = %path.display(), "workspace opened");
    state.workspace = Some(path);
    state.db = Some(conn);
    // Sessions belong to the previous workspace's user table.
    state.session = None;
    Ok(json!({ "workspacePath": workspace_path(state) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "health" => Some(respond(&req.id, Ok(health(state)))),
        "workspace.select" => Some(respond(&req.id, workspace_select(state, &req.params))),
        _ => None,
    }
}
