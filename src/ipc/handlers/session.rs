use crate::db;
use crate::identity::{Actor, Role};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_db, require_role};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};

/// The first account of a workspace can be created without a session; after that
/// only admins add users.
fn users_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    if db::count_rows(conn, "users")? > 0 {
        require_role(state, Role::Admin)?;
    }
    let name = get_required_str(params, "name")?;
    let email = get_required_str(params, "email")?.to_ascii_lowercase();
    let role = Role::parse(&get_required_str(params, "role")?)
        .ok_or_else(|| HandlerErr::bad_params("role must be either 'admin' or 'student'"))?;

    if db::find_user_by_email(conn, &email)?.is_some() {
        return Err(HandlerErr::new("conflict", "email already registered")
            .with_details(json!({ "email": email })));
    }
    let id = db::insert_user(conn, &name, &email, role.as_str())
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({
        "user": { "id": id, "name": name, "email": email, "role": role }
    }))
}

// Identity only; credentials are verified upstream of this process.
fn session_sign_in(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let email = get_required_str(params, "email")?;
    let user = db::find_user_by_email(conn, &email)?
        .ok_or_else(|| HandlerErr::unauthorized("Invalid credentials"))?;
    let actor = Actor::from_user(user)
        .ok_or_else(|| HandlerErr::unauthorized("Invalid credentials"))?;

    tracing::info!(user_id = actor.id, role = actor.role.as_str(), "session started");
    let result = json!({ "user": actor });
    state.session = Some(actor);
    Ok(result)
}

fn handle_users_create(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, users_create(state, &req.params))
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, session_sign_in(state, &req.params))
}

fn handle_me(state: &mut AppState, req: &Request) -> Value {
    let result = match state.session.as_ref() {
        Some(actor) => Ok(json!({ "user": actor })),
        None => Err(HandlerErr::unauthorized("sign in first")),
    };
    respond(&req.id, result)
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> Value {
    let was_signed_in = state.session.take().is_some();
    respond(&req.id, Ok(json!({ "signedOut": was_signed_in })))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "session.signIn" => Some(handle_sign_in(state, req)),
        "session.me" => Some(handle_me(state, req)),
        "session.signOut" => Some(handle_sign_out(state, req)),
        _ => None,
    }
}
