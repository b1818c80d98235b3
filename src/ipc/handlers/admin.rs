use crate::identity::Role;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_level, get_optional_str, require_db, require_role};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::upload::{self, RawRow, UploadError, UploadMode};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::{json, Value};

const SUBMISSIONS_LIMIT: i64 = 300;

impl From<UploadError> for HandlerErr {
    fn from(e: UploadError) -> Self {
        let code = e.code();
        match e {
            UploadError::NoValidRows(report) => HandlerErr::new(code, "No valid rows found in CSV")
                .with_details(json!({ "report": *report })),
            // The cause is logged by the engine; callers only learn that the save failed.
            UploadError::Storage(_) => HandlerErr::new(code, "Failed to save questions"),
            other => HandlerErr::new(code, other.to_string()),
        }
    }
}

/// Exactly one upload source: `csvText`, `inPath` (a CSV file) or `rows` (JSON objects).
fn read_upload_rows(params: &Value, max_bytes: usize) -> Result<Vec<RawRow>, HandlerErr> {
    if let Some(rows) = params.get("rows") {
        return Ok(upload::rows_from_json(rows, max_bytes)?);
    }
    if let Some(text) = params.get("csvText").and_then(|v| v.as_str()) {
        return Ok(upload::parse_csv(text.as_bytes(), max_bytes)?);
    }
    if let Some(path) = get_optional_str(params, "inPath") {
        let bytes = std::fs::read(&path).map_err(|e| {
            HandlerErr::new("parse_failed", e.to_string()).with_details(json!({ "path": path }))
        })?;
        return Ok(upload::parse_csv(&bytes, max_bytes)?);
    }
    Err(HandlerErr::bad_params(
        "CSV file is required (csvText, inPath or rows)",
    ))
}

fn questions_upload(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_role(state, Role::Admin)?;
    let mode = match get_optional_str(params, "mode") {
        Some(m) => UploadMode::parse(&m)?,
        None => state.config.default_upload_mode(),
    };
    let rows = read_upload_rows(params, state.config.max_upload_bytes)?;

    let report = reconcile::reconcile(conn, &rows, mode, actor.id)?;
    let message = if report.inserted_count > 0 {
        "Upload processed"
    } else {
        "Upload processed with no new inserts"
    };
    Ok(json!({ "message": message, "report": report }))
}

fn questions_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    require_role(state, Role::Admin)?;
    let level = get_optional_level(params, "level")?;

    let mut sql = String::from(
        "SELECT q.id, q.question_text, q.answer_text, q.level, q.created_at, u.name, q.upload_id
         FROM questions q
         JOIN users u ON q.created_by = u.id",
    );
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(level) = level {
        sql.push_str(" WHERE q.level = ?");
        binds.push(SqlValue::Integer(i64::from(level)));
    }
    sql.push_str(" ORDER BY q.created_at DESC, q.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let questions = stmt
        .query_map(params_from_iter(binds), |r| {
            let id: i64 = r.get(0)?;
            let question_text: String = r.get(1)?;
            let answer_text: String = r.get(2)?;
            let level: i64 = r.get(3)?;
            let created_at: String = r.get(4)?;
            let created_by_name: String = r.get(5)?;
            let upload_id: Option<String> = r.get(6)?;
            Ok(json!({
                "id": id,
                "questionText": question_text,
                "answerText": answer_text,
                "level": level,
                "createdAt": created_at,
                "createdByName": created_by_name,
                "uploadId": upload_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "questions": questions }))
}

fn submissions_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    require_role(state, Role::Admin)?;
    let level = get_optional_level(params, "level")?;
    let student_email = get_optional_str(params, "studentEmail");

    let mut where_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(level) = level {
        where_parts.push("q.level = ?");
        binds.push(SqlValue::Integer(i64::from(level)));
    }
    if let Some(email) = student_email {
        where_parts.push("LOWER(u.email) LIKE LOWER(?)");
        binds.push(SqlValue::Text(format!("%{}%", email)));
    }

    let mut sql = String::from(
        "SELECT
           a.id,
           a.student_answer,
           a.submitted_at,
           u.name,
           u.email,
           q.level,
           q.question_text,
           q.answer_text
         FROM attempts a
         JOIN users u ON a.student_id = u.id
         JOIN questions q ON a.question_id = q.id",
    );
    if !where_parts.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_parts.join(" AND "));
    }
    sql.push_str(" ORDER BY a.submitted_at DESC, a.id DESC LIMIT ?");
    binds.push(SqlValue::Integer(SUBMISSIONS_LIMIT));

    let mut stmt = conn.prepare(&sql)?;
    let submissions = stmt
        .query_map(params_from_iter(binds), |r| {
            let attempt_id: i64 = r.get(0)?;
            let student_answer: String = r.get(1)?;
            let submitted_at: String = r.get(2)?;
            let student_name: String = r.get(3)?;
            let student_email: String = r.get(4)?;
            let level: i64 = r.get(5)?;
            let question_text: String = r.get(6)?;
            let correct_answer: String = r.get(7)?;
            Ok(json!({
                "attemptId": attempt_id,
                "studentAnswer": student_answer,
                "submittedAt": submitted_at,
                "studentName": student_name,
                "studentEmail": student_email,
                "level": level,
                "questionText": question_text,
                "correctAnswer": correct_answer
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    Ok(json!({ "submissions": submissions }))
}

fn handle_questions_upload(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, questions_upload(state, &req.params))
}

fn handle_questions_list(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, questions_list(state, &req.params))
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, submissions_list(state, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "admin.questions.upload" => Some(handle_questions_upload(state, req)),
        "admin.questions.list" => Some(handle_questions_list(state, req)),
        "admin.submissions.list" => Some(handle_submissions_list(state, req)),
        _ => None,
    }
}
