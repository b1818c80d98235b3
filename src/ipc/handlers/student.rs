use crate::db;
use crate::identity::Role;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_positive_id, get_required_level, require_db, require_role};
use crate::ipc::types::{AppState, Request};
use crate::progress::{self, UnlockState, MAX_LEVEL, MIN_LEVEL};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;

fn unlock_state(conn: &Connection, student_id: i64) -> Result<UnlockState, HandlerErr> {
    let stats = progress::load_level_stats(conn, student_id)?;
    Ok(progress::compute_unlock(&stats))
}

fn ensure_unlocked(conn: &Connection, student_id: i64, level: u8) -> Result<(), HandlerErr> {
    let state = unlock_state(conn, student_id)?;
    if state.is_unlocked(level) {
        return Ok(());
    }
    Err(
        HandlerErr::new("level_locked", "complete the previous levels first").with_details(
            json!({ "level": level, "unlockedLevel": state.unlocked_level }),
        ),
    )
}

fn levels(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    require_role(state, Role::Student)?;
    let counts = db::level_question_counts(conn)?
        .into_iter()
        .collect::<HashMap<i64, i64>>();
    let levels = (MIN_LEVEL..=MAX_LEVEL)
        .map(|level| {
            let question_count = counts.get(&i64::from(level)).copied().unwrap_or(0);
            json!({
                "level": level,
                "questionCount": question_count,
                "hasQuestions": question_count > 0
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({ "levels": levels }))
}

fn progress_state(state: &AppState) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_role(state, Role::Student)?;
    let unlock = unlock_state(conn, actor.id)?;
    serde_json::to_value(unlock).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn question_json(id: i64, question_text: String, level: i64) -> Value {
    json!({ "id": id, "questionText": question_text, "level": level })
}

fn questions_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_role(state, Role::Student)?;
    let level = get_required_level(params, "level")?;
    ensure_unlocked(conn, actor.id, level)?;

    let mut stmt = conn.prepare(
        "SELECT id, question_text, level
         FROM questions
         WHERE level = ?
         ORDER BY id ASC",
    )?;
    let questions = stmt
        .query_map([i64::from(level)], |r| {
            Ok(question_json(r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    if questions.is_empty() {
        return Err(HandlerErr::not_found("No questions found for this level"));
    }
    Ok(json!({ "questions": questions }))
}

fn questions_random(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_role(state, Role::Student)?;
    let level = get_required_level(params, "level")?;
    ensure_unlocked(conn, actor.id, level)?;

    let question = conn
        .query_row(
            "SELECT id, question_text, level
             FROM questions
             WHERE level = ?
             ORDER BY RANDOM()
             LIMIT 1",
            [i64::from(level)],
            |r| Ok(question_json(r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("No question found for this level"))?;

    Ok(json!({ "question": question }))
}

fn attempts_submit(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_role(state, Role::Student)?;
    let question_id = get_positive_id(params, "questionId", "questionId")?;
    let student_answer = params
        .get("studentAnswer")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("studentAnswer is required"))?;

    let level: i64 = conn
        .query_row(
            "SELECT level FROM questions WHERE id = ? LIMIT 1",
            [question_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("Question not found"))?;
    let level = u8::try_from(level).unwrap_or(MAX_LEVEL);
    ensure_unlocked(conn, actor.id, level)?;

    conn.execute(
        "INSERT INTO attempts(student_id, question_id, student_answer, submitted_at)
         VALUES(?, ?, ?, ?)",
        (actor.id, question_id, student_answer, db::now_timestamp()),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let attempt_id = conn.last_insert_rowid();

    tracing::debug!(student_id = actor.id, question_id, attempt_id, "attempt submitted");
    Ok(json!({ "message": "Attempt submitted", "attemptId": attempt_id }))
}

fn attempts_comparison(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = require_db(state)?;
    let actor = require_role(state, Role::Student)?;
    let attempt_id = get_positive_id(params, "attemptId", "attempt id")?;

    let row = conn
        .query_row(
            "SELECT
               a.id,
               a.student_id,
               a.student_answer,
               a.submitted_at,
               q.id,
               q.question_text,
               q.answer_text,
               q.level
             FROM attempts a
             JOIN questions q ON q.id = a.question_id
             WHERE a.id = ?
             LIMIT 1",
            [attempt_id],
            |r| {
                let owner: i64 = r.get(1)?;
                let comparison = json!({
                    "attemptId": r.get::<_, i64>(0)?,
                    "studentAnswer": r.get::<_, String>(2)?,
                    "submittedAt": r.get::<_, String>(3)?,
                    "questionId": r.get::<_, i64>(4)?,
                    "question": r.get::<_, String>(5)?,
                    "correctAnswer": r.get::<_, String>(6)?,
                    "level": r.get::<_, i64>(7)?
                });
                Ok((owner, comparison))
            },
        )
        .optional()?;

    let Some((owner, comparison)) = row else {
        return Err(HandlerErr::not_found("Attempt not found"));
    };
    if owner != actor.id {
        return Err(HandlerErr::new("forbidden", "Forbidden"));
    }
    Ok(json!({ "comparison": comparison }))
}

fn handle_levels(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, levels(state))
}

fn handle_progress(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, progress_state(state))
}

fn handle_questions_list(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, questions_list(state, &req.params))
}

fn handle_questions_random(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, questions_random(state, &req.params))
}

fn handle_attempts_submit(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, attempts_submit(state, &req.params))
}

fn handle_attempts_comparison(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, attempts_comparison(state, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "student.levels" => Some(handle_levels(state, req)),
        "student.progress" => Some(handle_progress(state, req)),
        "student.questions.list" => Some(handle_questions_list(state, req)),
        "student.questions.random" => Some(handle_questions_random(state, req)),
        "student.attempts.submit" => Some(handle_attempts_submit(state, req)),
        "student.attempts.comparison" => Some(handle_attempts_comparison(state, req)),
        _ => None,
    }
}
