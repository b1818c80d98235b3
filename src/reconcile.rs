//! Question-bank reconciliation: validate uploaded rows, drop duplicates (within the
//! upload and against stored questions), then apply inserts in one transaction,
//! optionally wiping the bank first.

use rusqlite::{Connection, Transaction};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

use crate::db;
use crate::progress::{MAX_LEVEL, MIN_LEVEL};
use crate::upload::{RawRow, UploadError, UploadMode};

pub const REASON_QUESTION_REQUIRED: &str = "question is required";
pub const REASON_ANSWER_REQUIRED: &str = "answer is required";
pub const REASON_BAD_LEVEL: &str = "level must be an integer between 1 and 6";
pub const REASON_BATCH_DUPLICATE: &str = "duplicate question in uploaded CSV for the same level";
pub const REASON_STORE_DUPLICATE: &str = "question already exists in database for this level";

/// First data row of an upload, counting the header as row 1.
const FIRST_DATA_ROW: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowIssue {
    pub row_number: usize,
    pub reason: String,
    pub row: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub upload_id: String,
    pub mode: UploadMode,
    pub total_rows: usize,
    pub inserted_count: usize,
    pub deleted_attempts_count: i64,
    pub deleted_questions_count: i64,
    pub duplicate_count: usize,
    pub failed_count: usize,
    pub failed_rows: Vec<RowIssue>,
    pub duplicate_rows: Vec<RowIssue>,
}

impl UploadReport {
    fn new(mode: UploadMode, total_rows: usize) -> Self {
        Self {
            upload_id: Uuid::new_v4().to_string(),
            mode,
            total_rows,
            inserted_count: 0,
            deleted_attempts_count: 0,
            deleted_questions_count: 0,
            duplicate_count: 0,
            failed_count: 0,
            failed_rows: Vec::new(),
            duplicate_rows: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.duplicate_rows.sort_by_key(|r| r.row_number);
        self.duplicate_count = self.duplicate_rows.len();
        self.failed_count = self.failed_rows.len() + self.duplicate_rows.len();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRow {
    pub row_number: usize,
    pub question_text: String,
    pub answer_text: String,
    pub level: u8,
}

impl ValidRow {
    fn issue(&self, reason: &str) -> RowIssue {
        RowIssue {
            row_number: self.row_number,
            reason: reason.to_string(),
            row: json!({
                "question": self.question_text,
                "answer": self.answer_text,
                "level": self.level,
            }),
        }
    }
}

/// Identity of a question within the bank: normalized text plus level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    text: String,
    level: u8,
}

impl DedupKey {
    pub fn new(question_text: &str, level: u8) -> Self {
        let lowered = question_text.to_lowercase();
        Self {
            text: lowered.split_whitespace().collect::<Vec<_>>().join(" "),
            level,
        }
    }
}

/// Parses a level the way the upload form accepts it: an integral number in 1..=6,
/// so "3", " 3 " and "3.0" are all level 3.
pub fn parse_level(raw: &str) -> Option<u8> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let n = match s.parse::<i64>() {
        Ok(n) => n,
        Err(_) => {
            let f = s.parse::<f64>().ok()?;
            if !f.is_finite() || f.fract() != 0.0 {
                return None;
            }
            f as i64
        }
    };
    if n < i64::from(MIN_LEVEL) || n > i64::from(MAX_LEVEL) {
        return None;
    }
    u8::try_from(n).ok()
}

pub fn validate_row(row: &RawRow, row_number: usize) -> Result<ValidRow, &'static str> {
    let question = row.field("question").trim();
    let answer = row.field("answer").trim();
    if question.is_empty() {
        return Err(REASON_QUESTION_REQUIRED);
    }
    if answer.is_empty() {
        return Err(REASON_ANSWER_REQUIRED);
    }
    let level = parse_level(row.field("level")).ok_or(REASON_BAD_LEVEL)?;
    Ok(ValidRow {
        row_number,
        question_text: question.to_string(),
        answer_text: answer.to_string(),
        level,
    })
}

/// Keeps the first occurrence of each key in row order; later ones go to `duplicates`.
pub fn dedupe_batch(rows: Vec<ValidRow>, duplicates: &mut Vec<RowIssue>) -> Vec<ValidRow> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(DedupKey::new(&row.question_text, row.level)) {
            duplicates.push(row.issue(REASON_BATCH_DUPLICATE));
            continue;
        }
        kept.push(row);
    }
    kept
}

/// Runs one upload against the question bank.
///
/// Row problems are returned as data in the report. Whole-upload problems (no rows,
/// no valid rows, storage failure) are errors; a storage failure rolls back every
/// delete and insert made by this call.
pub fn reconcile(
    conn: &Connection,
    rows: &[RawRow],
    mode: UploadMode,
    actor_id: i64,
) -> Result<UploadReport, UploadError> {
    if rows.is_empty() {
        return Err(UploadError::NoRows);
    }

    let mut report = UploadReport::new(mode, rows.len());
    let mut valid = Vec::new();
    for (idx, raw) in rows.iter().enumerate() {
        let row_number = idx + FIRST_DATA_ROW;
        match validate_row(raw, row_number) {
            Ok(v) => valid.push(v),
            Err(reason) => report.failed_rows.push(RowIssue {
                row_number,
                reason: reason.to_string(),
                row: raw.to_json(),
            }),
        }
    }
    if valid.is_empty() {
        return Err(UploadError::NoValidRows(Box::new(report.finish())));
    }

    let candidates = dedupe_batch(valid, &mut report.duplicate_rows);

    let tx = conn.unchecked_transaction()?;
    if let Err(e) = apply(&tx, &candidates, actor_id, &mut report) {
        let _ = tx.rollback();
        tracing::error!(error = %e, upload_id = %report.upload_id, "question upload rolled back");
        return Err(UploadError::Storage(e));
    }
    if let Err(e) = tx.commit() {
        tracing::error!(error = %e, upload_id = %report.upload_id, "question upload commit failed");
        return Err(UploadError::Storage(e));
    }

    let report = report.finish();
    tracing::info!(
        upload_id = %report.upload_id,
        mode = report.mode.as_str(),
        total = report.total_rows,
        inserted = report.inserted_count,
        duplicates = report.duplicate_count,
        failed = report.failed_rows.len(),
        "question upload applied"
    );
    Ok(report)
}

/// Keys of the stored questions at the levels this upload touches. Folding happens
/// here rather than in SQL because SQLite's `LOWER` only folds ASCII.
fn stored_keys(tx: &Transaction, candidates: &[ValidRow]) -> rusqlite::Result<HashSet<DedupKey>> {
    let levels = candidates.iter().map(|r| r.level).collect::<BTreeSet<_>>();
    let mut stmt = tx.prepare("SELECT question_text FROM questions WHERE level = ?")?;
    let mut keys = HashSet::new();
    for level in levels {
        let texts = stmt
            .query_map([i64::from(level)], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        keys.extend(texts.iter().map(|t| DedupKey::new(t, level)));
    }
    Ok(keys)
}

fn apply(
    tx: &Transaction,
    candidates: &[ValidRow],
    actor_id: i64,
    report: &mut UploadReport,
) -> rusqlite::Result<()> {
    if report.mode == UploadMode::Replace {
        report.deleted_attempts_count = db::count_rows(tx, "attempts")?;
        report.deleted_questions_count = db::count_rows(tx, "questions")?;
        // Attempts reference questions, so they go first.
        tx.execute("DELETE FROM attempts", [])?;
        tx.execute("DELETE FROM questions", [])?;
    }

    let now = db::now_timestamp();
    let mut stored = stored_keys(tx, candidates)?;
    let mut insert = tx.prepare(
        "INSERT INTO questions(question_text, answer_text, level, created_by, upload_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
    )?;

    for row in candidates {
        if !stored.insert(DedupKey::new(&row.question_text, row.level)) {
            report.duplicate_rows.push(row.issue(REASON_STORE_DUPLICATE));
            continue;
        }
        insert.execute((
            &row.question_text,
            &row.answer_text,
            i64::from(row.level),
            actor_id,
            &report.upload_id,
            &now,
        ))?;
        report.inserted_count += 1;
    }
    Ok(())
}
