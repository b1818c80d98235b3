use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub total_questions: i64,
    pub attempted_questions: i64,
}

impl LevelProgress {
    pub fn new(total_questions: i64, attempted_questions: i64) -> Self {
        Self {
            total_questions,
            attempted_questions,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.total_questions > 0 && self.attempted_questions >= self.total_questions
    }

    /// A level with no questions is neither completed nor in progress.
    pub fn is_in_progress(&self) -> bool {
        !self.is_completed() && self.attempted_questions > 0
    }
}

/// Per-level counts for one student, keyed by level number.
pub type LevelStats = BTreeMap<u8, LevelProgress>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockState {
    pub completed_levels: Vec<u8>,
    pub in_progress_levels: Vec<u8>,
    pub unlocked_level: u8,
    pub level_progress: LevelStats,
}

impl UnlockState {
    pub fn is_unlocked(&self, level: u8) -> bool {
        (MIN_LEVEL..=self.unlocked_level).contains(&level)
    }
}

/// Levels unlock strictly in order: level N+1 opens only once level N is completed.
pub fn compute_unlock(stats: &LevelStats) -> UnlockState {
    let at = |level: u8| stats.get(&level).copied().unwrap_or_default();

    let completed_levels = (MIN_LEVEL..=MAX_LEVEL)
        .filter(|l| at(*l).is_completed())
        .collect::<Vec<_>>();
    let in_progress_levels = (MIN_LEVEL..=MAX_LEVEL)
        .filter(|l| at(*l).is_in_progress())
        .collect::<Vec<_>>();

    let mut unlocked_level = MIN_LEVEL;
    for level in MIN_LEVEL..MAX_LEVEL {
        if !at(level).is_completed() {
            break;
        }
        unlocked_level = level + 1;
    }

    UnlockState {
        completed_levels,
        in_progress_levels,
        unlocked_level,
        level_progress: stats.clone(),
    }
}

/// Aggregates the question bank against one student's attempts. Only levels that
/// have questions appear; a question attempted several times counts once.
pub fn load_level_stats(conn: &Connection, student_id: i64) -> rusqlite::Result<LevelStats> {
    let mut stmt = conn.prepare(
        "SELECT
           q.level,
           COUNT(DISTINCT q.id) AS total_questions,
           COUNT(DISTINCT a.question_id) AS attempted_questions
         FROM questions q
         LEFT JOIN attempts a
           ON a.question_id = q.id
          AND a.student_id = ?
         GROUP BY q.level
         ORDER BY q.level ASC",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            let level: i64 = r.get(0)?;
            let total: i64 = r.get(1)?;
            let attempted: i64 = r.get(2)?;
            Ok((level, LevelProgress::new(total, attempted)))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stats = LevelStats::new();
    for (level, progress) in rows {
        if let Ok(level) = u8::try_from(level) {
            stats.insert(level, progress);
        }
    }
    Ok(stats)
}
