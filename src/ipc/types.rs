use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::QuizConfig;
use crate::identity::Actor;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: QuizConfig,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Actor>,
}

impl AppState {
    pub fn new(config: QuizConfig) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            session: None,
        }
    }
}
