use rusqlite::Connection;
use serde_json::Value;

use crate::identity::{Actor, Role};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;
use crate::progress::{MAX_LEVEL, MIN_LEVEL};
use crate::reconcile::parse_level;

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_role(state: &AppState, role: Role) -> Result<&Actor, HandlerErr> {
    let actor = state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::unauthorized("sign in first"))?;
    if actor.role != role {
        return Err(HandlerErr::new("forbidden", "Forbidden")
            .with_details(serde_json::json!({ "requiredRole": role.as_str() })));
    }
    Ok(actor)
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Accepts a JSON number or a numeric string. Returns `None` for anything else.
pub fn as_integer(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn level_error() -> HandlerErr {
    HandlerErr::bad_params("level must be an integer between 1 and 6")
}

/// Absent, `null` and `""` mean no level filter.
pub fn get_optional_level(params: &Value, key: &str) -> Result<Option<u8>, HandlerErr> {
    let Some(v) = params.get(key) else {
        return Ok(None);
    };
    if v.is_null() || v.as_str().map(|s| s.trim().is_empty()).unwrap_or(false) {
        return Ok(None);
    }
    if let Some(s) = v.as_str() {
        return parse_level(s).map(Some).ok_or_else(level_error);
    }
    let n = as_integer(v).ok_or_else(level_error)?;
    if n < i64::from(MIN_LEVEL) || n > i64::from(MAX_LEVEL) {
        return Err(level_error());
    }
    Ok(Some(n as u8))
}

pub fn get_required_level(params: &Value, key: &str) -> Result<u8, HandlerErr> {
    get_optional_level(params, key)?.ok_or_else(level_error)
}

pub fn get_positive_id(params: &Value, key: &str, label: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(as_integer)
        .filter(|n| *n > 0)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a positive integer", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn level_params_accept_numbers_and_numeric_strings() {
        let params = json!({ "a": 3, "b": "4", "c": "", "d": 9, "e": "x", "f": 2.0 });
        assert_eq!(get_optional_level(&params, "a").ok(), Some(Some(3)));
        assert_eq!(get_optional_level(&params, "b").ok(), Some(Some(4)));
        assert_eq!(get_optional_level(&params, "c").ok(), Some(None));
        assert_eq!(get_optional_level(&params, "missing").ok(), Some(None));
        assert_eq!(get_optional_level(&params, "f").ok(), Some(Some(2)));
        assert!(get_optional_level(&params, "d").is_err());
        assert!(get_optional_level(&params, "e").is_err());
        assert!(get_required_level(&params, "c").is_err());
    }

    #[test]
    fn string_levels_parse_like_uploaded_levels() {
        let params = json!({ "a": "3.0", "b": " 5 ", "c": "2.5", "d": "7", "e": "0.0" });
        assert_eq!(get_required_level(&params, "a").ok(), Some(3));
        assert_eq!(get_required_level(&params, "b").ok(), Some(5));
        assert!(get_required_level(&params, "c").is_err());
        assert!(get_required_level(&params, "d").is_err());
        assert!(get_required_level(&params, "e").is_err());
    }

    #[test]
    fn positive_ids_reject_zero_and_negatives() {
        let params = json!({ "a": 7, "b": 0, "c": -1, "d": "12" });
        assert_eq!(get_positive_id(&params, "a", "id").ok(), Some(7));
        assert_eq!(get_positive_id(&params, "d", "id").ok(), Some(12));
        assert!(get_positive_id(&params, "b", "id").is_err());
        assert!(get_positive_id(&params, "c", "id").is_err());
        assert!(get_positive_id(&params, "z", "id").is_err());
    }
}
