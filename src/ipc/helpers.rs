use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

/// Handler-local error carried up to the JSON envelope. Codes are the wire
/// contract: `not_found`, `bad_params`, `conflict` subtypes and the
/// state-violation codes all surface here as snake_case strings.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<crate::grading::GradeError> for HandlerErr {
    fn from(e: crate::grading::GradeError) -> Self {
        // GradeError codes are already wire codes; keep the message.
        let code = match e.code.as_str() {
            "not_found" => "not_found",
            _ => "db_query_failed",
        };
        HandlerErr {
            code,
            message: e.message,
            details: e.details,
        }
    }
}

/// Every handler needs an open workspace; the guard and the Result-to-envelope
/// mapping live here so handler bodies stay plain `Result` functions.
pub fn dispatch(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// ISO date as stored (YYYY-MM-DD). Rejects anything chrono can't parse.
pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
        HandlerErr::with_details(
            "bad_params",
            format!("{} must be YYYY-MM-DD", key),
            json!({ "value": raw }),
        )
    })?;
    Ok(raw)
}

/// Role claims arrive pre-verified from the identity collaborator.
pub fn caller_is_admin(params: &serde_json::Value) -> bool {
    params
        .get("role")
        .and_then(|v| v.as_str())
        .map(|r| r.eq_ignore_ascii_case("admin"))
        .unwrap_or(false)
}

/// Single source of truth for "the current term".
pub fn active_semester_id(conn: &Connection) -> Result<Option<String>, HandlerErr> {
    let id = conn
        .query_row("SELECT id FROM semesters WHERE is_active = 1", [], |r| {
            r.get::<_, String>(0)
        })
        .optional()?;
    Ok(id)
}

pub fn offering_exists(conn: &Connection, offering_id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(
            "SELECT 1 FROM course_offerings WHERE id = ?",
            [offering_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(
            "SELECT 1 FROM student_profiles WHERE id = ?",
            [student_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Publish is a monotonic flag on the owning semester; every mark-mutating
/// operation checks it first.
pub fn results_published_for_offering(
    conn: &Connection,
    offering_id: &str,
) -> Result<bool, HandlerErr> {
    let published = conn
        .query_row(
            "SELECT s.results_published
             FROM course_offerings o
             JOIN semesters s ON s.id = o.semester_id
             WHERE o.id = ?",
            [offering_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(published.unwrap_or(0) != 0)
}
