use crate::ipc::helpers::{
    caller_is_admin, dispatch, get_optional_str, get_required_date, get_required_str,
    offering_exists, student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ATTENDANCE_STATUSES: &[&str] = &["PRESENT", "ABSENT", "LATE", "EXCUSED"];

struct RecordOutcome {
    student_id: String,
    error: Option<(&'static str, String)>,
}

fn mark_one(
    conn: &Connection,
    offering_id: &str,
    date: &str,
    marked_by: &str,
    admin: bool,
    record: &serde_json::Value,
) -> Result<String, HandlerErr> {
    let student_id = get_required_str(record, "studentId")?;
    let status = get_required_str(record, "status")?.to_ascii_uppercase();
    if !ATTENDANCE_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::with_details(
            "invalid_status",
            "status must be one of: PRESENT, ABSENT, LATE, EXCUSED",
            json!({ "status": status }),
        ));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    // Locked rows are immutable to non-admin callers; check before the
    // upsert since ON CONFLICT would happily overwrite them.
    let locked: Option<i64> = conn
        .query_row(
            "SELECT is_locked FROM attendance
             WHERE student_id = ? AND offering_id = ? AND date = ?",
            (&student_id, offering_id, date),
            |r| r.get(0),
        )
        .optional()?;
    if locked.unwrap_or(0) != 0 && !admin {
        return Err(HandlerErr::new(
            "attendance_locked",
            "attendance for this date is locked",
        ));
    }

    conn.execute(
        "INSERT INTO attendance(id, student_id, offering_id, date, status, marked_by)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, offering_id, date) DO UPDATE SET
           status = excluded.status,
           marked_by = excluded.marked_by",
        (
            &Uuid::new_v4().to_string(),
            &student_id,
            offering_id,
            date,
            &status,
            marked_by,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(student_id)
}

/// Batch upsert keyed by (student, offering, date). A failing record is
/// reported in the result list while the rest of the batch still commits.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;
    let date = get_required_date(params, "date")?;
    let marked_by = get_required_str(params, "markedBy")?;
    let admin = caller_is_admin(params);
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };

    if !offering_exists(conn, &offering_id)? {
        return Err(HandlerErr::not_found("offering not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut outcomes: Vec<RecordOutcome> = Vec::with_capacity(records.len());
    for record in records {
        match mark_one(&tx, &offering_id, &date, &marked_by, admin, record) {
            Ok(student_id) => outcomes.push(RecordOutcome {
                student_id,
                error: None,
            }),
            Err(e) => outcomes.push(RecordOutcome {
                student_id: record
                    .get("studentId")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                error: Some((e.code, e.message)),
            }),
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let marked = outcomes.iter().filter(|o| o.error.is_none()).count();
    let results: Vec<serde_json::Value> = outcomes
        .into_iter()
        .map(|o| match o.error {
            None => json!({ "studentId": o.student_id, "ok": true }),
            Some((code, message)) => json!({
                "studentId": o.student_id,
                "ok": false,
                "error": { "code": code, "message": message }
            }),
        })
        .collect();

    Ok(json!({ "marked": marked, "results": results }))
}

/// Admin/scheduled-job entry point; idempotent.
fn attendance_lock(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;
    let date = get_required_date(params, "date")?;
    if !caller_is_admin(params) {
        return Err(HandlerErr::new(
            "forbidden",
            "attendance.lock requires the admin role",
        ));
    }
    if !offering_exists(conn, &offering_id)? {
        return Err(HandlerErr::not_found("offering not found"));
    }

    let locked = conn
        .execute(
            "UPDATE attendance SET is_locked = 1 WHERE offering_id = ? AND date = ?",
            (&offering_id, &date),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "offeringId": offering_id, "date": date, "lockedCount": locked }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;
    let date = get_optional_str(params, "date");

    let base = "SELECT a.student_id, sp.roll_number, a.date, a.status, a.marked_by, a.is_locked
                FROM attendance a
                JOIN student_profiles sp ON sp.id = a.student_id";
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "studentId": r.get::<_, String>(0)?,
            "rollNumber": r.get::<_, String>(1)?,
            "date": r.get::<_, String>(2)?,
            "status": r.get::<_, String>(3)?,
            "markedBy": r.get::<_, String>(4)?,
            "isLocked": r.get::<_, i64>(5)? != 0
        }))
    };

    let records = if let Some(d) = date {
        let sql = format!("{base} WHERE a.offering_id = ? AND a.date = ? ORDER BY sp.roll_number");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map((&offering_id, &d), map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let sql = format!("{base} WHERE a.offering_id = ? ORDER BY a.date, sp.roll_number");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([&offering_id], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.mark" => Some(dispatch(state, req, attendance_mark)),
        "attendance.lock" => Some(dispatch(state, req, attendance_lock)),
        "attendance.list" => Some(dispatch(state, req, attendance_list)),
        _ => None,
    }
}
