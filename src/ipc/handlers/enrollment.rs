use crate::ipc::helpers::{
    active_semester_id, dispatch, get_optional_str, get_required_str, is_unique_violation,
    student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Capacity check and insert run inside one transaction, and the enrolled
/// count is re-derived from ENROLLED rows at that moment. The UNIQUE
/// (student_id, offering_id) index is the store-level backstop for retries.
fn enroll(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let offering_id = get_required_str(params, "offeringId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    if !student_exists(&tx, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let offering: Option<(String, i64)> = tx
        .query_row(
            "SELECT semester_id, capacity FROM course_offerings WHERE id = ?",
            [&offering_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((semester_id, capacity)) = offering else {
        return Err(HandlerErr::not_found("offering not found"));
    };

    let active = active_semester_id(&tx)?;
    if active.as_deref() != Some(semester_id.as_str()) {
        return Err(HandlerErr::with_details(
            "semester_not_active",
            "offering does not belong to the active semester",
            json!({ "semesterId": semester_id }),
        ));
    }

    let existing: Option<(String, String)> = tx
        .query_row(
            "SELECT id, status FROM enrollments WHERE student_id = ? AND offering_id = ?",
            (&student_id, &offering_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    if let Some((_, status)) = &existing {
        if status != "DROPPED" {
            return Err(HandlerErr::with_details(
                "duplicate_enrollment",
                "student is already enrolled in this offering",
                json!({ "status": status }),
            ));
        }
    }

    let enrolled_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM enrollments WHERE offering_id = ? AND status = 'ENROLLED'",
        [&offering_id],
        |r| r.get(0),
    )?;
    if enrolled_count >= capacity {
        return Err(HandlerErr::with_details(
            "capacity_exceeded",
            "offering is full",
            json!({ "capacity": capacity, "enrolledCount": enrolled_count }),
        ));
    }

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let enrollment_id = match existing {
        // A dropped enrollment is revived in place; the unique pair means
        // there is never a second row for the same student and offering.
        Some((id, _)) => {
            tx.execute(
                "UPDATE enrollments SET status = 'ENROLLED', enrollment_date = ? WHERE id = ?",
                (&today, &id),
            )?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO enrollments(id, student_id, offering_id, status, enrollment_date)
                 VALUES(?, ?, ?, 'ENROLLED', ?)",
                (&id, &student_id, &offering_id, &today),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    HandlerErr::new(
                        "duplicate_enrollment",
                        "student is already enrolled in this offering",
                    )
                } else {
                    HandlerErr::new("db_insert_failed", e.to_string())
                }
            })?;
            id
        }
    };

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(json!({
        "enrollmentId": enrollment_id,
        "status": "ENROLLED",
        "enrollmentDate": today
    }))
}

/// Dropping an already-dropped enrollment is a no-op, not an error.
fn drop_enrollment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let offering_id = get_required_str(params, "offeringId")?;

    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, status FROM enrollments WHERE student_id = ? AND offering_id = ?",
            (&student_id, &offering_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((enrollment_id, status)) = existing else {
        return Err(HandlerErr::not_found("enrollment not found"));
    };

    if status != "DROPPED" {
        conn.execute(
            "UPDATE enrollments SET status = 'DROPPED' WHERE id = ?",
            [&enrollment_id],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }

    Ok(json!({ "enrollmentId": enrollment_id, "status": "DROPPED" }))
}

fn enrollment_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_optional_str(params, "offeringId");
    let student_id = get_optional_str(params, "studentId");

    let (filter, key) = match (&offering_id, &student_id) {
        (Some(oid), _) => ("e.offering_id = ?", oid.clone()),
        (None, Some(sid)) => ("e.student_id = ?", sid.clone()),
        (None, None) => {
            return Err(HandlerErr::bad_params(
                "provide offeringId or studentId",
            ))
        }
    };

    let sql = format!(
        "SELECT e.id, e.student_id, e.offering_id, e.status, e.grade, e.enrollment_date,
                sp.roll_number
         FROM enrollments e
         JOIN student_profiles sp ON sp.id = e.student_id
         WHERE {filter}
         ORDER BY sp.roll_number"
    );
    let mut stmt = conn.prepare(&sql)?;
    let enrollments = stmt
        .query_map([&key], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "offeringId": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "grade": r.get::<_, Option<String>>(4)?,
                "enrollmentDate": r.get::<_, String>(5)?,
                "rollNumber": r.get::<_, String>(6)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "enrollments": enrollments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.enroll" => Some(dispatch(state, req, enroll)),
        "enrollment.drop" => Some(dispatch(state, req, drop_enrollment)),
        "enrollment.list" => Some(dispatch(state, req, enrollment_list)),
        _ => None,
    }
}
