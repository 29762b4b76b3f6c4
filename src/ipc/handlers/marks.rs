use crate::grading;
use crate::ipc::helpers::{
    dispatch, get_required_f64, get_required_str, offering_exists,
    results_published_for_offering, student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const EXAM_TYPES: &[&str] = &[
    "INTERNAL_1",
    "INTERNAL_2",
    "MID_TERM",
    "FINAL",
    "PRACTICAL",
    "ASSIGNMENT",
];

/// Upsert keyed by (student, offering, examType): re-submitting a component
/// overwrites the earlier row, so totals can never be double-counted.
fn marks_record(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let offering_id = get_required_str(params, "offeringId")?;
    let exam_type = get_required_str(params, "examType")?.to_ascii_uppercase();
    let obtained = get_required_f64(params, "obtained")?;
    let max = get_required_f64(params, "max")?;

    if !EXAM_TYPES.contains(&exam_type.as_str()) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "unknown examType",
            json!({ "examType": exam_type, "allowed": EXAM_TYPES }),
        ));
    }
    if max <= 0.0 || obtained < 0.0 || obtained > max {
        return Err(HandlerErr::with_details(
            "invalid_score",
            "require 0 <= obtained <= max and max > 0",
            json!({ "obtained": obtained, "max": max }),
        ));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    if !offering_exists(conn, &offering_id)? {
        return Err(HandlerErr::not_found("offering not found"));
    }
    if results_published_for_offering(conn, &offering_id)? {
        return Err(HandlerErr::new(
            "results_published",
            "results for this semester are published; marks are frozen",
        ));
    }

    conn.execute(
        "INSERT INTO marks(id, student_id, offering_id, exam_type, marks_obtained, max_marks)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, offering_id, exam_type) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           max_marks = excluded.max_marks",
        (
            &Uuid::new_v4().to_string(),
            &student_id,
            &offering_id,
            &exam_type,
            obtained,
            max,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({
        "studentId": student_id,
        "offeringId": offering_id,
        "examType": exam_type,
        "obtained": obtained,
        "max": max
    }))
}

fn marks_course_percentage(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let offering_id = get_required_str(params, "offeringId")?;

    if !offering_exists(conn, &offering_id)? {
        return Err(HandlerErr::not_found("offering not found"));
    }

    let components = grading::component_rows(conn, &student_id, &offering_id)?;
    let total_obtained: f64 = components.iter().map(|c| c.marks_obtained).sum();
    let total_max: f64 = components.iter().map(|c| c.max_marks).sum();
    let percentage = grading::course_percentage(total_obtained, total_max);

    Ok(json!({
        "studentId": student_id,
        "offeringId": offering_id,
        "components": components,
        "totalObtained": total_obtained,
        "totalMax": total_max,
        "percentage": grading::round_off_2_decimals(percentage),
        "gradePoint": grading::grade_point(percentage)
    }))
}

/// Snapshot semantics: marks may be written concurrently with this read; the
/// report reflects the rows as of this query.
fn marks_sgpa(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let semester_id = get_required_str(params, "semesterId")?;

    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let semester_known = conn
        .query_row("SELECT 1 FROM semesters WHERE id = ?", [&semester_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !semester_known {
        return Err(HandlerErr::not_found("semester not found"));
    }

    let report = grading::sgpa_report(conn, &student_id, &semester_id)?;
    Ok(serde_json::to_value(report)
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?)
}

/// One-way transition; re-publishing an already-published semester is a
/// no-op. There is no unpublish.
fn results_publish(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = get_required_str(params, "semesterId")?;

    let known = conn
        .query_row("SELECT 1 FROM semesters WHERE id = ?", [&semester_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !known {
        return Err(HandlerErr::not_found("semester not found"));
    }

    conn.execute(
        "UPDATE semesters SET results_published = 1 WHERE id = ?",
        [&semester_id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(json!({ "semesterId": semester_id, "resultsPublished": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.record" => Some(dispatch(state, req, marks_record)),
        "marks.coursePercentage" => Some(dispatch(state, req, marks_course_percentage)),
        "marks.sgpa" => Some(dispatch(state, req, marks_sgpa)),
        "results.publish" => Some(dispatch(state, req, results_publish)),
        _ => None,
    }
}
