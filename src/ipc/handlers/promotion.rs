use crate::ipc::helpers::{dispatch, get_optional_str, get_required_i64, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const TERMINAL_SEMESTER: i64 = 8;

/// Bulk term-boundary transition. Each student's update is independent; a
/// failure on one record is reported without blocking the rest.
fn students_promote(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from_semester = get_required_i64(params, "fromSemester")?;
    let department_id = get_optional_str(params, "departmentId");

    if !(1..=TERMINAL_SEMESTER).contains(&from_semester) {
        return Err(HandlerErr::bad_params("fromSemester must be between 1 and 8"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let matching: Vec<String> = if let Some(dept) = &department_id {
        let mut stmt = tx.prepare(
            "SELECT id FROM student_profiles
             WHERE current_status = 'ACTIVE' AND current_semester = ? AND department_id = ?
             ORDER BY roll_number",
        )?;
        let rows = stmt
            .query_map((from_semester, dept), |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let mut stmt = tx.prepare(
            "SELECT id FROM student_profiles
             WHERE current_status = 'ACTIVE' AND current_semester = ?
             ORDER BY roll_number",
        )?;
        let rows = stmt
            .query_map([from_semester], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let graduating = from_semester == TERMINAL_SEMESTER;
    let mut promoted = 0_usize;
    let mut failures: Vec<serde_json::Value> = Vec::new();
    for student_id in &matching {
        let result = if graduating {
            // Terminal semester: status flips, the semester number stays.
            tx.execute(
                "UPDATE student_profiles SET current_status = 'GRADUATED' WHERE id = ?",
                [student_id],
            )
        } else {
            tx.execute(
                "UPDATE student_profiles SET current_semester = current_semester + 1
                 WHERE id = ?",
                [student_id],
            )
        };
        match result {
            Ok(_) => promoted += 1,
            Err(e) => failures.push(json!({
                "studentId": student_id,
                "error": { "code": "db_update_failed", "message": e.to_string() }
            })),
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "fromSemester": from_semester,
        "graduated": graduating,
        "promoted": promoted,
        "failures": failures
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.promote" => Some(dispatch(state, req, students_promote)),
        _ => None,
    }
}
