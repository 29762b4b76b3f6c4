use crate::ipc::helpers::{
    dispatch, get_required_date, get_required_i64, get_required_str, is_unique_violation,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const ROOM_TYPES: &[&str] = &["LECTURE_HALL", "LAB", "SEMINAR_HALL", "AUDITORIUM"];

fn departments_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;

    let department_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO departments(id, code, name) VALUES(?, ?, ?)",
        (&department_id, &code, &name),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::with_details(
                "conflict",
                "department code already exists",
                json!({ "code": code }),
            )
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
        }
    })?;

    Ok(json!({ "departmentId": department_id }))
}

fn departments_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare("SELECT id, code, name FROM departments ORDER BY code")?;
    let departments = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "departments": departments }))
}

fn courses_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let credits = get_required_i64(params, "credits")?;
    let semester_number = get_required_i64(params, "semesterNumber")?;
    let academic_year = get_required_str(params, "academicYear")?;

    if credits <= 0 {
        return Err(HandlerErr::bad_params("credits must be a positive integer"));
    }
    if !(1..=8).contains(&semester_number) {
        return Err(HandlerErr::bad_params(
            "semesterNumber must be between 1 and 8",
        ));
    }

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, code, name, credits, semester_number, academic_year)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &course_id,
            &code,
            &name,
            credits,
            semester_number,
            &academic_year,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::with_details(
                "conflict",
                "course code already exists for this academic year",
                json!({ "code": code, "academicYear": academic_year }),
            )
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
        }
    })?;

    Ok(json!({ "courseId": course_id }))
}

fn courses_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, credits, semester_number, academic_year
         FROM courses
         ORDER BY academic_year, code",
    )?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "credits": r.get::<_, i64>(3)?,
                "semesterNumber": r.get::<_, i64>(4)?,
                "academicYear": r.get::<_, String>(5)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "courses": courses }))
}

fn semesters_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let name = get_required_str(params, "name")?;
    let academic_year = get_required_str(params, "academicYear")?;
    let start_date = get_required_date(params, "startDate")?;
    let end_date = get_required_date(params, "endDate")?;

    if start_date >= end_date {
        return Err(HandlerErr::bad_params("startDate must precede endDate"));
    }

    let semester_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO semesters(id, code, name, academic_year, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &semester_id,
            &code,
            &name,
            &academic_year,
            &start_date,
            &end_date,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::with_details(
                "conflict",
                "semester code already exists",
                json!({ "code": code }),
            )
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
        }
    })?;

    Ok(json!({ "semesterId": semester_id }))
}

/// Activating one semester deactivates all others; the pair runs in one
/// transaction so no two rows can end up active.
fn semesters_activate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = get_required_str(params, "semesterId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let exists = tx
        .query_row("SELECT 1 FROM semesters WHERE id = ?", [&semester_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("semester not found"));
    }

    tx.execute("UPDATE semesters SET is_active = 0 WHERE is_active = 1", [])?;
    tx.execute(
        "UPDATE semesters SET is_active = 1 WHERE id = ?",
        [&semester_id],
    )?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "semesterId": semester_id, "isActive": true }))
}

fn semesters_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, academic_year, start_date, end_date, is_active, results_published
         FROM semesters
         ORDER BY start_date",
    )?;
    let semesters = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "academicYear": r.get::<_, String>(3)?,
                "startDate": r.get::<_, String>(4)?,
                "endDate": r.get::<_, String>(5)?,
                "isActive": r.get::<_, i64>(6)? != 0,
                "resultsPublished": r.get::<_, i64>(7)? != 0
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "semesters": semesters }))
}

fn classrooms_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let room_number = get_required_str(params, "roomNumber")?;
    let capacity = get_required_i64(params, "capacity")?;
    let room_type = get_required_str(params, "type")?.to_ascii_uppercase();

    if capacity <= 0 {
        return Err(HandlerErr::bad_params("capacity must be positive"));
    }
    if !ROOM_TYPES.contains(&room_type.as_str()) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "type must be one of: LECTURE_HALL, LAB, SEMINAR_HALL, AUDITORIUM",
            json!({ "type": room_type }),
        ));
    }

    conn.execute(
        "INSERT INTO classrooms(room_number, capacity, room_type) VALUES(?, ?, ?)",
        (&room_number, capacity, &room_type),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::with_details(
                "conflict",
                "room number already exists",
                json!({ "roomNumber": room_number }),
            )
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
        }
    })?;

    Ok(json!({ "roomNumber": room_number }))
}

fn classrooms_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT room_number, capacity, room_type FROM classrooms ORDER BY room_number",
    )?;
    let classrooms = stmt
        .query_map([], |r| {
            Ok(json!({
                "roomNumber": r.get::<_, String>(0)?,
                "capacity": r.get::<_, i64>(1)?,
                "type": r.get::<_, String>(2)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classrooms": classrooms }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "departments.create" => Some(dispatch(state, req, departments_create)),
        "departments.list" => Some(dispatch(state, req, departments_list)),
        "courses.create" => Some(dispatch(state, req, courses_create)),
        "courses.list" => Some(dispatch(state, req, courses_list)),
        "semesters.create" => Some(dispatch(state, req, semesters_create)),
        "semesters.activate" => Some(dispatch(state, req, semesters_activate)),
        "semesters.list" => Some(dispatch(state, req, semesters_list)),
        "classrooms.create" => Some(dispatch(state, req, classrooms_create)),
        "classrooms.list" => Some(dispatch(state, req, classrooms_list)),
        _ => None,
    }
}
