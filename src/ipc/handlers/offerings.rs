use crate::ipc::helpers::{
    dispatch, get_optional_str, get_required_i64, get_required_str, is_unique_violation,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()?;
    Ok(found.is_some())
}

fn offerings_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let faculty_id = get_required_str(params, "facultyId")?;
    let semester_id = get_required_str(params, "semesterId")?;
    let section = get_required_str(params, "section")?;
    let capacity = get_required_i64(params, "capacity")?;
    let room_number = get_optional_str(params, "roomNumber");

    if capacity <= 0 {
        return Err(HandlerErr::bad_params("capacity must be positive"));
    }
    if !row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", &course_id)? {
        return Err(HandlerErr::not_found("course not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM faculty_profiles WHERE id = ?", &faculty_id)? {
        return Err(HandlerErr::not_found("faculty not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM semesters WHERE id = ?", &semester_id)? {
        return Err(HandlerErr::not_found("semester not found"));
    }

    let offering_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO course_offerings(
            id, course_id, faculty_id, semester_id, section, room_number, capacity)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &offering_id,
            &course_id,
            &faculty_id,
            &semester_id,
            &section,
            &room_number,
            capacity,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::with_details(
                "conflict",
                "a section of this course already exists in this semester",
                json!({ "courseId": course_id, "semesterId": semester_id, "section": section }),
            )
        } else {
            HandlerErr::new("db_insert_failed", e.to_string())
        }
    })?;

    Ok(json!({ "offeringId": offering_id }))
}

fn offerings_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = get_optional_str(params, "semesterId");

    // Enrolled counts are always derived live from ENROLLED rows, never cached.
    let base = "SELECT o.id, c.code, c.name, c.credits, o.section, o.room_number, o.capacity,
                       o.semester_id, o.faculty_id,
                       (SELECT COUNT(*) FROM enrollments e
                        WHERE e.offering_id = o.id AND e.status = 'ENROLLED') AS enrolled_count
                FROM course_offerings o
                JOIN courses c ON c.id = o.course_id";

    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "courseCode": r.get::<_, String>(1)?,
            "courseName": r.get::<_, String>(2)?,
            "credits": r.get::<_, i64>(3)?,
            "section": r.get::<_, String>(4)?,
            "roomNumber": r.get::<_, Option<String>>(5)?,
            "capacity": r.get::<_, i64>(6)?,
            "semesterId": r.get::<_, String>(7)?,
            "facultyId": r.get::<_, String>(8)?,
            "enrolledCount": r.get::<_, i64>(9)?
        }))
    };

    let offerings = if let Some(sid) = semester_id {
        let sql = format!("{base} WHERE o.semester_id = ? ORDER BY c.code, o.section");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([&sid], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let sql = format!("{base} ORDER BY c.code, o.section");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    Ok(json!({ "offerings": offerings }))
}

/// Deletion is blocked while dependent academic records exist. Grades and
/// attendance are records of fact; they are never cascaded away.
fn offerings_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;

    if !row_exists(conn, "SELECT 1 FROM course_offerings WHERE id = ?", &offering_id)? {
        return Err(HandlerErr::not_found("offering not found"));
    }

    let dependents: [(&str, &str); 5] = [
        ("enrollments", "SELECT COUNT(*) FROM enrollments WHERE offering_id = ?"),
        ("attendance", "SELECT COUNT(*) FROM attendance WHERE offering_id = ?"),
        ("marks", "SELECT COUNT(*) FROM marks WHERE offering_id = ?"),
        ("timetableSlots", "SELECT COUNT(*) FROM timetable_slots WHERE offering_id = ?"),
        ("examSlots", "SELECT COUNT(*) FROM exam_slots WHERE offering_id = ?"),
    ];
    for (name, sql) in dependents {
        let count: i64 = conn.query_row(sql, [&offering_id], |r| r.get(0))?;
        if count > 0 {
            return Err(HandlerErr::with_details(
                "conflict",
                "offering has dependent records; delete is blocked",
                json!({ "table": name, "count": count }),
            ));
        }
    }

    conn.execute("DELETE FROM course_offerings WHERE id = ?", [&offering_id])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "offeringId": offering_id, "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "offerings.create" => Some(dispatch(state, req, offerings_create)),
        "offerings.list" => Some(dispatch(state, req, offerings_list)),
        "offerings.delete" => Some(dispatch(state, req, offerings_delete)),
        _ => None,
    }
}
