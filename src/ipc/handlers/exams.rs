use crate::ipc::helpers::{
    dispatch, get_optional_str, get_required_date, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{intervals_overlap, validate_time_range};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct BookedExam {
    id: String,
    offering_id: String,
    start_minute: i64,
    end_minute: i64,
    room_number: String,
}

fn room_exams(conn: &Connection, room: &str, date: &str) -> Result<Vec<BookedExam>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, offering_id, start_minute, end_minute, room_number
         FROM exam_slots
         WHERE room_number = ? AND date = ?",
    )?;
    let exams = stmt
        .query_map((room, date), |r| {
            Ok(BookedExam {
                id: r.get(0)?,
                offering_id: r.get(1)?,
                start_minute: r.get(2)?,
                end_minute: r.get(3)?,
                room_number: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(exams)
}

fn proctor_exams(
    conn: &Connection,
    faculty_id: &str,
    date: &str,
) -> Result<Vec<BookedExam>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.offering_id, e.start_minute, e.end_minute, e.room_number
         FROM exam_slots e
         JOIN course_offerings o ON o.id = e.offering_id
         WHERE o.faculty_id = ? AND e.date = ?",
    )?;
    let exams = stmt
        .query_map((faculty_id, date), |r| {
            Ok(BookedExam {
                id: r.get(0)?,
                offering_id: r.get(1)?,
                start_minute: r.get(2)?,
                end_minute: r.get(3)?,
                room_number: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(exams)
}

/// Same overlap discipline as the timetable, scoped to (room, date), plus a
/// proctor check: the offering's faculty cannot sit two exams at once.
fn exams_schedule(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;
    let date = get_required_date(params, "date")?;
    let start_minute = get_required_i64(params, "startMinute")?;
    let end_minute = get_required_i64(params, "endMinute")?;
    let room_number = get_required_str(params, "roomNumber")?;

    if !validate_time_range(start_minute, end_minute) {
        return Err(HandlerErr::bad_params(
            "startMinute must precede endMinute within one day",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let offering: Option<(String, String)> = tx
        .query_row(
            "SELECT semester_id, faculty_id FROM course_offerings WHERE id = ?",
            [&offering_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((semester_id, faculty_id)) = offering else {
        return Err(HandlerErr::not_found("offering not found"));
    };
    let room_known = tx
        .query_row(
            "SELECT 1 FROM classrooms WHERE room_number = ?",
            [&room_number],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !room_known {
        return Err(HandlerErr::not_found("classroom not found"));
    }

    for exam in room_exams(&tx, &room_number, &date)? {
        if intervals_overlap(start_minute, end_minute, exam.start_minute, exam.end_minute) {
            return Err(HandlerErr::with_details(
                "room_conflict",
                "room already hosts an overlapping exam on this date",
                json!({
                    "examId": exam.id,
                    "offeringId": exam.offering_id,
                    "startMinute": exam.start_minute,
                    "endMinute": exam.end_minute
                }),
            ));
        }
    }

    for exam in proctor_exams(&tx, &faculty_id, &date)? {
        if intervals_overlap(start_minute, end_minute, exam.start_minute, exam.end_minute) {
            return Err(HandlerErr::with_details(
                "faculty_conflict",
                "faculty already proctors an overlapping exam on this date",
                json!({
                    "examId": exam.id,
                    "offeringId": exam.offering_id,
                    "roomNumber": exam.room_number,
                    "startMinute": exam.start_minute,
                    "endMinute": exam.end_minute
                }),
            ));
        }
    }

    let exam_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO exam_slots(
            id, offering_id, semester_id, date, start_minute, end_minute, room_number)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &offering_id,
            &semester_id,
            &date,
            start_minute,
            end_minute,
            &room_number,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "examId": exam_id, "date": date }))
}

/// Idempotent: deleting a missing exam slot is a no-op.
fn exams_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let affected = conn
        .execute("DELETE FROM exam_slots WHERE id = ?", [&exam_id])
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "examId": exam_id, "affected": affected }))
}

fn exams_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let semester_id = get_optional_str(params, "semesterId");

    let base = "SELECT e.id, e.offering_id, c.code, e.date, e.start_minute, e.end_minute,
                       e.room_number
                FROM exam_slots e
                JOIN course_offerings o ON o.id = e.offering_id
                JOIN courses c ON c.id = o.course_id";
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "offeringId": r.get::<_, String>(1)?,
            "courseCode": r.get::<_, String>(2)?,
            "date": r.get::<_, String>(3)?,
            "startMinute": r.get::<_, i64>(4)?,
            "endMinute": r.get::<_, i64>(5)?,
            "roomNumber": r.get::<_, String>(6)?
        }))
    };

    let exams = if let Some(sid) = semester_id {
        let sql = format!("{base} WHERE e.semester_id = ? ORDER BY e.date, e.start_minute");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([&sid], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let sql = format!("{base} ORDER BY e.date, e.start_minute");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    Ok(json!({ "exams": exams }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.schedule" => Some(dispatch(state, req, exams_schedule)),
        "exams.delete" => Some(dispatch(state, req, exams_delete)),
        "exams.list" => Some(dispatch(state, req, exams_list)),
        _ => None,
    }
}
