use crate::ipc::helpers::{
    dispatch, get_optional_str, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{intervals_overlap, normalize_day, validate_time_range};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct BookedSlot {
    id: String,
    offering_id: String,
    start_minute: i64,
    end_minute: i64,
    room_number: String,
}

fn room_exists(conn: &Connection, room_number: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(
            "SELECT 1 FROM classrooms WHERE room_number = ?",
            [room_number],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Live, non-cancelled bookings for one room on one day.
fn room_slots(conn: &Connection, room: &str, day: &str) -> Result<Vec<BookedSlot>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, offering_id, start_minute, end_minute, room_number
         FROM timetable_slots
         WHERE room_number = ? AND day_of_week = ? AND is_cancelled = 0",
    )?;
    let slots = stmt
        .query_map((room, day), |r| {
            Ok(BookedSlot {
                id: r.get(0)?,
                offering_id: r.get(1)?,
                start_minute: r.get(2)?,
                end_minute: r.get(3)?,
                room_number: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(slots)
}

/// Live bookings taught by one faculty member on one day, across all rooms.
fn faculty_slots(
    conn: &Connection,
    faculty_id: &str,
    day: &str,
) -> Result<Vec<BookedSlot>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.offering_id, t.start_minute, t.end_minute, t.room_number
         FROM timetable_slots t
         JOIN course_offerings o ON o.id = t.offering_id
         WHERE o.faculty_id = ? AND t.day_of_week = ? AND t.is_cancelled = 0",
    )?;
    let slots = stmt
        .query_map((faculty_id, day), |r| {
            Ok(BookedSlot {
                id: r.get(0)?,
                offering_id: r.get(1)?,
                start_minute: r.get(2)?,
                end_minute: r.get(3)?,
                room_number: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(slots)
}

/// Conflict checks and the insert run in one transaction; a stale
/// `findFreeRooms` answer can never sneak an overlapping booking in.
fn schedule_slot(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_required_str(params, "offeringId")?;
    let day = normalize_day(&get_required_str(params, "dayOfWeek")?)
        .ok_or_else(|| HandlerErr::bad_params("dayOfWeek must be MONDAY..SATURDAY"))?;
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

    let faculty_id: Option<String> = tx
        .query_row(
            "SELECT faculty_id FROM course_offerings WHERE id = ?",
            [&offering_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(faculty_id) = faculty_id else {
        return Err(HandlerErr::not_found("offering not found"));
    };
    if !room_exists(&tx, &room_number)? {
        return Err(HandlerErr::not_found("classroom not found"));
    }

    for slot in room_slots(&tx, &room_number, &day)? {
        if intervals_overlap(start_minute, end_minute, slot.start_minute, slot.end_minute) {
            return Err(HandlerErr::with_details(
                "room_conflict",
                "room is already booked for an overlapping slot",
                json!({
                    "slotId": slot.id,
                    "offeringId": slot.offering_id,
                    "startMinute": slot.start_minute,
                    "endMinute": slot.end_minute
                }),
            ));
        }
    }
    for slot in faculty_slots(&tx, &faculty_id, &day)? {
        if intervals_overlap(start_minute, end_minute, slot.start_minute, slot.end_minute) {
            return Err(HandlerErr::with_details(
                "faculty_conflict",
                "faculty already teaches an overlapping slot",
                json!({
                    "slotId": slot.id,
                    "offeringId": slot.offering_id,
                    "roomNumber": slot.room_number,
                    "startMinute": slot.start_minute,
                    "endMinute": slot.end_minute
                }),
            ));
        }
    }

    let slot_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO timetable_slots(
            id, offering_id, day_of_week, start_minute, end_minute, room_number)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &slot_id,
            &offering_id,
            &day,
            start_minute,
            end_minute,
            &room_number,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "slotId": slot_id, "dayOfWeek": day }))
}

/// Advisory query: results can go stale between this read and a later
/// scheduleSlot, whose own check is authoritative.
fn find_free_rooms(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let day = normalize_day(&get_required_str(params, "dayOfWeek")?)
        .ok_or_else(|| HandlerErr::bad_params("dayOfWeek must be MONDAY..SATURDAY"))?;
    let start_minute = get_required_i64(params, "startMinute")?;
    let end_minute = get_required_i64(params, "endMinute")?;
    if !validate_time_range(start_minute, end_minute) {
        return Err(HandlerErr::bad_params(
            "startMinute must precede endMinute within one day",
        ));
    }

    let mut stmt = conn.prepare(
        "SELECT room_number, start_minute, end_minute
         FROM timetable_slots
         WHERE day_of_week = ? AND is_cancelled = 0",
    )?;
    let booked = stmt
        .query_map([&day], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut rooms_stmt = conn.prepare(
        "SELECT room_number, capacity, room_type FROM classrooms ORDER BY room_number",
    )?;
    let rooms = rooms_stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let free: Vec<serde_json::Value> = rooms
        .into_iter()
        .filter(|(room, _, _)| {
            !booked.iter().any(|(b_room, b_start, b_end)| {
                b_room == room && intervals_overlap(start_minute, end_minute, *b_start, *b_end)
            })
        })
        .map(|(room, capacity, room_type)| {
            json!({ "roomNumber": room, "capacity": capacity, "type": room_type })
        })
        .collect();

    Ok(json!({ "dayOfWeek": day, "freeRooms": free }))
}

/// Idempotent: cancelling a missing or already-cancelled slot is a no-op.
fn cancel_slot(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let affected = conn
        .execute(
            "UPDATE timetable_slots SET is_cancelled = 1 WHERE id = ? AND is_cancelled = 0",
            [&slot_id],
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "slotId": slot_id, "affected": affected }))
}

fn timetable_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let offering_id = get_optional_str(params, "offeringId");

    let base = "SELECT t.id, t.offering_id, c.code, t.day_of_week, t.start_minute,
                       t.end_minute, t.room_number, t.is_cancelled
                FROM timetable_slots t
                JOIN course_offerings o ON o.id = t.offering_id
                JOIN courses c ON c.id = o.course_id";
    let map_row = |r: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "offeringId": r.get::<_, String>(1)?,
            "courseCode": r.get::<_, String>(2)?,
            "dayOfWeek": r.get::<_, String>(3)?,
            "startMinute": r.get::<_, i64>(4)?,
            "endMinute": r.get::<_, i64>(5)?,
            "roomNumber": r.get::<_, String>(6)?,
            "isCancelled": r.get::<_, i64>(7)? != 0
        }))
    };

    let slots = if let Some(oid) = offering_id {
        let sql = format!("{base} WHERE t.offering_id = ? ORDER BY t.day_of_week, t.start_minute");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([&oid], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    } else {
        let sql = format!("{base} ORDER BY t.day_of_week, t.start_minute");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    Ok(json!({ "slots": slots }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.scheduleSlot" => Some(dispatch(state, req, schedule_slot)),
        "timetable.findFreeRooms" => Some(dispatch(state, req, find_free_rooms)),
        "timetable.cancelSlot" => Some(dispatch(state, req, cancel_slot)),
        "timetable.list" => Some(dispatch(state, req, timetable_list)),
        _ => None,
    }
}
