use crate::ipc::helpers::{
    dispatch, get_required_i64, get_required_str, is_unique_violation, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Role-specific fields, selected by role at construction time. One user row
/// plus at most one profile variant row; never a loose bag of optional fields.
enum RoleProfile {
    Student {
        roll_number: String,
        department_id: String,
        first_name: String,
        last_name: String,
        current_semester: i64,
        batch_year: i64,
    },
    Faculty {
        department_id: String,
        qualification: Option<String>,
    },
    Admin,
}

fn parse_role_profile(
    role: &str,
    params: &serde_json::Value,
) -> Result<RoleProfile, HandlerErr> {
    let profile = params.get("profile").cloned().unwrap_or(json!({}));
    match role {
        "student" => {
            let current_semester = get_required_i64(&profile, "currentSemester")?;
            if !(1..=8).contains(&current_semester) {
                return Err(HandlerErr::bad_params(
                    "currentSemester must be between 1 and 8",
                ));
            }
            Ok(RoleProfile::Student {
                roll_number: get_required_str(&profile, "rollNumber")?,
                department_id: get_required_str(&profile, "departmentId")?,
                first_name: get_required_str(&profile, "firstName")?,
                last_name: get_required_str(&profile, "lastName")?,
                current_semester,
                batch_year: get_required_i64(&profile, "batchYear")?,
            })
        }
        "faculty" => Ok(RoleProfile::Faculty {
            department_id: get_required_str(&profile, "departmentId")?,
            qualification: profile
                .get("qualification")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        }),
        "admin" => Ok(RoleProfile::Admin),
        other => Err(HandlerErr::with_details(
            "bad_params",
            "role must be one of: student, faculty, admin",
            json!({ "role": other }),
        )),
    }
}

fn department_exists(conn: &Connection, department_id: &str) -> Result<bool, HandlerErr> {
    let found = conn
        .query_row(
            "SELECT 1 FROM departments WHERE id = ?",
            [department_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn users_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let role = get_required_str(params, "role")?.to_ascii_lowercase();
    let profile = parse_role_profile(&role, params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let user_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO users(id, name, role) VALUES(?, ?, ?)",
        (&user_id, &name, &role),
    )?;

    let mut result = json!({ "userId": user_id, "role": role });
    match profile {
        RoleProfile::Student {
            roll_number,
            department_id,
            first_name,
            last_name,
            current_semester,
            batch_year,
        } => {
            if !department_exists(&tx, &department_id)? {
                return Err(HandlerErr::not_found("department not found"));
            }
            let student_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO student_profiles(
                    id, user_id, roll_number, department_id,
                    first_name, last_name, current_semester, batch_year, current_status)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'ACTIVE')",
                (
                    &student_id,
                    &user_id,
                    &roll_number,
                    &department_id,
                    &first_name,
                    &last_name,
                    current_semester,
                    batch_year,
                ),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    HandlerErr::with_details(
                        "conflict",
                        "roll number already exists",
                        json!({ "rollNumber": roll_number }),
                    )
                } else {
                    HandlerErr::new("db_insert_failed", e.to_string())
                }
            })?;
            result["studentId"] = json!(student_id);
        }
        RoleProfile::Faculty {
            department_id,
            qualification,
        } => {
            if !department_exists(&tx, &department_id)? {
                return Err(HandlerErr::not_found("department not found"));
            }
            let faculty_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO faculty_profiles(id, user_id, department_id, qualification)
                 VALUES(?, ?, ?, ?)",
                (&faculty_id, &user_id, &department_id, &qualification),
            )?;
            result["facultyId"] = json!(faculty_id);
        }
        RoleProfile::Admin => {}
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    Ok(result)
}

fn users_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.role, sp.id, fp.id
         FROM users u
         LEFT JOIN student_profiles sp ON sp.user_id = u.id
         LEFT JOIN faculty_profiles fp ON fp.user_id = u.id
         ORDER BY u.name",
    )?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "role": r.get::<_, String>(2)?,
                "studentId": r.get::<_, Option<String>>(3)?,
                "facultyId": r.get::<_, Option<String>>(4)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "users": users }))
}

fn students_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT sp.id, sp.roll_number, sp.first_name, sp.last_name,
                sp.current_semester, sp.batch_year, sp.current_status, d.code
         FROM student_profiles sp
         JOIN departments d ON d.id = sp.department_id
         ORDER BY sp.roll_number",
    )?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "rollNumber": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "lastName": r.get::<_, String>(3)?,
                "currentSemester": r.get::<_, i64>(4)?,
                "batchYear": r.get::<_, i64>(5)?,
                "currentStatus": r.get::<_, String>(6)?,
                "departmentCode": r.get::<_, String>(7)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(dispatch(state, req, users_create)),
        "users.list" => Some(dispatch(state, req, users_list)),
        "students.list" => Some(dispatch(state, req, students_list)),
        _ => None,
    }
}
