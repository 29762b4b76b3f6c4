use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("campus.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS departments(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credits INTEGER NOT NULL,
            semester_number INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            UNIQUE(code, academic_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            results_published INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            room_number TEXT PRIMARY KEY,
            capacity INTEGER NOT NULL,
            room_type TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            role TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_profiles(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            roll_number TEXT NOT NULL UNIQUE,
            department_id TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            current_semester INTEGER NOT NULL CHECK(current_semester BETWEEN 1 AND 8),
            batch_year INTEGER NOT NULL,
            current_status TEXT NOT NULL DEFAULT 'ACTIVE',
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_profiles_department
         ON student_profiles(department_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_profiles_semester
         ON student_profiles(current_semester, current_status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty_profiles(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL UNIQUE,
            department_id TEXT NOT NULL,
            qualification TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(department_id) REFERENCES departments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_offerings(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            section TEXT NOT NULL,
            room_number TEXT,
            capacity INTEGER NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty_profiles(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            UNIQUE(course_id, semester_id, section)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_semester ON course_offerings(semester_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_offerings_faculty ON course_offerings(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'ENROLLED',
            grade TEXT,
            enrollment_date TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES student_profiles(id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            UNIQUE(student_id, offering_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_offering
         ON enrollments(offering_id, status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            marked_by TEXT NOT NULL,
            is_locked INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(student_id) REFERENCES student_profiles(id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            UNIQUE(student_id, offering_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_offering_date
         ON attendance(offering_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            marks_obtained REAL NOT NULL,
            max_marks REAL NOT NULL,
            FOREIGN KEY(student_id) REFERENCES student_profiles(id),
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            UNIQUE(student_id, offering_id, exam_type)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_offering ON marks(offering_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_slots(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            day_of_week TEXT NOT NULL,
            start_minute INTEGER NOT NULL,
            end_minute INTEGER NOT NULL,
            room_number TEXT NOT NULL,
            is_cancelled INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            FOREIGN KEY(room_number) REFERENCES classrooms(room_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_room_day
         ON timetable_slots(room_number, day_of_week)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_offering ON timetable_slots(offering_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_slots(
            id TEXT PRIMARY KEY,
            offering_id TEXT NOT NULL,
            semester_id TEXT NOT NULL,
            date TEXT NOT NULL,
            start_minute INTEGER NOT NULL,
            end_minute INTEGER NOT NULL,
            room_number TEXT NOT NULL,
            FOREIGN KEY(offering_id) REFERENCES course_offerings(id),
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            FOREIGN KEY(room_number) REFERENCES classrooms(room_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_slots_room_date ON exam_slots(room_number, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_slots_offering ON exam_slots(offering_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_type TEXT NOT NULL,
            amount_due REAL NOT NULL,
            amount_paid REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'PENDING',
            due_date TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES student_profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            fee_id TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT NOT NULL,
            transaction_id TEXT NOT NULL,
            paid_at TEXT NOT NULL,
            FOREIGN KEY(fee_id) REFERENCES fees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_fee ON payments(fee_id)",
        [],
    )?;

    Ok(conn)
}
