use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn next_id() -> String {
    static NEXT: AtomicU32 = AtomicU32::new(1);
    format!("r{}", NEXT.fetch_add(1, Ordering::SeqCst))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let id = next_id();
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"]
        .as_str()
        .expect("error code")
        .to_string()
}

struct Seeded {
    semester_id: String,
    faculty_id: String,
    student_id: String,
    // CS401: 4 credits, CS402: 3 credits, CS403: 3 credits (never graded)
    offering_a: String,
    offering_b: String,
    offering_c: String,
}

fn make_offering(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    faculty_id: &str,
    semester_id: &str,
    code: &str,
    credits: i64,
) -> String {
    let course = request_ok(
        stdin,
        reader,
        "courses.create",
        json!({
            "code": code,
            "name": format!("Course {code}"),
            "credits": credits,
            "semesterNumber": 4,
            "academicYear": "2026-27"
        }),
    );
    let offering = request_ok(
        stdin,
        reader,
        "offerings.create",
        json!({
            "courseId": course["courseId"].as_str().expect("courseId"),
            "facultyId": faculty_id,
            "semesterId": semester_id,
            "section": "A",
            "capacity": 60
        }),
    );
    offering["offeringId"].as_str().expect("offeringId").to_string()
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let workspace = temp_dir("campus-grading");
    request_ok(
        stdin,
        reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let dept = request_ok(
        stdin,
        reader,
        "departments.create",
        json!({ "code": "CS", "name": "Computer Science" }),
    );
    let department_id = dept["departmentId"].as_str().expect("departmentId");

    let sem = request_ok(
        stdin,
        reader,
        "semesters.create",
        json!({
            "code": "2026-FALL",
            "name": "Fall 2026",
            "academicYear": "2026-27",
            "startDate": "2026-08-01",
            "endDate": "2026-12-15"
        }),
    );
    let semester_id = sem["semesterId"].as_str().expect("semesterId").to_string();
    request_ok(
        stdin,
        reader,
        "semesters.activate",
        json!({ "semesterId": semester_id }),
    );

    let fac = request_ok(
        stdin,
        reader,
        "users.create",
        json!({
            "name": "Prof. Menon",
            "role": "faculty",
            "profile": { "departmentId": department_id, "qualification": "PhD" }
        }),
    );
    let faculty_id = fac["facultyId"].as_str().expect("facultyId").to_string();

    let student = request_ok(
        stdin,
        reader,
        "users.create",
        json!({
            "name": "Asha Verma",
            "role": "student",
            "profile": {
                "rollNumber": "CS23-042",
                "departmentId": department_id,
                "firstName": "Asha",
                "lastName": "Verma",
                "currentSemester": 4,
                "batchYear": 2023
            }
        }),
    );

    let offering_a = make_offering(stdin, reader, &faculty_id, &semester_id, "CS401", 4);
    let offering_b = make_offering(stdin, reader, &faculty_id, &semester_id, "CS402", 3);
    let offering_c = make_offering(stdin, reader, &faculty_id, &semester_id, "CS403", 3);

    Seeded {
        semester_id,
        faculty_id,
        student_id: student["studentId"].as_str().expect("studentId").to_string(),
        offering_a,
        offering_b,
        offering_c,
    }
}

fn record(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seeded: &Seeded,
    offering: &str,
    exam_type: &str,
    obtained: f64,
    max: f64,
) {
    request_ok(
        stdin,
        reader,
        "marks.record",
        json!({
            "studentId": seeded.student_id,
            "offeringId": offering,
            "examType": exam_type,
            "obtained": obtained,
            "max": max
        }),
    );
}

#[test]
fn sgpa_is_credit_weighted_and_skips_ungraded_courses() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    // CS401 (4 credits): 45/50 + 40/50 = 85/100 -> 85% -> grade point 9.
    let a = seeded.offering_a.clone();
    record(&mut stdin, &mut reader, &seeded, &a, "MID_TERM", 45.0, 50.0);
    record(&mut stdin, &mut reader, &seeded, &a, "FINAL", 40.0, 50.0);
    // CS402 (3 credits): 55/100 -> 55% -> grade point 6.
    let b = seeded.offering_b.clone();
    record(&mut stdin, &mut reader, &seeded, &b, "FINAL", 55.0, 100.0);

    let pct = request_ok(
        &mut stdin,
        &mut reader,
        "marks.coursePercentage",
        json!({ "studentId": seeded.student_id, "offeringId": seeded.offering_a }),
    );
    assert_eq!(pct["percentage"], 85.0);
    assert_eq!(pct["gradePoint"], 9.0);
    assert_eq!(pct["components"].as_array().expect("components").len(), 2);

    // (9*4 + 6*3) / (4+3) = 54/7 = 7.71. CS403 has no marks rows and is
    // excluded entirely rather than zero-weighted.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "marks.sgpa",
        json!({ "studentId": seeded.student_id, "semesterId": seeded.semester_id }),
    );
    assert_eq!(report["sgpa"], 7.71);
    assert_eq!(report["totalCredits"], 7);
    assert_eq!(report["courses"].as_array().expect("courses").len(), 2);
    assert!(report["courses"]
        .as_array()
        .expect("courses")
        .iter()
        .all(|c| c["offeringId"] != seeded.offering_c.as_str()));
}

#[test]
fn resubmitting_a_component_overwrites_rather_than_inflates() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    let a = seeded.offering_a.clone();
    record(&mut stdin, &mut reader, &seeded, &a, "MID_TERM", 30.0, 50.0);
    record(&mut stdin, &mut reader, &seeded, &a, "MID_TERM", 45.0, 50.0);

    let pct = request_ok(
        &mut stdin,
        &mut reader,
        "marks.coursePercentage",
        json!({ "studentId": seeded.student_id, "offeringId": seeded.offering_a }),
    );
    // One component row, the corrected one; totals are not doubled.
    assert_eq!(pct["components"].as_array().expect("components").len(), 1);
    assert_eq!(pct["totalMax"], 50.0);
    assert_eq!(pct["percentage"], 90.0);
}

#[test]
fn score_validation_rejects_out_of_range_marks() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    for (obtained, max) in [(60.0, 50.0), (-1.0, 50.0), (10.0, 0.0)] {
        let code = request_err(
            &mut stdin,
            &mut reader,
            "marks.record",
            json!({
                "studentId": seeded.student_id,
                "offeringId": seeded.offering_a,
                "examType": "FINAL",
                "obtained": obtained,
                "max": max
            }),
        );
        assert_eq!(code, "invalid_score");
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "marks.record",
        json!({
            "studentId": seeded.student_id,
            "offeringId": seeded.offering_a,
            "examType": "VIVA",
            "obtained": 10.0,
            "max": 20.0
        }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn publish_freezes_marks_for_that_semester_only() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader);

    let a = seeded.offering_a.clone();
    record(&mut stdin, &mut reader, &seeded, &a, "MID_TERM", 45.0, 50.0);

    request_ok(
        &mut stdin,
        &mut reader,
        "results.publish",
        json!({ "semesterId": seeded.semester_id }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "marks.record",
        json!({
            "studentId": seeded.student_id,
            "offeringId": seeded.offering_a,
            "examType": "FINAL",
            "obtained": 40.0,
            "max": 50.0
        }),
    );
    assert_eq!(code, "results_published");

    // Reading is still fine after publish.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "marks.sgpa",
        json!({ "studentId": seeded.student_id, "semesterId": seeded.semester_id }),
    );
    assert_eq!(report["totalCredits"], 4);

    // A different, unpublished semester still accepts marks.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "semesters.create",
        json!({
            "code": "2027-SPRING",
            "name": "Spring 2027",
            "academicYear": "2026-27",
            "startDate": "2027-01-05",
            "endDate": "2027-05-20"
        }),
    );
    let other_semester = other["semesterId"].as_str().expect("semesterId").to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "courses.create",
        json!({
            "code": "CS501",
            "name": "Course CS501",
            "credits": 3,
            "semesterNumber": 5,
            "academicYear": "2026-27"
        }),
    );
    let offering = request_ok(
        &mut stdin,
        &mut reader,
        "offerings.create",
        json!({
            "courseId": course["courseId"].as_str().expect("courseId"),
            "facultyId": seeded.faculty_id,
            "semesterId": other_semester,
            "section": "A",
            "capacity": 60
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "marks.record",
        json!({
            "studentId": seeded.student_id,
            "offeringId": offering["offeringId"].as_str().expect("offeringId"),
            "examType": "INTERNAL_1",
            "obtained": 18.0,
            "max": 20.0
        }),
    );
}
