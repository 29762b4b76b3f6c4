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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().expect("error code").to_string()
}

fn seed_student(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) -> String {
    let workspace = temp_dir(prefix);
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
    let department_id = dept["departmentId"].as_str().expect("departmentId").to_string();
    let student = request_ok(
        stdin,
        reader,
        "users.create",
        json!({
            "name": "Asha Rao",
            "role": "student",
            "profile": {
                "rollNumber": "CS2022001",
                "departmentId": department_id,
                "firstName": "Asha",
                "lastName": "Rao",
                "currentSemester": 5,
                "batchYear": 2022
            }
        }),
    );
    student["studentId"].as_str().expect("studentId").to_string()
}

#[test]
fn status_moves_pending_partial_paid_as_payments_accumulate() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, "campus-fees");

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "fees.create",
        json!({
            "studentId": student_id,
            "type": "TUITION",
            "amountDue": 50000.0,
            "dueDate": "2025-08-15"
        }),
    );
    assert_eq!(fee["status"], "PENDING");
    let fee_id = fee["feeId"].as_str().expect("feeId").to_string();

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": 20000.0, "method": "UPI" }),
    );
    assert_eq!(result["status"], "PARTIAL");
    assert_eq!(result["amountPaid"], 20000.0);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": 30000.0, "method": "CARD", "transactionId": "txn-42" }),
    );
    assert_eq!(result["status"], "PAID");
    assert_eq!(result["amountPaid"], 50000.0);

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "fees.list",
        json!({ "studentId": student_id }),
    );
    let fees = listing["fees"].as_array().expect("fees");
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0]["status"], "PAID");
    assert_eq!(fees[0]["amountPaid"], 50000.0);
}

#[test]
fn overpayment_is_rejected_and_balance_untouched() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, "campus-fees-over");

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "fees.create",
        json!({
            "studentId": student_id,
            "type": "HOSTEL",
            "amountDue": 10000.0,
            "dueDate": "2025-09-01"
        }),
    );
    let fee_id = fee["feeId"].as_str().expect("feeId").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": 6000.0, "method": "CASH" }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": 6000.0, "method": "CASH" }),
    );
    assert_eq!(code, "conflict");

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "fees.list",
        json!({ "studentId": student_id }),
    );
    let fees = listing["fees"].as_array().expect("fees");
    assert_eq!(fees[0]["amountPaid"], 6000.0);
    assert_eq!(fees[0]["status"], "PARTIAL");

    // The exact remaining balance settles the fee.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": 4000.0, "method": "UPI" }),
    );
    assert_eq!(result["status"], "PAID");
}

#[test]
fn fee_inputs_are_validated() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_student(&mut stdin, &mut reader, "campus-fees-valid");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "fees.create",
        json!({
            "studentId": student_id,
            "type": "TUITION",
            "amountDue": 0.0,
            "dueDate": "2025-08-15"
        }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "fees.create",
        json!({
            "studentId": "no-such-student",
            "type": "TUITION",
            "amountDue": 1000.0,
            "dueDate": "2025-08-15"
        }),
    );
    assert_eq!(code, "not_found");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": "no-such-fee", "amount": 100.0, "method": "CASH" }),
    );
    assert_eq!(code, "not_found");

    let fee = request_ok(
        &mut stdin,
        &mut reader,
        "fees.create",
        json!({
            "studentId": student_id,
            "type": "EXAM",
            "amountDue": 500.0,
            "dueDate": "2025-10-01"
        }),
    );
    let fee_id = fee["feeId"].as_str().expect("feeId").to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "fees.recordPayment",
        json!({ "feeId": fee_id, "amount": -50.0, "method": "CASH" }),
    );
    assert_eq!(code, "bad_params");
}
