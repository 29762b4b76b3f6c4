use crate::ipc::helpers::{
    dispatch, get_optional_str, get_required_date, get_required_f64, get_required_str,
    student_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Status is derived from the amounts, never set by callers.
fn derive_status(amount_paid: f64, amount_due: f64) -> &'static str {
    if amount_paid <= 0.0 {
        "PENDING"
    } else if amount_paid < amount_due {
        "PARTIAL"
    } else {
        "PAID"
    }
}

fn fees_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let fee_type = get_required_str(params, "type")?;
    let amount_due = get_required_f64(params, "amountDue")?;
    let due_date = get_required_date(params, "dueDate")?;

    if amount_due <= 0.0 {
        return Err(HandlerErr::bad_params("amountDue must be positive"));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let fee_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, student_id, fee_type, amount_due, amount_paid, status, due_date)
         VALUES(?, ?, ?, ?, 0, 'PENDING', ?)",
        (&fee_id, &student_id, &fee_type, amount_due, &due_date),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    Ok(json!({ "feeId": fee_id, "status": "PENDING" }))
}

/// Payment row and fee update commit together. amount_paid can never pass
/// amount_due; adjustments beyond that are not modeled here.
fn fees_record_payment(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let amount = get_required_f64(params, "amount")?;
    let method = get_required_str(params, "method")?;
    let transaction_id = get_optional_str(params, "transactionId")
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let fee: Option<(f64, f64)> = tx
        .query_row(
            "SELECT amount_due, amount_paid FROM fees WHERE id = ?",
            [&fee_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((amount_due, amount_paid)) = fee else {
        return Err(HandlerErr::not_found("fee not found"));
    };

    let new_paid = amount_paid + amount;
    if new_paid > amount_due {
        return Err(HandlerErr::with_details(
            "conflict",
            "payment would exceed the amount due",
            json!({
                "amountDue": amount_due,
                "amountPaid": amount_paid,
                "amount": amount
            }),
        ));
    }

    let payment_id = Uuid::new_v4().to_string();
    let paid_at = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO payments(id, fee_id, amount, method, transaction_id, paid_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &fee_id,
            amount,
            &method,
            &transaction_id,
            &paid_at,
        ),
    )?;

    let status = derive_status(new_paid, amount_due);
    tx.execute(
        "UPDATE fees SET amount_paid = ?, status = ? WHERE id = ?",
        (new_paid, status, &fee_id),
    )?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "paymentId": payment_id,
        "feeId": fee_id,
        "amountPaid": new_paid,
        "status": status
    }))
}

fn fees_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let mut stmt = conn.prepare(
        "SELECT id, fee_type, amount_due, amount_paid, status, due_date
         FROM fees
         WHERE student_id = ?
         ORDER BY due_date",
    )?;
    let fees = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "type": r.get::<_, String>(1)?,
                "amountDue": r.get::<_, f64>(2)?,
                "amountPaid": r.get::<_, f64>(3)?,
                "status": r.get::<_, String>(4)?,
                "dueDate": r.get::<_, String>(5)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "fees": fees }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.create" => Some(dispatch(state, req, fees_create)),
        "fees.recordPayment" => Some(dispatch(state, req, fees_record_payment)),
        "fees.list" => Some(dispatch(state, req, fees_list)),
        _ => None,
    }
}
