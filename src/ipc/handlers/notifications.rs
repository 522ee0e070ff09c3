use crate::db::now_rfc3339;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn notifications_send(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let message = params
        .get("messageContent")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing messageContent"))?
        .to_string();
    let student = store::get_student(conn, &student_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let phone = get_optional_str(params, "guardianPhoneNumber")
        .unwrap_or_else(|| student.fields.guardian_phone_number.clone());
    if phone.is_empty() {
        return Err(HandlerErr::bad_params(
            "El estudiante no tiene un número de celular de apoderado registrado.",
        ));
    }

    let student_name = student.fields.full_name();
    let delivery = notify::simulate_send(&student_name, &phone, &message);
    let timestamp = now_rfc3339();
    conn.execute(
        "INSERT INTO notifications(id, student_id, student_name, guardian_phone, message_content,
           success, confirmation_message, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &student.id,
            &student_name,
            &phone,
            &message,
            delivery.success as i64,
            &delivery.confirmation_message,
            &timestamp,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "notifications" }))
    })?;

    if delivery.success {
        tracing::info!(student_id = %student.id, "guardian notification simulated");
        Ok(json!({
            "success": true,
            "confirmationMessage": delivery.confirmation_message,
            "details": {
                "studentName": student_name,
                "guardianPhoneNumber": phone,
                "messageContent": message,
                "timestamp": timestamp
            }
        }))
    } else {
        tracing::warn!(student_id = %student.id, "guardian notification rejected");
        Ok(json!({
            "success": false,
            "confirmationMessage": delivery.confirmation_message
        }))
    }
}

fn notifications_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_optional_str(params, "studentId");
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, student_name, guardian_phone, message_content, success,
                    confirmation_message, created_at
             FROM notifications
             WHERE ? IS NULL OR student_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    let rows = stmt
        .query_map((&student_id, &student_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "guardianPhoneNumber": r.get::<_, String>(3)?,
                "messageContent": r.get::<_, String>(4)?,
                "success": r.get::<_, i64>(5)? != 0,
                "confirmationMessage": r.get::<_, String>(6)?,
                "timestamp": r.get::<_, String>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "notifications": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "notifications.send" => notifications_send,
        "notifications.list" => notifications_list,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
