use crate::calc::AttendanceStatus;
use crate::db::now_rfc3339;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_date, get_required_str, resolve_campus_id, with_db};
use crate::ipc::types::{AppState, Request};
use crate::qr::{self, StudentQrPayload};
use crate::store::{self, StudentFilter};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

struct DayEntry {
    student_id: String,
    status: AttendanceStatus,
    notes: Option<String>,
}

fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw.trim()).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "status must be one of Presente, Ausente, Tardanza, Justificado: {}",
            raw
        ))
    })
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    store::get_student(conn, student_id)
        .map(|s| s.is_some())
        .map_err(HandlerErr::db("db_query_failed"))
}

fn upsert_attendance(
    conn: &Connection,
    campus_id: &str,
    date: &str,
    entry: &DayEntry,
    source: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "INSERT INTO attendance(campus_id, date, student_id, status, notes, source, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(campus_id, date, student_id) DO UPDATE SET
           status = excluded.status,
           notes = excluded.notes,
           source = excluded.source,
           updated_at = excluded.updated_at",
        (
            campus_id,
            date,
            &entry.student_id,
            entry.status.as_str(),
            &entry.notes,
            source,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "attendance" }))
    })?;
    Ok(())
}

fn attendance_day_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?.to_string();
    let campus_id = resolve_campus_id(conn, params);
    let students = store::list_students(conn, &StudentFilter::from_params(params))
        .map_err(HandlerErr::db("db_query_failed"))?;

    let mut recorded: HashMap<String, (String, Option<String>, String)> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, status, notes, source
             FROM attendance
             WHERE campus_id = ? AND date = ?",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    let rows = stmt
        .query_map((&campus_id, &date), |r| {
            Ok((
                r.get::<_, String>(0)?,
                (
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                ),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db("db_query_failed"))?;
    recorded.extend(rows);

    let rows_json: Vec<Value> = students
        .iter()
        .map(|s| {
            let (status, notes, source, is_recorded) = match recorded.get(&s.id) {
                Some((status, notes, source)) => {
                    (status.as_str(), notes.clone(), Some(source.as_str()), true)
                }
                None => (AttendanceStatus::Presente.as_str(), None, None, false),
            };
            json!({
                "studentId": s.id,
                "dni": s.fields.dni,
                "fullName": s.fields.full_name(),
                "grade": s.fields.grade,
                "section": s.fields.section,
                "status": status,
                "notes": notes,
                "source": source,
                "recorded": is_recorded
            })
        })
        .collect();

    Ok(json!({
        "date": date,
        "campusId": campus_id,
        "rows": rows_json
    }))
}

fn attendance_day_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?.to_string();
    let campus_id = resolve_campus_id(conn, params);
    let Some(raw_entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };

    let mut entries = Vec::with_capacity(raw_entries.len());
    for (i, e) in raw_entries.iter().enumerate() {
        let student_id = get_required_str(e, "studentId")
            .map_err(|err| err.with_details(json!({ "entry": i })))?;
        let status = parse_status(&get_required_str(e, "status")?)
            .map_err(|err| err.with_details(json!({ "entry": i })))?;
        if !student_exists(conn, &student_id)? {
            return Err(HandlerErr::not_found("student not found")
                .with_details(json!({ "entry": i, "studentId": student_id })));
        }
        let notes = e
            .get("notes")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        entries.push(DayEntry {
            student_id,
            status,
            notes,
        });
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    for entry in &entries {
        upsert_attendance(&tx, &campus_id, &date, entry, "manual")?;
    }
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;

    tracing::info!(date = %date, campus_id = %campus_id, saved = entries.len(), "attendance saved");
    Ok(json!({ "date": date, "campusId": campus_id, "saved": entries.len() }))
}

fn attendance_qr_payload(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = store::get_student(conn, &student_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let payload = StudentQrPayload::for_student(&student);
    let text = payload
        .encode()
        .map_err(|e| HandlerErr::new("encode_failed", e.to_string()))?;
    Ok(json!({
        "studentId": student.id,
        "studentName": payload.student_name,
        "payload": text
    }))
}

fn attendance_qr_scan(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?.to_string();
    let campus_id = resolve_campus_id(conn, params);
    let text = params
        .get("decodedText")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing decodedText"))?;

    let payload = qr::decode(text).map_err(|e| HandlerErr::new("invalid_qr", e.to_string()))?;
    let student = store::get_student(conn, &payload.student_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| {
            HandlerErr::not_found("student not found")
                .with_details(json!({ "studentId": payload.student_id }))
        })?;

    let entry = DayEntry {
        student_id: student.id.clone(),
        status: AttendanceStatus::Presente,
        notes: None,
    };
    upsert_attendance(conn, &campus_id, &date, &entry, "qr")?;
    tracing::info!(student_id = %student.id, date = %date, "attendance marked by qr");

    Ok(json!({
        "studentId": student.id,
        "studentName": student.fields.full_name(),
        "status": entry.status.as_str(),
        "date": date,
        "campusId": campus_id
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "attendance.day.get" => attendance_day_get,
        "attendance.day.set" => attendance_day_set,
        "attendance.qr.payload" => attendance_qr_payload,
        "attendance.qr.scan" => attendance_qr_scan,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
