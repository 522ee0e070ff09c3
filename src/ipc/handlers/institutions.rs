use crate::db::{self, now_rfc3339};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, selected_headquarter, with_db, SELECTED_HEADQUARTER_KEY};
use crate::ipc::types::{AppState, Request};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::OnceLock;
use uuid::Uuid;

const SETTINGS_FIELDS: [&str; 3] = ["uiSettings", "evaluationSystem", "scheduleSettings"];

fn is_valid_email(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email regex"))
        .is_match(s)
}

fn normalize_status(raw: Option<&str>) -> Result<&'static str, HandlerErr> {
    match raw.map(str::trim) {
        None | Some("") | Some("A") | Some("Active") => Ok("A"),
        Some("I") | Some("Inactive") => Ok("I"),
        Some(other) => Err(HandlerErr::bad_params(format!(
            "status must be A, I, Active or Inactive: {}",
            other
        ))),
    }
}

fn opt_str(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn req_str(obj: &Value, key: &str, label: &str) -> Result<String, HandlerErr> {
    opt_str(obj, key).ok_or_else(|| HandlerErr::bad_params(format!("{} es requerido.", label)))
}

fn opt_email(obj: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match opt_str(obj, key) {
        Some(e) if !is_valid_email(&e) => Err(HandlerErr::bad_params(format!(
            "Correo electrónico inválido: {}",
            e
        ))),
        other => Ok(other),
    }
}

/// Settings blobs arrive either as objects or as JSON text; both are stored
/// as JSON text.
fn settings_text(obj: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => {
            let parsed: Value = serde_json::from_str(s)
                .map_err(|e| HandlerErr::bad_params(format!("{} is not valid JSON: {}", key, e)))?;
            Ok(Some(parsed.to_string()))
        }
        Some(v @ Value::Object(_)) => Ok(Some(v.to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be an object or JSON text",
            key
        ))),
    }
}

struct HeadquarterInput {
    id: Option<String>,
    name: String,
    code: String,
    address: Option<String>,
    contact_person: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    status: &'static str,
}

struct InstitutionInput {
    name: String,
    code_name: String,
    modular_code: String,
    logo: Option<String>,
    color: Option<String>,
    levels: Option<String>,
    address: Option<String>,
    contact_email: Option<String>,
    contact_phone: Option<String>,
    status: &'static str,
    user_id: Option<String>,
    settings: [Option<String>; 3],
    headquarters: Vec<HeadquarterInput>,
}

fn parse_headquarter(v: &Value, idx: usize) -> Result<HeadquarterInput, HandlerErr> {
    let label = |what: &str| format!("Sede {}: {}", idx + 1, what);
    Ok(HeadquarterInput {
        id: opt_str(v, "id"),
        name: req_str(v, "headquartersName", &label("el nombre de la sede"))?,
        code: req_str(v, "headquartersCode", &label("el código de la sede"))?,
        address: opt_str(v, "address"),
        contact_person: opt_str(v, "contactPerson"),
        contact_email: opt_email(v, "contactEmail")?,
        contact_phone: opt_str(v, "contactPhone"),
        status: normalize_status(v.get("status").and_then(|s| s.as_str()))?,
    })
}

fn parse_institution(v: &Value) -> Result<InstitutionInput, HandlerErr> {
    if !v.is_object() {
        return Err(HandlerErr::bad_params("missing institution"));
    }
    let levels = match v.get("educationalLevelSelection") {
        Some(Value::Array(items)) => Some(Value::Array(items.clone()).to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };
    let mut settings: [Option<String>; 3] = [None, None, None];
    for (slot, key) in SETTINGS_FIELDS.iter().enumerate() {
        settings[slot] = settings_text(v, key)?;
    }
    let headquarters = match v.get("headquarters") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, h)| parse_headquarter(h, i))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(HandlerErr::bad_params("headquarters must be an array")),
    };
    Ok(InstitutionInput {
        name: req_str(v, "institutionName", "El nombre de la institución")?,
        code_name: req_str(v, "codeName", "El nombre corto")?,
        modular_code: req_str(v, "modularCode", "El código modular")?,
        logo: opt_str(v, "institutionLogo"),
        color: opt_str(v, "institutionColor"),
        levels,
        address: opt_str(v, "address"),
        contact_email: opt_email(v, "contactEmail")?,
        contact_phone: opt_str(v, "contactPhone"),
        status: normalize_status(v.get("status").and_then(|s| s.as_str()))?,
        user_id: opt_str(v, "userId"),
        settings,
        headquarters,
    })
}

fn settings_value(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

fn load_headquarters(conn: &Connection, institution_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, headquarters_name, headquarters_code, address, contact_person,
                    contact_email, contact_phone, status
             FROM headquarters WHERE institution_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    stmt.query_map([institution_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "headquartersName": r.get::<_, String>(1)?,
            "headquartersCode": r.get::<_, String>(2)?,
            "address": r.get::<_, Option<String>>(3)?,
            "contactPerson": r.get::<_, Option<String>>(4)?,
            "contactEmail": r.get::<_, Option<String>>(5)?,
            "contactPhone": r.get::<_, Option<String>>(6)?,
            "status": r.get::<_, String>(7)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db("db_query_failed"))
}

const INSTITUTION_SELECT: &str = "SELECT id, institution_name, code_name, modular_code, institution_logo,
        institution_color, educational_level_selection, address, contact_email, contact_phone,
        status, user_id, ui_settings, evaluation_system, schedule_settings, created_at, updated_at
     FROM institutions";

fn institution_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let levels: Option<String> = r.get(6)?;
    let levels = levels.map(|s| serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s)));
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "institutionName": r.get::<_, String>(1)?,
        "codeName": r.get::<_, String>(2)?,
        "modularCode": r.get::<_, String>(3)?,
        "institutionLogo": r.get::<_, Option<String>>(4)?,
        "institutionColor": r.get::<_, Option<String>>(5)?,
        "educationalLevelSelection": levels,
        "address": r.get::<_, Option<String>>(7)?,
        "contactEmail": r.get::<_, Option<String>>(8)?,
        "contactPhone": r.get::<_, Option<String>>(9)?,
        "status": r.get::<_, String>(10)?,
        "userId": r.get::<_, Option<String>>(11)?,
        "uiSettings": settings_value(r.get(12)?),
        "evaluationSystem": settings_value(r.get(13)?),
        "scheduleSettings": settings_value(r.get(14)?),
        "createdAt": r.get::<_, String>(15)?,
        "updatedAt": r.get::<_, String>(16)?,
    }))
}

fn load_institution(conn: &Connection, institution_id: &str) -> Result<Value, HandlerErr> {
    let mut inst = conn
        .query_row(
            &format!("{} WHERE id = ?", INSTITUTION_SELECT),
            [institution_id],
            institution_from_row,
        )
        .optional()
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("institution not found"))?;
    inst["headquarters"] = Value::Array(load_headquarters(conn, institution_id)?);
    Ok(inst)
}

fn write_headquarters(
    conn: &Connection,
    institution_id: &str,
    items: &[HeadquarterInput],
) -> Result<Vec<String>, HandlerErr> {
    let existing: HashSet<String> = {
        let mut stmt = conn
            .prepare("SELECT id FROM headquarters WHERE institution_id = ?")
            .map_err(HandlerErr::db("db_query_failed"))?;
        let ids = stmt
            .query_map([institution_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
            .map_err(HandlerErr::db("db_query_failed"))?;
        ids
    };

    let mut kept = Vec::with_capacity(items.len());
    for (order, h) in items.iter().enumerate() {
        match h.id.as_deref().filter(|id| existing.contains(*id)) {
            Some(id) => {
                conn.execute(
                    "UPDATE headquarters SET headquarters_name = ?, headquarters_code = ?, address = ?,
                       contact_person = ?, contact_email = ?, contact_phone = ?, status = ?, sort_order = ?
                     WHERE id = ?",
                    (
                        &h.name,
                        &h.code,
                        &h.address,
                        &h.contact_person,
                        &h.contact_email,
                        &h.contact_phone,
                        h.status,
                        order as i64,
                        id,
                    ),
                )
                .map_err(|e| {
                    HandlerErr::new("db_update_failed", e.to_string())
                        .with_details(json!({ "table": "headquarters" }))
                })?;
                kept.push(id.to_string());
            }
            None => {
                let id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO headquarters(id, institution_id, headquarters_name, headquarters_code,
                       address, contact_person, contact_email, contact_phone, status, sort_order)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        &id,
                        institution_id,
                        &h.name,
                        &h.code,
                        &h.address,
                        &h.contact_person,
                        &h.contact_email,
                        &h.contact_phone,
                        h.status,
                        order as i64,
                    ),
                )
                .map_err(|e| {
                    HandlerErr::new("db_insert_failed", e.to_string())
                        .with_details(json!({ "table": "headquarters" }))
                })?;
                kept.push(id);
            }
        }
    }

    for stale in existing.iter().filter(|id| !kept.contains(*id)) {
        conn.execute("DELETE FROM headquarters WHERE id = ?", [stale])
            .map_err(HandlerErr::db("db_delete_failed"))?;
    }
    Ok(kept)
}

fn institutions_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let include_inactive = params
        .get("includeInactive")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let sql = if include_inactive {
        format!("{} ORDER BY institution_name", INSTITUTION_SELECT)
    } else {
        format!("{} WHERE status = 'A' ORDER BY institution_name", INSTITUTION_SELECT)
    };
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db("db_query_failed"))?;
    let mut rows = stmt
        .query_map([], institution_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db("db_query_failed"))?;
    for inst in rows.iter_mut() {
        let id = inst["id"].as_str().unwrap_or_default().to_string();
        inst["headquarters"] = Value::Array(load_headquarters(conn, &id)?);
    }
    Ok(json!({ "institutions": rows }))
}

fn institutions_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let institution_id = get_required_str(params, "institutionId")?;
    Ok(json!({ "institution": load_institution(conn, &institution_id)? }))
}

fn institutions_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = parse_institution(params.get("institution").unwrap_or(&Value::Null))?;
    let id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let [ui, eval, schedule] = &input.settings;

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    tx.execute(
        "INSERT INTO institutions(id, institution_name, code_name, modular_code, institution_logo,
           institution_color, educational_level_selection, address, contact_email, contact_phone,
           status, user_id, ui_settings, evaluation_system, schedule_settings, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &input.name,
            &input.code_name,
            &input.modular_code,
            &input.logo,
            &input.color,
            &input.levels,
            &input.address,
            &input.contact_email,
            &input.contact_phone,
            input.status,
            &input.user_id,
            ui,
            eval,
            schedule,
            &now,
            &now,
        ],
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "institutions" }))
    })?;
    write_headquarters(&tx, &id, &input.headquarters)?;
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;

    tracing::info!(institution_id = %id, "institution created");
    Ok(json!({ "institution": load_institution(conn, &id)? }))
}

fn institutions_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let institution_id = get_required_str(params, "institutionId")?;
    let input = parse_institution(params.get("institution").unwrap_or(&Value::Null))?;
    let [ui, eval, schedule] = &input.settings;

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    let changed = tx
        .execute(
            "UPDATE institutions SET institution_name = ?, code_name = ?, modular_code = ?,
               institution_logo = ?, institution_color = ?, educational_level_selection = ?,
               address = ?, contact_email = ?, contact_phone = ?, status = ?, user_id = ?,
               ui_settings = ?, evaluation_system = ?, schedule_settings = ?, updated_at = ?
             WHERE id = ?",
            rusqlite::params![
                &input.name,
                &input.code_name,
                &input.modular_code,
                &input.logo,
                &input.color,
                &input.levels,
                &input.address,
                &input.contact_email,
                &input.contact_phone,
                input.status,
                &input.user_id,
                ui,
                eval,
                schedule,
                now_rfc3339(),
                &institution_id,
            ],
        )
        .map_err(|e| {
            HandlerErr::new("db_update_failed", e.to_string())
                .with_details(json!({ "table": "institutions" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::not_found("institution not found"));
    }
    write_headquarters(&tx, &institution_id, &input.headquarters)?;
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;

    Ok(json!({ "institution": load_institution(conn, &institution_id)? }))
}

fn set_status(conn: &Connection, params: &Value, status: &str) -> Result<Value, HandlerErr> {
    let institution_id = get_required_str(params, "institutionId")?;
    let changed = conn
        .execute(
            "UPDATE institutions SET status = ?, updated_at = ? WHERE id = ?",
            (status, now_rfc3339(), &institution_id),
        )
        .map_err(HandlerErr::db("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("institution not found"));
    }
    Ok(json!({ "institutionId": institution_id, "status": status }))
}

fn institutions_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    set_status(conn, params, "I")
}

fn institutions_restore(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    set_status(conn, params, "A")
}

fn headquarters_select(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let headquarter_id = get_required_str(params, "headquarterId")?;
    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT institution_id, headquarters_name FROM headquarters WHERE id = ?",
            [&headquarter_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db("db_query_failed"))?;
    let Some((institution_id, name)) = found else {
        return Err(HandlerErr::not_found("headquarter not found"));
    };
    db::settings_set_json(conn, SELECTED_HEADQUARTER_KEY, &json!(headquarter_id))
        .map_err(HandlerErr::db("db_update_failed"))?;
    Ok(json!({
        "headquarterId": headquarter_id,
        "institutionId": institution_id,
        "headquartersName": name
    }))
}

fn headquarters_selected(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "headquarterId": selected_headquarter(conn) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "institutions.list" => institutions_list,
        "institutions.get" => institutions_get,
        "institutions.create" => institutions_create,
        "institutions.update" => institutions_update,
        "institutions.delete" => institutions_delete,
        "institutions.restore" => institutions_restore,
        "headquarters.select" => headquarters_select,
        "headquarters.selected" => headquarters_selected,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
