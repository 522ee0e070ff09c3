use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::roster::{validate_form, Level, Shift, Student, StudentFields};
use crate::store::{self, StudentFilter};
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn student_json(s: &Student) -> Value {
    serde_json::to_value(s).unwrap_or(Value::Null)
}

fn load_student(conn: &Connection, student_id: &str) -> Result<Student, HandlerErr> {
    store::get_student(conn, student_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(|v| v.as_str()).map(|s| s.trim().to_string())
}

fn parse_level(raw: &str) -> Result<Level, HandlerErr> {
    Level::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "Nivel '{}' no válido. Use 'Inicial', 'Primaria' o 'Secundaria'.",
            raw
        ))
    })
}

fn parse_shift(raw: &str) -> Result<Shift, HandlerErr> {
    Shift::parse(raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("Turno '{}' no válido. Use 'Mañana' o 'Tarde'.", raw)))
}

/// Applies the keys present in `patch` over `base`. Unknown keys are ignored.
fn merge_fields(base: StudentFields, patch: &Value) -> Result<StudentFields, HandlerErr> {
    let mut f = base;
    if let Some(v) = str_field(patch, "dni") {
        f.dni = v;
    }
    if let Some(v) = str_field(patch, "firstName") {
        f.first_name = v;
    }
    if let Some(v) = str_field(patch, "lastName") {
        f.last_name = v;
    }
    if let Some(v) = str_field(patch, "grade") {
        f.grade = v;
    }
    if let Some(v) = str_field(patch, "section") {
        f.section = v.to_uppercase();
    }
    if let Some(v) = str_field(patch, "level") {
        f.level = parse_level(&v)?;
    }
    if let Some(v) = str_field(patch, "shift") {
        f.shift = parse_shift(&v)?;
    }
    if let Some(v) = str_field(patch, "guardianPhoneNumber") {
        f.guardian_phone_number = v;
    }
    Ok(f)
}

fn fields_from_params(params: &Value) -> Result<StudentFields, HandlerErr> {
    let level = parse_level(&get_required_str(params, "level")?)?;
    let shift = parse_shift(&get_required_str(params, "shift")?)?;
    Ok(StudentFields {
        dni: str_field(params, "dni").unwrap_or_default(),
        first_name: str_field(params, "firstName").unwrap_or_default(),
        last_name: str_field(params, "lastName").unwrap_or_default(),
        grade: str_field(params, "grade").unwrap_or_default(),
        section: str_field(params, "section").unwrap_or_default().to_uppercase(),
        level,
        shift,
        guardian_phone_number: str_field(params, "guardianPhoneNumber").unwrap_or_default(),
    })
}

fn ensure_dni_free(conn: &Connection, dni: &str, except_id: Option<&str>) -> Result<(), HandlerErr> {
    let existing = store::find_student_by_dni(conn, dni).map_err(HandlerErr::db("db_query_failed"))?;
    match existing {
        Some(other) if Some(other.id.as_str()) != except_id => Err(HandlerErr::new(
            "conflict",
            format!("Ya existe un estudiante con el DNI {}.", dni),
        )
        .with_details(json!({ "studentId": other.id }))),
        _ => Ok(()),
    }
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = StudentFilter::from_params(params);
    let students = store::list_students(conn, &filter).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({
        "students": students.iter().map(student_json).collect::<Vec<_>>(),
        "count": students.len()
    }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let s = load_student(conn, &student_id)?;
    Ok(json!({ "student": student_json(&s) }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let fields = fields_from_params(params)?;
    validate_form(&fields).map_err(HandlerErr::bad_params)?;
    ensure_dni_free(conn, &fields.dni, None)?;

    let student = Student {
        id: Uuid::new_v4().to_string(),
        fields,
    };
    store::insert_student(conn, &student).map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    tracing::info!(student_id = %student.id, "student created");
    Ok(json!({ "studentId": student.id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let current = load_student(conn, &student_id)?;
    let fields = merge_fields(current.fields, patch)?;
    validate_form(&fields).map_err(HandlerErr::bad_params)?;
    ensure_dni_free(conn, &fields.dni, Some(&student_id))?;

    let student = Student {
        id: student_id,
        fields,
    };
    store::update_student(conn, &student).map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "student": student_json(&student) }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    let removed = store::delete_student(&tx, &student_id).map_err(HandlerErr::db("db_delete_failed"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
