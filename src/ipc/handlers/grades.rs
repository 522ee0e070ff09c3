use crate::calc::{effective_remark, GRADE_MAX, GRADE_MIN};
use crate::db::now_rfc3339;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, parse_date, resolve_campus_id, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const MAX_PERIOD_CHARS: usize = 50;
const MAX_EVALUATION_TYPE_CHARS: usize = 100;
const MAX_REMARKS_CHARS: usize = 500;

#[derive(Debug, Clone)]
struct GradeInput {
    course_id: String,
    academic_period: String,
    evaluation_type: String,
    grade: f64,
    evaluation_date: String,
    remarks: Option<String>,
}

fn parse_grade_value(v: Option<&Value>) -> Result<f64, HandlerErr> {
    let n = match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| HandlerErr::bad_params("La calificación debe ser un número."))?;
    if !n.is_finite() || !(GRADE_MIN..=GRADE_MAX).contains(&n) {
        return Err(HandlerErr::bad_params("La calificación debe estar entre 0 y 20."));
    }
    Ok(n)
}

fn check_len(value: &str, max: usize, label: &str) -> Result<(), HandlerErr> {
    let n = value.chars().count();
    if n == 0 || n > max {
        return Err(HandlerErr::bad_params(format!(
            "{} debe tener entre 1 y {} caracteres.",
            label, max
        )));
    }
    Ok(())
}

fn validate(input: &GradeInput) -> Result<(), HandlerErr> {
    if input.course_id.is_empty() {
        return Err(HandlerErr::bad_params("El curso es requerido."));
    }
    check_len(&input.academic_period, MAX_PERIOD_CHARS, "El periodo académico")?;
    check_len(&input.evaluation_type, MAX_EVALUATION_TYPE_CHARS, "El tipo de evaluación")?;
    if input
        .remarks
        .as_deref()
        .is_some_and(|r| r.chars().count() > MAX_REMARKS_CHARS)
    {
        return Err(HandlerErr::bad_params(
            "Las observaciones no pueden exceder 500 caracteres.",
        ));
    }
    parse_date(&input.evaluation_date)?;
    Ok(())
}

fn grade_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "campusId": r.get::<_, String>(1)?,
        "studentId": r.get::<_, String>(2)?,
        "courseId": r.get::<_, String>(3)?,
        "academicPeriod": r.get::<_, String>(4)?,
        "evaluationType": r.get::<_, String>(5)?,
        "grade": r.get::<_, f64>(6)?,
        "evaluationDate": r.get::<_, String>(7)?,
        "remarks": r.get::<_, Option<String>>(8)?,
        "deleted": r.get::<_, i64>(9)? != 0,
        "studentName": r.get::<_, Option<String>>(10)?,
    }))
}

const GRADE_SELECT: &str = "SELECT g.id, g.campus_id, g.student_id, g.course_id, g.academic_period,
        g.evaluation_type, g.grade, g.evaluation_date, g.remarks, g.deleted,
        s.first_name || ' ' || s.last_name
     FROM grades g LEFT JOIN students s ON s.id = g.student_id";

fn load_grade(conn: &Connection, grade_id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE g.id = ?", GRADE_SELECT),
        [grade_id],
        grade_from_row,
    )
    .optional()
    .map_err(HandlerErr::db("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("grade not found"))
}

fn grades_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if store::get_student(conn, &student_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }
    let input = GradeInput {
        course_id: get_optional_str(params, "courseId").unwrap_or_default(),
        academic_period: get_optional_str(params, "academicPeriod").unwrap_or_default(),
        evaluation_type: get_optional_str(params, "evaluationType").unwrap_or_default(),
        grade: parse_grade_value(params.get("grade"))?,
        evaluation_date: get_required_str(params, "evaluationDate")?,
        remarks: get_optional_str(params, "remarks"),
    };
    validate(&input)?;
    let remarks = effective_remark(input.grade, input.remarks.as_deref());
    let campus_id = resolve_campus_id(conn, params);
    let id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO grades(id, campus_id, student_id, course_id, academic_period, evaluation_type,
           grade, evaluation_date, remarks, deleted, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &id,
            &campus_id,
            &student_id,
            &input.course_id,
            &input.academic_period,
            &input.evaluation_type,
            input.grade,
            &input.evaluation_date,
            &remarks,
            now_rfc3339(),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "grades" }))
    })?;
    Ok(json!({ "grade": load_grade(conn, &id)? }))
}

fn grades_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let Some(patch) = params.get("patch").filter(|p| p.is_object()) else {
        return Err(HandlerErr::bad_params("missing patch"));
    };
    let current = load_grade(conn, &grade_id)?;
    let text = |key: &str| {
        get_optional_str(patch, key)
            .or_else(|| current.get(key).and_then(|v| v.as_str()).map(|s| s.to_string()))
            .unwrap_or_default()
    };
    let grade = match patch.get("grade") {
        Some(v) => parse_grade_value(Some(v))?,
        None => current.get("grade").and_then(|v| v.as_f64()).unwrap_or(0.0),
    };
    // An explicit empty string clears custom remarks back to the automatic one.
    let remarks = match patch.get("remarks") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Null) => None,
        _ => current
            .get("remarks")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    };
    let input = GradeInput {
        course_id: text("courseId"),
        academic_period: text("academicPeriod"),
        evaluation_type: text("evaluationType"),
        grade,
        evaluation_date: text("evaluationDate"),
        remarks,
    };
    validate(&input)?;
    let remarks = effective_remark(input.grade, input.remarks.as_deref());

    conn.execute(
        "UPDATE grades SET course_id = ?, academic_period = ?, evaluation_type = ?, grade = ?,
           evaluation_date = ?, remarks = ?, updated_at = ?
         WHERE id = ?",
        (
            &input.course_id,
            &input.academic_period,
            &input.evaluation_type,
            input.grade,
            &input.evaluation_date,
            &remarks,
            now_rfc3339(),
            &grade_id,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": "grades" }))
    })?;
    Ok(json!({ "grade": load_grade(conn, &grade_id)? }))
}

fn set_deleted(conn: &Connection, params: &Value, deleted: bool) -> Result<Value, HandlerErr> {
    let grade_id = get_required_str(params, "gradeId")?;
    let changed = conn
        .execute(
            "UPDATE grades SET deleted = ?, updated_at = ? WHERE id = ?",
            (deleted as i64, now_rfc3339(), &grade_id),
        )
        .map_err(HandlerErr::db("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("grade not found"));
    }
    Ok(json!({ "gradeId": grade_id, "deleted": deleted }))
}

fn grades_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    set_deleted(conn, params, true)
}

fn grades_restore(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    set_deleted(conn, params, false)
}

fn grades_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let deleted = match get_optional_str(params, "view").as_deref() {
        None | Some("active") => false,
        Some("deleted") => true,
        Some(other) => {
            return Err(HandlerErr::bad_params(format!(
                "view must be active or deleted: {}",
                other
            )))
        }
    };
    let campus_id = resolve_campus_id(conn, params);
    let student_id = get_optional_str(params, "studentId");
    let search = get_optional_str(params, "search").map(|s| s.to_lowercase());

    let mut stmt = conn
        .prepare(&format!(
            "{} WHERE g.campus_id = ? AND g.deleted = ? AND (? IS NULL OR g.student_id = ?)
             ORDER BY g.evaluation_date DESC, g.course_id",
            GRADE_SELECT
        ))
        .map_err(HandlerErr::db("db_query_failed"))?;
    let rows = stmt
        .query_map(
            (&campus_id, deleted as i64, &student_id, &student_id),
            grade_from_row,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db("db_query_failed"))?;

    let rows: Vec<Value> = match search {
        Some(q) => rows
            .into_iter()
            .filter(|g| {
                ["studentName", "courseId", "evaluationType", "academicPeriod"]
                    .iter()
                    .filter_map(|k| g.get(*k).and_then(|v| v.as_str()))
                    .any(|v| v.to_lowercase().contains(&q))
            })
            .collect(),
        None => rows,
    };
    Ok(json!({ "grades": rows, "count": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "grades.create" => grades_create,
        "grades.update" => grades_update,
        "grades.delete" => grades_delete,
        "grades.restore" => grades_restore,
        "grades.list" => grades_list,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
