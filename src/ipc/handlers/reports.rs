use crate::calc::{self, AttendanceStatus, ProgressReport, SubjectGrade};
use crate::db::{self, now_rfc3339};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, parse_date, resolve_campus_id, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store;
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

pub const LOOKBACK_DAYS_KEY: &str = "reports.attendanceLookbackDays";
const DEFAULT_LOOKBACK_DAYS: i64 = 60;

fn lookback_days(conn: &Connection) -> i64 {
    match db::settings_get_json(conn, LOOKBACK_DAYS_KEY) {
        Ok(Some(v)) => v
            .as_i64()
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_LOOKBACK_DAYS),
        Ok(None) => DEFAULT_LOOKBACK_DAYS,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read attendance lookback setting");
            DEFAULT_LOOKBACK_DAYS
        }
    }
}

fn period_grades(
    conn: &Connection,
    campus_id: &str,
    student_id: &str,
    period: &str,
) -> Result<Vec<SubjectGrade>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT course_id, evaluation_type, grade, remarks
             FROM grades
             WHERE campus_id = ? AND student_id = ? AND academic_period = ? AND deleted = 0
             ORDER BY course_id, evaluation_date",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    stmt.query_map((campus_id, student_id, period), |r| {
        let grade: f64 = r.get(2)?;
        let remarks: Option<String> = r.get(3)?;
        Ok(SubjectGrade {
            course_id: r.get(0)?,
            evaluation_type: r.get(1)?,
            grade,
            remarks: remarks.unwrap_or_else(|| calc::auto_remark(grade).to_string()),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db("db_query_failed"))
}

/// Statuses recorded for the student in the `days`-day window ending at
/// `as_of`, inclusive on both ends.
fn window_statuses(
    conn: &Connection,
    campus_id: &str,
    student_id: &str,
    as_of: NaiveDate,
    days: i64,
) -> Result<Vec<AttendanceStatus>, HandlerErr> {
    let from = as_of - Duration::days(days - 1);
    let mut stmt = conn
        .prepare(
            "SELECT status FROM attendance
             WHERE campus_id = ? AND student_id = ? AND date >= ? AND date <= ?",
        )
        .map_err(HandlerErr::db("db_query_failed"))?;
    let raw = stmt
        .query_map(
            (campus_id, student_id, from.to_string(), as_of.to_string()),
            |r| r.get::<_, String>(0),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db("db_query_failed"))?;
    Ok(raw
        .iter()
        .filter_map(|s| {
            let parsed = AttendanceStatus::parse(s);
            if parsed.is_none() {
                tracing::warn!(status = %s, "skipping unknown attendance status");
            }
            parsed
        })
        .collect())
}

fn build_report(conn: &Connection, params: &Value) -> Result<(ProgressReport, NaiveDate, i64), HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let period = get_required_str(params, "period")?;
    let as_of = match get_optional_str(params, "asOf") {
        Some(raw) => parse_date(&raw)?,
        None => Utc::now().date_naive(),
    };
    let campus_id = resolve_campus_id(conn, params);
    let student = store::get_student(conn, &student_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;

    let grades = period_grades(conn, &campus_id, &student_id, &period)?;
    let days = lookback_days(conn);
    let attendance = calc::summarize_attendance(window_statuses(
        conn,
        &campus_id,
        &student_id,
        as_of,
        days,
    )?);
    Ok((
        calc::build_progress_report(student, &period, now_rfc3339(), grades, attendance),
        as_of,
        days,
    ))
}

fn reports_progress(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (report, as_of, days) = build_report(conn, params)?;
    Ok(json!({
        "report": report,
        "asOf": as_of.to_string(),
        "lookbackDays": days
    }))
}

fn reports_export(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let format = get_required_str(params, "format")?.to_ascii_lowercase();
    let out_path = get_required_str(params, "outPath")?;
    match format.as_str() {
        "csv" => {}
        "pdf" | "xls" | "xlsx" => {
            return Err(HandlerErr::new(
                "unsupported_format",
                format!("report export to {} is not available; use csv", format),
            ))
        }
        other => {
            return Err(HandlerErr::bad_params(format!(
                "format must be csv, pdf or xls: {}",
                other
            )))
        }
    }

    let (report, _, _) = build_report(conn, params)?;
    let bytes = calc::render_report_csv(&report)
        .map_err(|e| HandlerErr::new("export_failed", format!("{e:#}")))?;

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
        })?;
    }
    std::fs::write(&out, &bytes).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(path = %out_path, student_id = %report.student.id, "progress report exported");

    Ok(json!({ "path": out_path, "bytes": bytes.len(), "format": format }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "reports.progress" => reports_progress,
        "reports.export" => reports_export,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
