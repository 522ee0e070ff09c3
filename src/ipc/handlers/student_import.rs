use crate::import::{self, commit_candidates, ImportError, ImportOutcome};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::store::SqliteStudentStore;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

fn run_pipeline(params: &Value) -> Result<(String, ImportOutcome), HandlerErr> {
    let in_path = get_required_str(params, "inPath")?;
    let mime = get_optional_str(params, "mimeType");
    let outcome = import::import_file(&PathBuf::from(&in_path), mime.as_deref()).map_err(|e| {
        tracing::info!(path = %in_path, code = e.code(), "student import rejected");
        HandlerErr::from(e)
    })?;
    Ok((in_path, outcome))
}

fn import_preview(_conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (in_path, outcome) = run_pipeline(params)?;
    Ok(json!({
        "path": in_path,
        "status": outcome.status,
        "candidates": outcome.candidates,
        "candidateCount": outcome.candidates.len(),
        "errors": outcome.errors,
        "displayedErrors": outcome.displayed_errors(),
        "errorCount": outcome.errors.len(),
        "ambiguousHeaders": outcome.header_map.ambiguous(),
        "headerMap": outcome.header_map.to_json()
    }))
}

fn import_apply(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (in_path, outcome) = run_pipeline(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(HandlerErr::db("db_tx_failed"))?;
    // Dropping `tx` on an early return rolls the whole batch back.
    let summary = {
        let mut repo = SqliteStudentStore::new(&tx);
        commit_candidates(&mut repo, &outcome.candidates)
    }
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", format!("{e:#}"))
            .with_details(json!({ "table": "students" }))
    })?;
    tx.commit().map_err(HandlerErr::db("db_commit_failed"))?;

    tracing::info!(
        path = %in_path,
        created = summary.created,
        updated = summary.updated,
        rejected = outcome.errors.len(),
        "student import committed"
    );

    Ok(json!({
        "status": outcome.status,
        "created": summary.created,
        "updated": summary.updated,
        "studentIds": summary.student_ids,
        "displayedErrors": outcome.displayed_errors(),
        "errorCount": outcome.errors.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.import.preview" => import_preview,
        "students.import.apply" => import_apply,
        _ => return None,
    };
    Some(with_db(state, req, f))
}
