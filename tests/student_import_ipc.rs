use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const HEADER: &str = "DNI,Nombres,Apellidos,Grado,Sección,Nivel,Turno,Celular Apoderado";

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
    let exe = env!("CARGO_BIN_EXE_eduassistd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn eduassistd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
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
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn write_csv(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, rows.join("\n")).expect("write csv");
    p
}

#[test]
fn clean_file_previews_then_applies_and_reimport_updates_in_place() {
    let workspace = temp_dir("eduassist-import-clean");
    let file = write_csv(
        &workspace,
        "alumnos.csv",
        &[
            HEADER,
            "12345678,Ana,García,5to,a,Primaria,Mañana,987654321",
            "87654321,Luis,Paz,3ro,B,Secundaria,Tarde,",
        ],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.import.preview",
        json!({ "inPath": file.to_string_lossy() }),
    );
    assert_eq!(preview["status"], "success");
    assert_eq!(preview["candidateCount"], 2);
    assert_eq!(preview["errorCount"], 0);
    assert_eq!(preview["candidates"][0]["section"], "A");
    assert_eq!(preview["headerMap"]["celular apoderado"], 7);

    // Preview must not write.
    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(listed["count"], 0);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.import.apply",
        json!({ "inPath": file.to_string_lossy() }),
    );
    assert_eq!(applied["created"], 2);
    assert_eq!(applied["updated"], 0);
    let first_ids = applied["studentIds"].clone();

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.import.apply",
        json!({ "inPath": file.to_string_lossy() }),
    );
    assert_eq!(again["created"], 0);
    assert_eq!(again["updated"], 2);
    assert_eq!(again["studentIds"], first_ids);

    let listed = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(listed["count"], 2);
    // Ordered by last name.
    assert_eq!(listed["students"][0]["lastName"], "García");
    assert_eq!(listed["students"][1]["shift"], "Tarde");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn existing_dni_is_overwritten_except_id() {
    let workspace = temp_dir("eduassist-import-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "dni": "12345678",
            "firstName": "Anita",
            "lastName": "García",
            "grade": "4to",
            "section": "C",
            "level": "Primaria",
            "shift": "Tarde",
            "guardianPhoneNumber": "911111111"
        }),
    );
    let student_id = created["studentId"].as_str().expect("studentId").to_string();

    let file = write_csv(
        &workspace,
        "alumnos.csv",
        &[HEADER, "12345678,Ana,García,5to,A,Primaria,Mañana,"],
    );
    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import.apply",
        json!({ "inPath": file.to_string_lossy() }),
    );
    assert_eq!(applied["updated"], 1);
    assert_eq!(applied["studentIds"][0], student_id.as_str());

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": student_id }),
    );
    let s = &got["student"];
    assert_eq!(s["firstName"], "Ana");
    assert_eq!(s["grade"], "5to");
    assert_eq!(s["shift"], "Mañana");
    assert_eq!(s["guardianPhoneNumber"], "");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn partial_file_applies_valid_rows_and_reports_the_rest() {
    let workspace = temp_dir("eduassist-import-partial");
    let file = write_csv(
        &workspace,
        "mixto.csv",
        &[
            HEADER,
            "12345678,Ana,García,5to,A,Avanzado,Mañana,",
            ",,,,,,,",
            "87654321,Luis,Paz,3ro,B,Secundaria,Tarde,abc123",
            ",Rosa,Quispe,2do,A,Inicial,Mañana,",
        ],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.import.preview",
        json!({ "inPath": file.to_string_lossy() }),
    );
    assert_eq!(preview["status"], "warning");
    assert_eq!(preview["candidateCount"], 1);
    assert_eq!(preview["errorCount"], 3);
    let errors: Vec<String> = preview["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .map(|e| e.as_str().unwrap_or_default().to_string())
        .collect();
    assert!(errors[0].starts_with("Fila 2 (DNI 12345678): Nivel 'Avanzado'"));
    assert!(errors[1].contains("Fila 4 (DNI 87654321): Número de celular del apoderado 'abc123'"));
    assert!(errors[2].starts_with("Fila 5: Faltan datos esenciales"));

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.import.apply",
        json!({ "inPath": file.to_string_lossy() }),
    );
    assert_eq!(applied["status"], "warning");
    assert_eq!(applied["created"], 1);
    assert_eq!(applied["errorCount"], 3);

    let listed = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(listed["students"][0]["guardianPhoneNumber"], "abc123");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn failure_classifications_are_reported_with_codes_and_nothing_is_written() {
    let workspace = temp_dir("eduassist-import-failures");
    let header_only = write_csv(&workspace, "vacio.csv", &[HEADER]);
    let empty = write_csv(&workspace, "nada.csv", &[]);
    let all_bad = write_csv(
        &workspace,
        "malos.csv",
        &[HEADER, ",Ana,García,5to,A,Primaria,Mañana,"],
    );
    let missing = write_csv(
        &workspace,
        "faltan.csv",
        &["dni,nombres,apellidos,grado", "12345678,Ana,García,5to"],
    );
    let pdf = workspace.join("notas.pdf");
    std::fs::write(&pdf, b"%PDF-1.4").expect("write pdf");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "students.import.apply",
        json!({ "inPath": header_only.to_string_lossy() }),
    );
    assert_eq!(e["code"], "no_data_rows");
    assert_eq!(e["message"], "El archivo no contiene filas de datos de estudiantes.");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "students.import.preview",
        json!({ "inPath": empty.to_string_lossy() }),
    );
    assert_eq!(e["code"], "empty_file");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "students.import.apply",
        json!({ "inPath": all_bad.to_string_lossy() }),
    );
    assert_eq!(e["code"], "no_valid_students");
    assert_eq!(e["details"]["errors"].as_array().map(|a| a.len()), Some(1));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "students.import.preview",
        json!({ "inPath": missing.to_string_lossy() }),
    );
    assert_eq!(e["code"], "missing_headers");
    assert_eq!(
        e["details"]["missing"],
        json!(["sección", "nivel", "turno"])
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "students.import.preview",
        json!({ "inPath": pdf.to_string_lossy(), "mimeType": "application/pdf" }),
    );
    assert_eq!(e["code"], "unsupported_format");
    assert!(e["message"]
        .as_str()
        .unwrap_or_default()
        .contains("notas.pdf (tipo: application/pdf)"));

    let listed = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(listed["count"], 0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn mime_type_rescues_extensionless_upload_and_ambiguity_is_reported() {
    let workspace = temp_dir("eduassist-import-mime");
    let file = write_csv(
        &workspace,
        "upload",
        &[
            "DNI,Nombres,Nombre,Apellidos,Grado,Sección,Nivel,Turno",
            "12345678,Ana,Ana María,García,5to,A,Primaria,Mañana",
        ],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.import.preview",
        json!({ "inPath": file.to_string_lossy(), "mimeType": "text/csv" }),
    );
    assert_eq!(preview["candidates"][0]["firstName"], "Ana");
    assert_eq!(preview["headerMap"]["celular apoderado"], serde_json::Value::Null);
    assert_eq!(
        preview["ambiguousHeaders"],
        json!([{ "field": "nombres", "columns": [1, 2] }])
    );

    let _ = std::fs::remove_dir_all(workspace);
}
