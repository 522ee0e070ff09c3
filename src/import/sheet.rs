use super::ImportError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use encoding_rs::WINDOWS_1252;
use std::borrow::Cow;
use std::io::Cursor;
use std::path::Path;

const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const MIME_XLS: &str = "application/vnd.ms-excel";
const MIME_CSV: &str = "text/csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Xlsx,
    Xls,
    Csv,
}

impl SheetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SheetFormat::Xlsx => "xlsx",
            SheetFormat::Xls => "xls",
            SheetFormat::Csv => "csv",
        }
    }
}

/// Decides the format from the file extension, falling back to the MIME type
/// the caller reported for the upload.
pub fn detect_format(path: &Path, mime: Option<&str>) -> Result<SheetFormat, ImportError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("xlsx") => return Ok(SheetFormat::Xlsx),
        Some("xls") => return Ok(SheetFormat::Xls),
        Some("csv") => return Ok(SheetFormat::Csv),
        _ => {}
    }
    let mime = mime.map(|m| m.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some(MIME_XLSX) => Ok(SheetFormat::Xlsx),
        Some(MIME_XLS) => Ok(SheetFormat::Xls),
        Some(MIME_CSV) => Ok(SheetFormat::Csv),
        other => Err(ImportError::UnsupportedFormat {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            mime: match other {
                Some(m) if !m.is_empty() => m.to_string(),
                _ => "desconocido".to_string(),
            },
        }),
    }
}

/// Reads the first worksheet (or the whole CSV) into a grid of strings.
pub fn read_grid(path: &Path, format: SheetFormat) -> Result<Vec<Vec<String>>, ImportError> {
    let bytes = std::fs::read(path).map_err(|e| ImportError::Unreadable(e.to_string()))?;
    match format {
        SheetFormat::Csv => csv_grid(&bytes),
        SheetFormat::Xlsx | SheetFormat::Xls => workbook_grid(bytes),
    }
}

/// UTF-8 when the bytes are valid UTF-8, otherwise Windows-1252 (what Excel
/// writes for "CSV" on Windows).
fn decode_csv_text(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            tracing::debug!("csv is not utf-8, decoded as windows-1252");
            text
        }
    }
}

fn csv_grid(bytes: &[u8]) -> Result<Vec<Vec<String>>, ImportError> {
    let text = decode_csv_text(bytes);
    let text = text.trim_start_matches('\u{FEFF}');

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ImportError::Unreadable(e.to_string()))?;
        grid.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(grid)
}

fn workbook_grid(bytes: Vec<u8>) -> Result<Vec<Vec<String>>, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| ImportError::Unreadable(e.to_string()))?;
    let sheet_names = workbook.sheet_names();
    let Some(first) = sheet_names.first() else {
        return Err(ImportError::EmptyFile);
    };
    let range = workbook
        .worksheet_range(first)
        .map_err(|e| ImportError::Unreadable(e.to_string()))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(data_to_string).collect())
        .collect())
}

/// Integral numbers lose their `.0` so numeric DNIs and phones read back as
/// typed.
pub fn data_to_string(d: &Data) -> String {
    match d {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension_case_insensitively() {
        assert_eq!(detect_format(Path::new("a/B.XLSX"), None), Ok(SheetFormat::Xlsx));
        assert_eq!(detect_format(Path::new("b.xls"), None), Ok(SheetFormat::Xls));
        assert_eq!(detect_format(Path::new("c.Csv"), None), Ok(SheetFormat::Csv));
    }

    #[test]
    fn falls_back_to_mime() {
        assert_eq!(
            detect_format(Path::new("upload.bin"), Some("text/csv")),
            Ok(SheetFormat::Csv)
        );
    }

    #[test]
    fn rejects_other_types_with_name_and_type() {
        let e = detect_format(Path::new("/tmp/notas.pdf"), Some("application/pdf"))
            .expect_err("pdf rejected");
        assert_eq!(e.code(), "unsupported_format");
        assert!(e.to_string().contains("notas.pdf (tipo: application/pdf)"));

        let e = detect_format(Path::new("/tmp/sin_extension"), None).expect_err("rejected");
        assert!(e.to_string().contains("(tipo: desconocido)"));
    }

    #[test]
    fn csv_grid_strips_bom_and_keeps_ragged_rows() {
        let grid = csv_grid("\u{FEFF}DNI,Nombres\n1,\"García, Ana\",extra\n".as_bytes())
            .expect("csv");
        assert_eq!(grid[0], vec!["DNI", "Nombres"]);
        assert_eq!(grid[1], vec!["1", "García, Ana", "extra"]);
    }

    #[test]
    fn numeric_cells_render_without_fraction() {
        assert_eq!(data_to_string(&Data::Float(12345678.0)), "12345678");
        assert_eq!(data_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(data_to_string(&Data::Int(987654321)), "987654321");
        assert_eq!(data_to_string(&Data::Empty), "");
    }

    #[test]
    fn non_utf8_csv_is_read_as_windows_1252() {
        let bytes: &[u8] = b"DNI,Nombres,Apellidos,Grado,Secci\xf3n,Nivel,Turno,Tel\xe9fono del Tutor\n\
12345678,Ana,Garc\xeda,5to,A,Primaria,Ma\xf1ana,987654321\n";
        let grid = csv_grid(bytes).expect("csv");
        assert_eq!(grid[0][4], "Sección");
        assert_eq!(grid[1][2], "García");
        assert_eq!(grid[1][6], "Mañana");

        let out = crate::import::process_grid(&grid).expect("import");
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.candidates[0].shift, crate::roster::Shift::Manana);
        assert_eq!(out.candidates[0].guardian_phone_number, "987654321");
    }

    fn inline_cell(r: &str, text: &str) -> String {
        format!(r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#, r, text)
    }

    fn number_cell(r: &str, n: &str) -> String {
        format!(r#"<c r="{}"><v>{}</v></c>"#, r, n)
    }

    fn sheet_xml(rows: &[(usize, Vec<String>)]) -> String {
        let body: String = rows
            .iter()
            .map(|(n, cells)| format!(r#"<row r="{}">{}</row>"#, n, cells.concat()))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
            body
        )
    }

    /// Minimal two-sheet workbook; only the first sheet holds students.
    fn write_xlsx(path: &Path, first: &str, second: &str) {
        use std::io::Write;
        let f = std::fs::File::create(path).expect("create xlsx");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        let entries = [
            (
                "[Content_Types].xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#
                    .to_string(),
            ),
            (
                "_rels/.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#
                    .to_string(),
            ),
            (
                "xl/workbook.xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Alumnos" sheetId="1" r:id="rId1"/><sheet name="Notas" sheetId="2" r:id="rId2"/></sheets>
</workbook>"#
                    .to_string(),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/>
</Relationships>"#
                    .to_string(),
            ),
            ("xl/worksheets/sheet1.xml", first.to_string()),
            ("xl/worksheets/sheet2.xml", second.to_string()),
        ];
        for (name, body) in entries {
            zip.start_file(name, opts).expect("start entry");
            zip.write_all(body.as_bytes()).expect("write entry");
        }
        zip.finish().expect("finish xlsx");
    }

    #[test]
    fn xlsx_first_sheet_is_imported_with_numeric_cells_as_text() {
        let dir = std::env::temp_dir().join(format!(
            "eduassist-xlsx-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("alumnos.xlsx");

        let header: Vec<String> = [
            ("A1", "DNI"),
            ("B1", "Nombres"),
            ("C1", "Apellidos"),
            ("D1", "Grado"),
            ("E1", "Sección"),
            ("F1", "Nivel"),
            ("G1", "Turno"),
            ("H1", "Celular Apoderado"),
        ]
        .iter()
        .map(|(r, t)| inline_cell(r, t))
        .collect();
        let valid = vec![
            number_cell("A2", "12345678"),
            inline_cell("B2", "Ana"),
            inline_cell("C2", "García"),
            inline_cell("D2", "5to"),
            inline_cell("E2", "a"),
            inline_cell("F2", "Primaria"),
            inline_cell("G2", "Mañana"),
            number_cell("H2", "987654321"),
        ];
        // Row 3 is left out entirely.
        let bad_level = vec![
            number_cell("A4", "87654321"),
            inline_cell("B4", "Luis"),
            inline_cell("C4", "Paz"),
            inline_cell("D4", "3ro"),
            inline_cell("E4", "B"),
            inline_cell("F4", "Avanzado"),
            inline_cell("G4", "Tarde"),
        ];
        let first = sheet_xml(&[(1, header), (2, valid), (4, bad_level)]);
        let second = sheet_xml(&[(1, vec![inline_cell("A1", "Curso")])]);
        write_xlsx(&path, &first, &second);

        assert_eq!(detect_format(&path, None), Ok(SheetFormat::Xlsx));
        let out = crate::import::import_file(&path, None).expect("xlsx import");
        assert_eq!(out.status, crate::import::OutcomeStatus::Warning);
        assert_eq!(out.candidates.len(), 1);
        let c = &out.candidates[0];
        assert_eq!(c.dni, "12345678");
        assert_eq!(c.section, "A");
        assert_eq!(c.last_name, "García");
        assert_eq!(c.guardian_phone_number, "987654321");
        assert_eq!(out.errors.len(), 1);
        assert!(
            out.errors[0].starts_with("Fila 4 (DNI 87654321): Nivel 'Avanzado'"),
            "{}",
            out.errors[0]
        );

        let _ = std::fs::remove_dir_all(dir);
    }
}
