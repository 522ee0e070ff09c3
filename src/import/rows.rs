use super::headers::{Field, HeaderMap};
use crate::roster::{is_valid_phone, Level, Shift, StudentFields};

/// Candidates accepted from the data rows plus every problem recorded along
/// the way. Phone warnings appear in `errors` even though their row is kept.
#[derive(Debug, Default)]
pub struct RowReport {
    pub candidates: Vec<StudentFields>,
    pub errors: Vec<String>,
}

fn cell<'a>(row: &'a [String], idx: Option<usize>) -> &'a str {
    idx.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("")
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

/// Validates the rows that follow the header. `first_row_no` is the 1-based
/// spreadsheet row number of `rows[0]`.
pub fn parse_rows(rows: &[Vec<String>], map: &HeaderMap, first_row_no: usize) -> RowReport {
    let mut report = RowReport::default();

    for (offset, row) in rows.iter().enumerate() {
        let row_no = first_row_no + offset;
        if is_blank(row) {
            continue;
        }

        let dni = cell(row, map.get(Field::Dni)).to_string();
        let first_name = cell(row, map.get(Field::Nombres)).to_string();
        let last_name = cell(row, map.get(Field::Apellidos)).to_string();
        let grade = cell(row, map.get(Field::Grado)).to_string();
        let section = cell(row, map.get(Field::Seccion)).to_uppercase();
        let level_raw = cell(row, map.get(Field::Nivel));
        let shift_raw = cell(row, map.get(Field::Turno));
        let phone = cell(row, map.get(Field::CelularApoderado)).to_string();

        let required = [
            dni.as_str(),
            first_name.as_str(),
            last_name.as_str(),
            grade.as_str(),
            section.as_str(),
            level_raw,
            shift_raw,
        ];
        if required.iter().any(|v| v.is_empty()) {
            report.errors.push(format!(
                "Fila {}: Faltan datos esenciales (DNI, Nombres, Apellidos, Grado, Sección, Nivel o Turno).",
                row_no
            ));
            continue;
        }

        let Some(level) = Level::parse(level_raw) else {
            report.errors.push(format!(
                "Fila {} (DNI {}): Nivel '{}' no válido. Use 'Inicial', 'Primaria' o 'Secundaria'.",
                row_no, dni, level_raw
            ));
            continue;
        };
        let Some(shift) = Shift::parse(shift_raw) else {
            report.errors.push(format!(
                "Fila {} (DNI {}): Turno '{}' no válido. Use 'Mañana' o 'Tarde'.",
                row_no, dni, shift_raw
            ));
            continue;
        };

        // Malformed phones only warn; the row is still imported as-is.
        if !phone.is_empty() && !is_valid_phone(&phone) {
            report.errors.push(format!(
                "Fila {} (DNI {}): Número de celular del apoderado '{}' no es válido.",
                row_no, dni, phone
            ));
        }

        report.candidates.push(StudentFields {
            dni,
            first_name,
            last_name,
            grade,
            section,
            level,
            shift,
            guardian_phone_number: phone,
        });
    }

    report
}
