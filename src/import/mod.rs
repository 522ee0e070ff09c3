//! Bulk student import from spreadsheets.
//!
//! The pipeline reads the first sheet into a grid of strings, resolves the
//! header row to semantic fields, validates each data row and classifies the
//! result. Nothing here touches the store; committing is a separate step
//! (see [`commit`]) so the caller can discard a preview.

mod error;
pub mod commit;
pub mod headers;
pub mod rows;
pub mod sheet;

pub use commit::{commit_candidates, StudentRepository};
pub use error::ImportError;
pub use headers::{resolve_headers, HeaderMap};

use crate::roster::StudentFields;
use serde::Serialize;
use std::path::Path;

/// How many row errors are shown individually before summarising the rest.
pub const MAX_DISPLAYED_ERRORS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every non-blank row became a candidate.
    Success,
    /// Some rows were rejected or warned about; the candidates may still be
    /// committed.
    Warning,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub status: OutcomeStatus,
    pub candidates: Vec<StudentFields>,
    pub errors: Vec<String>,
    pub header_map: HeaderMap,
}

impl ImportOutcome {
    pub fn displayed_errors(&self) -> Vec<String> {
        cap_errors(&self.errors)
    }
}

/// First five errors, then `Y {k} errores más...` for the remainder.
pub fn cap_errors(errors: &[String]) -> Vec<String> {
    let mut out: Vec<String> = errors.iter().take(MAX_DISPLAYED_ERRORS).cloned().collect();
    if errors.len() > MAX_DISPLAYED_ERRORS {
        out.push(format!(
            "Y {} errores más...",
            errors.len() - MAX_DISPLAYED_ERRORS
        ));
    }
    out
}

/// Runs header resolution and row validation over an already-read grid.
pub fn process_grid(grid: &[Vec<String>]) -> Result<ImportOutcome, ImportError> {
    let Some((header_row, data_rows)) = grid.split_first() else {
        return Err(ImportError::EmptyFile);
    };

    let headers: Vec<String> = header_row
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let header_map = resolve_headers(&headers)?;

    let report = rows::parse_rows(data_rows, &header_map, 2);

    match (report.candidates.is_empty(), report.errors.is_empty()) {
        (true, true) => Err(ImportError::NoDataRows),
        (true, false) => Err(ImportError::NoValidStudents {
            errors: report.errors,
        }),
        (false, no_errors) => Ok(ImportOutcome {
            status: if no_errors {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Warning
            },
            candidates: report.candidates,
            errors: report.errors,
            header_map,
        }),
    }
}

/// Format check, read, and validation of one uploaded file.
pub fn import_file(path: &Path, mime: Option<&str>) -> Result<ImportOutcome, ImportError> {
    let format = sheet::detect_format(path, mime)?;
    let grid = sheet::read_grid(path, format)?;
    tracing::debug!(
        path = %path.display(),
        format = format.as_str(),
        rows = grid.len(),
        "read import sheet"
    );
    process_grid(&grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Level, Shift};

    const HEADER: [&str; 8] = [
        "DNI",
        "Nombres",
        "Apellidos",
        "Grado",
        "Sección",
        "Nivel",
        "Turno",
        "Celular Apoderado",
    ];

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn scenario_a_single_clean_row() {
        let g = grid(&[
            &HEADER,
            &["12345678", "Ana", "García", "5to", "a", "Primaria", "Mañana", "987654321"],
        ]);
        let out = process_grid(&g).expect("import");
        assert_eq!(out.status, OutcomeStatus::Success);
        assert!(out.errors.is_empty());
        assert_eq!(
            out.candidates,
            vec![StudentFields {
                dni: "12345678".into(),
                first_name: "Ana".into(),
                last_name: "García".into(),
                grade: "5to".into(),
                section: "A".into(),
                level: Level::Primaria,
                shift: Shift::Manana,
                guardian_phone_number: "987654321".into(),
            }]
        );
    }

    #[test]
    fn scenario_b_blank_dni_means_no_valid_students() {
        let g = grid(&[
            &HEADER,
            &["", "Ana", "García", "5to", "A", "Primaria", "Mañana", ""],
        ]);
        match process_grid(&g) {
            Err(ImportError::NoValidStudents { errors }) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("Fila 2"));
                assert!(errors[0].contains("Faltan datos esenciales"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn scenario_c_invalid_level_is_named() {
        let g = grid(&[
            &HEADER,
            &["12345678", "Ana", "García", "5to", "A", "Avanzado", "Mañana", ""],
            &["87654321", "Luis", "Paz", "3ro", "B", "Secundaria", "Tarde", ""],
        ]);
        let out = process_grid(&g).expect("partial import");
        assert_eq!(out.status, OutcomeStatus::Warning);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].dni, "87654321");
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].contains("'Avanzado'"));
    }

    #[test]
    fn scenario_d_bad_phone_is_a_warning_only() {
        let g = grid(&[
            &HEADER,
            &["12345678", "Ana", "García", "5to", "A", "Primaria", "Mañana", "abc123"],
        ]);
        let out = process_grid(&g).expect("import");
        assert_eq!(out.status, OutcomeStatus::Warning);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.errors.len(), 1);
    }

    #[test]
    fn scenario_e_header_only_has_no_data_rows() {
        let g = grid(&[&HEADER]);
        assert_eq!(process_grid(&g).unwrap_err(), ImportError::NoDataRows);

        let g = grid(&[&HEADER, &["", "", "", "", "", "", "", ""]]);
        assert_eq!(process_grid(&g).unwrap_err(), ImportError::NoDataRows);
    }

    #[test]
    fn empty_grid_short_circuits_before_headers() {
        assert_eq!(process_grid(&[]).unwrap_err(), ImportError::EmptyFile);
    }

    #[test]
    fn missing_headers_fail_fast_even_with_data() {
        let g = grid(&[
            &["dni", "nombres", "apellidos"],
            &["12345678", "Ana", "García"],
        ]);
        assert_eq!(process_grid(&g).unwrap_err().code(), "missing_headers");
    }

    #[test]
    fn errors_are_capped_for_display() {
        let mut rows: Vec<Vec<String>> = vec![HEADER.iter().map(|s| s.to_string()).collect()];
        for i in 0..8 {
            let dni = format!("1000000{i}");
            rows.push(
                [dni.as_str(), "Ana", "García", "5to", "A", "Primaria", "Noche", ""]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            );
        }
        rows.push(
            ["99999999", "Luis", "Paz", "3ro", "B", "Secundaria", "Tarde", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let out = process_grid(&rows).expect("partial");
        assert_eq!(out.errors.len(), 8);
        let shown = out.displayed_errors();
        assert_eq!(shown.len(), 6);
        assert_eq!(shown[5], "Y 3 errores más...");
    }
}
