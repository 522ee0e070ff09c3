use thiserror::Error;

/// Failures that abort a student import. `Display` is the message shown to
/// the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("Formato de archivo no válido: {name} (tipo: {mime}). Por favor, suba un archivo .xlsx, .xls o .csv.")]
    UnsupportedFormat { name: String, mime: String },

    #[error("Error al procesar el archivo. Verifique el formato y los encabezados. ({0})")]
    Unreadable(String),

    #[error("El archivo está vacío o no tiene el formato esperado (mínimo una fila de encabezados y una de datos).")]
    EmptyFile,

    #[error("Faltan los siguientes encabezados requeridos: {}. Encabezados encontrados: {}", .missing.join(", "), .headers.join(", "))]
    MissingHeaders {
        missing: Vec<String>,
        headers: Vec<String>,
    },

    #[error("El archivo no contiene filas de datos de estudiantes.")]
    NoDataRows,

    #[error("No se encontraron estudiantes válidos en el archivo después del procesamiento.")]
    NoValidStudents { errors: Vec<String> },
}

impl ImportError {
    /// Stable wire code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::UnsupportedFormat { .. } => "unsupported_format",
            ImportError::Unreadable(_) => "unreadable_file",
            ImportError::EmptyFile => "empty_file",
            ImportError::MissingHeaders { .. } => "missing_headers",
            ImportError::NoDataRows => "no_data_rows",
            ImportError::NoValidStudents { .. } => "no_valid_students",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            ImportError::UnsupportedFormat { name, mime } => {
                Some(serde_json::json!({ "name": name, "mimeType": mime }))
            }
            ImportError::MissingHeaders { missing, headers } => {
                Some(serde_json::json!({ "missing": missing, "headers": headers }))
            }
            ImportError::NoValidStudents { errors } => {
                Some(serde_json::json!({ "errors": super::cap_errors(errors) }))
            }
            _ => None,
        }
    }
}
