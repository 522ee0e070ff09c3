use crate::roster::Student;
use serde::{Deserialize, Serialize};

pub const PAYLOAD_TYPE: &str = "eduassist_student_id";

/// JSON text embedded in a student's attendance QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQrPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub student_id: String,
    pub student_name: String,
}

impl StudentQrPayload {
    pub fn for_student(student: &Student) -> Self {
        StudentQrPayload {
            kind: PAYLOAD_TYPE.to_string(),
            student_id: student.id.clone(),
            student_name: student.fields.full_name(),
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrError {
    #[error("el código QR no contiene JSON válido")]
    Malformed,
    #[error("el código QR no es de un estudiante (tipo: {0})")]
    WrongType(String),
    #[error("el código QR no identifica a ningún estudiante")]
    MissingStudent,
}

pub fn decode(text: &str) -> Result<StudentQrPayload, QrError> {
    let payload: StudentQrPayload =
        serde_json::from_str(text.trim()).map_err(|_| QrError::Malformed)?;
    if payload.kind != PAYLOAD_TYPE {
        return Err(QrError::WrongType(payload.kind));
    }
    if payload.student_id.trim().is_empty() {
        return Err(QrError::MissingStudent);
    }
    Ok(payload)
}
