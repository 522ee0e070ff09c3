use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Educational level a student is enrolled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Inicial,
    Primaria,
    Secundaria,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Inicial, Level::Primaria, Level::Secundaria];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Inicial => "Inicial",
            Level::Primaria => "Primaria",
            Level::Secundaria => "Secundaria",
        }
    }

    /// Exact, case-sensitive match against the allowed labels.
    pub fn parse(s: &str) -> Option<Level> {
        Level::ALL.into_iter().find(|l| l.as_str() == s)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// School shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shift {
    #[serde(rename = "Mañana")]
    Manana,
    Tarde,
}

impl Shift {
    pub const ALL: [Shift; 2] = [Shift::Manana, Shift::Tarde];

    pub fn as_str(self) -> &'static str {
        match self {
            Shift::Manana => "Mañana",
            Shift::Tarde => "Tarde",
        }
    }

    pub fn parse(s: &str) -> Option<Shift> {
        Shift::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every student attribute except the generated id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFields {
    pub dni: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub section: String,
    pub level: Level,
    pub shift: Shift,
    pub guardian_phone_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(flatten)]
    pub fields: StudentFields,
}

impl StudentFields {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// `^\d{7,15}$`
pub fn is_valid_phone(s: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{7,15}$").expect("static phone regex"))
        .is_match(s)
}

/// Validation used by the interactive create/update path. Stricter than the
/// import path: a malformed phone is an error here.
pub fn validate_form(fields: &StudentFields) -> Result<(), String> {
    let dni_len = fields.dni.chars().count();
    if !(8..=15).contains(&dni_len) {
        return Err("El DNI debe tener entre 8 y 15 caracteres.".to_string());
    }
    for (label, value) in [("nombre", &fields.first_name), ("apellido", &fields.last_name)] {
        let n = value.chars().count();
        if !(2..=50).contains(&n) {
            return Err(format!("El {} debe tener entre 2 y 50 caracteres.", label));
        }
    }
    if fields.grade.is_empty() {
        return Err("El grado es requerido.".to_string());
    }
    if fields.section.is_empty() {
        return Err("La sección es requerida.".to_string());
    }
    if !fields.guardian_phone_number.is_empty() && !is_valid_phone(&fields.guardian_phone_number) {
        return Err("Número de celular inválido.".to_string());
    }
    Ok(())
}
