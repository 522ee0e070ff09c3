use super::ImportError;
use serde::Serialize;

/// Semantic columns an import sheet is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Field {
    Dni,
    Nombres,
    Apellidos,
    Grado,
    Seccion,
    Nivel,
    Turno,
    CelularApoderado,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Dni,
        Field::Nombres,
        Field::Apellidos,
        Field::Grado,
        Field::Seccion,
        Field::Nivel,
        Field::Turno,
        Field::CelularApoderado,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Field::Dni => "dni",
            Field::Nombres => "nombres",
            Field::Apellidos => "apellidos",
            Field::Grado => "grado",
            Field::Seccion => "sección",
            Field::Nivel => "nivel",
            Field::Turno => "turno",
            Field::CelularApoderado => "celular apoderado",
        }
    }

    pub fn is_required(self) -> bool {
        self != Field::CelularApoderado
    }

    /// `header` is expected lower-cased and trimmed.
    fn matches(self, header: &str) -> bool {
        match self {
            Field::Seccion => header.contains("secci"),
            Field::CelularApoderado => {
                (header.contains("celular")
                    || header.contains("telefono")
                    || header.contains("teléfono"))
                    && (header.contains("apoderado") || header.contains("tutor"))
            }
            Field::Nombres => header == "nombres" || header == "nombre",
            other => header == other.label(),
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// A field whose rule matched more than one column. The lowest index was
/// used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmbiguousHeader {
    pub field: &'static str,
    pub columns: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeaderMap {
    indices: [Option<usize>; 8],
    ambiguous: Vec<AmbiguousHeader>,
}

impl HeaderMap {
    pub fn get(&self, field: Field) -> Option<usize> {
        self.indices[field.slot()]
    }

    pub fn ambiguous(&self) -> &[AmbiguousHeader] {
        &self.ambiguous
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut m = serde_json::Map::new();
        for f in Field::ALL {
            m.insert(
                f.label().to_string(),
                match self.get(f) {
                    Some(i) => serde_json::json!(i),
                    None => serde_json::Value::Null,
                },
            );
        }
        serde_json::Value::Object(m)
    }
}

/// Maps the header row to column indices. Fails when any required field has
/// no matching column.
pub fn resolve_headers(headers: &[String]) -> Result<HeaderMap, ImportError> {
    let mut map = HeaderMap::default();
    for field in Field::ALL {
        let hits: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| field.matches(h))
            .map(|(i, _)| i)
            .collect();
        map.indices[field.slot()] = hits.first().copied();
        if hits.len() > 1 {
            map.ambiguous.push(AmbiguousHeader {
                field: field.label(),
                columns: hits,
            });
        }
    }

    let missing: Vec<String> = Field::ALL
        .into_iter()
        .filter(|f| f.is_required() && map.get(*f).is_none())
        .map(|f| f.label().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ImportError::MissingHeaders {
            missing,
            headers: headers.to_vec(),
        });
    }
    Ok(map)
}
