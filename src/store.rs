use crate::db::now_rfc3339;
use crate::import::StudentRepository;
use crate::roster::{Level, Shift, Student, StudentFields};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};

const STUDENT_COLUMNS: &str =
    "id, dni, first_name, last_name, grade, section, level, shift, guardian_phone";

fn bad_enum(idx: usize, kind: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown {} '{}'", kind, value).into(),
    )
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    let level_raw: String = r.get(6)?;
    let shift_raw: String = r.get(7)?;
    let level = Level::parse(&level_raw).ok_or_else(|| bad_enum(6, "level", &level_raw))?;
    let shift = Shift::parse(&shift_raw).ok_or_else(|| bad_enum(7, "shift", &shift_raw))?;
    Ok(Student {
        id: r.get(0)?,
        fields: StudentFields {
            dni: r.get(1)?,
            first_name: r.get(2)?,
            last_name: r.get(3)?,
            grade: r.get(4)?,
            section: r.get(5)?,
            level,
            shift,
            guardian_phone_number: r.get(8)?,
        },
    })
}

pub fn get_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
        [student_id],
        student_from_row,
    )
    .optional()
}

pub fn find_student_by_dni(conn: &Connection, dni: &str) -> rusqlite::Result<Option<Student>> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE dni = ?", STUDENT_COLUMNS),
        [dni],
        student_from_row,
    )
    .optional()
}

/// Roster filters. `None` matches everything; so do the UI's "all" labels.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub grade: Option<String>,
    pub section: Option<String>,
    pub level: Option<String>,
    pub search: Option<String>,
}

impl StudentFilter {
    pub fn from_params(params: &serde_json::Value) -> Self {
        let pick = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty() && s != "Todos" && s != "Todas")
        };
        StudentFilter {
            grade: pick("grade"),
            section: pick("section"),
            level: pick("level"),
            search: pick("search").map(|s| s.to_lowercase()),
        }
    }

    pub fn matches(&self, s: &Student) -> bool {
        let f = &s.fields;
        if self.grade.as_deref().is_some_and(|g| g != f.grade) {
            return false;
        }
        if self
            .section
            .as_deref()
            .is_some_and(|sec| !sec.eq_ignore_ascii_case(&f.section))
        {
            return false;
        }
        if self.level.as_deref().is_some_and(|l| l != f.level.as_str()) {
            return false;
        }
        match self.search.as_deref() {
            Some(q) => f.full_name().to_lowercase().contains(q) || f.dni.to_lowercase().contains(q),
            None => true,
        }
    }
}

pub fn list_students(conn: &Connection, filter: &StudentFilter) -> rusqlite::Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY last_name, first_name, dni",
        STUDENT_COLUMNS
    ))?;
    let all = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(all.into_iter().filter(|s| filter.matches(s)).collect())
}

pub fn insert_student(conn: &Connection, s: &Student) -> rusqlite::Result<()> {
    let f = &s.fields;
    conn.execute(
        "INSERT INTO students(id, dni, first_name, last_name, grade, section, level, shift, guardian_phone, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &s.id,
            &f.dni,
            &f.first_name,
            &f.last_name,
            &f.grade,
            &f.section,
            f.level.as_str(),
            f.shift.as_str(),
            &f.guardian_phone_number,
            now_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn update_student(conn: &Connection, s: &Student) -> rusqlite::Result<usize> {
    let f = &s.fields;
    conn.execute(
        "UPDATE students SET
           dni = ?, first_name = ?, last_name = ?, grade = ?, section = ?,
           level = ?, shift = ?, guardian_phone = ?, updated_at = ?
         WHERE id = ?",
        (
            &f.dni,
            &f.first_name,
            &f.last_name,
            &f.grade,
            &f.section,
            f.level.as_str(),
            f.shift.as_str(),
            &f.guardian_phone_number,
            now_rfc3339(),
            &s.id,
        ),
    )
}

/// Removes the student with its attendance and grade rows. Callers wrap this
/// in a transaction.
pub fn delete_student(conn: &Connection, student_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM attendance WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM grades WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM students WHERE id = ?", [student_id])
}

pub struct SqliteStudentStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStudentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteStudentStore { conn }
    }
}

impl StudentRepository for SqliteStudentStore<'_> {
    fn find_by_dni(&mut self, dni: &str) -> anyhow::Result<Option<Student>> {
        Ok(find_student_by_dni(self.conn, dni)?)
    }

    fn insert(&mut self, student: &Student) -> anyhow::Result<()> {
        insert_student(self.conn, student)?;
        Ok(())
    }

    fn update(&mut self, student: &Student) -> anyhow::Result<()> {
        let changed = update_student(self.conn, student)?;
        if changed == 0 {
            anyhow::bail!("student {} disappeared during update", student.id);
        }
        Ok(())
    }
}
