use crate::roster::Student;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const GRADE_MIN: f64 = 0.0;
pub const GRADE_MAX: f64 = 20.0;

/// Half-up rounding to one decimal: `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

const AUTO_REMARKS: [(f64, &str); 4] = [
    (18.0, "AD LMS (Logro Muy Satisfactorio)"),
    (14.0, "A LS (Logro Satisfactorio)"),
    (11.0, "B LB (Logro Básico)"),
    (0.0, "C LI (Logro Inicial)"),
];

/// Achievement band for a 0–20 grade.
pub fn auto_remark(grade: f64) -> &'static str {
    AUTO_REMARKS
        .iter()
        .find(|(floor, _)| grade >= *floor)
        .map(|(_, label)| *label)
        .unwrap_or(AUTO_REMARKS[3].1)
}

pub fn is_auto_remark(s: &str) -> bool {
    AUTO_REMARKS.iter().any(|(_, label)| *label == s)
}

/// Free-text remarks win unless they are empty or one of the automatic
/// labels, in which case the label follows the grade.
pub fn effective_remark(grade: f64, remarks: Option<&str>) -> String {
    match remarks.map(str::trim) {
        Some(r) if !r.is_empty() && !is_auto_remark(r) => r.to_string(),
        _ => auto_remark(grade).to_string(),
    }
}

pub fn average_1_decimal(grades: &[f64]) -> Option<f64> {
    if grades.is_empty() {
        return None;
    }
    let sum: f64 = grades.iter().sum();
    Some(round_off_1_decimal(sum / grades.len() as f64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Presente,
    Ausente,
    Tardanza,
    Justificado,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 4] = [
        AttendanceStatus::Presente,
        AttendanceStatus::Ausente,
        AttendanceStatus::Tardanza,
        AttendanceStatus::Justificado,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Presente => "Presente",
            AttendanceStatus::Ausente => "Ausente",
            AttendanceStatus::Tardanza => "Tardanza",
            AttendanceStatus::Justificado => "Justificado",
        }
    }

    pub fn parse(s: &str) -> Option<AttendanceStatus> {
        AttendanceStatus::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub total_days: usize,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub justified: usize,
}

pub fn summarize_attendance<I>(statuses: I) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut out = AttendanceSummary::default();
    for s in statuses {
        out.total_days += 1;
        match s {
            AttendanceStatus::Presente => out.present += 1,
            AttendanceStatus::Ausente => out.absent += 1,
            AttendanceStatus::Tardanza => out.late += 1,
            AttendanceStatus::Justificado => out.justified += 1,
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrade {
    pub course_id: String,
    pub evaluation_type: String,
    pub grade: f64,
    pub remarks: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub student: Student,
    pub period: String,
    pub generated_at: String,
    pub grades_by_subject: Vec<SubjectGrade>,
    pub average: Option<f64>,
    pub attendance_summary: AttendanceSummary,
    pub summary: String,
}

pub fn build_progress_report(
    student: Student,
    period: &str,
    generated_at: String,
    grades_by_subject: Vec<SubjectGrade>,
    attendance_summary: AttendanceSummary,
) -> ProgressReport {
    let values: Vec<f64> = grades_by_subject.iter().map(|g| g.grade).collect();
    let average = average_1_decimal(&values);
    let standing = match average {
        Some(avg) if avg > 15.0 => "sobresaliente",
        _ => "adecuado",
    };
    let summary = format!(
        "Informe de progreso para {} durante el {}. En general, {} ha demostrado un progreso {} en sus asignaturas. Se recomienda seguir fomentando la participación activa en clase.",
        student.fields.full_name(),
        period,
        student.fields.first_name,
        standing
    );
    ProgressReport {
        student,
        period: period.to_string(),
        generated_at,
        grades_by_subject,
        average,
        attendance_summary,
        summary,
    }
}

/// Sectioned CSV with a leading BOM so spreadsheet tools pick UTF-8.
pub fn render_report_csv(report: &ProgressReport) -> anyhow::Result<Vec<u8>> {
    let mut w = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    let s = &report.student.fields;

    w.write_record(["Tipo de Dato", "Clave", "Valor"])?;
    let info = [
        ("ID", report.student.id.clone()),
        ("DNI", s.dni.clone()),
        ("Nombre", s.full_name()),
        ("Grado", s.grade.clone()),
        ("Sección", s.section.clone()),
        ("Nivel", s.level.to_string()),
        ("Turno", s.shift.to_string()),
        ("Periodo", report.period.clone()),
        ("Generado", report.generated_at.clone()),
    ];
    for (key, value) in info {
        w.write_record(["Información del Estudiante", key, value.as_str()])?;
    }
    w.write_record([""])?;

    w.write_record(["Resumen General", report.summary.as_str()])?;
    let average = report
        .average
        .map(|a| format!("{:.1}", a))
        .unwrap_or_else(|| "N/A".to_string());
    w.write_record(["Resumen General", "Promedio", average.as_str()])?;
    w.write_record([""])?;

    w.write_record(["Calificaciones", "Materia", "Evaluación", "Nota", "Comentarios"])?;
    for g in &report.grades_by_subject {
        let grade = format!("{}", g.grade);
        w.write_record([
            "Calificaciones",
            g.course_id.as_str(),
            g.evaluation_type.as_str(),
            grade.as_str(),
            g.remarks.as_str(),
        ])?;
    }
    w.write_record([""])?;

    let a = &report.attendance_summary;
    w.write_record([
        "Asistencia",
        "Total Días (Ref.)",
        "Presente",
        "Ausente",
        "Tardanzas",
        "Justificado",
    ])?;
    w.write_record([
        "Asistencia".to_string(),
        a.total_days.to_string(),
        a.present.to_string(),
        a.absent.to_string(),
        a.late.to_string(),
        a.justified.to_string(),
    ])?;

    let body = w.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let mut out = Vec::with_capacity(body.len() + 3);
    out.extend_from_slice("\u{FEFF}".as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::{Level, Shift, StudentFields};

    fn student() -> Student {
        Student {
            id: "s-1".into(),
            fields: StudentFields {
                dni: "12345678".into(),
                first_name: "Ana".into(),
                last_name: "García".into(),
                grade: "5to".into(),
                section: "A".into(),
                level: Level::Primaria,
                shift: Shift::Manana,
                guardian_phone_number: String::new(),
            },
        }
    }

    fn subject(course: &str, grade: f64) -> SubjectGrade {
        SubjectGrade {
            course_id: course.into(),
            evaluation_type: "Examen".into(),
            grade,
            remarks: auto_remark(grade).into(),
        }
    }

    #[test]
    fn remark_bands_use_inclusive_floors() {
        assert_eq!(auto_remark(20.0), "AD LMS (Logro Muy Satisfactorio)");
        assert_eq!(auto_remark(18.0), "AD LMS (Logro Muy Satisfactorio)");
        assert_eq!(auto_remark(17.9), "A LS (Logro Satisfactorio)");
        assert_eq!(auto_remark(14.0), "A LS (Logro Satisfactorio)");
        assert_eq!(auto_remark(11.0), "B LB (Logro Básico)");
        assert_eq!(auto_remark(10.99), "C LI (Logro Inicial)");
        assert_eq!(auto_remark(0.0), "C LI (Logro Inicial)");
    }

    #[test]
    fn stale_auto_remark_follows_new_grade() {
        assert_eq!(
            effective_remark(19.0, Some("C LI (Logro Inicial)")),
            "AD LMS (Logro Muy Satisfactorio)"
        );
        assert_eq!(effective_remark(19.0, Some("  ")), auto_remark(19.0));
        assert_eq!(effective_remark(5.0, Some("Mejoró mucho")), "Mejoró mucho");
    }

    #[test]
    fn average_rounds_half_up_to_one_decimal() {
        assert_eq!(average_1_decimal(&[]), None);
        assert_eq!(average_1_decimal(&[15.0, 16.0]), Some(15.5));
        assert_eq!(average_1_decimal(&[14.0, 15.0, 15.0]), Some(14.7));
    }

    #[test]
    fn attendance_counts_each_status() {
        let s = summarize_attendance([
            AttendanceStatus::Presente,
            AttendanceStatus::Presente,
            AttendanceStatus::Ausente,
            AttendanceStatus::Tardanza,
            AttendanceStatus::Justificado,
        ]);
        assert_eq!(
            s,
            AttendanceSummary {
                total_days: 5,
                present: 2,
                absent: 1,
                late: 1,
                justified: 1
            }
        );
    }

    #[test]
    fn summary_wording_depends_on_average() {
        let high = build_progress_report(
            student(),
            "Bimestre 1",
            "2026-01-01T00:00:00Z".into(),
            vec![subject("MAT", 16.0), subject("COM", 17.0)],
            AttendanceSummary::default(),
        );
        assert_eq!(high.average, Some(16.5));
        assert!(high.summary.contains("progreso sobresaliente"));
        assert!(high.summary.starts_with("Informe de progreso para Ana García durante el Bimestre 1."));

        let exactly_15 = build_progress_report(
            student(),
            "Bimestre 1",
            "2026-01-01T00:00:00Z".into(),
            vec![subject("MAT", 15.0)],
            AttendanceSummary::default(),
        );
        assert!(exactly_15.summary.contains("progreso adecuado"));

        let empty = build_progress_report(
            student(),
            "Bimestre 1",
            "2026-01-01T00:00:00Z".into(),
            vec![],
            AttendanceSummary::default(),
        );
        assert_eq!(empty.average, None);
        assert!(empty.summary.contains("progreso adecuado"));
    }

    #[test]
    fn csv_has_bom_and_all_sections() {
        let report = build_progress_report(
            student(),
            "Bimestre 1",
            "2026-01-01T00:00:00Z".into(),
            vec![subject("MAT", 16.0)],
            summarize_attendance([AttendanceStatus::Presente, AttendanceStatus::Ausente]),
        );
        let bytes = render_report_csv(&report).expect("render");
        assert!(bytes.starts_with("\u{FEFF}".as_bytes()));
        let text = String::from_utf8(bytes).expect("utf8");
        for section in [
            "Información del Estudiante,Nombre,Ana García",
            "Resumen General,Promedio,16.0",
            "Calificaciones,MAT,Examen,16,A LS (Logro Satisfactorio)",
            "Asistencia,2,1,1,0,0",
        ] {
            assert!(text.contains(section), "missing {section:?} in {text}");
        }
    }
}
