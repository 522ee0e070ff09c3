use crate::roster::{Student, StudentFields};
use uuid::Uuid;

/// Storage seam for the committer. Lookups are by the business key (`dni`),
/// never by the generated id.
pub trait StudentRepository {
    fn find_by_dni(&mut self, dni: &str) -> anyhow::Result<Option<Student>>;
    fn insert(&mut self, student: &Student) -> anyhow::Result<()>;
    fn update(&mut self, student: &Student) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub student_ids: Vec<String>,
}

/// Upserts each candidate by `dni`. An existing student keeps its id and has
/// every other field replaced; otherwise a new id is generated.
pub fn commit_candidates<R: StudentRepository + ?Sized>(
    repo: &mut R,
    candidates: &[StudentFields],
) -> anyhow::Result<CommitSummary> {
    let mut summary = CommitSummary::default();
    for fields in candidates {
        match repo.find_by_dni(&fields.dni)? {
            Some(existing) => {
                let student = Student {
                    id: existing.id,
                    fields: fields.clone(),
                };
                repo.update(&student)?;
                summary.updated += 1;
                summary.student_ids.push(student.id);
            }
            None => {
                let student = Student {
                    id: Uuid::new_v4().to_string(),
                    fields: fields.clone(),
                };
                repo.insert(&student)?;
                summary.created += 1;
                summary.student_ids.push(student.id);
            }
        }
    }
    Ok(summary)
}
