pub mod attendance;
pub mod core;
pub mod grades;
pub mod institutions;
pub mod notifications;
pub mod reports;
pub mod student_import;
pub mod students;
