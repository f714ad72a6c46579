pub mod calc;
pub mod classes;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod evaluations;
pub mod grade_categories;
pub mod schedules;
pub mod scores;
pub mod session_reports;
pub mod students;
