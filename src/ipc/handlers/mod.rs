pub mod backup;
pub mod core;
pub mod courses;
pub mod grades;
pub mod permissions;
pub mod setup;
pub mod students;
pub mod users;
