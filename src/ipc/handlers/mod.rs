pub mod admin;
pub mod core;
pub mod session;
pub mod student;
