pub mod comment;
pub mod label;
pub mod project;
pub mod rbac;
pub mod task;
pub mod team;
pub mod user;
