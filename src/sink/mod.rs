// src/sink/mod.rs

pub mod database;
pub mod file;

pub use database::{DatabaseSink, INSERT_ATTEMPTS, INSERT_RETRY_DELAY};
pub use file::{script_path, write_sql_script};
