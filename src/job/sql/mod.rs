//! SQL for the destination table, per warehouse dialect.

mod ddl;
mod processed_paths;
mod upsert;

/// Columns in insertion order; `id` is generated by the warehouse.
pub const COLUMNS: [&str; 4] = ["file_name", "file_path", "process_date", "extracted_content"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Snowflake,
}

pub fn ddl(dialect: Dialect, table: &str) -> String {
    let mut out = String::new();
    ddl::generate(&mut out, dialect, table).unwrap();
    out
}

/// Upsert binding, in order: file name, file path, process date, content JSON.
pub fn upsert(dialect: Dialect, table: &str) -> String {
    let mut out = String::new();
    upsert::generate(&mut out, dialect, table).unwrap();
    out
}

pub fn processed_paths(table: &str) -> String {
    let mut out = String::new();
    processed_paths::generate(&mut out, table).unwrap();
    out
}
