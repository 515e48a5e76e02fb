use std::fmt::Write as _;

pub fn generate(out: &mut String, table: &str) -> std::fmt::Result {
    writeln!(out, "SELECT file_path FROM {table}")
}
