use std::fmt::Write as _;

use super::Dialect;

pub fn generate(out: &mut String, dialect: Dialect, table: &str) -> std::fmt::Result {
    writeln!(out, "CREATE TABLE IF NOT EXISTS {table} (")?;
    match dialect {
        Dialect::Sqlite => {
            writeln!(out, "  id INTEGER PRIMARY KEY AUTOINCREMENT,")?;
            writeln!(out, "  file_name TEXT NOT NULL,")?;
            writeln!(out, "  file_path TEXT NOT NULL UNIQUE,")?;
            writeln!(out, "  process_date TEXT NOT NULL,")?;
            writeln!(out, "  extracted_content TEXT NOT NULL")?;
        }
        Dialect::Snowflake => {
            writeln!(out, "  id NUMBER AUTOINCREMENT PRIMARY KEY,")?;
            writeln!(out, "  file_name VARCHAR(255),")?;
            writeln!(out, "  file_path VARCHAR(1024) UNIQUE,")?;
            writeln!(
                out,
                "  process_date TIMESTAMP_NTZ DEFAULT CURRENT_TIMESTAMP(),"
            )?;
            writeln!(out, "  extracted_content VARIANT")?;
        }
    }
    writeln!(out, ")")?;
    Ok(())
}
