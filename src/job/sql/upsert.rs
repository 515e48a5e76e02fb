use itertools::Itertools;

use super::{COLUMNS, Dialect};
use std::fmt::Write as _;

fn data_columns() -> impl Iterator<Item = &'static str> {
    COLUMNS.into_iter().filter(|column| *column != "file_path")
}

fn generate_sqlite(out: &mut String, table: &str) -> std::fmt::Result {
    writeln!(out, "INSERT INTO {table}({})", COLUMNS.iter().join(", "))?;
    writeln!(out, "VALUES (?, ?, ?, ?)")?;
    writeln!(out, "ON CONFLICT (file_path)")?;
    writeln!(out, "DO UPDATE SET")?;
    let columns = data_columns().collect::<Vec<_>>();
    for (idx, name) in columns.iter().enumerate() {
        if idx == columns.len() - 1 {
            writeln!(out, "  {name} = EXCLUDED.{name};")?;
        } else {
            writeln!(out, "  {name} = EXCLUDED.{name},")?;
        }
    }
    Ok(())
}

fn generate_snowflake(out: &mut String, table: &str) -> std::fmt::Result {
    writeln!(out, "MERGE INTO {table} AS target")?;
    writeln!(out, "USING (SELECT")?;
    writeln!(out, "  ? AS file_name,")?;
    writeln!(out, "  ? AS file_path,")?;
    writeln!(out, "  TO_TIMESTAMP_NTZ(?) AS process_date,")?;
    writeln!(out, "  PARSE_JSON(?) AS extracted_content")?;
    writeln!(out, ") AS source")?;
    writeln!(out, "ON target.file_path = source.file_path")?;
    writeln!(
        out,
        "WHEN MATCHED THEN UPDATE SET {}",
        data_columns()
            .map(|name| format!("{name} = source.{name}"))
            .join(", ")
    )?;
    writeln!(
        out,
        "WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        COLUMNS.iter().join(", "),
        COLUMNS.iter().map(|name| format!("source.{name}")).join(", ")
    )?;
    Ok(())
}

pub fn generate(out: &mut String, dialect: Dialect, table: &str) -> std::fmt::Result {
    match dialect {
        Dialect::Sqlite => generate_sqlite(out, table),
        Dialect::Snowflake => generate_snowflake(out, table),
    }
}
