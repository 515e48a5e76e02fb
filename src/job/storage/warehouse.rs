use std::collections::HashSet;

use crate::{model::OutputRecord, retry::Transient};

pub trait Client {
    type Error: std::error::Error + Transient + Send + Sync + 'static;

    fn create_table(&self, table: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Insert or replace the row keyed by `record.file_path`.
    fn upsert(
        &self,
        table: &str,
        record: &OutputRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn processed_paths(
        &self,
        table: &str,
    ) -> impl Future<Output = Result<HashSet<String>, Self::Error>> + Send;
}
