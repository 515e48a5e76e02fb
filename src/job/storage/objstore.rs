use crate::{model::ObjectRef, retry::Transient};

pub trait Client {
    type Error: std::error::Error + Transient + Send + Sync + 'static;

    /// Every object whose path starts with `prefix`. Partial listings are errors.
    fn list(&self, prefix: &str)
    -> impl Future<Output = Result<Vec<ObjectRef>, Self::Error>> + Send;

    fn get(&self, path: &str) -> impl Future<Output = Result<bytes::Bytes, Self::Error>> + Send;
}
