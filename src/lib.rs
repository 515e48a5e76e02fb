//! Document sync: list objects in a store, run each through a
//! document-understanding service, and upsert the result into a warehouse
//! table keyed by the object path.

pub mod config;
pub mod deploy;
pub mod job;
pub mod model;
pub mod progress;
pub mod retry;

#[cfg(test)]
mod tests;
