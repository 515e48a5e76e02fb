//! Collaborator seams: the object store, the document-understanding service,
//! and the destination warehouse.

pub mod extract;
pub mod objstore;
pub mod warehouse;
