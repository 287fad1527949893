mod blob;
mod document;
mod http;
mod images;
mod mirror;

pub use blob::{BlobStore, MemoryBlobStore};
pub use document::{Document, DocumentStore, Fields, MemoryDocumentStore};
pub use http::{HttpBlobStore, HttpDocumentStore};
pub use images::ImageStore;
pub use mirror::RemoteMirror;
