//! The six lifecycle components. None of them calls another; handoffs happen
//! through storage objects, table records and the events those produce.

pub mod chat;
pub mod embedding_builder;
pub mod embedding_finalizer;
pub mod lister;
pub mod upload_finalizer;
pub mod upload_link;

pub use chat::ChatResponder;
pub use embedding_builder::{BatchReport, BuildSummary, EmbeddingBuilder};
pub use embedding_finalizer::{EmbeddingFinalizer, FinalizeOutcome};
pub use lister::DocumentLister;
pub use upload_finalizer::{UploadFinalizer, UploadOutcome};
pub use upload_link::UploadLinkIssuer;
