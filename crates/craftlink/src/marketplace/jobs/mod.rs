//! Job postings: the client side of the marketplace.

mod board;
pub mod domain;
pub mod import;
mod store;

pub use board::JobBoard;
pub use domain::{Job, JobDraft, JobStatus};
pub use import::{JobImportError, JobSeed, JobSeedImporter};
pub use store::JobStore;
