//! Job applications: submission, the accept/reject/withdraw lifecycle, and viewed tracking.

pub mod domain;
mod service;
mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    ApplicantSnapshot, Application, ApplicationProposal, ApplicationStatus,
    SELECTED_ANOTHER_MESSAGE,
};
pub use service::{AcceptanceOutcome, ApplicationLifecycle};
pub use store::ApplicationStore;
