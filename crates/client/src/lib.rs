//! Submission clients.
//!
//! The boundary between the context environment and whatever coordinator
//! actually runs workloads.

#![warn(missing_docs)]

pub mod trait_;
pub mod local;

pub use trait_::{SubmissionClient, SubmissionHandle};
pub use local::{JobState, LocalClusterClient};
