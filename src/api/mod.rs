//! Backend transport: outcome classification and the client seam.

pub mod client;
pub mod outcome;
pub mod resilient;

pub use client::ApiClient;
pub use outcome::{ApiOutcome, Transport};
pub use resilient::ResilientClient;
