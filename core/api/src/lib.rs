//! Embaixada consular API client
//!
//! Typed access to the consular REST API plus the glue that lets the sync
//! queue replay deferred writes against it:
//! - Bearer-authenticated HTTP client with error classification
//! - Services for visas, appointments, the citizen profile and documents
//! - Locally stored visa drafts
//! - Router turning queued operations back into API calls
//! - Health-check probe usable as a network signal

pub mod appointment;
pub mod auth;
pub mod citizen;
pub mod client;
pub mod document;
pub mod probe;
pub mod router;
pub mod types;
pub mod visa;
pub mod write;

#[cfg(test)]
mod testing;

// Re-export main types
pub use appointment::AppointmentService;
pub use auth::{StaticTokenProvider, TokenProvider};
pub use citizen::{CitizenService, ProfileChanges};
pub use client::{classify_status, segment, ApiClient, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT};
pub use document::{DocumentService, ProcessService};
pub use probe::HttpProbe;
pub use router::ApiRouter;
pub use types::*;
pub use visa::{VisaDraft, VisaDrafts, VisaService, DRAFTS_KEY};
pub use write::PendingWrite;
