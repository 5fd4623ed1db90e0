//! Queued write operations and the routing seam that delivers them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use embaixada_common::{EpochMillis, Error, OperationId, Result};

/// Opaque request body carried by an operation.
pub type Payload = Map<String, Value>;

/// Kinds of writes the app can defer while offline.
///
/// Values written by a newer build that this one does not know deserialize
/// to [`SyncOperationKind::Unknown`] instead of failing the whole queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOperationKind {
    /// Submit a new visa application.
    #[serde(rename = "CREATE_VISTO")]
    CreateVisa,
    /// Update the signed-in citizen's profile.
    #[serde(rename = "UPDATE_PROFILE")]
    UpdateProfile,
    /// Book a consular appointment.
    #[serde(rename = "CREATE_AGENDAMENTO")]
    CreateAppointment,
    /// Cancel a booked appointment.
    #[serde(rename = "CANCEL_AGENDAMENTO")]
    CancelAppointment,
    #[serde(other)]
    Unknown,
}

impl SyncOperationKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperationKind::CreateVisa => "CREATE_VISTO",
            SyncOperationKind::UpdateProfile => "UPDATE_PROFILE",
            SyncOperationKind::CreateAppointment => "CREATE_AGENDAMENTO",
            SyncOperationKind::CancelAppointment => "CANCEL_AGENDAMENTO",
            SyncOperationKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SyncOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE_VISTO" => Ok(SyncOperationKind::CreateVisa),
            "UPDATE_PROFILE" => Ok(SyncOperationKind::UpdateProfile),
            "CREATE_AGENDAMENTO" => Ok(SyncOperationKind::CreateAppointment),
            "CANCEL_AGENDAMENTO" => Ok(SyncOperationKind::CancelAppointment),
            other => Err(Error::InvalidInput(format!(
                "Unknown sync operation type: {}",
                other
            ))),
        }
    }
}

/// A pending write waiting for connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
    /// Unique id within the queue.
    pub id: OperationId,
    /// Which remote call replays this operation.
    #[serde(rename = "type")]
    pub kind: SyncOperationKind,
    /// Request body for the remote call.
    pub payload: Payload,
    /// When the operation was enqueued.
    pub created_at: EpochMillis,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Partial update applied to a queued operation.
#[derive(Debug, Clone, Default)]
pub struct OperationUpdate {
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub payload: Option<Payload>,
}

impl OperationUpdate {
    /// Bookkeeping for a failed attempt.
    pub fn failed(retry_count: u32, error: impl Into<String>) -> Self {
        Self {
            retry_count: Some(retry_count),
            last_error: Some(error.into()),
            payload: None,
        }
    }

    /// Merge the set fields into `op`.
    pub fn apply(self, op: &mut SyncOperation) {
        if let Some(retry_count) = self.retry_count {
            op.retry_count = retry_count;
        }
        if let Some(last_error) = self.last_error {
            op.last_error = Some(last_error);
        }
        if let Some(payload) = self.payload {
            op.payload = payload;
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Operations delivered and removed.
    pub success: usize,
    /// Failed attempts in this pass.
    pub failed: usize,
    /// Operations dropped for good during this pass.
    #[serde(default)]
    pub evicted: Vec<OperationId>,
}

/// Delivers one queued operation to the remote API.
///
/// An `Err` means the operation was not applied; the queue decides whether
/// to keep it for another pass based on the error's classification.
#[async_trait]
pub trait OperationRouter: Send + Sync {
    async fn dispatch(&self, op: &SyncOperation) -> Result<()>;
}

/// Router backed by a closure.
pub struct FnRouter<F>(F);

/// Build a router from an async closure.
pub fn router_fn<F, Fut>(f: F) -> FnRouter<F>
where
    F: Fn(SyncOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnRouter(f)
}

#[async_trait]
impl<F, Fut> OperationRouter for FnRouter<F>
where
    F: Fn(SyncOperation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn dispatch(&self, op: &SyncOperation) -> Result<()> {
        (self.0)(op.clone()).await
    }
}
