//! Typed view of the writes that can be deferred while offline.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::citizen::ProfileChanges;
use crate::types::{AppointmentCreateRequest, CancelAppointment, VisaCreateRequest};
use embaixada_common::{Error, Result};
use embaixada_sync::{Payload, SyncOperation, SyncOperationKind};

/// A user-initiated write, either sent directly or queued.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    CreateVisa(VisaCreateRequest),
    CreateAppointment(AppointmentCreateRequest),
    CancelAppointment(CancelAppointment),
    UpdateProfile(ProfileChanges),
}

impl PendingWrite {
    /// Queue kind for this write.
    pub fn kind(&self) -> SyncOperationKind {
        match self {
            PendingWrite::CreateVisa(_) => SyncOperationKind::CreateVisa,
            PendingWrite::CreateAppointment(_) => SyncOperationKind::CreateAppointment,
            PendingWrite::CancelAppointment(_) => SyncOperationKind::CancelAppointment,
            PendingWrite::UpdateProfile(_) => SyncOperationKind::UpdateProfile,
        }
    }

    /// Split into the queue kind and its JSON payload.
    pub fn into_parts(self) -> Result<(SyncOperationKind, Payload)> {
        let kind = self.kind();
        let payload = match self {
            PendingWrite::CreateVisa(request) => to_payload(&request)?,
            PendingWrite::CreateAppointment(request) => to_payload(&request)?,
            PendingWrite::CancelAppointment(cancel) => to_payload(&cancel)?,
            PendingWrite::UpdateProfile(changes) => changes,
        };
        Ok((kind, payload))
    }

    /// Decode a queued operation.
    ///
    /// # Errors
    /// - `Unsupported` for kinds this build does not know
    /// - `Validation` when the payload does not match the kind
    pub fn from_operation(op: &SyncOperation) -> Result<Self> {
        match op.kind {
            SyncOperationKind::CreateVisa => decode(op).map(PendingWrite::CreateVisa),
            SyncOperationKind::CreateAppointment => decode(op).map(PendingWrite::CreateAppointment),
            SyncOperationKind::CancelAppointment => decode(op).map(PendingWrite::CancelAppointment),
            SyncOperationKind::UpdateProfile => Ok(PendingWrite::UpdateProfile(op.payload.clone())),
            SyncOperationKind::Unknown => Err(Error::Unsupported(format!(
                "Operation {} has an unknown type",
                op.id
            ))),
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Serialization(format!(
            "Expected a JSON object payload, got {}",
            other
        ))),
    }
}

fn decode<T: DeserializeOwned>(op: &SyncOperation) -> Result<T> {
    serde_json::from_value(Value::Object(op.payload.clone())).map_err(|e| {
        Error::Validation(format!(
            "Payload of {} operation {} is invalid: {}",
            op.kind, op.id, e
        ))
    })
}
