//! Replays queued operations against the REST API.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::appointment::AppointmentService;
use crate::citizen::CitizenService;
use crate::client::ApiClient;
use crate::visa::VisaService;
use crate::write::PendingWrite;
use embaixada_common::Result;
use embaixada_sync::{OperationRouter, SyncOperation};

/// Routes each operation kind to its endpoint.
#[derive(Clone)]
pub struct ApiRouter {
    visas: VisaService,
    appointments: AppointmentService,
    citizens: CitizenService,
}

impl ApiRouter {
    pub fn new(client: ApiClient) -> Self {
        Self {
            visas: VisaService::new(client.clone()),
            appointments: AppointmentService::new(client.clone()),
            citizens: CitizenService::new(client),
        }
    }

    /// Send one write to the server.
    ///
    /// Only the outcome is checked. An accepted write whose response body does
    /// not decode still counts as delivered, so it is never replayed.
    pub async fn submit(&self, write: &PendingWrite) -> Result<()> {
        match write {
            PendingWrite::CreateVisa(request) => self.visas.send_create(request).await,
            PendingWrite::CreateAppointment(request) => {
                self.appointments.send_create(request).await
            }
            PendingWrite::CancelAppointment(cancel) => {
                self.appointments
                    .send_cancel(&cancel.id, &cancel.reason)
                    .await
            }
            PendingWrite::UpdateProfile(changes) => self.citizens.update_me(changes).await,
        }
    }
}

#[async_trait]
impl OperationRouter for ApiRouter {
    async fn dispatch(&self, op: &SyncOperation) -> Result<()> {
        let write = PendingWrite::from_operation(op).inspect_err(|e| {
            warn!("Cannot route operation {}: {}", op.id, e);
        })?;
        debug!("Replaying {} operation {}", op.kind, op.id);
        self.submit(&write).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::client::DEFAULT_TIMEOUT;
    use crate::testing::{appointment_json, envelope, spawn_server, visa_json};
    use axum::extract::{Json, Path, State};
    use axum::routing::{patch, post, put};
    use axum::Router;
    use embaixada_common::{Error, OperationId};
    use embaixada_sync::SyncOperationKind;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    async fn router() -> (ApiRouter, Calls) {
        let calls: Calls = Arc::default();
        let app = Router::new()
            .route(
                "/vistos",
                post(|State(calls): State<Calls>, Json(body): Json<Value>| async move {
                    calls.lock().unwrap().push(("POST /vistos".to_string(), body));
                    envelope(visa_json("v1"))
                }),
            )
            .route(
                "/agendamentos",
                post(|State(calls): State<Calls>, Json(body): Json<Value>| async move {
                    calls.lock().unwrap().push(("POST /agendamentos".to_string(), body));
                    envelope(appointment_json("a1"))
                }),
            )
            .route(
                "/agendamentos/{id}/estado",
                patch(
                    |State(calls): State<Calls>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                        calls
                            .lock()
                            .unwrap()
                            .push((format!("PATCH /agendamentos/{}/estado", id), body));
                        envelope(appointment_json(&id))
                    },
                ),
            )
            .route(
                "/cidadaos/me",
                put(|State(calls): State<Calls>, Json(body): Json<Value>| async move {
                    calls.lock().unwrap().push(("PUT /cidadaos/me".to_string(), body));
                    envelope(Value::Null)
                }),
            )
            .with_state(calls.clone());

        let base = spawn_server(app).await;
        let client =
            ApiClient::new(&base, DEFAULT_TIMEOUT, Arc::new(StaticTokenProvider::default())).unwrap();
        (ApiRouter::new(client), calls)
    }

    fn op(kind: SyncOperationKind, payload: Value) -> SyncOperation {
        SyncOperation {
            id: OperationId::new("sync_5_abc").unwrap(),
            kind,
            payload: payload.as_object().cloned().unwrap(),
            created_at: 5,
            retry_count: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn test_routes_each_kind() {
        let (router, calls) = router().await;

        router
            .dispatch(&op(SyncOperationKind::CreateVisa, json!({"tipo": "TURISMO"})))
            .await
            .unwrap();
        router
            .dispatch(&op(
                SyncOperationKind::CreateAppointment,
                json!({"tipo": "VISTO", "dataHora": "2025-01-02T09:00:00"}),
            ))
            .await
            .unwrap();
        router
            .dispatch(&op(
                SyncOperationKind::CancelAppointment,
                json!({"id": "a7", "motivo": "Imprevisto"}),
            ))
            .await
            .unwrap();
        router
            .dispatch(&op(SyncOperationKind::UpdateProfile, json!({"telefone": "+49"})))
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let routes: Vec<&str> = calls.iter().map(|(route, _)| route.as_str()).collect();
        assert_eq!(
            routes,
            vec![
                "POST /vistos",
                "POST /agendamentos",
                "PATCH /agendamentos/a7/estado",
                "PUT /cidadaos/me",
            ]
        );
        assert_eq!(
            calls[2].1,
            json!({"estado": "CANCELADO", "comentario": "Imprevisto"})
        );
        assert_eq!(calls[3].1, json!({"telefone": "+49"}));
    }

    #[tokio::test]
    async fn test_accepted_write_with_partial_body_is_not_replayed() {
        use embaixada_common::ManualClock;
        use embaixada_storage::MemoryStore;
        use embaixada_sync::{ConnectivityMonitor, ManualSignal, SyncQueue};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let posts = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/vistos",
                post(|State(posts): State<Arc<AtomicUsize>>| async move {
                    posts.fetch_add(1, Ordering::SeqCst);
                    envelope(json!({"id": "v9", "estado": "SUBMETIDO"}))
                }),
            )
            .with_state(posts.clone());
        let base = spawn_server(app).await;
        let client =
            ApiClient::new(&base, DEFAULT_TIMEOUT, Arc::new(StaticTokenProvider::default())).unwrap();
        let router = ApiRouter::new(client);

        let queue = SyncQueue::new(
            Arc::new(MemoryStore::new()),
            ConnectivityMonitor::new(Arc::new(ManualSignal::online())),
            Arc::new(ManualClock::new(1_000)),
        );
        queue
            .enqueue(
                SyncOperationKind::CreateVisa,
                json!({"tipo": "TURISMO"}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        let first = queue.process_all(&router).await.unwrap();
        let second = queue.process_all(&router).await.unwrap();

        assert_eq!(first.success, 1);
        assert_eq!(first.failed, 0);
        assert_eq!(second.success, 0);
        assert_eq!(posts.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_permanent() {
        let (router, calls) = router().await;
        let err = router
            .dispatch(&op(SyncOperationKind::Unknown, json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Unsupported(_)));
        assert!(err.is_permanent());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_cancel_is_permanent() {
        let (router, _) = router().await;
        let err = router
            .dispatch(&op(SyncOperationKind::CancelAppointment, json!({"id": "a7"})))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
