//! Visa applications and their offline drafts.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::{segment, ApiClient};
use crate::types::{Page, Visa, VisaCreateRequest, VisaTimelineEntry};
use embaixada_common::{Error, Result};
use embaixada_storage::KeyValueStore;

/// Store key holding the draft list.
pub const DRAFTS_KEY: &str = "visa_drafts";

/// Visa endpoints.
#[derive(Clone)]
pub struct VisaService {
    client: ApiClient,
}

impl VisaService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Applications of the signed-in citizen.
    pub async fn mine(&self, page: u32, size: u32) -> Result<Page<Visa>> {
        self.client.get_paged("/vistos/me", page, size).await
    }

    pub async fn by_id(&self, id: &str) -> Result<Visa> {
        self.client.get(&format!("/vistos/{}", segment(id)?)).await
    }

    /// Submit a new application.
    pub async fn create(&self, request: &VisaCreateRequest) -> Result<Visa> {
        let visa: Visa = self.client.post("/vistos", request).await?;
        info!("Visa application {} submitted", visa.reference);
        Ok(visa)
    }

    /// Submit an application without reading back the created record.
    pub async fn send_create(&self, request: &VisaCreateRequest) -> Result<()> {
        self.client
            .send_json(reqwest::Method::POST, "/vistos", request)
            .await
    }

    /// State changes of one application, oldest first.
    pub async fn timeline(&self, id: &str) -> Result<Vec<VisaTimelineEntry>> {
        self.client
            .get(&format!("/vistos/{}/timeline", segment(id)?))
            .await
    }
}

/// A locally saved, not yet submitted application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisaDraft {
    #[serde(rename = "draftId")]
    pub draft_id: String,
    #[serde(flatten)]
    pub request: VisaCreateRequest,
}

impl VisaDraft {
    /// Wrap a request under a freshly generated draft id.
    pub fn new(request: VisaCreateRequest) -> Self {
        Self {
            draft_id: uuid::Uuid::new_v4().to_string(),
            request,
        }
    }
}

/// Drafts kept on the device until the user submits them.
pub struct VisaDrafts {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl VisaDrafts {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Insert a draft, or replace the one with the same id.
    pub async fn save(&self, draft: VisaDraft) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut drafts = self.load().await?;
        match drafts.iter_mut().find(|d| d.draft_id == draft.draft_id) {
            Some(existing) => *existing = draft,
            None => drafts.push(draft),
        }
        self.persist(&drafts).await
    }

    /// All drafts in save order.
    pub async fn list(&self) -> Result<Vec<VisaDraft>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Remove a draft. Unknown ids are ignored.
    pub async fn delete(&self, draft_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut drafts = self.load().await?;
        drafts.retain(|d| d.draft_id != draft_id);
        self.persist(&drafts).await
    }

    /// Submit a draft and delete it once the server accepted it.
    ///
    /// # Errors
    /// - `draft_id` is not saved
    /// - The submission failed (the draft is kept)
    pub async fn submit(&self, draft_id: &str, visas: &VisaService) -> Result<Visa> {
        let draft = self
            .list()
            .await?
            .into_iter()
            .find(|d| d.draft_id == draft_id)
            .ok_or_else(|| Error::NotFound(format!("Visa draft {}", draft_id)))?;

        let visa = visas.create(&draft.request).await?;
        self.delete(draft_id).await?;
        debug!("Draft {} submitted as {}", draft_id, visa.id);
        Ok(visa)
    }

    async fn load(&self) -> Result<Vec<VisaDraft>> {
        match self.store.get(DRAFTS_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Serialization(format!("Corrupt visa drafts: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn persist(&self, drafts: &[VisaDraft]) -> Result<()> {
        let raw = serde_json::to_string(drafts).map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.set(DRAFTS_KEY, raw).await
    }
}
