//! Citizen profile.

use serde_json::{Map, Value};

use crate::client::{segment, ApiClient};
use crate::types::Citizen;
use embaixada_common::Result;

/// Partial profile update; only the fields present are changed.
pub type ProfileChanges = Map<String, Value>;

/// Citizen endpoints.
#[derive(Clone)]
pub struct CitizenService {
    client: ApiClient,
}

impl CitizenService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Profile of the signed-in citizen.
    pub async fn profile(&self) -> Result<Citizen> {
        self.client.get("/cidadaos/me").await
    }

    /// Update a citizen by id.
    pub async fn update(&self, id: &str, changes: &ProfileChanges) -> Result<Citizen> {
        self.client
            .put(&format!("/cidadaos/{}", segment(id)?), changes)
            .await
    }

    /// Update the signed-in citizen.
    ///
    /// Used when replaying queued profile edits; the response body is not
    /// needed there.
    pub async fn update_me(&self, changes: &ProfileChanges) -> Result<()> {
        self.client
            .send_json(reqwest::Method::PUT, "/cidadaos/me", changes)
            .await
    }
}
