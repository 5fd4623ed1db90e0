//! Consular appointment booking.

use serde_json::json;
use tracing::info;

use crate::client::{segment, ApiClient};
use crate::types::{
    Appointment, AppointmentCreateRequest, AppointmentHistoryEntry, AppointmentType, AvailableSlot,
    Page,
};
use embaixada_common::Result;

fn cancel_body(reason: &str) -> serde_json::Value {
    json!({ "estado": "CANCELADO", "comentario": reason })
}

/// Appointment endpoints.
#[derive(Clone)]
pub struct AppointmentService {
    client: ApiClient,
}

impl AppointmentService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Appointments of the signed-in citizen.
    pub async fn mine(&self, page: u32, size: u32) -> Result<Page<Appointment>> {
        self.client.get_paged("/agendamentos", page, size).await
    }

    pub async fn by_id(&self, id: &str) -> Result<Appointment> {
        self.client
            .get(&format!("/agendamentos/{}", segment(id)?))
            .await
    }

    /// Book an appointment.
    pub async fn create(&self, request: &AppointmentCreateRequest) -> Result<Appointment> {
        let appointment: Appointment = self.client.post("/agendamentos", request).await?;
        info!("Appointment {} booked", appointment.number);
        Ok(appointment)
    }

    /// Book without reading back the created appointment.
    pub async fn send_create(&self, request: &AppointmentCreateRequest) -> Result<()> {
        self.client
            .send_json(reqwest::Method::POST, "/agendamentos", request)
            .await
    }

    /// Free slots of one type on `date` (`YYYY-MM-DD`).
    pub async fn available_slots(&self, kind: AppointmentType, date: &str) -> Result<Vec<AvailableSlot>> {
        self.client
            .get_with_query("/agendamentos/slots", &[("tipo", kind.as_str()), ("data", date)])
            .await
    }

    /// Cancel an appointment with a reason.
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<Appointment> {
        let appointment: Appointment = self
            .client
            .patch(&format!("/agendamentos/{}/estado", segment(id)?), &cancel_body(reason))
            .await?;
        info!("Appointment {} cancelled", appointment.number);
        Ok(appointment)
    }

    /// Cancel without reading back the updated appointment.
    pub async fn send_cancel(&self, id: &str, reason: &str) -> Result<()> {
        self.client
            .send_json(
                reqwest::Method::PATCH,
                &format!("/agendamentos/{}/estado", segment(id)?),
                &cancel_body(reason),
            )
            .await
    }

    /// State change history of one appointment.
    pub async fn history(&self, id: &str, page: u32, size: u32) -> Result<Page<AppointmentHistoryEntry>> {
        self.client
            .get_paged(&format!("/agendamentos/{}/historico", segment(id)?), page, size)
            .await
    }
}
