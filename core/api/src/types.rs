//! Wire types of the consular REST API.
//!
//! Field names follow the server's JSON (Portuguese, camelCase); Rust names
//! are English. Timestamps are kept as the ISO-8601 strings the server sends.

use serde::{Deserialize, Serialize};

/// ISO-8601 timestamp as sent by the server.
pub type IsoDateTime = String;

/// Envelope around every response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: u64,
    pub total_pages: u32,
    pub size: u32,
    /// Zero-based page index.
    pub number: u32,
    pub first: bool,
    pub last: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisaType {
    #[serde(rename = "TURISMO")]
    Tourism,
    #[serde(rename = "NEGOCIOS")]
    Business,
    #[serde(rename = "TRABALHO")]
    Work,
    #[serde(rename = "ESTUDO")]
    Study,
    #[serde(rename = "TRANSITO")]
    Transit,
    #[serde(rename = "DIPLOMATICO")]
    Diplomatic,
    #[serde(rename = "CORTESIA")]
    Courtesy,
}

/// Lifecycle of a visa application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisaState {
    #[serde(rename = "RASCUNHO")]
    Draft,
    #[serde(rename = "SUBMETIDO")]
    Submitted,
    #[serde(rename = "EM_ANALISE")]
    UnderReview,
    #[serde(rename = "APROVADO")]
    Approved,
    #[serde(rename = "REJEITADO")]
    Rejected,
    #[serde(rename = "EMITIDO")]
    Issued,
    #[serde(rename = "ENTREGUE")]
    Delivered,
    #[serde(rename = "EXPIRADO")]
    Expired,
    #[serde(rename = "CANCELADO")]
    Cancelled,
}

impl VisaState {
    /// Happy-path progression shown on the timeline.
    pub const PROGRESSION: [VisaState; 6] = [
        VisaState::Draft,
        VisaState::Submitted,
        VisaState::UnderReview,
        VisaState::Approved,
        VisaState::Issued,
        VisaState::Delivered,
    ];

    /// Whether the application can no longer progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VisaState::Rejected | VisaState::Expired | VisaState::Cancelled
        )
    }

    /// Position on the happy path, if the state is on it.
    pub fn progress_index(&self) -> Option<usize> {
        Self::PROGRESSION.iter().position(|s| s == self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visa {
    pub id: String,
    #[serde(rename = "cidadaoId")]
    pub citizen_id: String,
    #[serde(rename = "tipo")]
    pub kind: VisaType,
    #[serde(rename = "estado")]
    pub state: VisaState,
    #[serde(rename = "referencia")]
    pub reference: String,
    #[serde(rename = "dataEntrada", default, skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<IsoDateTime>,
    #[serde(rename = "dataSaida", default, skip_serializing_if = "Option::is_none")]
    pub exit_date: Option<IsoDateTime>,
    #[serde(rename = "motivoViagem", default, skip_serializing_if = "Option::is_none")]
    pub travel_reason: Option<String>,
    #[serde(rename = "localAlojamento", default, skip_serializing_if = "Option::is_none")]
    pub accommodation: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: IsoDateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: IsoDateTime,
}

/// Body of a new visa application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisaCreateRequest {
    #[serde(rename = "tipo")]
    pub kind: VisaType,
    #[serde(rename = "dataEntrada", default, skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<String>,
    #[serde(rename = "dataSaida", default, skip_serializing_if = "Option::is_none")]
    pub exit_date: Option<String>,
    #[serde(rename = "motivoViagem", default, skip_serializing_if = "Option::is_none")]
    pub travel_reason: Option<String>,
    #[serde(rename = "localAlojamento", default, skip_serializing_if = "Option::is_none")]
    pub accommodation: Option<String>,
}

impl VisaCreateRequest {
    /// A request with only the visa type set.
    pub fn new(kind: VisaType) -> Self {
        Self {
            kind,
            entry_date: None,
            exit_date: None,
            travel_reason: None,
            accommodation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisaTimelineEntry {
    #[serde(rename = "estado")]
    pub state: VisaState,
    #[serde(rename = "data")]
    pub date: IsoDateTime,
    #[serde(rename = "comentario", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentType {
    #[serde(rename = "PASSAPORTE")]
    Passport,
    #[serde(rename = "VISTO")]
    Visa,
    #[serde(rename = "LEGALIZACAO")]
    Legalization,
    #[serde(rename = "REGISTO_CONSULAR")]
    ConsularRegistration,
    #[serde(rename = "CERTIDAO")]
    Certificate,
    #[serde(rename = "NOTARIADO")]
    Notary,
    #[serde(rename = "CONSULTA_GERAL")]
    GeneralInquiry,
}

impl AppointmentType {
    /// Wire name, used as a query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentType::Passport => "PASSAPORTE",
            AppointmentType::Visa => "VISTO",
            AppointmentType::Legalization => "LEGALIZACAO",
            AppointmentType::ConsularRegistration => "REGISTO_CONSULAR",
            AppointmentType::Certificate => "CERTIDAO",
            AppointmentType::Notary => "NOTARIADO",
            AppointmentType::GeneralInquiry => "CONSULTA_GERAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentState {
    #[serde(rename = "PENDENTE")]
    Pending,
    #[serde(rename = "CONFIRMADO")]
    Confirmed,
    #[serde(rename = "REAGENDADO")]
    Rescheduled,
    #[serde(rename = "CANCELADO")]
    Cancelled,
    #[serde(rename = "COMPLETADO")]
    Completed,
    #[serde(rename = "NAO_COMPARECEU")]
    NoShow,
}

impl AppointmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentState::Cancelled | AppointmentState::Completed | AppointmentState::NoShow
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    #[serde(rename = "cidadaoId")]
    pub citizen_id: String,
    #[serde(rename = "cidadaoNome")]
    pub citizen_name: String,
    #[serde(rename = "tipo")]
    pub kind: AppointmentType,
    #[serde(rename = "numeroAgendamento")]
    pub number: String,
    #[serde(rename = "estado")]
    pub state: AppointmentState,
    #[serde(rename = "dataHora")]
    pub scheduled_at: IsoDateTime,
    #[serde(rename = "duracaoMinutos")]
    pub duration_minutes: u32,
    pub local: String,
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(rename = "motivoCancelamento", default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: IsoDateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: IsoDateTime,
}

/// Body of a new appointment booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentCreateRequest {
    #[serde(rename = "tipo")]
    pub kind: AppointmentType,
    #[serde(rename = "dataHora")]
    pub scheduled_at: String,
    #[serde(rename = "notas", default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Payload of a deferred appointment cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelAppointment {
    pub id: String,
    #[serde(rename = "motivo")]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableSlot {
    #[serde(rename = "dataHora")]
    pub scheduled_at: IsoDateTime,
    #[serde(rename = "duracaoMinutos")]
    pub duration_minutes: u32,
    #[serde(rename = "tipo")]
    pub kind: AppointmentType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentHistoryEntry {
    pub id: String,
    #[serde(rename = "agendamentoId")]
    pub appointment_id: String,
    #[serde(rename = "estadoAnterior", default, skip_serializing_if = "Option::is_none")]
    pub previous_state: Option<AppointmentState>,
    #[serde(rename = "estadoNovo")]
    pub new_state: AppointmentState,
    #[serde(rename = "comentario", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "alteradoPor")]
    pub changed_by: String,
    #[serde(rename = "createdAt")]
    pub created_at: IsoDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CitizenState {
    #[serde(rename = "ACTIVO")]
    Active,
    #[serde(rename = "INACTIVO")]
    Inactive,
    #[serde(rename = "SUSPENSO")]
    Suspended,
    #[serde(rename = "FALECIDO")]
    Deceased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "MASCULINO")]
    Male,
    #[serde(rename = "FEMININO")]
    Female,
}

/// Profile of the signed-in citizen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citizen {
    pub id: String,
    #[serde(rename = "nome")]
    pub first_name: String,
    #[serde(rename = "apelido")]
    pub last_name: String,
    #[serde(rename = "dataNascimento")]
    pub birth_date: IsoDateTime,
    #[serde(rename = "sexo")]
    pub sex: Sex,
    #[serde(rename = "nacionalidade")]
    pub nationality: String,
    #[serde(rename = "naturalidade")]
    pub birthplace: String,
    #[serde(rename = "nifAngolano", default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(rename = "passaporteNumero", default, skip_serializing_if = "Option::is_none")]
    pub passport_number: Option<String>,
    pub email: String,
    #[serde(rename = "telefone")]
    pub phone: String,
    #[serde(rename = "moradaAlemanha", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "cidade", default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(rename = "codigoPostal", default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(rename = "estado")]
    pub state: CitizenState,
    #[serde(rename = "fotoUrl", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: IsoDateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: IsoDateTime,
}

/// Uploaded file attached to a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "tipo")]
    pub kind: String,
    /// Size in bytes.
    #[serde(rename = "tamanho")]
    pub size: u64,
    pub url: String,
    #[serde(rename = "createdAt")]
    pub created_at: IsoDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessType {
    #[serde(rename = "REGISTO_CIVIL")]
    CivilRegistry,
    #[serde(rename = "SERVICO_NOTARIAL")]
    NotarialService,
    #[serde(rename = "VISTO")]
    Visa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    #[serde(rename = "RASCUNHO")]
    Draft,
    #[serde(rename = "SUBMETIDO")]
    Submitted,
    #[serde(rename = "EM_ANALISE")]
    UnderReview,
    #[serde(rename = "APROVADO")]
    Approved,
    #[serde(rename = "REJEITADO")]
    Rejected,
    #[serde(rename = "CERTIFICADO_EMITIDO")]
    CertificateIssued,
    #[serde(rename = "ENTREGUE")]
    Delivered,
    #[serde(rename = "ARQUIVADO")]
    Archived,
}

/// A consular process (civil registry, notarial service, visa).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    #[serde(rename = "cidadaoId")]
    pub citizen_id: String,
    #[serde(rename = "tipo")]
    pub kind: ProcessType,
    #[serde(rename = "estado")]
    pub state: ProcessState,
    #[serde(rename = "referencia")]
    pub reference: String,
    #[serde(rename = "descricao", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: IsoDateTime,
    #[serde(rename = "updatedAt")]
    pub updated_at: IsoDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_visa_request_wire_names() {
        let mut request = VisaCreateRequest::new(VisaType::Business);
        request.travel_reason = Some("Conferência".to_string());

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"tipo": "NEGOCIOS", "motivoViagem": "Conferência"})
        );
    }

    #[test]
    fn test_page_parses() {
        let page: Page<Process> = serde_json::from_value(json!({
            "content": [{
                "id": "p1",
                "cidadaoId": "c1",
                "tipo": "REGISTO_CIVIL",
                "estado": "EM_ANALISE",
                "referencia": "RC-2024-001",
                "createdAt": "2024-01-01T10:00:00",
                "updatedAt": "2024-01-02T10:00:00"
            }],
            "totalElements": 1,
            "totalPages": 1,
            "size": 20,
            "number": 0,
            "first": true,
            "last": true
        }))
        .unwrap();

        assert_eq!(page.content[0].state, ProcessState::UnderReview);
        assert!(page.content[0].description.is_none());
    }

    #[test]
    fn test_state_helpers() {
        assert!(VisaState::Rejected.is_terminal());
        assert!(!VisaState::UnderReview.is_terminal());
        assert_eq!(VisaState::Approved.progress_index(), Some(3));
        assert_eq!(VisaState::Cancelled.progress_index(), None);
        assert!(AppointmentState::NoShow.is_terminal());
        assert!(!AppointmentState::Rescheduled.is_terminal());
    }

    #[test]
    fn test_cancel_payload_uses_motivo() {
        let cancel: CancelAppointment =
            serde_json::from_value(json!({"id": "a1", "motivo": "Doença"})).unwrap();
        assert_eq!(cancel.reason, "Doença");
    }
}
