//! In-process HTTP doubles for the service tests.

use axum::{Json, Router};
use serde_json::{json, Value};

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Wrap `data` in the server's success envelope.
pub fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": "2024-06-01T12:00:00"
    }))
}

pub fn visa_json(id: &str) -> Value {
    json!({
        "id": id,
        "cidadaoId": "c1",
        "tipo": "NEGOCIOS",
        "estado": "SUBMETIDO",
        "referencia": format!("VIS-{}", id),
        "createdAt": "2024-06-01T12:00:00",
        "updatedAt": "2024-06-01T12:00:00"
    })
}

pub fn appointment_json(id: &str) -> Value {
    json!({
        "id": id,
        "cidadaoId": "c1",
        "cidadaoNome": "Ana Silva",
        "tipo": "VISTO",
        "numeroAgendamento": format!("AG-{}", id),
        "estado": "PENDENTE",
        "dataHora": "2025-01-02T09:00:00",
        "duracaoMinutos": 30,
        "local": "Berlin",
        "createdAt": "2024-06-01T12:00:00",
        "updatedAt": "2024-06-01T12:00:00"
    })
}

/// Single page holding `content`.
pub fn page_json(content: Vec<Value>) -> Value {
    let total = content.len();
    json!({
        "content": content,
        "totalElements": total,
        "totalPages": 1,
        "size": total.max(1),
        "number": 0,
        "first": true,
        "last": true
    })
}

pub fn citizen_json() -> Value {
    json!({
        "id": "c1",
        "nome": "Ana",
        "apelido": "Silva",
        "dataNascimento": "1990-04-11",
        "sexo": "FEMININO",
        "nacionalidade": "Angolana",
        "naturalidade": "Luanda",
        "email": "ana@example.org",
        "telefone": "+49 30 0000",
        "cidade": "Berlin",
        "estado": "ACTIVO",
        "createdAt": "2024-06-01T12:00:00",
        "updatedAt": "2024-06-01T12:00:00"
    })
}
