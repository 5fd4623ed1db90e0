//! Consular processes and their documents.

use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::client::{segment, ApiClient};
use crate::types::{Document, Page, Process};
use embaixada_common::{Error, Result};

/// Document endpoints.
#[derive(Clone)]
pub struct DocumentService {
    client: ApiClient,
}

impl DocumentService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Documents attached to a process.
    pub async fn by_process(&self, process_id: &str) -> Result<Vec<Document>> {
        self.client
            .get(&format!("/processos/{}/documentos", segment(process_id)?))
            .await
    }

    /// Upload a local file to a process.
    ///
    /// # Errors
    /// - The file cannot be read
    /// - `mime_type` is not a valid MIME type
    pub async fn upload(
        &self,
        process_id: &str,
        file: &Path,
        file_name: &str,
        mime_type: &str,
    ) -> Result<Document> {
        let bytes = tokio::fs::read(file).await?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| Error::InvalidInput(format!("Invalid MIME type '{}': {}", mime_type, e)))?;
        let form = Form::new().part("file", part);

        let document: Document = self
            .client
            .post_multipart(&format!("/processos/{}/documentos", segment(process_id)?), form)
            .await?;
        info!("Uploaded {} ({} bytes)", document.name, document.size);
        Ok(document)
    }

    /// Download a document into `dir` as `file_name`.
    ///
    /// # Returns
    /// Path of the written file.
    pub async fn download(&self, document_id: &str, dir: &Path, file_name: &str) -> Result<PathBuf> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| Error::InvalidInput(format!("Invalid file name '{}'", file_name)))?;
        let dest = dir.join(name);

        self.client
            .download(&format!("/documentos/{}/download", segment(document_id)?), &dest)
            .await?;
        Ok(dest)
    }

    pub async fn delete(&self, document_id: &str) -> Result<()> {
        self.client
            .delete(&format!("/documentos/{}", segment(document_id)?))
            .await
    }
}

/// Process endpoints.
#[derive(Clone)]
pub struct ProcessService {
    client: ApiClient,
}

impl ProcessService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Processes of the signed-in citizen.
    pub async fn mine(&self, page: u32, size: u32) -> Result<Page<Process>> {
        self.client.get_paged("/processos/me", page, size).await
    }

    pub async fn by_id(&self, id: &str) -> Result<Process> {
        self.client.get(&format!("/processos/{}", segment(id)?)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::client::DEFAULT_TIMEOUT;
    use crate::testing::{envelope, spawn_server};
    use axum::body::Bytes;
    use axum::extract::Path as UrlPath;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, get, post};
    use axum::Router;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn client(app: Router) -> ApiClient {
        let base = spawn_server(app).await;
        ApiClient::new(&base, DEFAULT_TIMEOUT, Arc::new(StaticTokenProvider::default())).unwrap()
    }

    #[tokio::test]
    async fn test_upload_sends_multipart() {
        let app = Router::new().route(
            "/processos/{id}/documentos",
            post(|UrlPath(id): UrlPath<String>, headers: HeaderMap, body: Bytes| async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                assert!(content_type.starts_with("multipart/form-data"));
                let text = String::from_utf8_lossy(&body).to_string();
                assert!(text.contains("name=\"file\""));
                assert!(text.contains("passaporte.pdf"));
                envelope(json!({
                    "id": format!("doc-{}", id),
                    "nome": "passaporte.pdf",
                    "tipo": "application/pdf",
                    "tamanho": 4,
                    "url": "/documentos/doc-1/download",
                    "createdAt": "2024-01-01T00:00:00"
                }))
            }),
        );
        let documents = DocumentService::new(client(app).await);
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("scan.pdf");
        std::fs::write(&file, b"%PDF").unwrap();

        let document = documents
            .upload("p1", &file, "passaporte.pdf", "application/pdf")
            .await
            .unwrap();
        assert_eq!(document.id, "doc-p1");
        assert_eq!(document.size, 4);
    }

    #[tokio::test]
    async fn test_download_strips_directories_from_name() {
        let app = Router::new().route("/documentos/{id}/download", get(|| async { "conteudo" }));
        let documents = DocumentService::new(client(app).await);
        let temp = TempDir::new().unwrap();

        let path = documents
            .download("d1", temp.path(), "../../escape.txt")
            .await
            .unwrap();
        assert_eq!(path, temp.path().join("escape.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "conteudo");
    }

    #[tokio::test]
    async fn test_delete_missing_is_validation() {
        let app = Router::new().route("/documentos/{id}", delete(|| async { StatusCode::NOT_FOUND }));
        let documents = DocumentService::new(client(app).await);
        assert!(matches!(
            documents.delete("gone").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_process_by_id() {
        let app = Router::new().route(
            "/processos/{id}",
            get(|UrlPath(id): UrlPath<String>| async move {
                envelope(json!({
                    "id": id,
                    "cidadaoId": "c1",
                    "tipo": "SERVICO_NOTARIAL",
                    "estado": "APROVADO",
                    "referencia": "SN-1",
                    "createdAt": "2024-01-01T00:00:00",
                    "updatedAt": "2024-01-01T00:00:00"
                }))
            }),
        );
        let processes = ProcessService::new(client(app).await);
        let process = processes.by_id("p-3").await.unwrap();
        assert_eq!(process.id, "p-3");
        assert_eq!(process.reference, "SN-1");
    }
}
