#![doc = "Index backend for the CLI: implements the core `IndexBackend` contract against the Gemini File Search REST API."]
//
//! # Index backend integration (CLI <-> Core)
//!
//! [`GeminiClient`] speaks the Generative Language `v1beta` REST surface:
//!   - `GET /v1beta/fileSearchStores` (paginated list)
//!   - `POST /v1beta/fileSearchStores` (create with display name)
//!   - `DELETE /v1beta/{store}?force=true`
//!   - `POST /upload/v1beta/{store}:uploadToFileSearchStore` (multipart upload)
//!   - `GET /v1beta/{operation}` (operation polling)
//!
//! Construct it with [`GeminiClient::new_from_env`] (`GEMINI_API_KEY`, optional
//! `GEMINI_BASE_URL`). All transport and decoding failures map to
//! [`BackendError`] and stay per unit in the core.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use docs_mirror_core::contract::{FileUpload, IndexBackend, RemoteStoreHandle, UploadOperation};
use docs_mirror_core::error::BackendError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const LIST_PAGE_SIZE: u32 = 20;
/// Whole-request bound, uploads included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreResource {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl From<StoreResource> for RemoteStoreHandle {
    fn from(store: StoreResource) -> Self {
        RemoteStoreHandle {
            name: store.name,
            display_name: store.display_name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListStoresResponse {
    #[serde(default)]
    file_search_stores: Vec<StoreResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationResource {
    name: String,
    #[serde(default)]
    done: bool,
}

impl From<OperationResource> for UploadOperation {
    fn from(op: OperationResource) -> Self {
        UploadOperation {
            name: op.name,
            done: op.done,
        }
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key_set", &!self.api_key.is_empty())
            .finish()
    }
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, BackendError> {
        Self::with_timeout(api_key, base_url, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport {
                operation: "build_client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `None` when `GEMINI_API_KEY` is unset or empty, or the HTTP client cannot be built.
    pub fn new_from_env() -> Option<Self> {
        let api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
        let base_url = env::var("GEMINI_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        match Self::new(api_key, base_url.clone()) {
            Ok(client) => {
                tracing::info!(base_url = %base_url, "Initialised GeminiClient from environment");
                Some(client)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialise GeminiClient");
                None
            }
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, path)
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, BackendError> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| BackendError::Transport {
            operation: operation.to_string(),
            message: e.to_string(),
        })?;
        if !status.is_success() {
            tracing::error!(operation, status = status.as_u16(), "Gemini API request failed");
            return Err(BackendError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let body = self.send(operation, request).await?;
        decode(operation, &body)
    }
}

fn decode<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| BackendError::Decode {
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

/// Builds a `multipart/related` body: JSON metadata part, then the file bytes.
fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    mime_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl IndexBackend for GeminiClient {
    async fn list_stores(&self) -> Result<Vec<RemoteStoreHandle>, BackendError> {
        let mut handles = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(self.api_url("fileSearchStores"))
                .query(&[("pageSize", LIST_PAGE_SIZE.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: ListStoresResponse = self.send_json("list stores", request).await?;
            handles.extend(page.file_search_stores.into_iter().map(RemoteStoreHandle::from));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        tracing::debug!(count = handles.len(), "Listed file search stores");
        Ok(handles)
    }

    async fn create_store(&self, display_name: &str) -> Result<RemoteStoreHandle, BackendError> {
        tracing::info!(display_name, "Creating file search store");
        let request = self
            .http
            .post(self.api_url("fileSearchStores"))
            .json(&serde_json::json!({ "displayName": display_name }));
        let store: StoreResource = self.send_json("create store", request).await?;
        Ok(store.into())
    }

    async fn delete_store(&self, store: &RemoteStoreHandle) -> Result<(), BackendError> {
        tracing::info!(store = %store.name, "Deleting file search store");
        let request = self
            .http
            .delete(self.api_url(&store.name))
            .query(&[("force", "true")]);
        self.send("delete store", request).await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        store: &RemoteStoreHandle,
        upload: &FileUpload,
    ) -> Result<UploadOperation, BackendError> {
        let content = tokio::fs::read(&upload.path)
            .await
            .map_err(|e| BackendError::Io {
                path: upload.path.clone(),
                source: e,
            })?;
        let boundary = format!("docs-mirror-{}", uuid::Uuid::new_v4().simple());
        let metadata = serde_json::json!({
            "displayName": upload.display_name,
            "mimeType": upload.mime_type,
        });
        let body = multipart_related(&boundary, &metadata, upload.mime_type, &content);

        let url = format!(
            "{}/upload/v1beta/{}:uploadToFileSearchStore",
            self.base_url, store.name
        );
        let request = self
            .http
            .post(url)
            .query(&[("uploadType", "multipart")])
            .header("X-Goog-Upload-Protocol", "multipart")
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);
        let op: OperationResource = self.send_json("upload file", request).await?;
        tracing::debug!(file = %upload.display_name, operation = %op.name, "Upload accepted");
        Ok(op.into())
    }

    async fn poll_operation(
        &self,
        operation: &UploadOperation,
    ) -> Result<UploadOperation, BackendError> {
        let request = self.http.get(self.api_url(&operation.name));
        let op: OperationResource = self.send_json("poll operation", request).await?;
        Ok(op.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_decodes_stores_and_token() {
        let page: ListStoresResponse = decode(
            "list stores",
            r#"{"fileSearchStores":[{"name":"fileSearchStores/a1","displayName":"A/B"},{"name":"fileSearchStores/x"}],"nextPageToken":"p2"}"#,
        )
        .unwrap();
        let handles: Vec<RemoteStoreHandle> =
            page.file_search_stores.into_iter().map(Into::into).collect();
        assert_eq!(handles[0].display_name.as_deref(), Some("A/B"));
        assert_eq!(handles[1].display_name, None);
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
    }

    #[test]
    fn empty_list_response_is_valid() {
        let page: ListStoresResponse = decode("list stores", "{}").unwrap();
        assert!(page.file_search_stores.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn operation_without_done_is_pending() {
        let op: UploadOperation = decode::<OperationResource>(
            "upload file",
            r#"{"name":"fileSearchStores/a1/upload/operations/op1"}"#,
        )
        .unwrap()
        .into();
        assert!(!op.done);
    }

    #[test]
    fn undecodable_body_is_a_decode_error() {
        let err = decode::<OperationResource>("poll operation", "<html>").unwrap_err();
        assert!(matches!(err, BackendError::Decode { .. }));
    }

    #[test]
    fn multipart_body_has_metadata_then_content() {
        let metadata = serde_json::json!({"displayName": "guide/setup.mdx"});
        let body = multipart_related("b0", &metadata, "text/markdown", b"# Setup");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"displayName\":\"guide/setup.mdx\"}\r\n"));
        assert!(text.contains("--b0\r\nContent-Type: text/markdown\r\n\r\n# Setup\r\n--b0--\r\n"));
    }

    #[tokio::test]
    async fn unresponsive_server_times_out_as_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold connections without ever writing a response.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client =
            GeminiClient::with_timeout("key", format!("http://{addr}"), Duration::from_millis(200))
                .unwrap();
        let result = tokio::time::timeout(Duration::from_secs(10), client.list_stores())
            .await
            .expect("request must give up on its own timeout");
        assert!(matches!(result, Err(BackendError::Transport { .. })));
        server.abort();
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = GeminiClient::new("key", "http://localhost:8080/").unwrap();
        assert_eq!(
            client.api_url("fileSearchStores"),
            "http://localhost:8080/v1beta/fileSearchStores"
        );
    }
}
