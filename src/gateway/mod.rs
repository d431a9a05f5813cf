use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::ApiResponse;

pub mod credentials;
pub mod encoding;
pub mod token;

use credentials::{CredentialStore, SessionSignal};
use encoding::sha256_hex;

pub type SessionHandler = Arc<dyn Fn(SessionSignal) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("LEDGERDESK_BASE_URL")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.base_url),
            timeout_secs: std::env::var("LEDGERDESK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    AuthExpired,
    BillingRequired,
    Http { status: u16, message: String },
    Network(String),
    Decode(String),
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::AuthExpired => {
                write!(f, "Your session has expired. Please sign in again.")
            }
            GatewayError::BillingRequired => {
                write!(f, "Your subscription needs attention before you can continue.")
            }
            GatewayError::Http { status, message } => {
                if message.trim().is_empty() {
                    write!(f, "Request failed with status {status}.")
                } else {
                    write!(f, "{message}")
                }
            }
            GatewayError::Network(e) => write!(f, "Network error: {e}"),
            GatewayError::Decode(e) => write!(f, "Unexpected response from the server: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Pulls the backend's envelope `error` field out of a failed response body,
/// so callers see the server's own message rather than a status code.
fn extract_error_message(body: &str) -> Option<String> {
    let parsed: ApiResponse<serde_json::Value> = serde_json::from_str(body).ok()?;
    parsed.error.map(|e| e.trim().to_string()).filter(|e| !e.is_empty())
}

fn content_type_for(path: &Path) -> mime::Mime {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => mime::APPLICATION_PDF,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "svg" => mime::IMAGE_SVG,
        "csv" => mime::TEXT_CSV,
        "txt" => mime::TEXT_PLAIN,
        "json" => mime::APPLICATION_JSON,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

/// Authenticated HTTP client over the backend REST API.
///
/// Every request carries the current bearer token. A 401 is retried exactly
/// once after exchanging the refresh token; a second 401 (or a failed
/// exchange) clears the stored credentials and reports `LoginRequired` to the
/// session handler. A 402 reports `BillingRequired`. The gateway never
/// navigates or redirects; the embedding shell reacts to the signals.
pub struct Gateway {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    on_session: Option<SessionHandler>,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            on_session: None,
        })
    }

    pub fn with_session_handler(mut self, handler: SessionHandler) -> Self {
        self.on_session = Some(handler);
        self
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn emit(&self, signal: SessionSignal) {
        if let Some(handler) = &self.on_session {
            handler(signal);
        }
    }

    fn expire_session(&self, op: &'static str) {
        eprintln!("[gateway] {{ op: {:?}, error: \"session expired\" }}", op);
        self.credentials.clear();
        self.emit(SessionSignal::LoginRequired);
    }

    async fn dispatch(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let builder = match self.credentials.access_token() {
            Some(tok) => builder.bearer_auth(tok),
            None => builder,
        };
        builder
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))
    }

    /// Exchanges the refresh token for a new access token. Returns false on
    /// any failure; the caller decides whether that ends the session.
    async fn refresh_access_token(&self) -> bool {
        let Some(refresh) = self.credentials.refresh_token() else {
            return false;
        };

        let body = serde_json::json!({ "refresh": refresh });
        let resp = match self.http.post(self.url("/auth/refresh/")).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[gateway] {{ op: \"refresh_token\", error: {:?} }}", e.to_string());
                return false;
            }
        };
        if !resp.status().is_success() {
            return false;
        }

        match resp.json::<ApiResponse<TokenPair>>().await {
            Ok(env) => match (env.success, env.data) {
                (true, Some(pair)) => {
                    self.credentials.store_tokens(&pair.access, pair.refresh.as_deref());
                    true
                }
                _ => false,
            },
            Err(e) => {
                eprintln!("[gateway] {{ op: \"refresh_token\", error: {:?} }}", e.to_string());
                false
            }
        }
    }

    async fn send_with_refresh<F>(&self, op: &'static str, build: F) -> Result<reqwest::Response, GatewayError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let resp = self.dispatch(build()).await?;
        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            if !self.refresh_access_token().await {
                self.expire_session(op);
                return Err(GatewayError::AuthExpired);
            }
            let retried = self.dispatch(build()).await?;
            if retried.status() == StatusCode::UNAUTHORIZED {
                self.expire_session(op);
                return Err(GatewayError::AuthExpired);
            }
            retried
        } else {
            resp
        };
        self.check_status(op, resp).await
    }

    async fn check_status(&self, op: &'static str, resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        if status == StatusCode::PAYMENT_REQUIRED {
            eprintln!("[gateway] {{ op: {:?}, error: \"payment required\" }}", op);
            self.emit(SessionSignal::BillingRequired);
            return Err(GatewayError::BillingRequired);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("Request failed with status {}.", status.as_u16()));
        eprintln!(
            "[gateway] {{ op: {:?}, status: {}, error: {:?} }}",
            op,
            status.as_u16(),
            message
        );
        Err(GatewayError::Http {
            status: status.as_u16(),
            message,
        })
    }

    pub async fn get_json<T>(
        &self,
        op: &'static str,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self
            .send_with_refresh(op, || self.http.get(&url).query(query))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    pub async fn post_json<B, T>(&self, op: &'static str, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self
            .send_with_refresh(op, || self.http.post(&url).json(body))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    pub async fn patch_json<B, T>(&self, op: &'static str, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self
            .send_with_refresh(op, || self.http.patch(&url).json(body))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    pub async fn delete_json<T>(&self, op: &'static str, path: &str) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let resp = self
            .send_with_refresh(op, || self.http.delete(&url))
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Multipart upload. The file is read once up front so the request can be
    /// rebuilt for the 401-refresh retry; a SHA-256 digest of the bytes is
    /// sent alongside for server-side integrity checking.
    pub async fn upload_file<T>(&self, op: &'static str, path: &str, file_path: &Path) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| GatewayError::Network(format!("read {}: {e}", file_path.display())))?;
        let digest = sha256_hex(&bytes);
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let content_type = content_type_for(file_path).to_string();

        let url = self.url(path);
        let resp = self
            .send_with_refresh(op, || {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone());
                let part = part.mime_str(&content_type).unwrap_or_else(|_| {
                    reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name.clone())
                });
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("sha256", digest.clone());
                self.http.post(&url).multipart(form)
            })
            .await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    /// Streams a response body to `dest` and returns the SHA-256 hex digest
    /// of the bytes written.
    pub async fn download_to_path(&self, op: &'static str, path: &str, dest: &Path) -> Result<String, GatewayError> {
        let url = self.url(path);
        let resp = self.send_with_refresh(op, || self.http.get(&url)).await?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| GatewayError::Network(format!("create {}: {e}", dest.display())))?;
        let mut hasher = Sha256::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GatewayError::Network(e.to_string()))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| GatewayError::Network(format!("write {}: {e}", dest.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| GatewayError::Network(format!("write {}: {e}", dest.display())))?;

        let out = hasher.finalize();
        Ok(out.iter().map(|b| format!("{b:02x}")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("https://api.example.com/api/", "/invoices/"),
            "https://api.example.com/api/invoices/"
        );
        assert_eq!(
            join_url("https://api.example.com/api", "invoices/"),
            "https://api.example.com/api/invoices/"
        );
    }

    #[test]
    fn extract_error_message_prefers_envelope_error() {
        let body = r#"{"success":false,"error":"Invoice is not a draft."}"#;
        assert_eq!(
            extract_error_message(body).as_deref(),
            Some("Invoice is not a draft.")
        );
        assert_eq!(extract_error_message("<html>502</html>"), None);
        assert_eq!(extract_error_message(r#"{"success":false,"error":""}"#), None);
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for(Path::new("a/receipt.PDF")), mime::APPLICATION_PDF);
        assert_eq!(content_type_for(Path::new("logo.png")), mime::IMAGE_PNG);
        assert_eq!(content_type_for(Path::new("export.csv")), mime::TEXT_CSV);
        assert_eq!(
            content_type_for(Path::new("blob")),
            mime::APPLICATION_OCTET_STREAM
        );
    }

    #[test]
    fn gateway_error_messages_are_user_presentable() {
        let e = GatewayError::Http {
            status: 400,
            message: "Client is archived.".to_string(),
        };
        assert_eq!(e.to_string(), "Client is archived.");

        let e = GatewayError::Http {
            status: 502,
            message: String::new(),
        };
        assert_eq!(e.to_string(), "Request failed with status 502.");
    }
}
