//! The remote theme store, as seen by the engine.
//!
//! [`ThemeApi`] is the seam between the sync engine and the transport;
//! [`AdminClient`] implements it on top of the Admin REST API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, SyncError};
use crate::types::{AssetContent, ChecksumManifest, Session, Theme, ThemeRole};

pub const API_VERSION: &str = "2024-10";

/// One asset in a bulk upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    pub key: String,
    pub content: AssetContent,
}

impl AssetUpload {
    fn to_json(&self) -> Value {
        match &self.content {
            AssetContent::Text(text) => json!({ "key": self.key, "value": text }),
            AssetContent::Binary(bytes) => {
                json!({ "key": self.key, "attachment": BASE64.encode(bytes) })
            }
        }
    }
}

/// Per-key result of a bulk upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub key: String,
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl AssetOutcome {
    pub fn ok(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn rejected(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            success: false,
            errors: vec![error.into()],
        }
    }
}

/// Remote theme operations the engine depends on.
#[async_trait]
pub trait ThemeApi: Send + Sync {
    /// `Ok(None)` when the theme does not exist.
    async fn fetch_theme(&self, theme_id: u64) -> Result<Option<Theme>>;

    async fn create_theme(&self, name: &str, role: ThemeRole) -> Result<Theme>;

    async fn fetch_checksums(&self, theme_id: u64) -> Result<ChecksumManifest>;

    /// Upload a batch. Every asset gets an outcome: one that could not be
    /// sent is an unsuccessful outcome, not an error for the whole batch.
    /// `Err` means the batch as a whole was refused.
    async fn bulk_upload(&self, theme_id: u64, assets: Vec<AssetUpload>)
        -> Result<Vec<AssetOutcome>>;

    async fn delete_asset(&self, theme_id: u64, key: &str) -> Result<()>;

    async fn publish_theme(&self, theme_id: u64) -> Result<()>;
}

/// [`ThemeApi`] over the Admin REST API.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Client,
    session: Session,
}

#[derive(Deserialize)]
struct ThemeEnvelope {
    theme: Theme,
}

#[derive(Deserialize)]
struct AssetsEnvelope {
    assets: Vec<RemoteAsset>,
}

#[derive(Deserialize)]
struct RemoteAsset {
    key: String,
    #[serde(default)]
    checksum: Option<String>,
}

impl AdminClient {
    /// Client for the session's store.
    ///
    /// # Errors
    ///
    /// Fails only if the TLS backend cannot be initialized.
    pub fn new(session: Session) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("themesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, session })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "https://{}/admin/api/{API_VERSION}/{path}",
            self.session.store_fqdn
        )
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-Shopify-Access-Token", &self.session.token)
    }

    async fn expect_success(
        operation: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::remote(operation, status.as_u16(), error_message(&body)))
    }
}

#[async_trait]
impl ThemeApi for AdminClient {
    async fn fetch_theme(&self, theme_id: u64) -> Result<Option<Theme>> {
        let response = self
            .request(Method::GET, &format!("themes/{theme_id}.json"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::expect_success("fetch theme", response).await?;
        let envelope: ThemeEnvelope = response.json().await?;
        Ok(Some(envelope.theme))
    }

    async fn create_theme(&self, name: &str, role: ThemeRole) -> Result<Theme> {
        let response = self
            .request(Method::POST, "themes.json")
            .json(&json!({ "theme": { "name": name, "role": role.as_remote() } }))
            .send()
            .await?;
        let response = Self::expect_success("create theme", response).await?;
        let envelope: ThemeEnvelope = response.json().await?;
        Ok(envelope.theme)
    }

    async fn fetch_checksums(&self, theme_id: u64) -> Result<ChecksumManifest> {
        let response = self
            .request(Method::GET, &format!("themes/{theme_id}/assets.json"))
            .query(&[("fields", "key,checksum")])
            .send()
            .await?;
        let response = Self::expect_success("fetch checksums", response).await?;
        let envelope: AssetsEnvelope = response.json().await?;
        Ok(envelope
            .assets
            .into_iter()
            .map(|a| (a.key, a.checksum.unwrap_or_default()))
            .collect())
    }

    async fn bulk_upload(
        &self,
        theme_id: u64,
        assets: Vec<AssetUpload>,
    ) -> Result<Vec<AssetOutcome>> {
        let path = format!("themes/{theme_id}/assets.json");
        let mut outcomes = Vec::with_capacity(assets.len());
        for asset in assets {
            let sent = self
                .request(Method::PUT, &path)
                .json(&json!({ "asset": asset.to_json() }))
                .send()
                .await;
            let outcome = match sent {
                Ok(response) => {
                    let status = response.status();
                    let body = if status.is_success() {
                        String::new()
                    } else {
                        response.text().await.unwrap_or_default()
                    };
                    upload_outcome(asset.key, status.as_u16(), &body)
                }
                Err(err) => {
                    tracing::warn!(key = %asset.key, error = %err, "upload request failed");
                    AssetOutcome::rejected(asset.key, SyncError::from(err).to_string())
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn delete_asset(&self, theme_id: u64, key: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &format!("themes/{theme_id}/assets.json"))
            .query(&[("asset[key]", key)])
            .send()
            .await?;
        Self::expect_success("delete asset", response).await?;
        Ok(())
    }

    async fn publish_theme(&self, theme_id: u64) -> Result<()> {
        let response = self
            .request(Method::PUT, &format!("themes/{theme_id}.json"))
            .json(&json!({ "theme": { "id": theme_id, "role": ThemeRole::Live.as_remote() } }))
            .send()
            .await?;
        Self::expect_success("publish theme", response).await?;
        Ok(())
    }
}

/// Outcome of a single asset PUT. Server errors keep their status in the
/// message.
fn upload_outcome(key: String, status: u16, body: &str) -> AssetOutcome {
    match status {
        200..=299 => AssetOutcome::ok(key),
        400..=499 => AssetOutcome::rejected(key, error_message(body)),
        _ => {
            let err = SyncError::remote("upload", status, error_message(body));
            AssetOutcome::rejected(key, err.to_string())
        }
    }
}

/// Flatten `{"errors": ...}` bodies into one line.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().chars().take(200).collect();
    };
    match value.get("errors") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => join_values(items),
        Some(Value::Object(map)) => {
            let grouped: BTreeMap<&String, String> = map
                .iter()
                .map(|(field, v)| match v {
                    Value::Array(items) => (field, join_values(items)),
                    other => (field, other.to_string()),
                })
                .collect();
            grouped
                .into_iter()
                .map(|(field, msg)| format!("{field}: {msg}"))
                .collect::<Vec<_>>()
                .join("; ")
        }
        _ => body.trim().chars().take(200).collect(),
    }
}

fn join_values(items: &[Value]) -> String {
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_flattens_field_errors() {
        let body = r#"{"errors":{"asset":["Liquid syntax error","line 3"]}}"#;
        assert_eq!(error_message(body), "asset: Liquid syntax error, line 3");
        assert_eq!(error_message(r#"{"errors":"Not Found"}"#), "Not Found");
        assert_eq!(error_message("Bad gateway"), "Bad gateway");
    }

    #[test]
    fn upload_outcome_by_status() {
        assert_eq!(
            upload_outcome("snippets/a.liquid".into(), 201, ""),
            AssetOutcome::ok("snippets/a.liquid")
        );

        let rejected = upload_outcome(
            "snippets/b.liquid".into(),
            422,
            r#"{"errors":{"asset":["Liquid syntax error"]}}"#,
        );
        assert!(!rejected.success);
        assert_eq!(rejected.errors, vec!["asset: Liquid syntax error"]);

        let unavailable = upload_outcome("snippets/c.liquid".into(), 503, "Service Unavailable");
        assert!(!unavailable.success);
        assert!(unavailable.errors[0].contains("503"));
        assert!(unavailable.errors[0].contains("Service Unavailable"));
    }

    #[test]
    fn upload_json_shapes() {
        let text = AssetUpload {
            key: "snippets/a.liquid".into(),
            content: AssetContent::Text("hi".into()),
        };
        assert_eq!(text.to_json()["value"], "hi");

        let binary = AssetUpload {
            key: "assets/a.png".into(),
            content: AssetContent::Binary(b"Man".to_vec()),
        };
        assert_eq!(binary.to_json()["attachment"], "TWFu");
    }

    #[test]
    fn admin_urls() {
        let client = AdminClient::new(Session::new("demo", "token")).unwrap();
        assert_eq!(
            client.url("themes/1.json"),
            format!("https://demo.myshopify.com/admin/api/{API_VERSION}/themes/1.json")
        );
    }
}
