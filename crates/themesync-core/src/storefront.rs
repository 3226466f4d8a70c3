//! Remote storefront rendering.
//!
//! Page requests are replayed against the remote renderer with local template
//! overrides attached as form parameters. Everything else the preview needs
//! (cart calls, CDN files, redirects) goes through [`Storefront::passthrough`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{redirect, Client, Method};

use crate::error::{Result, SyncError};
use crate::types::Session;

/// Headers that describe one connection rather than the request.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "upgrade-insecure-requests",
    "expect",
    "content-security-policy",
];

/// Headers the proxy sets itself on forwarded requests.
pub const CONTROLLED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "accept",
    "accept-encoding",
    "user-agent",
    "authorization",
    "cookie",
    "access-token",
    "x-shopify-access-token",
];

pub type HeaderList = Vec<(String, String)>;

/// Drop hop-by-hop and proxy-controlled headers from an incoming request.
pub fn sanitize_request_headers<'a, I>(headers: I) -> HeaderList
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !HOP_BY_HOP_HEADERS.contains(&name.as_str())
                && !CONTROLLED_HEADERS.contains(&name.as_str())
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Request cookies first, then session cookies that the request does not set.
pub fn merge_cookies(request_cookie: Option<&str>, session: &BTreeMap<String, String>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut seen = Vec::new();
    if let Some(header) = request_cookie {
        for pair in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((name, _)) = pair.split_once('=') {
                seen.push(name.trim().to_string());
            }
            parts.push(pair.to_string());
        }
    }
    for (name, value) in session {
        if !seen.iter().any(|s| s == name) {
            parts.push(format!("{name}={value}"));
        }
    }
    parts.join("; ")
}

/// A page or section render with local overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRequest {
    pub method: String,
    pub path: String,
    /// Query pairs of the original request, minus `section_id`.
    pub query: Vec<(String, String)>,
    pub section_id: Option<String>,
    pub headers: HeaderList,
    pub cookies: String,
    pub replace_templates: BTreeMap<String, String>,
    /// bucket -> (key -> content)
    pub replace_extension_templates: BTreeMap<String, BTreeMap<String, String>>,
}

impl RenderRequest {
    pub fn page(path: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Query string sent to the renderer. Always disables the storefront's
    /// own render caches.
    pub fn url_query(&self) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = self
            .query
            .iter()
            .filter(|(k, _)| k != "section_id" && k != "_fd" && k != "pb")
            .cloned()
            .collect();
        query.push(("_fd".into(), "0".into()));
        query.push(("pb".into(), "0".into()));
        if let Some(section) = &self.section_id {
            query.push(("section_id".into(), section.clone()));
        }
        query
    }

    /// Form body: the method override followed by template replacements.
    pub fn form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("_method".to_string(), self.method.to_uppercase())];
        for (key, content) in &self.replace_templates {
            params.push((format!("replace_templates[{key}]"), content.clone()));
        }
        for (bucket, files) in &self.replace_extension_templates {
            for (key, content) in files {
                params.push((
                    format!("replace_extension_templates[{bucket}][{key}]"),
                    content.clone(),
                ));
            }
        }
        params
    }
}

/// A request forwarded as-is to the storefront or CDN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassthroughRequest {
    pub method: String,
    /// Absolute path plus query, e.g. `/cart.js?x=1`.
    pub path_and_query: String,
    pub headers: HeaderList,
    pub cookies: String,
    pub body: Vec<u8>,
    /// Target host; the store itself when `None`.
    pub host: Option<String>,
}

/// Status, headers and body of a storefront response, fully buffered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

impl RenderedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Remote rendering as seen by the preview proxy.
#[async_trait]
pub trait Storefront: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<RenderedResponse>;

    async fn passthrough(&self, request: PassthroughRequest) -> Result<RenderedResponse>;
}

/// [`Storefront`] that talks to the live store over HTTPS. Redirects are
/// returned to the caller rather than followed.
#[derive(Debug, Clone)]
pub struct HttpStorefront {
    http: Client,
    session: Session,
    theme_id: u64,
}

impl HttpStorefront {
    pub fn new(session: Session, theme_id: u64) -> Result<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("themesync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            session,
            theme_id,
        })
    }

    fn base(&self, host: Option<&str>) -> String {
        format!("https://{}", host.unwrap_or(&self.session.store_fqdn))
    }

    /// Render endpoint for `request` on the store host.
    ///
    /// The path is set rather than joined so a `//host/...` request path stays
    /// a path on the store.
    fn render_url(&self, request: &RenderRequest) -> Result<url::Url> {
        let mut url = url::Url::parse(&self.base(None))?;
        url.set_path(&request.path);
        url.query_pairs_mut()
            .extend_pairs(request.url_query())
            .append_pair("preview_theme_id", &self.theme_id.to_string());
        Ok(url)
    }

    fn with_common_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        headers: &HeaderList,
        cookies: &str,
        authorize: bool,
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !cookies.is_empty() {
            builder = builder.header("cookie", cookies);
        }
        if let Some(token) = self.session.storefront_token.as_ref().filter(|_| authorize) {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder
    }

    async fn collect(response: reqwest::Response) -> Result<RenderedResponse> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(RenderedResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Storefront for HttpStorefront {
    async fn render(&self, request: RenderRequest) -> Result<RenderedResponse> {
        let url = self.render_url(&request)?;
        let builder = self.http.post(url).form(&request.form_params());
        let builder =
            self.with_common_headers(builder, &request.headers, &request.cookies, true);

        let response = builder
            .send()
            .await
            .map_err(|e| SyncError::RenderForward {
                path: request.path.clone(),
                message: e.to_string(),
            })?;
        Self::collect(response).await
    }

    async fn passthrough(&self, request: PassthroughRequest) -> Result<RenderedResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).unwrap_or(Method::GET);
        let url = format!(
            "{}{}",
            self.base(request.host.as_deref()),
            request.path_and_query
        );
        let mut builder = self.http.request(method, url);
        builder = self.with_common_headers(
            builder,
            &request.headers,
            &request.cookies,
            request.host.is_none(),
        );
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }
        let response = builder.send().await?;
        Self::collect(response).await
    }
}
