//! HTTP client for the lexoffice web endpoints.
//!
//! Only two endpoints are used: the web login, which answers with session
//! cookies, and the voucher upload of the bookkeeping inbox. Both mimic the
//! browser front end closely because the vendor rejects anything else.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client};
use serde::Serialize;
use tracing::debug;

use super::auth::{AuthState, Credentials};
use super::error::{AuthError, UploadError};
use super::provider::AuthStrategy;
use super::upload::{UploadResult, Voucher, VoucherTransport};
use crate::util::truncate_body;

// ============================================================================
// Constants
// ============================================================================

/// lexoffice web front end
pub const DEFAULT_BASE_URL: &str = "https://app.lexware.de";

const AUTHENTICATE_PATH: &str = "janus/janus-rest/public/login/web/v100/authenticate";

const VOUCHERS_PATH: &str = "capsa/capsa-rest/v2/vouchers";

/// Browser user agent expected by the voucher endpoint
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

/// Client identifier sent by the bookkeeping voucher list
const VOUCHER_CLIENT_HEADER: &str = "x-bookkeeping-voucher-client";
const VOUCHER_CLIENT: &str = "Belegliste";

/// Marks the upload as coming from the browser front end
const DATASOURCE: &str = "USER_BROWSER";

/// HTTP request timeout in seconds.
/// Voucher uploads carry whole PDFs, so this is generous.
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// lexoffice client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct LexofficeClient {
    client: Client,
    base_url: String,
}

impl LexofficeClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Exchange credentials for session cookies via the web login.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthState, AuthError> {
        let response = self
            .client
            .post(self.url(AUTHENTICATE_PATH))
            .json(&LoginRequest {
                username: credentials.username(),
                password: credentials.password(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "lexoffice login rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
            });
        }

        let cookies: Vec<(String, String)> = response
            .cookies()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect();

        AuthState::from_cookies(cookies)
            .ok_or_else(|| AuthError::Malformed("login succeeded but set no session cookies".to_string()))
    }

    fn voucher_headers(&self, auth: &AuthState) -> Result<header::HeaderMap, UploadError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(VOUCHER_CLIENT_HEADER, header::HeaderValue::from_static(VOUCHER_CLIENT));
        headers.insert(
            header::ORIGIN,
            header::HeaderValue::from_str(&self.base_url)
                .map_err(|_| UploadError::MalformedResponse(format!("invalid base URL: {}", self.base_url)))?,
        );
        headers.insert(
            header::COOKIE,
            header::HeaderValue::from_str(&auth.cookie_header())
                .map_err(|_| UploadError::MalformedResponse("session cookie is not a valid header value".to_string()))?,
        );
        Ok(headers)
    }

    /// Post one document to the voucher inbox.
    pub async fn upload_voucher(
        &self,
        auth: &AuthState,
        filename: &str,
        content_type: &str,
        content: Bytes,
    ) -> UploadResult {
        let length = content.len() as u64;
        let document = Part::stream_with_length(content, length)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = Form::new().text("datasource", DATASOURCE).part("documents", document);

        let response = self
            .client
            .post(self.url(VOUCHERS_PATH))
            .headers(self.voucher_headers(auth)?)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(UploadError::from_status(status, &body));
        }

        serde_json::from_str::<Voucher>(&body).map_err(|e| {
            UploadError::MalformedResponse(format!("voucher response without id ({}): {}", e, truncate_body(&body)))
        })
    }
}

#[async_trait]
impl VoucherTransport for LexofficeClient {
    async fn post_voucher(
        &self,
        auth: &AuthState,
        filename: &str,
        content_type: &str,
        content: Bytes,
    ) -> UploadResult {
        self.upload_voucher(auth, filename, content_type, content).await
    }
}

/// Plain JSON login against the web endpoint.
pub struct DirectLogin {
    client: LexofficeClient,
}

impl DirectLogin {
    pub fn new(client: LexofficeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AuthStrategy for DirectLogin {
    fn name(&self) -> &str {
        "direct"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthState, AuthError> {
        self.client.authenticate(credentials).await
    }
}
