use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::auth::{AuthState, Credentials};
use super::error::UploadError;
use super::session::SessionCache;

/// Pause before every physical upload, first attempt and retry alike.
pub const DEFAULT_ATTEMPT_DELAY: Duration = Duration::from_millis(500);

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// One initial attempt plus one retry after a session refresh
const MAX_ATTEMPTS: u32 = 2;

/// A voucher accepted by lexoffice
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Voucher {
    pub id: String,
}

pub type UploadResult = Result<Voucher, UploadError>;

#[derive(Debug, Clone)]
enum DocumentSource {
    Path(PathBuf),
    Bytes(Bytes),
}

/// A document to upload. Content is read fresh for every attempt.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    source: DocumentSource,
    filename: String,
}

impl UploadRequest {
    /// Upload a file; the declared filename is the path's file name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        Self {
            source: DocumentSource::Path(path),
            filename,
        }
    }

    pub fn from_bytes(content: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            source: DocumentSource::Bytes(content.into()),
            filename: filename.into(),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Vouchers are always sent as PDF
    pub fn content_type(&self) -> &str {
        PDF_CONTENT_TYPE
    }

    /// Read the content. Files are re-opened on every call.
    pub async fn read(&self) -> std::io::Result<Bytes> {
        match &self.source {
            DocumentSource::Path(p) => tokio::fs::read(p).await.map(Bytes::from),
            DocumentSource::Bytes(b) => Ok(b.clone()),
        }
    }
}

/// Performs one physical voucher upload with a given session.
#[async_trait]
pub trait VoucherTransport: Send + Sync {
    async fn post_voucher(
        &self,
        auth: &AuthState,
        filename: &str,
        content_type: &str,
        content: Bytes,
    ) -> UploadResult;
}

/// Uploads vouchers, refreshing the session and retrying once on 401.
pub struct UploadExecutor {
    session: Arc<SessionCache>,
    transport: Arc<dyn VoucherTransport>,
    attempt_delay: Duration,
}

impl UploadExecutor {
    pub fn new(session: Arc<SessionCache>, transport: Arc<dyn VoucherTransport>) -> Self {
        Self {
            session,
            transport,
            attempt_delay: DEFAULT_ATTEMPT_DELAY,
        }
    }

    pub fn with_attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }

    pub fn session(&self) -> &Arc<SessionCache> {
        &self.session
    }

    /// Upload `request`. Without credentials only a cached session is used
    /// and a 401 is final.
    pub async fn upload(&self, request: &UploadRequest, credentials: Option<&Credentials>) -> UploadResult {
        let mut attempt = 1;

        loop {
            let auth = self.session.acquire(credentials).await?;

            tokio::time::sleep(self.attempt_delay).await;
            let content = request.read().await?;
            debug!(filename = request.filename(), attempt, bytes = content.len(), "Uploading voucher");

            let result = self
                .transport
                .post_voucher(&auth, request.filename(), request.content_type(), content)
                .await;

            match result {
                Ok(voucher) => {
                    info!(filename = request.filename(), voucher_id = %voucher.id, "Document uploaded to lexoffice");
                    return Ok(voucher);
                }
                Err(e) if e.is_unauthorized() => {
                    self.session.discard(&auth).await;
                    if attempt < MAX_ATTEMPTS && credentials.is_some() {
                        warn!(filename = request.filename(), "Unauthorized, refreshing lexoffice session");
                        attempt += 1;
                        continue;
                    }
                    warn!(filename = request.filename(), attempt, "Upload unauthorized, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(filename = request.filename(), status = ?e.status(), error = %e, "Upload failed");
                    return Err(e);
                }
            }
        }
    }
}
