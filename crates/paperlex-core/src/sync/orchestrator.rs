use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::lock::LockFile;
use crate::config::Config;
use crate::lexoffice::{
    AuthProvider, BrowserChallenge, CommandSolver, Credentials, DirectLogin, LexofficeClient, SessionCache,
    SessionStore, UploadExecutor, UploadRequest, Voucher,
};
use crate::paperless::{DocumentId, PaperlessClient, TagId};

/// What a cycle works on
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub inbox_tag: TagId,
    pub lexoffice_tag: TagId,
    /// Custom field receiving the voucher id, if any
    pub voucher_field: Option<u64>,
    pub tmp_dir: PathBuf,
    pub lock_file: PathBuf,
    /// Documents uploaded in parallel
    pub concurrency: usize,
}

/// Summary of one sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub found: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// Not started because shutdown was requested
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentOutcome {
    Uploaded,
    Failed,
    Skipped,
}

pub struct Synchronizer {
    paperless: PaperlessClient,
    executor: UploadExecutor,
    credentials: Option<Credentials>,
    settings: SyncSettings,
}

impl Synchronizer {
    pub fn new(
        paperless: PaperlessClient,
        executor: UploadExecutor,
        credentials: Option<Credentials>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            paperless,
            executor,
            credentials,
            settings,
        }
    }

    /// Wire up clients, the login chain and the session cache from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let paperless = PaperlessClient::new(
            config.paperless_url.clone().context("PAPERLESS_URL is not set")?,
            config.paperless_token.clone().context("PAPERLESS_TOKEN is not set")?,
            config.request_timeout(),
        )
        .context("Failed to create paperless client")?;

        let lexoffice = LexofficeClient::with_base_url(config.lexoffice_base_url.clone())
            .context("Failed to create lexoffice client")?;

        let challenge = match config
            .challenge_command
            .as_deref()
            .and_then(CommandSolver::from_command_line)
        {
            Some(solver) => {
                debug!(program = solver.program(), "Browser challenge solver configured");
                BrowserChallenge::new(Arc::new(solver))
            }
            None => BrowserChallenge::unavailable(),
        }
        .with_timeout(config.challenge_timeout());

        let provider = AuthProvider::new()
            .with_strategy(DirectLogin::new(lexoffice.clone()))
            .with_strategy(challenge);
        debug!(strategies = ?provider.strategy_names(), "lexoffice login chain");

        let mut session = SessionCache::new(provider);
        if let Some(path) = config.session_path() {
            debug!(path = %path.display(), "Persisting lexoffice session");
            session = session.with_store(SessionStore::new(path).with_max_age(config.session_max_age()));
        }

        let credentials = config.credentials();
        if credentials.is_none() {
            warn!("No lexoffice credentials configured; only a persisted session can be used");
        }

        let settings = SyncSettings {
            inbox_tag: config.inbox_tag_id.context("INBOX_TAG_ID is not set")?,
            lexoffice_tag: config.lexoffice_tag_id.context("LEXOFFICE_TAG_ID is not set")?,
            voucher_field: config.voucher_field_id,
            tmp_dir: config.tmp_dir.clone(),
            lock_file: config.lock_file.clone(),
            concurrency: config.upload_concurrency,
        };

        let executor = UploadExecutor::new(Arc::new(session), Arc::new(lexoffice));
        Ok(Self::new(paperless, executor, credentials, settings))
    }

    /// Run one cycle. `Ok(None)` when another run holds the lock.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<Option<SyncReport>> {
        let Some(lock) = LockFile::acquire(&self.settings.lock_file)? else {
            info!(path = %self.settings.lock_file.display(), "Sync already running, skipping cycle");
            return Ok(None);
        };
        debug!(path = %lock.path().display(), "Sync lock acquired");

        info!("Checking for new documents in paperless tagged for upload");
        let ids = self
            .paperless
            .filter_documents_by_tags(&[self.settings.inbox_tag, self.settings.lexoffice_tag])
            .await
            .context("Failed to list tagged documents")?;

        let mut report = SyncReport {
            found: ids.len(),
            ..SyncReport::default()
        };
        if ids.is_empty() {
            return Ok(Some(report));
        }

        tokio::fs::create_dir_all(&self.settings.tmp_dir)
            .await
            .with_context(|| format!("Failed to create temp directory {}", self.settings.tmp_dir.display()))?;

        let outcomes: Vec<DocumentOutcome> = stream::iter(ids)
            .map(|id| self.sync_document(id, shutdown))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                DocumentOutcome::Uploaded => report.uploaded += 1,
                DocumentOutcome::Failed => report.failed += 1,
                DocumentOutcome::Skipped => report.skipped += 1,
            }
        }

        Ok(Some(report))
    }

    async fn sync_document(&self, id: DocumentId, shutdown: &watch::Receiver<bool>) -> DocumentOutcome {
        if *shutdown.borrow() {
            debug!(doc_id = id, "Shutdown requested, not starting upload");
            return DocumentOutcome::Skipped;
        }

        match self.upload_document(id).await {
            Ok(voucher) => {
                self.finish_document(id, &voucher).await;
                DocumentOutcome::Uploaded
            }
            Err(e) => {
                warn!(doc_id = id, "Upload not successful, leaving document for next cycle: {:#}", e);
                DocumentOutcome::Failed
            }
        }
    }

    async fn upload_document(&self, id: DocumentId) -> Result<Voucher> {
        let content = self
            .paperless
            .download_document(id)
            .await
            .context("Failed to download document")?;

        let path = self.settings.tmp_dir.join(format!("{}.pdf", id));
        tokio::fs::write(&path, &content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let request = UploadRequest::from_path(&path);
        self.executor
            .upload(&request, self.credentials.as_ref())
            .await
            .map_err(|e| match e.status() {
                Some(status) => anyhow!("lexoffice upload failed (HTTP {}): {}", status, e),
                None => anyhow!("lexoffice upload failed: {}", e),
            })
    }

    /// Post-upload bookkeeping. The voucher exists at this point, so
    /// failures here are logged rather than reported as a failed upload.
    async fn finish_document(&self, id: DocumentId, voucher: &Voucher) {
        let path = self.settings.tmp_dir.join(format!("{}.pdf", id));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(doc_id = id, error = %e, "Failed to delete temp file");
        }

        if let Err(e) = self.paperless.remove_tags(id, &[self.settings.inbox_tag]).await {
            error!(doc_id = id, voucher_id = %voucher.id, error = %e, "Uploaded, but inbox tag could not be removed; document will be uploaded again");
        }

        if let Some(field) = self.settings.voucher_field {
            if let Err(e) = self
                .paperless
                .set_custom_field(id, field, serde_json::Value::String(voucher.id.clone()))
                .await
            {
                warn!(doc_id = id, field, error = %e, "Failed to store voucher id on document");
            }
        }
    }

    /// Run cycles every `interval` until `shutdown` turns true.
    /// A running cycle finishes its in-flight uploads before the loop exits.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Starting sync loop");

        loop {
            match self.run_cycle(&shutdown).await {
                Ok(Some(report)) => info!(
                    found = report.found,
                    uploaded = report.uploaded,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Sync cycle complete"
                ),
                Ok(None) => {}
                Err(e) => error!("Sync cycle failed: {:#}", e),
            }

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sync loop stopped");
    }
}
