//! API client for the paperless-ngx REST API.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::PaperlessError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound on followed `next` links, in case a server keeps paging forever
const MAX_PAGES: usize = 1000;

pub type DocumentId = u64;
pub type TagId = u64;

pub type Result<T> = std::result::Result<T, PaperlessError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub field: u64,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// The subset of a paperless document this tool cares about
#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldValue>,
}

#[derive(Debug, Deserialize)]
struct DocumentPage {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    results: Vec<DocumentSummary>,
}

#[derive(Debug, Deserialize)]
struct DocumentSummary {
    id: DocumentId,
}

#[derive(Serialize)]
struct TagsPatch<'a> {
    tags: &'a [TagId],
}

#[derive(Serialize)]
struct CustomFieldsPatch<'a> {
    custom_fields: &'a [CustomFieldValue],
}

/// paperless-ngx client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct PaperlessClient {
    client: Client,
    base_url: String,
    token: String,
}

impl PaperlessClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn document_url(&self, id: DocumentId) -> String {
        self.url(&format!("api/documents/{}/", id))
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Token {}", self.token))
                .map_err(|_| PaperlessError::InvalidToken)?,
        );
        Ok(headers)
    }

    fn json_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = self.auth_headers()?;
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            Err(PaperlessError::from_status(status, &url, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let url = response.url().to_string();
            let body = response.text().await.unwrap_or_default();
            Err(PaperlessError::from_status(status, &url, &body))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .headers(self.json_headers()?)
                .query(query)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return serde_json::from_str(&text).map_err(|e| PaperlessError::Decode {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(PaperlessError::RateLimited {
                            url: url.to_string(),
                            retries: MAX_RATE_LIMIT_RETRIES,
                        });
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    async fn patch_json<B: Serialize>(&self, url: &str, body: &B) -> Result<()> {
        let response = self
            .client
            .patch(url)
            .headers(self.json_headers()?)
            .json(body)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Walk every result page starting at `url`.
    async fn collect_ids(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<DocumentId>> {
        let mut page: DocumentPage = self.get_json(url, query).await?;
        let mut ids: Vec<DocumentId> = page.results.iter().map(|d| d.id).collect();

        let mut pages = 1;
        while let Some(next) = page.next.take() {
            if pages >= MAX_PAGES {
                warn!(pages, "Stopped following paperless result pages");
                break;
            }
            page = self.get_json(&next, &[]).await?;
            ids.extend(page.results.iter().map(|d| d.id));
            pages += 1;
        }

        Ok(ids)
    }

    // ===== Queries =====

    /// Documents carrying all of `tags`
    pub async fn filter_documents_by_tags(&self, tags: &[TagId]) -> Result<Vec<DocumentId>> {
        let tags_string = tags.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(",");
        let ids = self
            .collect_ids(&self.url("api/documents/"), &[("tags__id__all", tags_string)])
            .await?;
        debug!(?tags, ?ids, "Paperless tag filter results");
        Ok(ids)
    }

    /// Full-text search
    pub async fn search_documents(&self, query: &str) -> Result<Vec<DocumentId>> {
        let ids = self
            .collect_ids(&self.url("api/documents/"), &[("query", format!("({})", query))])
            .await?;
        debug!(query, ?ids, "Paperless search results");
        Ok(ids)
    }

    pub async fn fetch_document(&self, id: DocumentId) -> Result<Document> {
        self.get_json(&self.document_url(id), &[]).await
    }

    pub async fn download_document(&self, id: DocumentId) -> Result<Bytes> {
        let response = self
            .client
            .get(self.url(&format!("api/documents/{}/download/", id)))
            .headers(self.auth_headers()?)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let content = response.bytes().await?;
        info!(doc_id = id, bytes = content.len(), "Document downloaded from paperless");
        Ok(content)
    }

    // ===== Updates =====

    /// Remove `tags` from a document, keeping all others.
    pub async fn remove_tags(&self, id: DocumentId, tags: &[TagId]) -> Result<()> {
        let document = self.fetch_document(id).await?;
        let remaining: Vec<TagId> = document.tags.iter().copied().filter(|t| !tags.contains(t)).collect();

        if remaining.len() == document.tags.len() {
            debug!(doc_id = id, ?tags, "Document carries none of the tags to remove");
            return Ok(());
        }

        self.patch_json(&self.document_url(id), &TagsPatch { tags: &remaining }).await?;
        info!(doc_id = id, ?tags, "Removed tags from document");
        Ok(())
    }

    /// Set one custom field, keeping the document's other field values.
    pub async fn set_custom_field(&self, id: DocumentId, field: u64, value: serde_json::Value) -> Result<()> {
        let document = self.fetch_document(id).await?;
        let mut fields: Vec<CustomFieldValue> =
            document.custom_fields.into_iter().filter(|f| f.field != field).collect();
        fields.push(CustomFieldValue { field, value });

        self.patch_json(&self.document_url(id), &CustomFieldsPatch { custom_fields: &fields })
            .await?;
        info!(doc_id = id, field, "Custom field set on document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_page() {
        let json = r#"{"count": 2, "next": "http://paperless.local/api/documents/?page=2", "previous": null, "all": [3, 5], "results": [{"id": 3, "title": "Rechnung"}, {"id": 5}]}"#;
        let page: DocumentPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.results.iter().map(|d| d.id).collect::<Vec<_>>(), vec![3, 5]);
        assert!(page.next.is_some());
    }

    #[test]
    fn test_parse_document() {
        let json = r#"{"id": 12, "title": "Invoice 2024-03", "tags": [1, 4], "custom_fields": [{"field": 2, "value": "abc"}], "correspondent": null}"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id, 12);
        assert_eq!(doc.tags, vec![1, 4]);
        assert_eq!(doc.custom_fields[0].value, serde_json::json!("abc"));
    }

    #[test]
    fn test_document_urls() {
        let client = PaperlessClient::new("http://paperless.local/", "t0ken", Duration::from_secs(1)).unwrap();
        assert_eq!(client.document_url(7), "http://paperless.local/api/documents/7/");
        assert_eq!(client.auth_headers().unwrap()[header::AUTHORIZATION], "Token t0ken");
    }
}
