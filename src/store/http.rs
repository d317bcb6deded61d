// 🌐 HTTP repository - versioned dataset repository over HTTPS
//
//   list      GET  {endpoint}/api/datasets/{repo}/tree/{rev}/{prefix}?recursive=true
//   download  GET  {endpoint}/datasets/{repo}/resolve/{rev}/{path}
//   commit    POST {endpoint}/api/datasets/{repo}/commit/{rev}   (NDJSON body)
//
// This is the only place that sees HTTP status codes. Every failure leaves
// here as a RemoteError with an ErrorKind.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, LINK, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CommitOp, RemoteRepo};
use crate::config::RemoteConfig;
use crate::error::{Error, ErrorKind, RemoteError, Result};

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    entry_type: String,
    path: String,
}

pub struct HubRepo {
    client: Client,
    endpoint: String,
    repo: String,
    revision: String,
    token: Option<String>,
}

impl HubRepo {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        if config.repo.is_empty() {
            return Err(Error::Config("remote repository id is empty".to_string()));
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(HubRepo {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            revision: config.revision.clone(),
            token: config.token.clone(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    fn tree_url(&self, prefix: &str) -> String {
        let prefix = encode_path(prefix.trim_matches('/'));
        format!(
            "{}/api/datasets/{}/tree/{}/{}?recursive=true",
            self.endpoint,
            self.repo,
            urlencoding::encode(&self.revision),
            prefix
        )
    }

    fn resolve_url(&self, path: &str) -> String {
        format!(
            "{}/datasets/{}/resolve/{}/{}",
            self.endpoint,
            self.repo,
            urlencoding::encode(&self.revision),
            encode_path(path)
        )
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/api/datasets/{}/commit/{}",
            self.endpoint,
            self.repo,
            urlencoding::encode(&self.revision)
        )
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> std::result::Result<Response, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;
        check_status(response, what).await
    }
}

#[async_trait]
impl RemoteRepo for HubRepo {
    async fn list_files(&self, prefix: &str) -> std::result::Result<Vec<String>, RemoteError> {
        let mut url = Some(self.tree_url(prefix));
        let mut files = Vec::new();

        while let Some(next) = url.take() {
            let response = match self.send(self.client.get(&next), "list").await {
                Ok(r) => r,
                // a prefix that does not exist lists as empty
                Err(e) if e.is_not_found() => return Ok(files),
                Err(e) => return Err(e),
            };
            url = next_page(response.headers());

            let entries: Vec<TreeEntry> = response
                .json()
                .await
                .map_err(|e| transport_error("list", e))?;
            files.extend(
                entries
                    .into_iter()
                    .filter(|e| e.entry_type == "file")
                    .map(|e| e.path),
            );
        }

        debug!(prefix, files = files.len(), "listed remote files");
        Ok(files)
    }

    async fn download(&self, path: &str) -> std::result::Result<Bytes, RemoteError> {
        let response = self.send(self.client.get(self.resolve_url(path)), "download").await?;
        response.bytes().await.map_err(|e| transport_error("download", e))
    }

    async fn create_commit(&self, message: &str, ops: &[CommitOp]) -> std::result::Result<(), RemoteError> {
        let mut body = String::new();
        push_line(&mut body, json!({"key": "header", "value": {"summary": message, "description": ""}}));
        for op in ops {
            let line = match op {
                CommitOp::Put { path, content } => json!({
                    "key": "file",
                    "value": {"path": path, "content": BASE64.encode(content), "encoding": "base64"}
                }),
                CommitOp::Delete { path } => json!({"key": "deletedFile", "value": {"path": path}}),
            };
            push_line(&mut body, line);
        }

        let request = self
            .client
            .post(self.commit_url())
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        self.send(request, "commit").await?;
        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn push_line(body: &mut String, value: serde_json::Value) {
    body.push_str(&value.to_string());
    body.push('\n');
}

/// Percent-encode each path segment, keeping the slashes.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn transport_error(what: &str, e: reqwest::Error) -> RemoteError {
    let kind = if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
        ErrorKind::Transport
    } else {
        ErrorKind::Fatal
    };
    RemoteError::new(kind, format!("{what}: {e}"))
}

async fn check_status(response: Response, what: &str) -> std::result::Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let kind = ErrorKind::from_status(status.as_u16(), retry_after(response.headers()));
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        body.truncate(cut);
    }
    Err(RemoteError::new(kind, format!("{what} failed (status={status}): {body}")))
}

/// `Retry-After` in delta-seconds form. HTTP-date hints are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// URL of the `rel="next"` entry of a `Link` header.
pub fn next_page(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (url, params) = part.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let url = url.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(url.to_string())
    })
}
