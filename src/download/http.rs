// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP seam used by the planner and fetcher.
//!
//! The engine only talks to [`HttpClient`]; [`ReqwestClient`] is the real
//! implementation. Every HTTP response comes back as `Ok` so callers can
//! branch on the status; `Err` is reserved for transport failures.

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, RANGE};
use std::time::Duration;

use super::error::TransferError;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransferError>>;

/// Parsed `Content-Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First and last byte (inclusive); `None` for `bytes */total`
    pub range: Option<(u64, u64)>,
    /// Complete length of the resource, if known
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes 100-199/200`, `bytes 100-199/*` or `bytes */200`.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (range_part, total_part) = rest.split_once('/')?;

        let total = match total_part.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };

        let range = match range_part.trim() {
            "*" => None,
            r => {
                let (start, end) = r.split_once('-')?;
                let start: u64 = start.trim().parse().ok()?;
                let end: u64 = end.trim().parse().ok()?;
                if end < start {
                    return None;
                }
                Some((start, end))
            }
        };

        Some(Self { range, total })
    }

    pub fn start(&self) -> Option<u64> {
        self.range.map(|(start, _)| start)
    }
}

/// Result of a metadata probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl RemoteMeta {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// ETag value when it looks like a hex SHA-256 digest.
    pub fn sha256_etag(&self) -> Option<String> {
        let tag = self.etag.as_deref()?.trim_start_matches("W/").trim_matches('"');
        if tag.len() == 64 && tag.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(tag.to_ascii_lowercase())
        } else {
            None
        }
    }
}

/// Response to a GET, with the body still unread.
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub content_type: Option<String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Lightweight metadata probe (HEAD).
    async fn head(&self, url: &str) -> Result<RemoteMeta, TransferError>;

    /// GET starting at `offset`; sends `Range: bytes=<offset>-` when non-zero.
    async fn get(&self, url: &str, offset: u64) -> Result<HttpResponse, TransferError>;
}

/// [`HttpClient`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    /// Limit on connecting and on waiting for response headers.
    timeout: Duration,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("castfetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, timeout })
    }

    /// Shared reqwest client, reused by the feed fetcher.
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn head(&self, url: &str) -> Result<RemoteMeta, TransferError> {
        let response = self
            .client
            .head(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let headers = response.headers();
        Ok(RemoteMeta {
            status: response.status().as_u16(),
            content_length: header_u64(headers, CONTENT_LENGTH.as_str()),
            content_type: header_string(headers, CONTENT_TYPE.as_str()),
            etag: header_string(headers, ETAG.as_str()),
        })
    }

    async fn get(&self, url: &str, offset: u64) -> Result<HttpResponse, TransferError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        // A request-level timeout would also cap the body; only the wait for
        // headers is bounded here, the fetcher bounds each body read.
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| TransferError::transient(format!("no response within {:?}", self.timeout)))?
            .map_err(classify_reqwest_error)?;

        let headers = response.headers();
        let status = response.status().as_u16();
        let content_length = header_u64(headers, CONTENT_LENGTH.as_str());
        let content_range = header_string(headers, CONTENT_RANGE.as_str())
            .and_then(|v| ContentRange::parse(&v));
        let content_type = header_string(headers, CONTENT_TYPE.as_str());

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(classify_reqwest_error))
            .boxed();

        Ok(HttpResponse {
            status,
            content_length,
            content_range,
            content_type,
            body,
        })
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_string(headers, name).and_then(|v| v.parse().ok())
}

/// Transport errors are transient unless the request itself was malformed.
fn classify_reqwest_error(e: reqwest::Error) -> TransferError {
    if e.is_builder() || e.is_redirect() {
        return TransferError::permanent(e.to_string());
    }
    if let Some(status) = e.status() {
        let mut err = TransferError::from_status(status.as_u16());
        if let TransferError::Transient { message, .. } | TransferError::Permanent { message, .. } = &mut err {
            *message = e.to_string();
        }
        return err;
    }
    TransferError::transient(e.to_string())
}
