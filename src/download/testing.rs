// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory media server used by the engine's unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::error::TransferError;
use super::http::{ContentRange, HttpClient, HttpResponse, RemoteMeta};

/// Failure injected into the next GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Respond with this status and an empty body
    Status(u16),
    /// Serve normally but break the connection after this many body bytes
    DropAfter(u64),
    /// Fail before any response arrives
    ConnectError,
}

/// Deterministic test payload.
pub fn body_of(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub struct FakeServer {
    resources: Mutex<HashMap<String, Vec<u8>>>,
    chunk_size: usize,
    honor_ranges: bool,
    partial_from_zero: bool,
    head_fails: bool,
    etag: Option<String>,
    faults: Mutex<VecDeque<Fault>>,
    requests: Mutex<Vec<(String, u64)>>,
    heads: Mutex<Vec<String>>,
}

impl FakeServer {
    pub fn new(url: &str, data: Vec<u8>) -> Self {
        let mut resources = HashMap::new();
        resources.insert(url.to_string(), data);
        Self {
            resources: Mutex::new(resources),
            chunk_size: 4096,
            honor_ranges: true,
            partial_from_zero: false,
            head_fails: false,
            etag: None,
            faults: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            heads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_resource(self, url: &str, data: Vec<u8>) -> Self {
        self.resources.lock().unwrap().insert(url.to_string(), data);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Answer range requests with 200 and the full body.
    pub fn ignoring_ranges(mut self) -> Self {
        self.honor_ranges = false;
        self
    }

    /// Answer plain GETs with `206 bytes 0-<last>/<len>` instead of 200.
    pub fn partial_from_zero(mut self) -> Self {
        self.partial_from_zero = true;
        self
    }

    /// Fail every HEAD with a transport error.
    pub fn failing_head(mut self) -> Self {
        self.head_fails = true;
        self
    }

    pub fn with_etag(mut self, etag: &str) -> Self {
        self.etag = Some(etag.to_string());
        self
    }

    /// Queue faults for the next GETs, in order.
    pub fn script(&self, faults: Vec<Fault>) {
        self.faults.lock().unwrap().extend(faults);
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        self.requests.lock().unwrap().iter().map(|(_, o)| *o).collect()
    }

    pub fn get_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn head_count(&self) -> usize {
        self.heads.lock().unwrap().len()
    }

    fn respond(&self, status: u16, range: Option<ContentRange>, payload: Vec<u8>, drop_after: Option<u64>) -> HttpResponse {
        let content_length = Some(payload.len() as u64);
        let mut chunks: Vec<Result<Bytes, TransferError>> = Vec::new();
        let limit = drop_after.map(|n| n as usize).unwrap_or(payload.len()).min(payload.len());
        for piece in payload[..limit].chunks(self.chunk_size) {
            chunks.push(Ok(Bytes::copy_from_slice(piece)));
        }
        if drop_after.is_some() {
            chunks.push(Err(TransferError::transient("connection reset by peer")));
        }

        HttpResponse {
            status,
            content_length,
            content_range: range,
            content_type: Some("audio/mpeg".into()),
            body: stream::iter(chunks).boxed(),
        }
    }
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn head(&self, url: &str) -> Result<RemoteMeta, TransferError> {
        self.heads.lock().unwrap().push(url.to_string());
        if self.head_fails {
            return Err(TransferError::transient("HEAD timed out"));
        }
        let resources = self.resources.lock().unwrap();
        Ok(match resources.get(url) {
            Some(data) => RemoteMeta {
                status: 200,
                content_length: Some(data.len() as u64),
                content_type: Some("audio/mpeg".into()),
                etag: self.etag.clone(),
            },
            None => RemoteMeta {
                status: 404,
                ..Default::default()
            },
        })
    }

    async fn get(&self, url: &str, offset: u64) -> Result<HttpResponse, TransferError> {
        self.requests.lock().unwrap().push((url.to_string(), offset));

        let fault = self.faults.lock().unwrap().pop_front();
        let drop_after = match fault {
            Some(Fault::ConnectError) => return Err(TransferError::transient("connection refused")),
            Some(Fault::Status(status)) => return Ok(self.respond(status, None, Vec::new(), None)),
            Some(Fault::DropAfter(n)) => Some(n),
            None => None,
        };

        let data = match self.resources.lock().unwrap().get(url) {
            Some(data) => data.clone(),
            None => return Ok(self.respond(404, None, Vec::new(), None)),
        };
        let len = data.len() as u64;

        if self.honor_ranges && (offset > 0 || self.partial_from_zero) {
            if offset >= len {
                let range = ContentRange { range: None, total: Some(len) };
                return Ok(self.respond(416, Some(range), Vec::new(), None));
            }
            let range = ContentRange {
                range: Some((offset, len - 1)),
                total: Some(len),
            };
            return Ok(self.respond(206, Some(range), data[offset as usize..].to_vec(), drop_after));
        }

        Ok(self.respond(200, None, data, drop_after))
    }
}
