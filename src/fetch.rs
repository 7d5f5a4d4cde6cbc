//! Remote catalog and payload transport.
//!
//! The core only needs two seams: a catalog feed that yields raw descriptor
//! blobs, and a payload source that turns a descriptor's download location
//! into archive bytes. The HTTP implementations here run over a blocking
//! client; `BackgroundFetcher` moves them onto a worker thread so the UI
//! thread never blocks and in-flight downloads stay cancellable.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptor::{AddonDescriptor, AddonIdentity};
use crate::engine::{CancelToken, EngineError, PayloadSource};

/// User agent for all launcher HTTP traffic.
const USER_AGENT: &str = "outfitter-addon-manager";

/// Catalog transport failure.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// HTTP transport problem.
    #[error("catalog fetch failed: {0}")]
    Http(String),
    /// The user cancelled mid-fetch.
    #[error("catalog fetch cancelled")]
    Cancelled,
}

/// Remote catalog collaborator: an iterable of raw descriptor documents.
/// The core never cares about the transport behind it.
pub trait CatalogFeed: Send {
    /// Fetches every descriptor blob the feed currently offers.
    fn fetch_entries(&self, cancel: &CancelToken) -> Result<Vec<Vec<u8>>, FetchError>;
}

fn http_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

/// Splits a feed index document into descriptor URLs: one per line, blank
/// lines and `#` comments ignored.
fn parse_index(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// HTTP catalog feed: an index document listing one descriptor URL per
/// line, each fetched in turn.
pub struct HttpCatalogFeed {
    index_url: String,
    client: reqwest::blocking::Client,
}

impl HttpCatalogFeed {
    /// Creates a feed rooted at an index URL.
    #[must_use]
    pub fn new(index_url: impl Into<String>) -> Self {
        Self {
            index_url: index_url.into(),
            client: http_client(),
        }
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let bytes = response
            .bytes()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl CatalogFeed for HttpCatalogFeed {
    fn fetch_entries(&self, cancel: &CancelToken) -> Result<Vec<Vec<u8>>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let index = self.get_bytes(&self.index_url)?;
        let index = String::from_utf8_lossy(&index);
        let urls = parse_index(&index);
        debug!("Catalog index lists {} descriptors", urls.len());

        let mut blobs = Vec::with_capacity(urls.len());
        for url in urls {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match self.get_bytes(&url) {
                Ok(blob) => blobs.push(blob),
                // One unreachable entry does not sink the whole catalog.
                Err(e) => warn!("Skipping catalog entry {}: {}", url, e),
            }
        }
        Ok(blobs)
    }
}

/// HTTP payload source for the installation engine.
pub struct HttpPayloadSource {
    client: reqwest::blocking::Client,
}

impl Default for HttpPayloadSource {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpPayloadSource {
    /// Creates a payload source with a fresh client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl PayloadSource for HttpPayloadSource {
    fn fetch(
        &self,
        descriptor: &AddonDescriptor,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let failed = |reason: String| EngineError::DownloadFailed {
            identity: descriptor.identity.clone(),
            reason,
        };
        let response = self
            .client
            .get(&descriptor.download_url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;
        let bytes = response.bytes().map_err(|e| failed(e.to_string()))?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(bytes.to_vec())
    }
}

/// Result of a background fetch operation.
#[derive(Debug)]
pub enum FetchResult {
    /// Raw catalog blobs, ready for the registry to ingest.
    Catalog(Vec<Vec<u8>>),
    /// One addon's payload archive.
    Payload {
        /// Addon the payload belongs to.
        identity: AddonIdentity,
        /// The archive bytes.
        bytes: Vec<u8>,
    },
    /// Catalog fetch failed.
    CatalogError(FetchError),
    /// Payload fetch failed.
    PayloadError(EngineError),
}

/// Request for a background fetch operation, carrying its own cancel token.
enum FetchRequest {
    Catalog(CancelToken),
    Payload(Box<AddonDescriptor>, CancelToken),
}

/// Status of the background fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherStatus {
    /// Idle, no operation in progress.
    Idle,
    /// Fetching the remote catalog.
    FetchingCatalog,
    /// Downloading an addon payload.
    FetchingPayload,
}

/// Runs catalog and payload fetches on a dedicated thread.
///
/// Requests are queued over a channel; results come back through
/// `poll_result()`, which never blocks. Each request gets its own
/// `CancelToken`, returned to the caller: cancelling it stops that one
/// transfer without touching later requests. The engine's staging
/// discipline guarantees a cancelled download leaves nothing visible.
pub struct BackgroundFetcher {
    request_tx: Sender<FetchRequest>,
    result_rx: Receiver<FetchResult>,
    status: Arc<Mutex<FetcherStatus>>,
    _thread_handle: JoinHandle<()>,
}

impl BackgroundFetcher {
    /// Spawns the worker thread over a catalog feed.
    #[must_use]
    pub fn new(feed: Box<dyn CatalogFeed>) -> Self {
        let (request_tx, request_rx) = mpsc::channel::<FetchRequest>();
        let (result_tx, result_rx) = mpsc::channel::<FetchResult>();
        let status = Arc::new(Mutex::new(FetcherStatus::Idle));
        let status_clone = Arc::clone(&status);

        let thread_handle = thread::spawn(move || {
            info!("[FETCHER] Background thread started");
            let payload_source = HttpPayloadSource::new();
            Self::run_fetch_loop(request_rx, result_tx, status_clone, feed, payload_source);
            info!("[FETCHER] Background thread exiting");
        });

        Self {
            request_tx,
            result_rx,
            status,
            _thread_handle: thread_handle,
        }
    }

    fn run_fetch_loop(
        request_rx: Receiver<FetchRequest>,
        result_tx: Sender<FetchResult>,
        status: Arc<Mutex<FetcherStatus>>,
        feed: Box<dyn CatalogFeed>,
        payload_source: HttpPayloadSource,
    ) {
        while let Ok(request) = request_rx.recv() {
            let result = match request {
                FetchRequest::Catalog(cancel) => {
                    set_status(&status, FetcherStatus::FetchingCatalog);
                    info!("[FETCHER] Fetching remote catalog");
                    match feed.fetch_entries(&cancel) {
                        Ok(blobs) => {
                            info!("[FETCHER] Fetched {} catalog entries", blobs.len());
                            FetchResult::Catalog(blobs)
                        }
                        Err(e) => {
                            warn!("[FETCHER] Catalog fetch failed: {}", e);
                            FetchResult::CatalogError(e)
                        }
                    }
                }
                FetchRequest::Payload(descriptor, cancel) => {
                    set_status(&status, FetcherStatus::FetchingPayload);
                    info!("[FETCHER] Downloading payload for {}", descriptor.identity);
                    match payload_source.fetch(&descriptor, &cancel) {
                        Ok(bytes) => {
                            info!("[FETCHER] Downloaded {} bytes", bytes.len());
                            FetchResult::Payload {
                                identity: descriptor.identity.clone(),
                                bytes,
                            }
                        }
                        Err(e) => {
                            warn!("[FETCHER] Payload fetch failed: {}", e);
                            FetchResult::PayloadError(e)
                        }
                    }
                }
            };

            set_status(&status, FetcherStatus::Idle);
            if result_tx.send(result).is_err() {
                warn!("[FETCHER] Result channel closed, exiting");
                break;
            }
        }
    }

    /// Queues a catalog refresh. Non-blocking; poll for the result. The
    /// returned token cancels this refresh only.
    pub fn request_catalog(&self) -> CancelToken {
        let token = CancelToken::new();
        if let Err(e) = self
            .request_tx
            .send(FetchRequest::Catalog(token.clone()))
        {
            warn!("[FETCHER] Failed to queue catalog request: {}", e);
        }
        token
    }

    /// Queues a payload download. Non-blocking; poll for the result. The
    /// returned token cancels this download only.
    pub fn request_payload(&self, descriptor: AddonDescriptor) -> CancelToken {
        let token = CancelToken::new();
        if let Err(e) = self
            .request_tx
            .send(FetchRequest::Payload(Box::new(descriptor), token.clone()))
        {
            warn!("[FETCHER] Failed to queue payload request: {}", e);
        }
        token
    }

    /// Polls for a finished fetch. Never blocks.
    pub fn poll_result(&self) -> Option<FetchResult> {
        match self.result_rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                warn!("[FETCHER] Result channel disconnected");
                None
            }
        }
    }

    /// Current fetcher status.
    #[must_use]
    pub fn status(&self) -> FetcherStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(FetcherStatus::Idle)
    }

    /// True while a fetch is in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.status() != FetcherStatus::Idle
    }
}

fn set_status(status: &Arc<Mutex<FetcherStatus>>, value: FetcherStatus) {
    if let Ok(mut s) = status.lock() {
        *s = value;
    }
}
