//! Scripted in-process services for engine tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use stickerloop_contracts::journal::Journal;
use stickerloop_contracts::slug::slugify;

use crate::config::EngineConfig;
use crate::media::decode_data_uri;
use crate::services::{
    ChatRequest, ChatService, EngineContext, ImageFetcher, ImageGenerationRequest, ImageService,
};

pub(crate) const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

type ChatHandler = Box<dyn Fn(&ChatRequest, usize) -> Result<String> + Send + Sync>;

/// Chat stub driven by a closure that also receives the 0-based call index.
pub(crate) struct FnChat {
    handler: ChatHandler,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FnChat {
    pub(crate) fn new(
        handler: impl Fn(&ChatRequest, usize) -> Result<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn silent() -> Arc<Self> {
        Self::new(|_, _| bail!("unexpected chat call"))
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|rows| rows.clone()).unwrap_or_default()
    }
}

impl ChatService for FnChat {
    fn complete(&self, request: &ChatRequest) -> Result<String> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut rows) = self.requests.lock() {
            rows.push(request.clone());
        }
        (self.handler)(request, idx)
    }
}

/// Image stub returning `stub://<prompt-slug>/<n>`; tracks peak concurrency.
pub(crate) struct StubImages {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl StubImages {
    pub(crate) fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, false)
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(delay, false)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::build(Duration::ZERO, true)
    }

    fn build(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
            fail,
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ImageService for StubImages {
    fn generate(&self, request: &ImageGenerationRequest) -> Result<String> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            bail!("image service unavailable (503)");
        }
        Ok(format!("stub://{}/{idx}", slugify(&request.prompt)))
    }
}

/// Serves PNG magic followed by the URI, so tests can recover which image a
/// vision request carries.
pub(crate) struct StubFetcher {
    calls: AtomicUsize,
    fail_containing: Option<String>,
    fail_after: Option<usize>,
}

impl StubFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_containing: None,
            fail_after: None,
        })
    }

    pub(crate) fn failing_for(fragment: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_containing: Some(fragment.to_string()),
            fail_after: None,
        })
    }

    /// Serves the first `served` downloads, then fails every one after.
    pub(crate) fn failing_after(served: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_containing: None,
            fail_after: Some(served),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageFetcher for StubFetcher {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|served| idx >= served) {
            bail!("image download failed (410)");
        }
        if let Some(fragment) = &self.fail_containing {
            if uri.contains(fragment.as_str()) {
                bail!("image download failed (404)");
            }
        }
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(uri.as_bytes());
        Ok(bytes)
    }
}

/// URI a [`StubFetcher`] image was served from, recovered from a vision
/// request.
pub(crate) fn image_uri(request: &ChatRequest) -> Option<String> {
    let bytes = decode_data_uri(request.image_data_url()?).ok()?;
    let tail = bytes.strip_prefix(PNG_MAGIC)?;
    String::from_utf8(tail.to_vec()).ok()
}

pub(crate) fn is_score_request(request: &ChatRequest) -> bool {
    request.system_text().contains("Evaluate")
}

pub(crate) fn config(root: &Path) -> EngineConfig {
    EngineConfig::new(root)
}

pub(crate) fn context(
    root: &Path,
    text: Arc<dyn ChatService>,
    vision: Arc<dyn ChatService>,
    images: Arc<dyn ImageService>,
    fetcher: Arc<dyn ImageFetcher>,
) -> EngineContext {
    context_with(config(root), text, vision, images, fetcher)
}

pub(crate) fn context_with(
    config: EngineConfig,
    text: Arc<dyn ChatService>,
    vision: Arc<dyn ChatService>,
    images: Arc<dyn ImageService>,
    fetcher: Arc<dyn ImageFetcher>,
) -> EngineContext {
    let journal = Journal::new(config.journal_path(), "run-test");
    EngineContext::new(config, journal, text, vision, images, fetcher)
}
