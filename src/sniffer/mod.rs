//! Stream sniffer
//!
//! Opens a page in a headless browser, watches every outgoing request and
//! reports the ones that look like HLS/M3U manifests. One session at a time,
//! bounded observation window, cooperative cancellation.

#[cfg(feature = "chromium")]
mod chromium;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumDriver;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::SniffError;
use crate::models::FoundStream;

/// URL fragments that mark a playlist request
const MANIFEST_MARKERS: &[&str] = &[".m3u8", ".m3u"];

/// Request content types that mark a playlist request
const PLAYLIST_CONTENT_TYPES: &[&str] = &["application/vnd.apple.mpegurl", "audio/mpegurl"];

/// Chromium flags applied to every session. Site isolation is off so that
/// cross-site iframes (embedded players) share the page's DevTools session.
const BROWSER_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-features=IsolateOrigins,site-per-process",
    "--disable-site-isolation-trials",
];

#[derive(Debug, Clone)]
pub struct SniffConfig {
    pub user_agent: String,
    pub viewport: (u32, u32),
    /// Total observation time after the page is interactive
    pub window: Duration,
    /// How often the cancel flag is checked
    pub poll_interval: Duration,
    pub navigation_timeout: Duration,
    /// Pointer position for the synthetic interaction
    pub pointer: (f64, f64),
    pub chrome_executable: Option<PathBuf>,
}

impl Default for SniffConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
            viewport: (1280, 720),
            window: Duration::from_secs(15),
            poll_interval: Duration::from_secs(1),
            navigation_timeout: Duration::from_secs(30),
            pointer: (100.0, 100.0),
            chrome_executable: None,
        }
    }
}

/// Settings handed to the browser driver at launch
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub args: Vec<String>,
    pub chrome_executable: Option<PathBuf>,
}

impl LaunchOptions {
    fn from_config(config: &SniffConfig) -> Self {
        let mut args: Vec<String> = BROWSER_ARGS.iter().map(|a| a.to_string()).collect();
        args.push(format!("--user-agent={}", config.user_agent));
        Self {
            user_agent: config.user_agent.clone(),
            viewport: config.viewport,
            args,
            chrome_executable: config.chrome_executable.clone(),
        }
    }
}

/// Outgoing request seen by the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedRequest {
    pub url: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
}

impl ObservedRequest {
    pub fn new<I, K, V>(url: impl Into<String>, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            url: url.into(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Manifest extension in the URL, or a playlist content type
    pub fn is_manifest(&self) -> bool {
        if MANIFEST_MARKERS.iter().any(|m| self.url.contains(m)) {
            return true;
        }
        let content_type = self.header("content-type").unwrap_or("");
        PLAYLIST_CONTENT_TYPES
            .iter()
            .any(|t| content_type.contains(t))
    }

    fn to_found_stream(&self) -> FoundStream {
        FoundStream {
            url: self.url.clone(),
            user_agent: self.header("user-agent").unwrap_or_default().to_string(),
            referer: self.header("referer").unwrap_or_default().to_string(),
        }
    }
}

/// Called for every request the page makes, possibly from a browser thread
pub type RequestObserver = Arc<dyn Fn(ObservedRequest) + Send + Sync>;

/// Launches isolated browser sessions
pub trait BrowserDriver: Send + Sync {
    fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, SniffError>;
}

/// One headless browser with a single page
pub trait BrowserSession: Send {
    fn observe_requests(&mut self, observer: RequestObserver) -> Result<(), SniffError>;
    /// Returns once the DOM is ready, not after the full load
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), SniffError>;
    fn move_pointer(&mut self, x: f64, y: f64) -> Result<(), SniffError>;
    fn scroll_half_page(&mut self) -> Result<(), SniffError>;
    fn close(self: Box<Self>) -> Result<(), SniffError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffState {
    Idle,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffOutcome {
    /// Observation window elapsed
    Completed,
    Cancelled,
    Failed(SniffError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffSummary {
    pub found: usize,
    pub outcome: SniffOutcome,
}

/// Messages from a sniffing session; `Finished` is always last
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffEvent {
    Found(FoundStream),
    Finished(SniffSummary),
}

#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

type FoundCallback = Arc<dyn Fn(FoundStream) + Send + Sync>;
type FinishCallback = Box<dyn FnOnce(SniffSummary) + Send>;

pub struct StreamSniffer {
    config: SniffConfig,
    driver: Arc<dyn BrowserDriver>,
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    found: Arc<Mutex<Vec<FoundStream>>>,
}

impl StreamSniffer {
    #[cfg(feature = "chromium")]
    pub fn new(config: SniffConfig) -> Self {
        Self::with_driver(config, Arc::new(ChromiumDriver))
    }

    pub fn with_driver(config: SniffConfig, driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            config,
            driver,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            found: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn state(&self) -> SniffState {
        if self.running.load(Ordering::SeqCst) {
            SniffState::Running
        } else {
            SniffState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == SniffState::Running
    }

    /// Streams found by the current or last session, in discovery order
    pub fn found_streams(&self) -> Vec<FoundStream> {
        self.found.lock().map(|found| found.clone()).unwrap_or_default()
    }

    /// Ask the running session to wind down at its next poll tick
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Cloneable handle that stops whichever session is running, usable from
    /// a signal handler thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Start sniffing `page_url` on a worker thread.
    ///
    /// Returns `None` without touching anything if a session is already running.
    pub fn start(&self, page_url: &str) -> Option<Receiver<SniffEvent>> {
        let (sender, receiver) = channel();
        let found_sender = Mutex::new(sender.clone());

        let started = self.spawn_session(
            page_url,
            Arc::new(move |stream| {
                if let Ok(sender) = found_sender.lock() {
                    let _ = sender.send(SniffEvent::Found(stream));
                }
            }),
            Box::new(move |summary| {
                let _ = sender.send(SniffEvent::Finished(summary));
            }),
        );

        started.then_some(receiver)
    }

    /// Callback flavour of [`start`](Self::start). Both callbacks run on
    /// background threads. Returns `false` if a session is already running.
    pub fn start_with_callbacks<F, G>(&self, page_url: &str, on_found: F, on_finish: G) -> bool
    where
        F: Fn(FoundStream) + Send + Sync + 'static,
        G: FnOnce(SniffSummary) + Send + 'static,
    {
        self.spawn_session(page_url, Arc::new(on_found), Box::new(on_finish))
    }

    fn spawn_session(&self, page_url: &str, on_found: FoundCallback, on_finish: FinishCallback) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Sniffer already running, ignoring {}", page_url);
            return false;
        }

        if let Ok(mut found) = self.found.lock() {
            found.clear();
        }
        self.cancel.store(false, Ordering::SeqCst);

        let session = Session {
            config: self.config.clone(),
            driver: self.driver.clone(),
            cancel: self.cancel.clone(),
            found: self.found.clone(),
            page_url: page_url.to_string(),
        };
        let running = self.running.clone();

        thread::spawn(move || {
            let found = session.found.clone();
            let outcome = session.run(on_found);
            running.store(false, Ordering::SeqCst);

            let summary = SniffSummary {
                found: found.lock().map(|f| f.len()).unwrap_or(0),
                outcome,
            };
            log::info!("Sniffing finished: {} stream(s), {:?}", summary.found, summary.outcome);
            on_finish(summary);
        });

        true
    }
}

/// State moved onto the sniffing thread
struct Session {
    config: SniffConfig,
    driver: Arc<dyn BrowserDriver>,
    cancel: Arc<AtomicBool>,
    found: Arc<Mutex<Vec<FoundStream>>>,
    page_url: String,
}

impl Session {
    fn run(&self, on_found: FoundCallback) -> SniffOutcome {
        let options = LaunchOptions::from_config(&self.config);
        let mut browser = match self.driver.launch(&options) {
            Ok(browser) => browser,
            Err(e) => {
                log::warn!("Browser launch failed: {}", e);
                return SniffOutcome::Failed(e);
            }
        };

        let outcome = match self.observe(browser.as_mut(), on_found) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Extraction error on {}: {}", self.page_url, e);
                SniffOutcome::Failed(e)
            }
        };

        if let Err(e) = browser.close() {
            log::debug!("Ignoring browser close error: {}", e);
        }
        outcome
    }

    fn observe(&self, browser: &mut dyn BrowserSession, on_found: FoundCallback) -> Result<SniffOutcome, SniffError> {
        let found = self.found.clone();
        browser.observe_requests(Arc::new(move |request: ObservedRequest| {
            if !request.is_manifest() {
                return;
            }
            let stream = {
                let Ok(mut found) = found.lock() else { return };
                if found.iter().any(|s| s.url == request.url) {
                    return;
                }
                let stream = request.to_found_stream();
                found.push(stream.clone());
                stream
            };
            log::info!("Found stream: {}", stream.url);
            on_found(stream);
        }))?;

        log::info!("Navigating to {}...", self.page_url);
        browser.navigate(&self.page_url, self.config.navigation_timeout)?;

        // Some players only request their manifest after user interaction
        let (x, y) = self.config.pointer;
        browser.move_pointer(x, y)?;
        browser.scroll_half_page()?;

        let mut watched = Duration::ZERO;
        while watched < self.config.window {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(SniffOutcome::Cancelled);
            }
            thread::sleep(self.config.poll_interval);
            watched += self.config.poll_interval;
        }
        Ok(SniffOutcome::Completed)
    }
}
