//! Stream liveness probing: HEAD fast path, streaming GET fallback

use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::catalog::{CatalogStore, SharedCatalog};
use crate::error::TransportError;
use crate::models::Channel;

/// Statuses at or above this count as unreachable
const ERROR_STATUS: u16 = 400;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub head_timeout: Duration,
    pub get_timeout: Duration,
    /// Concurrent probes when checking a whole group
    pub workers: usize,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            head_timeout: Duration::from_millis(2500),
            get_timeout: Duration::from_millis(3500),
            workers: 20,
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// HTTP operations the prober needs. Both return the final status code.
pub trait ProbeTransport: Send + Sync {
    /// HEAD request, redirects followed
    fn head(&self, url: &str) -> Result<u16, TransportError>;
    /// GET that returns as soon as the response headers arrive; the body is never read
    fn get_status(&self, url: &str) -> Result<u16, TransportError>;
}

/// ureq-backed transport with one agent per stage timeout
#[derive(Clone)]
pub struct UreqTransport {
    head_agent: ureq::Agent,
    get_agent: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            head_agent: Self::create_agent(config.head_timeout),
            get_agent: Self::create_agent(config.get_timeout),
            user_agent: config.user_agent.clone(),
        }
    }

    fn create_agent(timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .max_idle_connections(32)
            .max_idle_connections_per_host(2)
            .build()
            .new_agent()
    }
}

impl ProbeTransport for UreqTransport {
    fn head(&self, url: &str) -> Result<u16, TransportError> {
        let response = self
            .head_agent
            .head(url)
            .header("User-Agent", &self.user_agent)
            .call()?;
        Ok(response.status().as_u16())
    }

    fn get_status(&self, url: &str) -> Result<u16, TransportError> {
        let response = self
            .get_agent
            .get(url)
            .header("User-Agent", &self.user_agent)
            .call()?;
        // Dropping the response closes the connection without reading the body
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Head,
    Get,
}

/// Result of a single probe, keeping why each stage failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable { stage: ProbeStage, status: u16 },
    Unreachable { head: TransportError, get: TransportError },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }
}

/// Counts from verifying one catalog group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVerification {
    pub total: usize,
    pub alive: usize,
    pub removed: usize,
}

/// Messages from a background group verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeEvent {
    Progress { completed: usize, total: usize },
    Finished(GroupVerification),
    MissingGroup(String),
}

pub struct LivenessProber {
    config: ProbeConfig,
    transport: Arc<dyn ProbeTransport>,
}

impl LivenessProber {
    pub fn new(config: ProbeConfig) -> Self {
        let transport = Arc::new(UreqTransport::new(&config));
        Self { config, transport }
    }

    pub fn with_transport(config: ProbeConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// HEAD first; only if that fails or returns an error status, try a GET.
    /// One attempt per stage, no retries.
    pub fn check(&self, url: &str) -> ProbeOutcome {
        let head = match self.transport.head(url) {
            Ok(status) if status < ERROR_STATUS => {
                return ProbeOutcome::Reachable {
                    stage: ProbeStage::Head,
                    status,
                }
            }
            Ok(status) => TransportError::Status(status),
            Err(e) => e,
        };

        let get = match self.transport.get_status(url) {
            Ok(status) if status < ERROR_STATUS => {
                return ProbeOutcome::Reachable {
                    stage: ProbeStage::Get,
                    status,
                }
            }
            Ok(status) => TransportError::Status(status),
            Err(e) => e,
        };

        ProbeOutcome::Unreachable { head, get }
    }

    pub fn probe(&self, url: &str) -> bool {
        let outcome = self.check(url);
        log::debug!("Probe {} -> {:?}", url, outcome);
        outcome.is_reachable()
    }

    /// Probe a single URL on a worker thread
    pub fn probe_in_background(self: &Arc<Self>, url: &str) -> Receiver<ProbeOutcome> {
        let (sender, receiver) = channel();
        let prober = self.clone();
        let url = url.to_string();
        thread::spawn(move || {
            let _ = sender.send(prober.check(&url));
        });
        receiver
    }

    /// Probe every channel on a bounded worker pool.
    ///
    /// `on_progress(completed, total)` runs on the calling thread after each
    /// completion, in completion order. Returns the reachable channels in
    /// their original order.
    pub fn probe_group<F>(&self, channels: &[Channel], mut on_progress: F) -> Vec<Channel>
    where
        F: FnMut(usize, usize),
    {
        let total = channels.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.config.workers.clamp(1, total);
        let jobs = Mutex::new(channels.iter().enumerate());
        let (sender, receiver) = channel::<(usize, bool)>();
        let mut alive = vec![false; total];

        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let jobs = &jobs;
                scope.spawn(move || loop {
                    let next = match jobs.lock() {
                        Ok(mut iter) => iter.next(),
                        Err(_) => None,
                    };
                    let Some((idx, chan)) = next else { break };
                    if sender.send((idx, self.probe(&chan.url))).is_err() {
                        break;
                    }
                });
            }
            drop(sender);

            let mut completed = 0;
            for (idx, ok) in receiver.iter() {
                alive[idx] = ok;
                completed += 1;
                on_progress(completed, total);
            }
        });

        channels
            .iter()
            .zip(alive)
            .filter_map(|(chan, ok)| ok.then(|| chan.clone()))
            .collect()
    }

    /// Probe a catalog group and keep only its reachable channels.
    ///
    /// Returns `None` if the group does not exist.
    pub fn verify_group<F>(
        &self,
        store: &mut CatalogStore,
        group: &str,
        on_progress: F,
    ) -> Option<GroupVerification>
    where
        F: FnMut(usize, usize),
    {
        let channels = store.group(group)?.to_vec();
        let alive = self.probe_group(&channels, on_progress);
        let summary = GroupVerification {
            total: channels.len(),
            alive: alive.len(),
            removed: channels.len() - alive.len(),
        };
        store.replace_group(group, alive);
        log::info!(
            "Verified '{}': {} online, {} removed",
            group,
            summary.alive,
            summary.removed
        );
        Some(summary)
    }

    /// Verify a group of a shared catalog on a worker thread.
    ///
    /// The catalog is locked only to snapshot the group and to write the
    /// survivors back, not while probing.
    pub fn verify_group_in_background(
        self: &Arc<Self>,
        shared: &SharedCatalog,
        group: &str,
    ) -> Receiver<ProbeEvent> {
        let (sender, receiver) = channel();
        let prober = self.clone();
        let shared = shared.clone();
        let group = group.to_string();

        thread::spawn(move || {
            let snapshot = match shared.lock() {
                Ok(store) => store.group(&group).map(<[Channel]>::to_vec),
                Err(_) => None,
            };
            let Some(channels) = snapshot else {
                let _ = sender.send(ProbeEvent::MissingGroup(group));
                return;
            };

            let progress = sender.clone();
            let alive = prober.probe_group(&channels, |completed, total| {
                let _ = progress.send(ProbeEvent::Progress { completed, total });
            });

            let summary = GroupVerification {
                total: channels.len(),
                alive: alive.len(),
                removed: channels.len() - alive.len(),
            };
            if let Ok(mut store) = shared.lock() {
                store.replace_group(&group, alive);
            }
            log::info!(
                "Verified '{}': {} online, {} removed",
                group,
                summary.alive,
                summary.removed
            );
            let _ = sender.send(ProbeEvent::Finished(summary));
        });

        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogConfig;
    use crate::test_server::{Reply, TestServer};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Per-URL canned responses for both stages
    #[derive(Default)]
    struct MockTransport {
        head: HashMap<String, Result<u16, TransportError>>,
        get: HashMap<String, Result<u16, TransportError>>,
        forbid_get: bool,
        delay: Option<Duration>,
        get_calls: AtomicUsize,
    }

    impl MockTransport {
        fn respond(
            mut self,
            url: &str,
            head: Result<u16, TransportError>,
            get: Result<u16, TransportError>,
        ) -> Self {
            self.head.insert(url.to_string(), head);
            self.get.insert(url.to_string(), get);
            self
        }
    }

    impl ProbeTransport for MockTransport {
        fn head(&self, url: &str) -> Result<u16, TransportError> {
            if let Some(delay) = self.delay {
                // Vary completion order between workers
                thread::sleep(delay * (url.len() as u32 % 5));
            }
            self.head.get(url).cloned().unwrap_or(Err(TransportError::Timeout))
        }

        fn get_status(&self, url: &str) -> Result<u16, TransportError> {
            assert!(!self.forbid_get, "GET must not be issued for {}", url);
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            self.get.get(url).cloned().unwrap_or(Err(TransportError::Timeout))
        }
    }

    fn prober(transport: MockTransport) -> (LivenessProber, Arc<MockTransport>) {
        let transport = Arc::new(transport);
        let prober = LivenessProber::with_transport(ProbeConfig::default(), transport.clone());
        (prober, transport)
    }

    #[test]
    fn test_head_success_skips_get() {
        let transport = MockTransport {
            forbid_get: true,
            ..Default::default()
        }
        .respond("http://a/live.m3u8", Ok(200), Ok(200));
        let (prober, _) = prober(transport);

        assert!(prober.probe("http://a/live.m3u8"));
        assert_eq!(
            prober.check("http://a/live.m3u8"),
            ProbeOutcome::Reachable { stage: ProbeStage::Head, status: 200 }
        );
    }

    #[test]
    fn test_head_redirect_status_counts_as_reachable() {
        let transport = MockTransport {
            forbid_get: true,
            ..Default::default()
        }
        .respond("http://a/r.m3u8", Ok(302), Err(TransportError::Timeout));
        let (prober, _) = prober(transport);
        assert!(prober.probe("http://a/r.m3u8"));
    }

    #[test]
    fn test_head_rejected_falls_back_to_get() {
        let transport = MockTransport::default().respond(
            "http://a/nohead.m3u8",
            Ok(405),
            Ok(200),
        );
        let (prober, transport) = prober(transport);

        assert_eq!(
            prober.check("http://a/nohead.m3u8"),
            ProbeOutcome::Reachable { stage: ProbeStage::Get, status: 200 }
        );
        assert_eq!(transport.get_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_head_error_falls_back_to_get() {
        let transport = MockTransport::default().respond(
            "http://a/x.m3u8",
            Err(TransportError::Connect("reset".into())),
            Ok(206),
        );
        let (prober, _) = prober(transport);
        assert!(prober.probe("http://a/x.m3u8"));
    }

    #[test]
    fn test_both_stages_failing_is_unreachable() {
        let transport = MockTransport::default().respond(
            "http://dead/x.m3u8",
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        );
        let (prober, transport) = prober(transport);

        assert!(!prober.probe("http://dead/x.m3u8"));
        assert_eq!(
            prober.check("http://dead/x.m3u8"),
            ProbeOutcome::Unreachable {
                head: TransportError::Timeout,
                get: TransportError::Timeout,
            }
        );
        // One GET per call, no retries
        assert_eq!(transport.get_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_statuses_on_both_stages() {
        let transport = MockTransport::default().respond("http://a/404", Ok(404), Ok(403));
        let (prober, _) = prober(transport);
        assert_eq!(
            prober.check("http://a/404"),
            ProbeOutcome::Unreachable {
                head: TransportError::Status(404),
                get: TransportError::Status(403),
            }
        );
    }

    fn sample_channels(count: usize) -> Vec<Channel> {
        (0..count)
            .map(|i| Channel::new(format!("Channel {}", i), format!("http://s/{}.m3u8", i)))
            .collect()
    }

    #[test]
    fn test_probe_group_keeps_only_reachable() {
        let channels = sample_channels(45);
        let mut transport = MockTransport {
            delay: Some(Duration::from_millis(2)),
            ..Default::default()
        };
        for (i, chan) in channels.iter().enumerate() {
            transport = match i % 3 {
                0 => transport.respond(&chan.url, Ok(200), Ok(200)),
                1 => transport.respond(&chan.url, Ok(405), Ok(200)),
                _ => transport.respond(&chan.url, Err(TransportError::Timeout), Ok(500)),
            };
        }
        let (prober, _) = prober(transport);

        let mut progress = Vec::new();
        let alive = prober.probe_group(&channels, |done, total| progress.push((done, total)));

        let expected: Vec<Channel> = channels
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 3 != 2)
            .map(|(_, c)| c.clone())
            .collect();
        assert_eq!(alive, expected);
        assert_eq!(progress.len(), 45);
        for (i, (done, total)) in progress.iter().enumerate() {
            assert_eq!(*done, i + 1);
            assert_eq!(*total, 45);
        }
    }

    #[test]
    fn test_probe_empty_group() {
        let (prober, _) = prober(MockTransport::default());
        let mut calls = 0;
        assert!(prober.probe_group(&[], |_, _| calls += 1).is_empty());
        assert_eq!(calls, 0);
    }

    const GROUP: &str = r#"#EXTINF:-1 group-title="Italy",Rai 1
http://it/rai1.m3u8
#EXTINF:-1 group-title="Italy",Rai 2
http://it/rai2.m3u8
#EXTINF:-1 group-title="Italy",Rai 3
http://it/rai3.m3u8
#EXTINF:-1 group-title="Spain",La 1
http://es/la1.m3u8
"#;

    #[test]
    fn test_verify_group_prunes_catalog() {
        let transport = MockTransport::default()
            .respond("http://it/rai1.m3u8", Ok(200), Ok(200))
            .respond("http://it/rai3.m3u8", Ok(404), Ok(200));
        let (prober, _) = prober(transport);

        let mut store = CatalogStore::new(CatalogConfig::default());
        store.load_from_str(GROUP);

        let mut ticks = 0;
        let summary = prober.verify_group(&mut store, "Italy", |_, _| ticks += 1).unwrap();

        assert_eq!(summary, GroupVerification { total: 3, alive: 2, removed: 1 });
        assert_eq!(ticks, 3);
        let urls: Vec<&str> = store.group("Italy").unwrap().iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["http://it/rai1.m3u8", "http://it/rai3.m3u8"]);
        // Other groups untouched
        assert_eq!(store.group("Spain").unwrap().len(), 1);
    }

    #[test]
    fn test_verify_unknown_group() {
        let (prober, _) = prober(MockTransport::default());
        let mut store = CatalogStore::new(CatalogConfig::default());
        store.load_from_str(GROUP);
        assert!(prober.verify_group(&mut store, "Atlantis", |_, _| {}).is_none());
    }

    #[test]
    fn test_verify_group_in_background_reports_progress() {
        let transport = MockTransport::default().respond("http://es/la1.m3u8", Ok(200), Ok(200));
        let (prober, _) = prober(transport);
        let prober = Arc::new(prober);

        let mut store = CatalogStore::new(CatalogConfig::default());
        store.load_from_str(GROUP);
        let shared: SharedCatalog = Arc::new(Mutex::new(store));

        let events: Vec<ProbeEvent> = prober.verify_group_in_background(&shared, "Italy").iter().collect();
        assert_eq!(
            events.last(),
            Some(&ProbeEvent::Finished(GroupVerification { total: 3, alive: 0, removed: 3 }))
        );
        let progress = events
            .iter()
            .filter(|e| matches!(e, ProbeEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 3);
        assert_eq!(shared.lock().unwrap().group("Italy").unwrap().len(), 0);

        let missing: Vec<ProbeEvent> = prober.verify_group_in_background(&shared, "Nowhere").iter().collect();
        assert_eq!(missing, vec![ProbeEvent::MissingGroup("Nowhere".to_string())]);
    }

    #[test]
    fn test_probe_in_background() {
        let transport = MockTransport::default().respond("http://a/ok", Ok(200), Ok(200));
        let (prober, _) = prober(transport);
        let prober = Arc::new(prober);
        assert!(prober.probe_in_background("http://a/ok").recv().unwrap().is_reachable());
    }

    fn http_prober() -> LivenessProber {
        LivenessProber::new(ProbeConfig {
            user_agent: "StreamHunter-Test/1.0".to_string(),
            ..ProbeConfig::default()
        })
    }

    #[test]
    fn test_http_head_success_sends_no_get() {
        let server = TestServer::start(|_| Reply::Status(200));
        let outcome = http_prober().check(&server.url("/live.m3u8"));

        assert_eq!(outcome, ProbeOutcome::Reachable { stage: ProbeStage::Head, status: 200 });
        assert_eq!(server.methods(), vec!["HEAD"]);
        assert_eq!(server.requests()[0].user_agent, "StreamHunter-Test/1.0");
    }

    #[test]
    fn test_http_rejected_head_falls_back_to_get_without_reading_body() {
        let server = TestServer::start(|req| match req.method.as_str() {
            "HEAD" => Reply::Status(405),
            _ => Reply::Endless { content_type: "video/mp2t" },
        });

        let started = Instant::now();
        let outcome = http_prober().check(&server.url("/stream.ts"));

        assert_eq!(outcome, ProbeOutcome::Reachable { stage: ProbeStage::Get, status: 200 });
        assert_eq!(server.methods(), vec!["HEAD", "GET"]);
        // Well under the GET timeout: only the status line and headers were awaited
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_http_error_status_on_both_stages() {
        let server = TestServer::start(|_| Reply::Status(404));
        let outcome = http_prober().check(&server.url("/gone.m3u8"));

        assert_eq!(
            outcome,
            ProbeOutcome::Unreachable {
                head: TransportError::Status(404),
                get: TransportError::Status(404),
            }
        );
        assert_eq!(server.methods(), vec!["HEAD", "GET"]);
    }
}
