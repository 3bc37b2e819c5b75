//! Channel directory: download, grouped index, search and removal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::TransportError;
use crate::m3u_parser::{decode_playlist_bytes, parse_catalog};
use crate::models::{CatalogIndex, Channel, GroupedChannel};

/// Worldwide live-TV directory, grouped by country
pub const DEFAULT_CATALOG_URL: &str = "https://iptv-org.github.io/iptv/index.country.m3u";

// The country index is several MB; ureq's default body limit is 10MB
const MAX_PLAYLIST_BYTES: u64 = 64 * 1024 * 1024;

/// Catalog shared between the caller and a background fetch
pub type SharedCatalog = Arc<Mutex<CatalogStore>>;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CATALOG_URL.to_string(),
            timeout: Duration::from_secs(15),
            user_agent: crate::config::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Where the playlist document comes from
pub trait CatalogSource: Send + Sync {
    fn fetch_playlist(&self, config: &CatalogConfig) -> Result<String, TransportError>;
}

/// Plain HTTP(S) GET of the playlist document
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpCatalogSource;

impl CatalogSource for HttpCatalogSource {
    fn fetch_playlist(&self, config: &CatalogConfig) -> Result<String, TransportError> {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();

        let mut response = agent
            .get(&config.url)
            .header("User-Agent", &config.user_agent)
            .call()?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_PLAYLIST_BYTES)
            .read_to_vec()?;

        Ok(decode_playlist_bytes(&bytes)?)
    }
}

/// Messages from a background catalog fetch
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEvent {
    Loaded { groups: usize, channels: usize },
    Failed(TransportError),
    AlreadyLoading,
}

/// In-memory grouped channel index, rebuilt from the remote directory each session
pub struct CatalogStore {
    index: CatalogIndex,
    config: CatalogConfig,
    source: Arc<dyn CatalogSource>,
    loading: Arc<AtomicBool>,
}

impl CatalogStore {
    pub fn new(config: CatalogConfig) -> Self {
        Self::with_source(config, Arc::new(HttpCatalogSource))
    }

    pub fn with_source(config: CatalogConfig, source: Arc<dyn CatalogSource>) -> Self {
        Self {
            index: CatalogIndex::new(),
            config,
            source,
            loading: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Download and parse the directory, replacing the whole index on success.
    ///
    /// On failure the previous index is left untouched. Shares the loading
    /// flag with [`fetch_in_background`](Self::fetch_in_background), so only
    /// one fetch of a store runs at a time.
    pub fn fetch(&mut self) -> Result<usize, TransportError> {
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Catalog fetch already in progress");
            return Err(TransportError::InProgress);
        }

        log::info!("Fetching channels from {}", self.config.url);
        let result = self.source.fetch_playlist(&self.config);
        self.loading.store(false, Ordering::SeqCst);

        let content = result.map_err(|e| {
            log::warn!("Failed to fetch channels: {}", e);
            e
        })?;
        Ok(self.load_from_str(&content))
    }

    /// Replace the index with the parse of an already downloaded document
    pub fn load_from_str(&mut self, content: &str) -> usize {
        self.index = parse_catalog(content);
        let count = self.channel_count();
        log::info!("Loaded {} channels in {} groups", count, self.index.len());
        count
    }

    /// Fetch on a worker thread; the store is locked only to swap the index in.
    pub fn fetch_in_background(shared: &SharedCatalog) -> Receiver<CatalogEvent> {
        let (sender, receiver) = channel();

        let (source, config, loading) = match shared.lock() {
            Ok(store) => (
                store.source.clone(),
                store.config.clone(),
                store.loading.clone(),
            ),
            Err(_) => {
                let _ = sender.send(CatalogEvent::Failed(TransportError::Other(
                    "catalog lock poisoned".to_string(),
                )));
                return receiver;
            }
        };

        if loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let _ = sender.send(CatalogEvent::AlreadyLoading);
            return receiver;
        }

        let shared = shared.clone();
        thread::spawn(move || {
            log::info!("Fetching channels from {}", config.url);
            let event = match source.fetch_playlist(&config) {
                Ok(content) => {
                    let index = parse_catalog(&content);
                    let groups = index.len();
                    let channels = index.values().map(Vec::len).sum();
                    match shared.lock() {
                        Ok(mut store) => {
                            store.index = index;
                            log::info!("Loaded {} channels in {} groups", channels, groups);
                            CatalogEvent::Loaded { groups, channels }
                        }
                        Err(_) => CatalogEvent::Failed(TransportError::Other(
                            "catalog lock poisoned".to_string(),
                        )),
                    }
                }
                Err(e) => {
                    log::warn!("Failed to fetch channels: {}", e);
                    CatalogEvent::Failed(e)
                }
            };
            loading.store(false, Ordering::SeqCst);
            let _ = sender.send(event);
        });

        receiver
    }

    pub fn index(&self) -> &CatalogIndex {
        &self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn channel_count(&self) -> usize {
        self.index.values().map(Vec::len).sum()
    }

    /// Group names with their channel counts, in index order
    pub fn groups(&self) -> impl Iterator<Item = (&str, usize)> {
        self.index.iter().map(|(name, chans)| (name.as_str(), chans.len()))
    }

    pub fn group(&self, name: &str) -> Option<&[Channel]> {
        self.index.get(name).map(Vec::as_slice)
    }

    /// Overwrite a group's channel list in place (keeps the group's position)
    pub fn replace_group(&mut self, name: &str, channels: Vec<Channel>) -> bool {
        match self.index.get_mut(name) {
            Some(existing) => {
                *existing = channels;
                true
            }
            None => false,
        }
    }

    /// Case-insensitive match on channel name or group name, in index order
    pub fn search(&self, query: &str) -> Vec<GroupedChannel> {
        let query = query.to_lowercase();
        let mut results = Vec::new();

        for (group, channels) in &self.index {
            let group_matches = group.to_lowercase().contains(&query);
            for chan in channels {
                if group_matches || chan.name.to_lowercase().contains(&query) {
                    results.push(chan.with_group(group));
                }
            }
        }

        results
    }

    /// Drop every channel with this URL.
    ///
    /// With a known group only that group is filtered and the result is
    /// always `true`, even if nothing matched. Without one (or with an empty
    /// or unknown group) all groups are scanned and the result reports
    /// whether anything was removed.
    pub fn remove_channel(&mut self, url: &str, group: Option<&str>) -> bool {
        let group = group.filter(|g| !g.is_empty());
        if let Some(chans) = group.and_then(|g| self.index.get_mut(g)) {
            chans.retain(|c| c.url != url);
            return true;
        }

        let mut found = false;
        for chans in self.index.values_mut() {
            let before = chans.len();
            chans.retain(|c| c.url != url);
            if chans.len() < before {
                found = true;
            }
        }
        found
    }
}
