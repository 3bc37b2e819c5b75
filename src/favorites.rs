//! Favorite channels and countries, persisted as JSON

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FavoritesError;
use crate::liveness::LivenessProber;
use crate::models::{Channel, FavoriteChannel};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Favorites {
    #[serde(default)]
    pub channels: Vec<FavoriteChannel>,
    #[serde(default)]
    pub countries: Vec<String>,
}

/// Result of re-checking every favorite channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FavoritesCheck {
    pub alive: usize,
    pub removed: usize,
}

pub struct FavoritesStore {
    path: PathBuf,
    favorites: Favorites,
}

impl FavoritesStore {
    /// Missing file means no favorites yet; a corrupt one is an error
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, FavoritesError> {
        let path = path.into();
        let favorites = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Favorites::default()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Favorites::default()
        };
        Ok(Self { path, favorites })
    }

    /// Like [`load`](Self::load) but starts empty on any error
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(path.clone()) {
            Ok(store) => store,
            Err(e) => {
                log::warn!("Ignoring unreadable favorites {}: {}", path.display(), e);
                Self {
                    path,
                    favorites: Favorites::default(),
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), FavoritesError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.favorites)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn channels(&self) -> &[FavoriteChannel] {
        &self.favorites.channels
    }

    pub fn countries(&self) -> &[String] {
        &self.favorites.countries
    }

    pub fn is_channel_fav(&self, url: &str) -> bool {
        self.favorites.channels.iter().any(|f| f.url == url)
    }

    pub fn is_country_fav(&self, country: &str) -> bool {
        self.favorites.countries.iter().any(|c| c == country)
    }

    /// Returns `false` if a channel with this URL is already a favorite
    pub fn add_channel(&mut self, channel: FavoriteChannel) -> bool {
        if self.is_channel_fav(&channel.url) {
            return false;
        }
        log::info!("Added '{}' to favorites", channel.name);
        self.favorites.channels.push(channel);
        true
    }

    pub fn remove_channel(&mut self, url: &str) -> bool {
        let before = self.favorites.channels.len();
        self.favorites.channels.retain(|f| f.url != url);
        self.favorites.channels.len() < before
    }

    pub fn add_country(&mut self, country: &str) -> bool {
        if self.is_country_fav(country) {
            return false;
        }
        self.favorites.countries.push(country.to_string());
        true
    }

    pub fn remove_country(&mut self, country: &str) -> bool {
        let before = self.favorites.countries.len();
        self.favorites.countries.retain(|c| c != country);
        self.favorites.countries.len() < before
    }

    /// Probe every favorite channel and drop the dead ones (not saved)
    pub fn verify_favorites(&mut self, prober: &LivenessProber) -> FavoritesCheck {
        let channels: Vec<Channel> = self
            .favorites
            .channels
            .iter()
            .map(|f| Channel::new(&f.name, &f.url))
            .collect();

        let alive: HashSet<String> = prober
            .probe_group(&channels, |completed, total| {
                log::debug!("Checked {}/{} favorites", completed, total);
            })
            .into_iter()
            .map(|c| c.url)
            .collect();

        let before = self.favorites.channels.len();
        self.favorites.channels.retain(|f| alive.contains(&f.url));
        let check = FavoritesCheck {
            alive: self.favorites.channels.len(),
            removed: before - self.favorites.channels.len(),
        };
        log::info!("Favorites check: {} alive, {} removed", check.alive, check.removed);
        check
    }
}
