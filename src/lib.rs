//! StreamHunter - IPTV/HLS stream discovery
//!
//! Browses the public country-grouped channel directory, checks which
//! channels still answer, and sniffs web pages for the HLS manifests their
//! embedded players request.

pub mod catalog;
pub mod config;
pub mod error;
pub mod favorites;
pub mod liveness;
pub mod m3u_parser;
pub mod models;
pub mod player;
pub mod sniffer;

#[cfg(test)]
mod test_server;

pub use catalog::{CatalogConfig, CatalogEvent, CatalogStore, SharedCatalog};
pub use config::AppConfig;
pub use error::{FavoritesError, PlayerError, SniffError, TransportError};
pub use favorites::{FavoritesCheck, FavoritesStore};
pub use liveness::{LivenessProber, ProbeConfig, ProbeEvent};
pub use models::{Channel, FavoriteChannel, FoundStream, GroupedChannel};
pub use player::{ExternalPlayer, MediaEngine, PlaybackRequest};
pub use sniffer::{SniffConfig, SniffEvent, SniffOutcome, StopHandle, StreamSniffer};
