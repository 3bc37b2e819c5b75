//! Data models shared by the catalog, prober, sniffer and favorites

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Group used for channels seen before any `#EXTINF` line
pub const UNCATEGORIZED_GROUP: &str = "Uncategorized";
/// Group used for `#EXTINF` lines without a `group-title` attribute
pub const OTHERS_GROUP: &str = "Others";
/// Display name used for `#EXTINF` lines without a comma
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Channel entry in the directory. The owning group is the index key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub url: String,
}

impl Channel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// Copy annotated with its owning group (search results, favorites)
    pub fn with_group(&self, group: &str) -> GroupedChannel {
        GroupedChannel {
            name: self.name.clone(),
            url: self.url.clone(),
            group: group.to_string(),
        }
    }
}

/// Channel copy carrying its group name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedChannel {
    pub name: String,
    pub url: String,
    pub group: String,
}

/// Group name -> channels, in order of first appearance
pub type CatalogIndex = IndexMap<String, Vec<Channel>>;

/// Manifest request captured while sniffing a page
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FoundStream {
    pub url: String,
    /// Empty when the request carried no User-Agent header
    pub user_agent: String,
    /// Empty when the request carried no Referer header
    pub referer: String,
}

/// Favorite channel (persisted to JSON)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FavoriteChannel {
    pub name: String,
    pub url: String,
    pub group: String,
    // When this entry was added (Unix timestamp)
    #[serde(default)]
    pub added_at: i64,
}

impl From<GroupedChannel> for FavoriteChannel {
    fn from(channel: GroupedChannel) -> Self {
        Self {
            name: channel.name,
            url: channel.url,
            group: channel.group,
            added_at: chrono::Utc::now().timestamp(),
        }
    }
}
