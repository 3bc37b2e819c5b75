//! M3U channel directory parser and playlist export

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::models::{
    CatalogIndex, Channel, FoundStream, OTHERS_GROUP, UNCATEGORIZED_GROUP, UNKNOWN_TITLE,
};

const EXTINF_TAG: &str = "#EXTINF";
const GROUP_TITLE_ATTR: &str = "group-title=\"";

/// Parse an extended M3U document into channels grouped by `group-title`.
///
/// Single forward pass: an `#EXTINF` line sets the current title and group,
/// every following non-comment line is a stream URL for that pair. Lines that
/// do not fit the pattern fall back to the `Others` / `Uncategorized` groups
/// instead of failing the parse.
pub fn parse_catalog(content: &str) -> CatalogIndex {
    let mut index = CatalogIndex::new();
    let mut current_group = UNCATEGORIZED_GROUP.to_string();
    let mut current_title = UNKNOWN_TITLE.to_string();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with(EXTINF_TAG) {
            current_title = display_name(line).to_string();
            current_group = extract_group_title(line)
                .unwrap_or(OTHERS_GROUP)
                .to_string();
        } else if !line.starts_with('#') {
            index
                .entry(current_group.clone())
                .or_default()
                .push(Channel::new(current_title.clone(), line));
        }
    }

    index
}

/// Everything after the first comma of an `#EXTINF` line
fn display_name(line: &str) -> &str {
    match line.split_once(',') {
        Some((_, name)) => name,
        None => UNKNOWN_TITLE,
    }
}

/// Value of `group-title="..."`; an unterminated value runs to end of line
fn extract_group_title(line: &str) -> Option<&str> {
    let start = line.find(GROUP_TITLE_ATTR)? + GROUP_TITLE_ATTR.len();
    let rest = &line[start..];
    match rest.find('"') {
        Some(end) => Some(&rest[..end]),
        None => Some(rest),
    }
}

/// Decode a downloaded playlist body, inflating it first if it is gzip data
pub fn decode_playlist_bytes(bytes: &[u8]) -> io::Result<String> {
    // Gzip magic number (1f 8b)
    if bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b {
        let mut decoder = GzDecoder::new(bytes);
        let mut inflated = Vec::new();
        decoder.read_to_end(&mut inflated)?;
        Ok(String::from_utf8_lossy(&inflated).into_owned())
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Write sniffed streams as an extended M3U playlist.
///
/// The stream URL doubles as the display title.
pub fn write_playlist<W: Write>(streams: &[FoundStream], mut writer: W) -> io::Result<()> {
    writeln!(writer, "#EXTM3U")?;
    for stream in streams {
        writeln!(writer, "#EXTINF:-1,{}", stream.url)?;
        writeln!(writer, "{}", stream.url)?;
    }
    writer.flush()
}

/// Export sniffed streams to a playlist file
pub fn save_playlist(streams: &[FoundStream], path: &Path) -> io::Result<()> {
    let file = fs::File::create(path)?;
    write_playlist(streams, io::BufWriter::new(file))?;
    log::info!("Saved {} stream(s) to {}", streams.len(), path.display());
    Ok(())
}
