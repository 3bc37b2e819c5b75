//! StreamHunter command line front end

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use streamhunter::models::GroupedChannel;
use streamhunter::player::PlaybackState;
use streamhunter::{
    AppConfig, CatalogStore, ExternalPlayer, FavoriteChannel, FavoritesStore, LivenessProber,
    MediaEngine, PlaybackRequest,
};

#[derive(Parser)]
#[command(name = "streamhunter")]
#[command(about = "Find live IPTV/HLS streams: browse the channel directory, check liveness, sniff pages")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse the country-grouped channel directory
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Check whether a stream URL answers
    Probe { url: String },
    /// Open a page in a headless browser and capture manifest requests
    #[cfg(feature = "chromium")]
    Sniff {
        page: String,
        /// Write the found streams to an M3U playlist
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Manage favorite channels and countries
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
    /// Play a stream with the configured external player
    Play {
        url: String,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        referer: Option<String>,
    },
    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// List groups with their channel counts
    Groups,
    /// Case-insensitive search on channel or group name
    Search { query: String },
    /// Probe every channel of a group and list the ones still online
    Verify { group: String },
}

#[derive(Subcommand)]
enum FavoritesAction {
    List,
    /// Add a channel by name from the directory
    Add {
        name: String,
        #[arg(short, long)]
        group: Option<String>,
    },
    Remove { url: String },
    AddCountry { country: String },
    RemoveCountry { country: String },
    /// Probe all favorite channels and drop the dead ones
    Verify,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Path,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = match &cli.config_file {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Catalog { action } => run_catalog(&config, action),
        Commands::Probe { url } => {
            let prober = LivenessProber::new(config.probe_config());
            let outcome = prober.check(&url);
            if outcome.is_reachable() {
                println!("ONLINE  {}", url);
            } else {
                println!("OFFLINE {} ({:?})", url, outcome);
            }
            Ok(())
        }
        #[cfg(feature = "chromium")]
        Commands::Sniff { page, export } => run_sniff(&config, &page, export),
        Commands::Favorites { action } => run_favorites(&config, action),
        Commands::Play {
            url,
            user_agent,
            referer,
        } => {
            let mut player = ExternalPlayer::new(&config.external_player);
            player.load(PlaybackRequest {
                url,
                title: None,
                user_agent,
                referer,
            })?;
            player.play()?;
            if let PlaybackState::Ended { code: Some(code) } = player.wait() {
                if code != 0 {
                    bail!("{} exited with code {}", player.player(), code);
                }
            }
            Ok(())
        }
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
                ConfigAction::Path => println!("{}", AppConfig::config_path().display()),
            }
            Ok(())
        }
    }
}

fn load_catalog(config: &AppConfig) -> Result<CatalogStore> {
    let mut store = CatalogStore::new(config.catalog_config());
    store
        .fetch()
        .with_context(|| format!("failed to load channel directory from {}", config.catalog_url))?;
    Ok(store)
}

fn print_channels(channels: &[GroupedChannel]) {
    for chan in channels {
        println!("{:<24} {:<40} {}", chan.group, chan.name, chan.url);
    }
}

fn run_catalog(config: &AppConfig, action: CatalogAction) -> Result<()> {
    let mut store = load_catalog(config)?;

    match action {
        CatalogAction::Groups => {
            for (group, count) in store.groups() {
                println!("{:<40} {}", group, count);
            }
        }
        CatalogAction::Search { query } => {
            let results = store.search(&query);
            print_channels(&results);
            println!("{} result(s)", results.len());
        }
        CatalogAction::Verify { group } => {
            let prober = LivenessProber::new(config.probe_config());
            let summary = prober
                .verify_group(&mut store, &group, |completed, total| {
                    eprint!("\rChecking {}/{}", completed, total);
                })
                .with_context(|| format!("no such group: {}", group))?;
            eprintln!();

            let online: Vec<GroupedChannel> = store
                .group(&group)
                .unwrap_or_default()
                .iter()
                .map(|c| c.with_group(&group))
                .collect();
            print_channels(&online);
            println!(
                "{} of {} online, {} removed",
                summary.alive, summary.total, summary.removed
            );
        }
    }
    Ok(())
}

#[cfg(feature = "chromium")]
fn run_sniff(config: &AppConfig, page: &str, export: Option<PathBuf>) -> Result<()> {
    use streamhunter::m3u_parser::save_playlist;
    use streamhunter::{SniffEvent, SniffOutcome, StreamSniffer};

    let sniffer = StreamSniffer::new(config.sniff_config());
    let Some(events) = sniffer.start(page) else {
        bail!("a sniffing session is already running");
    };

    // Ctrl-C winds the session down so the browser is closed and the export still runs
    let stopper = sniffer.stop_handle();
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("Ctrl-C handler unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Stopping, waiting for the browser to close...");
                stopper.stop();
            }
        });
    });

    for event in events.iter() {
        match event {
            SniffEvent::Found(stream) => {
                println!("{}", stream.url);
                if !stream.referer.is_empty() {
                    println!("    referer: {}", stream.referer);
                }
            }
            SniffEvent::Finished(summary) => {
                if let SniffOutcome::Failed(e) = &summary.outcome {
                    log::warn!("Sniffing ended early: {}", e);
                }
                println!("{} stream(s) found", summary.found);
            }
        }
    }

    if let Some(path) = export {
        let streams = sniffer.found_streams();
        save_playlist(&streams, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

fn run_favorites(config: &AppConfig, action: FavoritesAction) -> Result<()> {
    let mut favorites = FavoritesStore::load(config.favorites_file())
        .with_context(|| format!("failed to read {}", config.favorites_file().display()))?;

    match action {
        FavoritesAction::List => {
            for fav in favorites.channels() {
                println!("{:<24} {:<40} {}", fav.group, fav.name, fav.url);
            }
            for country in favorites.countries() {
                println!("[country] {}", country);
            }
            return Ok(());
        }
        FavoritesAction::Add { name, group } => {
            let store = load_catalog(config)?;
            let needle = name.to_lowercase();
            let channel = store
                .search(&name)
                .into_iter()
                .filter(|c| group.as_deref().map_or(true, |g| c.group == g))
                .find(|c| c.name.to_lowercase() == needle)
                .with_context(|| format!("no channel named '{}'", name))?;
            if !favorites.add_channel(FavoriteChannel::from(channel)) {
                println!("Already a favorite");
            }
        }
        FavoritesAction::Remove { url } => {
            if !favorites.remove_channel(&url) {
                println!("Not a favorite: {}", url);
            }
        }
        FavoritesAction::AddCountry { country } => {
            favorites.add_country(&country);
        }
        FavoritesAction::RemoveCountry { country } => {
            favorites.remove_country(&country);
        }
        FavoritesAction::Verify => {
            let prober = LivenessProber::new(config.probe_config());
            let check = favorites.verify_favorites(&prober);
            println!("{} alive, {} removed", check.alive, check.removed);
        }
    }

    favorites.save()?;
    Ok(())
}
