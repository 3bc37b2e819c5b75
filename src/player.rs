//! Playback through an external media player process

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::thread;

use crate::error::PlayerError;
use crate::models::FoundStream;

pub const DEFAULT_PLAYER: &str = "mpv";

/// What to play and which headers the stream host expects
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaybackRequest {
    pub url: String,
    pub title: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl PlaybackRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl From<&FoundStream> for PlaybackRequest {
    fn from(stream: &FoundStream) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            url: stream.url.clone(),
            title: None,
            user_agent: non_empty(&stream.user_agent),
            referer: non_empty(&stream.referer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loaded,
    Playing,
    Stopped,
    /// Player process exited on its own
    Ended { code: Option<i32> },
}

/// Playback collaborator the front end talks to
pub trait MediaEngine {
    fn load(&mut self, request: PlaybackRequest) -> Result<(), PlayerError>;
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self) -> Result<(), PlayerError>;
    fn stop(&mut self);
    /// 0..=100, applied on the next `play`
    fn set_volume(&mut self, volume: u8);
    fn set_mute(&mut self, muted: bool);
    fn state(&mut self) -> PlaybackState;
    fn fps(&self) -> Option<f64>;
    fn bytes_read(&self) -> Option<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerKind {
    Mpv,
    Vlc,
    Generic,
}

impl PlayerKind {
    fn detect(player: &str) -> Self {
        let lower = player.to_lowercase();
        if lower.contains("mpv") || lower.contains("celluloid") {
            PlayerKind::Mpv
        } else if lower.contains("vlc") {
            PlayerKind::Vlc
        } else {
            PlayerKind::Generic
        }
    }
}

pub struct ExternalPlayer {
    player: String,
    volume: u8,
    muted: bool,
    request: Option<PlaybackRequest>,
    child: Option<Child>,
    state: PlaybackState,
}

impl ExternalPlayer {
    /// Empty `player` means [`DEFAULT_PLAYER`]
    pub fn new(player: &str) -> Self {
        let player = match player.trim() {
            "" => DEFAULT_PLAYER.to_string(),
            p => p.to_string(),
        };
        Self {
            player,
            volume: 100,
            muted: false,
            request: None,
            child: None,
            state: PlaybackState::Idle,
        }
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    /// Block until the player process exits
    pub fn wait(&mut self) -> PlaybackState {
        if let Some(mut child) = self.child.take() {
            match child.wait() {
                Ok(status) => self.state = PlaybackState::Ended { code: status.code() },
                Err(e) => {
                    log::warn!("Failed to wait for player: {}", e);
                    self.state = PlaybackState::Stopped;
                }
            }
        }
        self.state
    }

    fn args(&self, request: &PlaybackRequest) -> Vec<String> {
        build_args(PlayerKind::detect(&self.player), request, self.volume, self.muted)
    }
}

fn build_args(kind: PlayerKind, request: &PlaybackRequest, volume: u8, muted: bool) -> Vec<String> {
    let mut args = vec![request.url.clone()];
    match kind {
        PlayerKind::Mpv => {
            if let Some(ua) = &request.user_agent {
                args.push(format!("--user-agent={}", ua));
            }
            if let Some(referer) = &request.referer {
                args.push(format!("--referrer={}", referer));
            }
            if let Some(title) = &request.title {
                args.push(format!("--force-media-title={}", title));
            }
            args.push(format!("--volume={}", volume));
            if muted {
                args.push("--mute=yes".to_string());
            }
        }
        PlayerKind::Vlc => {
            if let Some(ua) = &request.user_agent {
                args.push(format!("--http-user-agent={}", ua));
            }
            if let Some(referer) = &request.referer {
                args.push(format!("--http-referrer={}", referer));
            }
            if let Some(title) = &request.title {
                args.push(format!("--meta-title={}", title));
            }
            args.push("--http-reconnect".to_string());
            if muted {
                args.push("--no-audio".to_string());
            }
        }
        PlayerKind::Generic => {}
    }
    args
}

impl MediaEngine for ExternalPlayer {
    fn load(&mut self, request: PlaybackRequest) -> Result<(), PlayerError> {
        self.stop();
        log::info!("Loaded {}", request.url);
        self.request = Some(request);
        self.state = PlaybackState::Loaded;
        Ok(())
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        let request = self.request.clone().ok_or(PlayerError::NotLoaded)?;
        // One window at a time
        self.stop();

        let mut cmd = Command::new(&self.player);
        cmd.args(self.args(&request));
        if let Some(ua) = &request.user_agent {
            cmd.env("USER_AGENT", ua);
        }
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| PlayerError::Spawn {
            player: self.player.clone(),
            source,
        })?;
        log::info!("Player launched: {} (PID: {})", self.player, child.id());

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        log::debug!("[player] {}", line);
                    }
                }
            });
        }

        self.child = Some(child);
        self.state = PlaybackState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), PlayerError> {
        Err(PlayerError::Unsupported("pause"))
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
            self.state = PlaybackState::Stopped;
        }
    }

    fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
    }

    fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn state(&mut self) -> PlaybackState {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if !status.success() {
                        log::warn!("Player exited with code {:?}", status.code());
                    }
                    self.child = None;
                    self.state = PlaybackState::Ended { code: status.code() };
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to query player: {}", e),
            }
        }
        self.state
    }

    fn fps(&self) -> Option<f64> {
        None
    }

    fn bytes_read(&self) -> Option<u64> {
        None
    }
}
