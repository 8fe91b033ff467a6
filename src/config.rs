// Runtime configuration.
// Values come from an optional TOML file, then environment / CLI flags on top.

use crate::coordinator::{CoordinatorSettings, DEFAULT_ERROR_BACKOFF, DEFAULT_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::peer::connection::DEFAULT_STUN_SERVER;
use crate::peer::{validate_ice_servers, CodecPreference, IceServerKind, ServerConfig};
use crate::retry::Backoff;
use crate::session::{NegotiationSettings, DEFAULT_GATHERING_TIMEOUT, DEFAULT_NEGOTIATION_TIMEOUT};
use crate::source::camera::default_device;
use crate::source::SourceSpec;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound of the poll error backoff.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMode {
    Http,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub signaling_mode: SignalingMode,
    /// Base URL of the HTTP offer/answer service.
    pub signaling_url: String,
    /// Queue backend URL, host/port/credentials included.
    pub queue_url: String,
    pub machine_id: String,
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// e.g. `video/H264`
    pub codec: Option<String>,
    pub ice_servers: Vec<ServerConfig>,
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub negotiation_timeout_ms: u64,
    /// Bound on the ICE gathering wait, inside the negotiation timeout.
    pub gathering_timeout_ms: u64,
    pub wait_for_ice: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_mode: SignalingMode::Http,
            signaling_url: "http://localhost:8888".into(),
            queue_url: "redis://127.0.0.1:6379".into(),
            machine_id: "1234".into(),
            source: SourceKind::Camera,
            device: default_device().into(),
            width: 640,
            height: 480,
            fps: 30,
            codec: None,
            ice_servers: vec![ServerConfig::stun(DEFAULT_STUN_SERVER)],
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF.as_millis() as u64,
            negotiation_timeout_ms: DEFAULT_NEGOTIATION_TIMEOUT.as_millis() as u64,
            gathering_timeout_ms: DEFAULT_GATHERING_TIMEOUT.as_millis() as u64,
            wait_for_ice: true,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("parsing {}: {}", path.display(), e)))
    }

    /// File (if given) with CLI / environment overrides applied, validated.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cli.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config("frame size must be non-zero".into()));
        }
        if self.fps == 0 {
            return Err(Error::Config("fps must be non-zero".into()));
        }
        if self.machine_id.is_empty() {
            return Err(Error::Config("machine id cannot be empty".into()));
        }
        if self.wait_for_ice && self.gathering_timeout_ms >= self.negotiation_timeout_ms {
            return Err(Error::Config(
                "gathering timeout must be shorter than the negotiation timeout".into(),
            ));
        }
        self.codec_preference()?;
        validate_ice_servers(&self.ice_servers)
    }

    pub fn codec_preference(&self) -> Result<Option<CodecPreference>> {
        self.codec
            .as_deref()
            .map(|c| c.parse::<CodecPreference>().map_err(Error::from))
            .transpose()
    }

    pub fn source_spec(&self) -> SourceSpec {
        match self.source {
            SourceKind::Camera => SourceSpec::Camera {
                device: self.device.clone(),
                width: self.width,
                height: self.height,
                fps: self.fps,
            },
            SourceKind::Synthetic => SourceSpec::Synthetic {
                width: self.width,
                height: self.height,
                fps: self.fps,
            },
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Backoff::exponential(self.reconnect_delay(), MAX_ERROR_BACKOFF, 2.0)
                .with_jitter(Duration::from_millis(250)),
            negotiation: NegotiationSettings {
                wait_for_ice: self.wait_for_ice,
                gathering_timeout: Duration::from_millis(self.gathering_timeout_ms),
                timeout: Duration::from_millis(self.negotiation_timeout_ms),
                ..Default::default()
            },
        }
    }
}

/// Answers WebRTC offers with a shared camera or synthetic video feed.
#[derive(Debug, Default, Parser)]
#[command(name = "camrelay", version)]
pub struct Cli {
    /// TOML config file; flags and environment override its values
    #[arg(long, env = "CAMRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, env = "CAMRELAY_SIGNALING_MODE")]
    pub signaling_mode: Option<SignalingMode>,

    #[arg(long, env = "CAMRELAY_SIGNALING_URL")]
    pub signaling_url: Option<String>,

    #[arg(long, env = "CAMRELAY_QUEUE_URL")]
    pub queue_url: Option<String>,

    #[arg(long, env = "CAMRELAY_MACHINE_ID")]
    pub machine_id: Option<String>,

    #[arg(long, value_enum, env = "CAMRELAY_SOURCE")]
    pub source: Option<SourceKind>,

    /// Capture device path
    #[arg(long, env = "CAMRELAY_DEVICE")]
    pub device: Option<String>,

    #[arg(long, env = "CAMRELAY_WIDTH")]
    pub width: Option<u32>,

    #[arg(long, env = "CAMRELAY_HEIGHT")]
    pub height: Option<u32>,

    #[arg(long, env = "CAMRELAY_FPS")]
    pub fps: Option<u32>,

    /// Only offer this codec, e.g. video/H264
    #[arg(long, env = "CAMRELAY_CODEC")]
    pub codec: Option<String>,

    /// STUN/TURN server URL; repeat for several. Replaces the configured list.
    #[arg(long = "ice-server", env = "CAMRELAY_ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<String>,

    /// Username for TURN servers given with --ice-server
    #[arg(long, env = "CAMRELAY_ICE_USERNAME")]
    pub ice_username: Option<String>,

    #[arg(long, env = "CAMRELAY_ICE_CREDENTIAL")]
    pub ice_credential: Option<String>,

    #[arg(long, env = "CAMRELAY_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    #[arg(long, env = "CAMRELAY_NEGOTIATION_TIMEOUT_MS")]
    pub negotiation_timeout_ms: Option<u64>,

    #[arg(long, env = "CAMRELAY_GATHERING_TIMEOUT_MS")]
    pub gathering_timeout_ms: Option<u64>,

    /// Send the answer before ICE gathering completes
    #[arg(long, env = "CAMRELAY_NO_ICE_WAIT")]
    pub no_ice_wait: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = &self.$field { config.$field = v.clone(); })*
            };
        }
        set!(
            signaling_mode,
            signaling_url,
            queue_url,
            machine_id,
            source,
            device,
            width,
            height,
            fps,
            poll_interval_ms,
            negotiation_timeout_ms,
            gathering_timeout_ms
        );
        if self.codec.is_some() {
            config.codec = self.codec.clone();
        }
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers.iter().map(|url| self.server_config(url)).collect();
        }
        if self.no_ice_wait {
            config.wait_for_ice = false;
        }
    }

    fn server_config(&self, url: &str) -> ServerConfig {
        if url.starts_with("turn:") || url.starts_with("turns:") {
            ServerConfig {
                kind: IceServerKind::Turn,
                url: url.to_string(),
                username: self.ice_username.clone(),
                credential: self.ice_credential.clone(),
            }
        } else {
            ServerConfig::stun(url)
        }
    }
}
