// crates/playout-cli/src/config.rs
//
// ChannelConfig: the one YAML file a channel process reads at startup.
// CLI flags override individual fields (clap derive + `env` fallbacks),
// matching this pack's config-file-plus-CLI-override shape.

use std::path::Path;

use playout_core::{FedBlock, RationalFps};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub channel_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: RationalFps,
    pub sample_rate: u32,
    pub channels: u16,
    #[serde(default = "default_bitrate_bps")]
    pub bitrate_bps: u32,
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,
    /// Destination for the muxed transport stream, e.g. `/var/run/ch1.ts` or
    /// a UDS/TCP path understood by a downstream ingest. This workspace's
    /// reference sink treats it as a filesystem path.
    pub sink_path: String,
    /// Seconds of lookahead to accumulate before the first byte ships,
    /// absorbing encoder warmup bitrate spikes. `0` disables prebuffering.
    #[serde(default)]
    pub prebuffer_seconds: f64,
    /// Local TCP port the metrics text endpoint listens on.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

fn default_bitrate_bps() -> u32 {
    6_000_000
}

fn default_gop_size() -> u32 {
    60
}

fn default_metrics_port() -> u16 {
    9191
}

impl ChannelConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read config '{}': {e}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parse config '{}': {e}", path.display()))?;
        Ok(cfg)
    }
}

/// The static program this channel runs. Scheduling itself is external per
/// SPEC_FULL.md §1 — this is the minimal stand-in that lets the binary run
/// end to end without a control-plane wire protocol (an explicit Non-goal):
/// every block in the playlist is validated and enqueued once, up front.
#[derive(Debug, Clone, Deserialize)]
pub struct Playlist {
    pub blocks: Vec<FedBlock>,
}

impl Playlist {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read playlist '{}': {e}", path.display()))?;
        let playlist: Self = serde_yaml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parse playlist '{}': {e}", path.display()))?;
        Ok(playlist)
    }
}
