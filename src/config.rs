use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use crate::rooms::ChannelId;

#[derive(Debug, Clone, Parser)]
#[command(name = "walkie", about = "Channel-based voice, text and media relay")]
pub struct Config {
    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Static client files served at `/`.
    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// Where uploads are written and served from (`/uploads`).
    #[arg(long, env = "UPLOADS_DIR", default_value = "public/uploads")]
    pub uploads_dir: PathBuf,

    /// Largest accepted upload, and largest socket frame.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Messages kept per channel and replayed to joiners.
    #[arg(long, env = "HISTORY_LIMIT", default_value_t = 50)]
    pub history_limit: usize,

    /// Outbound events queued per connection before new ones are dropped.
    #[arg(long, env = "OUTBOX_CAPACITY", default_value_t = 256)]
    pub outbox_capacity: usize,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            history_limit: self.history_limit,
            outbox_capacity: self.outbox_capacity.max(1),
            ..RelayConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind: IpAddr::from([0, 0, 0, 0]),
            public_dir: PathBuf::from("public"),
            uploads_dir: PathBuf::from("public/uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            history_limit: 50,
            outbox_capacity: 256,
        }
    }
}

/// Settings for the in-memory relay core.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Retention cap per channel; also the size of a joiner's history reply.
    pub history_limit: usize,
    pub outbox_capacity: usize,
    /// Channels that exist from startup, as `(id, display name)`.
    pub default_channels: Vec<(ChannelId, String)>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            outbox_capacity: 256,
            default_channels: vec![("general".into(), "General".into())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flags() {
        let parsed = Config::try_parse_from(["walkie"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.bind, default.bind);
        assert_eq!(parsed.max_upload_bytes, default.max_upload_bytes);
        assert_eq!(parsed.history_limit, default.history_limit);
        assert_eq!(parsed.outbox_capacity, default.outbox_capacity);
    }

    #[test]
    fn flags_override() {
        let config = Config::try_parse_from([
            "walkie",
            "--port",
            "8080",
            "--history-limit",
            "10",
            "--outbox-capacity",
            "0",
        ])
        .unwrap();
        assert_eq!(config.addr().port(), 8080);
        let relay = config.relay();
        assert_eq!(relay.history_limit, 10);
        assert_eq!(relay.outbox_capacity, 1);
        assert_eq!(relay.default_channels[0].0, "general");
    }
}
