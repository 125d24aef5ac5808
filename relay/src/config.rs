//! CLI configuration.
//!
//! Precedence: CLI flag > environment variable > compiled default, expressed
//! through `clap`'s `env` attribute since this relay has no config file
//! format of its own.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Relay worker for ScreenMCP: brokers WebSocket command/response traffic
/// between controllers and devices.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Address to bind the HTTP/WebSocket listener.
    #[arg(long, env = "RELAY_LISTEN", default_value = "0.0.0.0:9090")]
    pub listen: SocketAddr,

    /// Public WebSocket URL returned by `POST /discover`.
    #[arg(long, env = "RELAY_WS_URL", default_value = "ws://127.0.0.1:9090/ws")]
    pub ws_url: String,

    /// External token verification endpoint.
    #[arg(
        long,
        env = "RELAY_AUTH_URL",
        default_value = "http://127.0.0.1:8787/api/auth/verify"
    )]
    pub auth_url: String,

    /// Shared secret required on `POST /notify` when set.
    #[arg(long, env = "RELAY_NOTIFY_SECRET")]
    pub notify_secret: Option<String>,

    /// Resume Buffer capacity — a policy knob, not a correctness parameter.
    #[arg(long, env = "RELAY_RESUME_BUFFER_SIZE", default_value_t = 256)]
    pub resume_buffer_size: usize,

    /// Seconds of inactivity before a ping is sent.
    #[arg(long, env = "RELAY_HEARTBEAT_IDLE_SECS", default_value_t = 25)]
    pub heartbeat_idle_secs: u64,

    /// Seconds to wait for a pong before counting a miss.
    #[arg(long, env = "RELAY_HEARTBEAT_TIMEOUT_SECS", default_value_t = 10)]
    pub heartbeat_timeout_secs: u64,

    /// Per-session writer queue capacity before `backpressure_exceeded`.
    #[arg(long, env = "RELAY_WRITER_QUEUE_CAPACITY", default_value_t = 64)]
    pub writer_queue_capacity: usize,

    /// Token verifier cache TTL in seconds.
    #[arg(long, env = "RELAY_AUTH_CACHE_TTL_SECS", default_value_t = 60)]
    pub auth_cache_ttl_secs: u64,

    /// Token verifier cache capacity.
    #[arg(long, env = "RELAY_AUTH_CACHE_CAPACITY", default_value_t = 1024)]
    pub auth_cache_capacity: usize,

    /// Auth handshake timeout in seconds.
    #[arg(long, env = "RELAY_AUTH_TIMEOUT_SECS", default_value_t = 10)]
    pub auth_timeout_secs: u64,
}

impl Config {
    pub fn heartbeat_idle(&self) -> Duration {
        Duration::from_secs(self.heartbeat_idle_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn auth_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_cache_ttl_secs)
    }
}
