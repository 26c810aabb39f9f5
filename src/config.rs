//! Gateway configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Every key has a default so a bare
//! `cargo run` serves the web transport on port 8000.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::GatewayError;

/// Default web bind address. All interfaces, matching the usual dev-mode
/// setup; override with `LISTEN_ADDR`.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Default TCP bind address (loopback only).
pub const DEFAULT_TCP_LISTEN_ADDR: &str = "127.0.0.1:8888";

/// Client runtime assets bundled with the crate; override with `RUNTIME_DIR`.
pub const DEFAULT_RUNTIME_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/www/shared");

/// Default upper bound on a single TCP line, terminator included.
pub const DEFAULT_TCP_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Which transport the application serves sessions over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// HTTP page server plus WebSocket sessions.
    #[default]
    WebSocket,
    /// Newline-delimited text over raw TCP.
    Tcp,
}

impl FromStr for Transport {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "web" | "ws" => Ok(Self::WebSocket),
            "tcp" => Ok(Self::Tcp),
            other => Err(GatewayError::Config(format!("unknown transport {other}"))),
        }
    }
}

/// Settings for [`crate::connection::web::WebConnectionManager`].
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,
    /// Directory holding the framework's client runtime assets.
    pub runtime_dir: PathBuf,
}

/// Settings for [`crate::connection::tcp::TcpConnectionManager`].
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Socket address to bind the TCP listener to.
    pub listen_addr: SocketAddr,
    /// Lines longer than this are rejected.
    pub max_line_bytes: usize,
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Selected transport.
    pub transport: Transport,
    /// Web transport settings.
    pub web: WebConfig,
    /// TCP transport settings.
    pub tcp: TcpConfig,
    /// Log every inbound and outbound session message.
    pub debug: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            runtime_dir: PathBuf::from(DEFAULT_RUNTIME_DIR),
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            max_line_bytes: DEFAULT_TCP_MAX_LINE_BYTES,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            web: WebConfig::default(),
            tcp: TcpConfig::default(),
            debug: false,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if `TRANSPORT`, `LISTEN_ADDR` or
    /// `TCP_LISTEN_ADDR` is set but cannot be parsed.
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();

        let transport = match std::env::var("TRANSPORT") {
            Ok(value) => value.parse()?,
            Err(_) => Transport::default(),
        };

        let listen_addr = parse_addr("LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?;
        let tcp_listen_addr = parse_addr("TCP_LISTEN_ADDR", DEFAULT_TCP_LISTEN_ADDR)?;

        let runtime_dir = std::env::var("RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| WebConfig::default().runtime_dir);

        let max_line_bytes = parse_env("TCP_MAX_LINE_BYTES", DEFAULT_TCP_MAX_LINE_BYTES);
        let debug = parse_env_bool("DEBUG", false);

        Ok(Self {
            transport,
            web: WebConfig {
                listen_addr,
                runtime_dir,
            },
            tcp: TcpConfig {
                listen_addr: tcp_listen_addr,
                max_line_bytes,
            },
            debug,
        })
    }
}

fn parse_addr(key: &str, default: &str) -> Result<SocketAddr, GatewayError> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| GatewayError::Config(format!("{key}={raw}: {e}")))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn transport_parses_aliases() {
        assert_eq!("WebSocket".parse::<Transport>().ok(), Some(Transport::WebSocket));
        assert_eq!("tcp".parse::<Transport>().ok(), Some(Transport::Tcp));
        assert!("carrier-pigeon".parse::<Transport>().is_err());
    }

    #[test]
    fn defaults_match_documented_addresses() {
        let config = GatewayConfig::default();
        assert_eq!(config.transport, Transport::WebSocket);
        assert_eq!(config.web.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.tcp.listen_addr.to_string(), DEFAULT_TCP_LISTEN_ADDR);
        assert_eq!(config.tcp.max_line_bytes, DEFAULT_TCP_MAX_LINE_BYTES);
    }

    #[test]
    fn default_runtime_dir_ships_assets() {
        let dir = WebConfig::default().runtime_dir;
        assert!(dir.is_absolute());
        assert!(dir.join("weave.js").is_file());
        assert!(dir.join("weave.css").is_file());
    }

    #[test]
    fn parse_env_falls_back_on_missing_key() {
        let value: usize = parse_env("WEAVE_GATEWAY_TEST_SURELY_UNSET", 7);
        assert_eq!(value, 7);
        assert!(parse_env_bool("WEAVE_GATEWAY_TEST_SURELY_UNSET", true));
    }
}
