use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_NOTIFICATION_QUEUE: usize = 256;
const DEFAULT_PAGE_SIZE: usize = 50;

/// Deployment stage the marketplace runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Local,
    Staging,
    Production,
}

impl Stage {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "test" | "ci" => Self::Staging,
            _ => Self::Local,
        }
    }
}

/// Everything the marketplace binary reads from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stage: Stage,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub marketplace: MarketplaceConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let stage = Stage::parse(&env_or("CRAFTLINK_STAGE", "local"));
        let host = env_or("CRAFTLINK_HOST", DEFAULT_HOST);
        let port = match env::var("CRAFTLINK_PORT") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            stage,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level: env_or("CRAFTLINK_LOG", DEFAULT_LOG_LEVEL),
            },
            marketplace: MarketplaceConfig {
                notification_queue_capacity: positive_var(
                    "CRAFTLINK_NOTIFICATION_QUEUE",
                    DEFAULT_NOTIFICATION_QUEUE,
                )?,
                page_size: positive_var("CRAFTLINK_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            },
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn positive_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidNumber { name, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

/// HTTP listener address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = match self.host.trim() {
            host if host.eq_ignore_ascii_case("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
            host => host.parse().map_err(|source| ConfigError::InvalidHost {
                host: self.host.clone(),
                source,
            })?,
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Tuning for the marketplace services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketplaceConfig {
    /// Notifications buffered before new ones are dropped.
    pub notification_queue_capacity: usize,
    /// Upper bound on list and feed results.
    pub page_size: usize,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            notification_queue_capacity: DEFAULT_NOTIFICATION_QUEUE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("CRAFTLINK_PORT must be a port number, got '{0}'")]
    InvalidPort(String),
    #[error("CRAFTLINK_HOST '{host}' is not an IP address or localhost")]
    InvalidHost {
        host: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: [&str; 6] = [
        "CRAFTLINK_STAGE",
        "CRAFTLINK_HOST",
        "CRAFTLINK_PORT",
        "CRAFTLINK_LOG",
        "CRAFTLINK_NOTIFICATION_QUEUE",
        "CRAFTLINK_PAGE_SIZE",
    ];

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let guard = LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for var in VARS {
            env::remove_var(var);
        }
        guard
    }

    #[test]
    fn defaults_apply_without_environment() {
        let _env = env_lock();
        let config = AppConfig::load().expect("defaults load");
        assert_eq!(config.stage, Stage::Local);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.marketplace, MarketplaceConfig::default());
        assert_eq!(
            config.server.socket_addr().expect("default host parses"),
            SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
        );
    }

    #[test]
    fn localhost_binds_loopback() {
        let _env = env_lock();
        env::set_var("CRAFTLINK_HOST", "localhost");
        env::set_var("CRAFTLINK_PORT", "4100");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(
            config.server.socket_addr().expect("localhost resolves"),
            SocketAddr::from(([127, 0, 0, 1], 4100))
        );
    }

    #[test]
    fn hostnames_other_than_localhost_are_rejected() {
        let _env = env_lock();
        env::set_var("CRAFTLINK_HOST", "craftlink.internal");
        let config = AppConfig::load().expect("config loads");
        assert!(matches!(
            config.server.socket_addr(),
            Err(ConfigError::InvalidHost { .. })
        ));
    }

    #[test]
    fn reads_marketplace_tuning() {
        let _env = env_lock();
        env::set_var("CRAFTLINK_STAGE", "production");
        env::set_var("CRAFTLINK_NOTIFICATION_QUEUE", "32");
        env::set_var("CRAFTLINK_PAGE_SIZE", "10");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.stage, Stage::Production);
        assert_eq!(config.marketplace.notification_queue_capacity, 32);
        assert_eq!(config.marketplace.page_size, 10);
    }

    #[test]
    fn rejects_bad_numbers() {
        let _env = env_lock();
        env::set_var("CRAFTLINK_PAGE_SIZE", "0");
        match AppConfig::load() {
            Err(ConfigError::InvalidNumber { name, .. }) => assert_eq!(name, "CRAFTLINK_PAGE_SIZE"),
            other => panic!("expected invalid number, got {other:?}"),
        }

        env::remove_var("CRAFTLINK_PAGE_SIZE");
        env::set_var("CRAFTLINK_PORT", "http");
        assert!(matches!(AppConfig::load(), Err(ConfigError::InvalidPort(_))));
    }
}
