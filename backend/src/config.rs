use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    pub persist_path: Option<PathBuf>,
    /// Messages buffered per chat connection before it is dropped as unresponsive.
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: None,
            persist_path: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("HOST")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.host),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: env::var("CORS_ORIGINS")
                .ok()
                .and_then(|v| parse_origins(&v)),
            persist_path: env::var("PERSIST_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            queue_capacity: env::var("CHAT_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.queue_capacity),
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// `*` (or nothing usable) means any origin.
fn parse_origins(raw: &str) -> Option<Vec<String>> {
    let origins: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        None
    } else {
        Some(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_origins_mean_any() {
        assert_eq!(parse_origins("*"), None);
        assert_eq!(parse_origins(" , "), None);
        assert_eq!(parse_origins("https://a.test,*"), None);
    }

    #[test]
    fn origin_list_is_trimmed() {
        assert_eq!(
            parse_origins("https://a.test, https://b.test "),
            Some(vec!["https://a.test".to_string(), "https://b.test".to_string()])
        );
    }

    #[test]
    fn default_bind_addr_parses() {
        let addr = Config::default().bind_addr().unwrap();
        assert_eq!(addr.port(), 8000);
    }
}
