use crate::error::{PacError, Result};
use crate::models::ProxyProtocol;
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_GEONODE_URL: &str = "http://proxylist.geonode.com/api/proxy-list?limit=50&page=1&sort_by=speed&sort_type=asc&protocols=http";
const DEFAULT_PROXYSCRAPE_URL: &str =
    "https://api.proxyscrape.com/v2/?request=getproxies&protocol=http&timeout=10000&country=all";
const DEFAULT_PROBE_URL: &str = "http://www.gstatic.com/generate_204";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream proxy list sources
    pub sources: SourcesConfig,
    /// Liveness probe configuration
    pub probe: ProbeConfig,
    /// Output artifact configuration
    pub output: OutputConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct SourcesConfig {
    /// Geonode JSON API endpoint (empty = disabled)
    pub geonode_url: Option<String>,
    /// ProxyScrape plain-text endpoint (empty = disabled)
    pub proxyscrape_url: Option<String>,
    /// Additional plain-text lists as (protocol, url)
    pub extra_lists: Vec<PlainListConfig>,
    /// Timeout for each source request
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainListConfig {
    pub protocol: ProxyProtocol,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// URL requested through every proxy (must be http://)
    pub url: String,
    /// Status code the probe URL is expected to answer with
    pub expected_status: u16,
    /// Timeout for a single probe attempt
    pub timeout: Duration,
    /// Maximum attempts per proxy
    pub max_attempts: u32,
    /// Fixed sleep between failed attempts
    pub backoff: Duration,
    /// Maximum in-flight probes
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Destination of the PAC file ("-" = stdout)
    pub path: String,
    /// Maximum number of proxies in the chain
    pub max_proxies: usize,
    /// Leave the artifact untouched when no proxy is live
    pub require_proxies: bool,
    /// Global safety timeout for the whole run
    pub run_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl LogConfig {
    /// Infallible; read before the rest of the configuration
    pub fn from_env() -> Self {
        Self {
            level: get_env_or("LOG_LEVEL", "info"),
            format: get_env_or("LOG_FORMAT", "pretty"),
        }
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            sources: SourcesConfig {
                geonode_url: optional_url("PACGEN_GEONODE_URL", DEFAULT_GEONODE_URL),
                proxyscrape_url: optional_url("PACGEN_PROXYSCRAPE_URL", DEFAULT_PROXYSCRAPE_URL),
                extra_lists: parse_extra_sources(&get_env_or("PACGEN_EXTRA_SOURCES", ""))?,
                fetch_timeout: Duration::from_secs(parse_env("PACGEN_FETCH_TIMEOUT_SECS", 15)?),
            },
            probe: ProbeConfig {
                url: get_env_or("PACGEN_PROBE_URL", DEFAULT_PROBE_URL),
                expected_status: parse_env("PACGEN_PROBE_EXPECTED_STATUS", 204)?,
                timeout: Duration::from_millis(parse_env("PACGEN_PROBE_TIMEOUT_MS", 5000)?),
                max_attempts: parse_env("PACGEN_PROBE_ATTEMPTS", 3)?,
                backoff: Duration::from_millis(parse_env("PACGEN_PROBE_BACKOFF_MS", 500)?),
                concurrency: parse_env("PACGEN_PROBE_CONCURRENCY", 64)?,
            },
            output: OutputConfig {
                path: get_env_or("PACGEN_OUTPUT_PATH", "dynamic.pac"),
                max_proxies: parse_env("PACGEN_MAX_PROXIES", 20)?,
                require_proxies: parse_env("PACGEN_REQUIRE_PROXIES", false)?,
                run_timeout: Duration::from_secs(parse_env("PACGEN_RUN_TIMEOUT_SECS", 300)?),
            },
            log: LogConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let probe_url = Url::parse(&self.probe.url).map_err(|e| {
            PacError::InvalidConfig(format!("PACGEN_PROBE_URL must be a valid URL: {}", e))
        })?;
        if probe_url.scheme() != "http" {
            return Err(PacError::InvalidConfig(
                "PACGEN_PROBE_URL must use the http scheme".into(),
            ));
        }
        if probe_url.host_str().is_none() {
            return Err(PacError::InvalidConfig(
                "PACGEN_PROBE_URL must include a host".into(),
            ));
        }
        if http::StatusCode::from_u16(self.probe.expected_status).is_err() {
            return Err(PacError::InvalidConfig(
                "PACGEN_PROBE_EXPECTED_STATUS must be a valid HTTP status code".into(),
            ));
        }
        if self.probe.max_attempts == 0 {
            return Err(PacError::InvalidConfig(
                "PACGEN_PROBE_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.probe.concurrency == 0 {
            return Err(PacError::InvalidConfig(
                "PACGEN_PROBE_CONCURRENCY must be at least 1".into(),
            ));
        }
        if self.probe.timeout.is_zero() {
            return Err(PacError::InvalidConfig(
                "PACGEN_PROBE_TIMEOUT_MS must be greater than zero".into(),
            ));
        }
        if self.sources.fetch_timeout.is_zero() {
            return Err(PacError::InvalidConfig(
                "PACGEN_FETCH_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }
        if self.output.run_timeout.is_zero() {
            return Err(PacError::InvalidConfig(
                "PACGEN_RUN_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }
        if self.output.path.trim().is_empty() {
            return Err(PacError::InvalidConfig(
                "PACGEN_OUTPUT_PATH must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Number of configured sources
    pub fn source_count(&self) -> usize {
        usize::from(self.sources.geonode_url.is_some())
            + usize::from(self.sources.proxyscrape_url.is_some())
            + self.sources.extra_lists.len()
    }
}

/// Parse `protocol=url` entries separated by commas
fn parse_extra_sources(raw: &str) -> Result<Vec<PlainListConfig>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (protocol, url) = entry.split_once('=').ok_or_else(|| {
                PacError::InvalidConfig(format!(
                    "PACGEN_EXTRA_SOURCES entry '{}' must look like protocol=url",
                    entry
                ))
            })?;

            let protocol = ProxyProtocol::from_str(protocol.trim()).ok_or_else(|| {
                PacError::InvalidConfig(format!(
                    "PACGEN_EXTRA_SOURCES has unsupported protocol: {}",
                    protocol.trim()
                ))
            })?;

            let url = url.trim();
            Url::parse(url).map_err(|e| {
                PacError::InvalidConfig(format!(
                    "PACGEN_EXTRA_SOURCES url '{}' is invalid: {}",
                    url, e
                ))
            })?;

            Ok(PlainListConfig {
                protocol,
                url: url.to_string(),
            })
        })
        .collect()
}

/// Read a URL variable; an explicitly empty value disables the source
fn optional_url(key: &str, default: &str) -> Option<String> {
    let value = get_env_or(key, default);
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            PacError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
