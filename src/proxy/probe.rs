//! Liveness probing for candidate proxies
//!
//! Every unique descriptor is probed through a bounded pool of tasks; each probe
//! makes up to `max_attempts` timed attempts and records the latency of the first
//! successful one.

use std::collections::HashSet;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::Empty;
use hyper::header::{CONNECTION, HOST, USER_AGENT};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::lookup_host;
use tokio::sync::OnceCell;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::ProbeConfig;
use crate::error::{PacError, Result};
use crate::models::{ProbeOutcome, ProxyDescriptor, ProxyProtocol};
use crate::proxy::retry::RetryPolicy;
use crate::proxy::transport::ProxyTransport;

const PROBE_USER_AGENT: &str = concat!("pacgen/", env!("CARGO_PKG_VERSION"));

/// A single liveness attempt against one proxy
#[async_trait]
pub trait Prober: Send + Sync {
    /// Succeeds only if the proxy delivered the expected response
    async fn attempt(&self, descriptor: &ProxyDescriptor) -> Result<()>;
}

/// Sends an HTTP GET for the probe URL through the proxy and checks the status
pub struct HttpProber {
    url: String,
    host: String,
    port: u16,
    host_header: String,
    path_and_query: String,
    expected_status: StatusCode,
    /// SOCKS4 needs an IPv4 destination; resolved on first use and reused
    socks4_target: OnceCell<Ipv4Addr>,
}

impl HttpProber {
    pub fn new(probe_url: &str, expected_status: u16) -> Result<Self> {
        let url = Url::parse(probe_url)
            .map_err(|e| PacError::InvalidConfig(format!("Invalid probe URL: {}", e)))?;

        if url.scheme() != "http" {
            return Err(PacError::InvalidConfig(format!(
                "Probe URL must use http, got {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| PacError::InvalidConfig("Probe URL must include a host".into()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let host_header = match url.port() {
            Some(p) => format!("{}:{}", url.host_str().unwrap_or(&host), p),
            None => url.host_str().unwrap_or(&host).to_string(),
        };

        let mut path_and_query = url.path().to_string();
        if let Some(query) = url.query() {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let expected_status = StatusCode::from_u16(expected_status).map_err(|_| {
            PacError::InvalidConfig(format!("Invalid expected status: {}", expected_status))
        })?;

        let socks4_target = match host.parse::<Ipv4Addr>() {
            Ok(ip) => OnceCell::new_with(Some(ip)),
            Err(_) => OnceCell::new(),
        };

        Ok(Self {
            url: url.to_string(),
            socks4_target,
            host,
            port,
            host_header,
            path_and_query,
            expected_status,
        })
    }

    async fn socks4_target(&self) -> Result<Ipv4Addr> {
        let ip = self
            .socks4_target
            .get_or_try_init(|| async {
                lookup_host((self.host.as_str(), self.port))
                    .await
                    .map_err(|e| {
                        PacError::ProxyConnectionFailed(format!(
                            "Failed to resolve probe host {}: {}",
                            self.host, e
                        ))
                    })?
                    .find_map(|addr| match addr {
                        SocketAddr::V4(v4) => Some(*v4.ip()),
                        SocketAddr::V6(_) => None,
                    })
                    .ok_or_else(|| {
                        PacError::ProxyConnectionFailed(format!(
                            "No IPv4 address for probe host {}",
                            self.host
                        ))
                    })
            })
            .await?;

        Ok(*ip)
    }

    fn build_request(&self, absolute_form: bool) -> Result<Request<Empty<Bytes>>> {
        let target = if absolute_form {
            self.url.as_str()
        } else {
            self.path_and_query.as_str()
        };

        Request::builder()
            .method(Method::GET)
            .uri(target)
            .header(HOST, &self.host_header)
            .header(USER_AGENT, PROBE_USER_AGENT)
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| PacError::Http(format!("Failed to build probe request: {}", e)))
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn attempt(&self, descriptor: &ProxyDescriptor) -> Result<()> {
        let route = if descriptor.protocol() == ProxyProtocol::Socks4 {
            let target = self.socks4_target().await?.to_string();
            ProxyTransport::open(descriptor, &target, self.port).await?
        } else {
            ProxyTransport::open(descriptor, &self.host, self.port).await?
        };
        let request = self.build_request(route.absolute_form)?;

        let io = TokioIo::new(route.stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| PacError::ProxyConnectionFailed(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Probe connection ended: {}", e);
            }
        });

        let response = sender.send_request(request).await?;
        let status = response.status();

        if status != self.expected_status {
            return Err(PacError::UnexpectedStatus {
                expected: self.expected_status.as_u16(),
                actual: status.as_u16(),
            });
        }

        Ok(())
    }
}

/// Probe engine tuning
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Timeout for a single attempt
    pub attempt_timeout: Duration,
    pub retry: RetryPolicy,
    /// Maximum in-flight probes
    pub concurrency: usize,
}

impl From<&ProbeConfig> for ProbeOptions {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            attempt_timeout: config.timeout,
            retry: RetryPolicy::new(config.max_attempts, config.backoff),
            concurrency: config.concurrency,
        }
    }
}

/// Concurrent liveness tester
pub struct ProbeEngine {
    prober: Arc<dyn Prober>,
    options: ProbeOptions,
}

impl ProbeEngine {
    pub fn new(prober: Arc<dyn Prober>, options: ProbeOptions) -> Self {
        Self { prober, options }
    }

    /// Probe every descriptor and return exactly one outcome per descriptor
    ///
    /// Fails only if a probe task could not run to completion.
    #[instrument(skip(self, descriptors), fields(count = descriptors.len()))]
    pub async fn probe_all(&self, descriptors: HashSet<ProxyDescriptor>) -> Result<Vec<ProbeOutcome>> {
        let total = descriptors.len();
        let workers = self.options.concurrency.max(1);

        info!("Probing {} proxies with {} workers", total, workers);

        let joined = futures::stream::iter(descriptors)
            .map(|descriptor| {
                let prober = self.prober.clone();
                let options = self.options;
                AbortOnDrop(tokio::spawn(async move {
                    probe_descriptor(prober.as_ref(), &options, descriptor).await
                }))
            })
            .buffer_unordered(workers)
            .collect::<Vec<_>>()
            .await;

        let mut outcomes = Vec::with_capacity(total);
        for result in joined {
            let outcome = result.map_err(|e| PacError::ProbeTask(e.to_string()))?;
            outcomes.push(outcome);
        }

        let live_count = outcomes.iter().filter(|o| o.is_live()).count();
        info!(
            "Probe complete: {} live, {} dead",
            live_count,
            total.saturating_sub(live_count)
        );

        Ok(outcomes)
    }
}

/// Task handle that cancels the task when dropped
///
/// Dropping `probe_all` (e.g. on the run timeout) cancels outstanding probes.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the retry loop for one descriptor
async fn probe_descriptor(
    prober: &dyn Prober,
    options: &ProbeOptions,
    descriptor: ProxyDescriptor,
) -> ProbeOutcome {
    let attempt_timeout = options.attempt_timeout;
    let target = &descriptor;

    let outcome = options
        .retry
        .run(move |attempt| async move {
            let start = Instant::now();
            match timeout(attempt_timeout, prober.attempt(target)).await {
                Ok(Ok(())) => Ok(start.elapsed()),
                Ok(Err(e)) => {
                    debug!(proxy = %target, attempt, error = %e, "Probe attempt failed");
                    Err(e)
                }
                Err(_) => {
                    debug!(proxy = %target, attempt, "Probe attempt timed out");
                    Err(PacError::Timeout)
                }
            }
        })
        .await;

    match outcome.result {
        Ok(latency) => {
            debug!(
                proxy = %descriptor,
                latency_ms = latency.as_millis() as u64,
                attempts = outcome.attempts,
                "Proxy is live"
            );
            ProbeOutcome::live(descriptor, latency, outcome.attempts)
        }
        Err(e) => {
            debug!(proxy = %descriptor, attempts = outcome.attempts, error = %e, "Proxy is dead");
            ProbeOutcome::dead(descriptor, outcome.attempts)
        }
    }
}
