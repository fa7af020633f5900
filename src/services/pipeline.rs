//! One end-to-end generation run
//!
//! Fetch every source, merge, probe, rank, build the chain, then hand the
//! document to the output sink. The whole run is bounded by a global timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::config::{Config, OutputConfig};
use crate::error::{PacError, Result};
use crate::models::PacDocument;
use crate::output::{OutputSink, PacFileSink};
use crate::proxy::probe::{HttpProber, ProbeEngine, ProbeOptions};
use crate::proxy::{aggregate, rank, ChainBuilder};
use crate::sources::{self, SourceAdapter};

/// Run-level settings
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Maximum proxies in the published chain
    pub max_proxies: usize,
    /// Fail instead of publishing a direct-only chain
    pub require_proxies: bool,
    pub run_timeout: Duration,
}

impl From<&OutputConfig> for PipelineOptions {
    fn from(config: &OutputConfig) -> Self {
        Self {
            max_proxies: config.max_proxies,
            require_proxies: config.require_proxies,
            run_timeout: config.run_timeout,
        }
    }
}

/// Counters from a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub sources: usize,
    /// Candidates received before deduplication
    pub fetched: usize,
    pub unique: usize,
    pub live: usize,
    /// Proxies in the published chain
    pub published: usize,
}

pub struct Pipeline {
    sources: Vec<Arc<dyn SourceAdapter>>,
    engine: ProbeEngine,
    sink: Arc<dyn OutputSink>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        sources: Vec<Arc<dyn SourceAdapter>>,
        engine: ProbeEngine,
        sink: Arc<dyn OutputSink>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            sources,
            engine,
            sink,
            options,
        }
    }

    /// Wire up the production sources, prober and PAC file sink
    pub fn from_config(config: &Config) -> Result<Self> {
        let sources = sources::build_sources(&config.sources)?;
        let prober = HttpProber::new(&config.probe.url, config.probe.expected_status)?;
        let engine = ProbeEngine::new(Arc::new(prober), ProbeOptions::from(&config.probe));
        let sink = PacFileSink::new(&config.output.path);

        Ok(Self::new(
            sources,
            engine,
            Arc::new(sink),
            PipelineOptions::from(&config.output),
        ))
    }

    /// Execute one run under the global timeout
    pub async fn run(&self) -> Result<RunReport> {
        let secs = self.options.run_timeout.as_secs();
        tokio::time::timeout(self.options.run_timeout, self.run_once())
            .await
            .map_err(|_| PacError::RunTimeout { secs })?
    }

    #[instrument(skip(self), fields(sources = self.sources.len()))]
    async fn run_once(&self) -> Result<RunReport> {
        let started = Instant::now();
        let mut report = RunReport {
            sources: self.sources.len(),
            ..RunReport::default()
        };

        if self.sources.is_empty() {
            warn!("No sources configured");
        }

        let batches = sources::fetch_all(&self.sources).await;
        report.fetched = batches.iter().map(|b| b.len()).sum();

        let candidates = aggregate::merge(batches);
        report.unique = candidates.len();
        info!(
            "Fetched {} candidates ({} unique) from {} sources",
            report.fetched, report.unique, report.sources
        );

        let outcomes = self.engine.probe_all(candidates).await?;
        report.live = outcomes.iter().filter(|o| o.is_live()).count();

        let ranked = rank::select(outcomes, self.options.max_proxies);
        let chain = ChainBuilder::build(&ranked);
        report.published = chain.proxy_count();

        if chain.is_direct_only() {
            if self.options.require_proxies {
                warn!("No live proxies; keeping the existing output");
                return Err(PacError::NoLiveProxies);
            }
            warn!("No live proxies; writing direct-only chain");
        }

        let document = PacDocument::new(chain, Utc::now());
        self.sink.write(&document).await?;

        info!(
            "Run complete in {:.1}s: {} live, {} published",
            started.elapsed().as_secs_f64(),
            report.live,
            report.published
        );

        Ok(report)
    }
}
