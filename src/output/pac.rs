use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use super::OutputSink;
use crate::error::Result;
use crate::models::PacDocument;

/// Path value that selects stdout instead of a file
pub const STDOUT_PATH: &str = "-";

/// Render the PAC script for a document
pub fn render_pac(document: &PacDocument) -> String {
    format!(
        r#"function FindProxyForURL(url, host) {{
    // Bypass local names and private networks
    if (isPlainHostName(host) ||
        shExpMatch(host, "*.local") ||
        isInNet(dnsResolve(host), "127.0.0.0", "255.0.0.0") ||
        isInNet(dnsResolve(host), "10.0.0.0", "255.0.0.0") ||
        isInNet(dnsResolve(host), "172.16.0.0", "255.240.0.0") ||
        isInNet(dnsResolve(host), "192.168.0.0", "255.255.0.0")) {{
        return "DIRECT";
    }}

    // Generated on: {timestamp}
    // Live proxies: {count}
    return "{chain}";
}}
"#,
        timestamp = document.generation_timestamp,
        count = document.proxy_count,
        chain = document.chain.render(),
    )
}

/// Writes the rendered PAC file, replacing the previous one atomically
pub struct PacFileSink {
    path: PathBuf,
}

impl PacFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_stdout(&self) -> bool {
        self.path.as_os_str() == STDOUT_PATH
    }

    /// Sibling temp file, so the rename stays on one filesystem
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl OutputSink for PacFileSink {
    #[instrument(skip(self, document), fields(path = %self.path.display(), proxies = document.proxy_count))]
    async fn write(&self, document: &PacDocument) -> Result<()> {
        let content = render_pac(document);

        if self.is_stdout() {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(content.as_bytes()).await?;
            stdout.flush().await?;
            return Ok(());
        }

        let temp = self.temp_path();
        if let Err(e) = fs::write(&temp, content.as_bytes()).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        info!("Wrote {} with {} proxies", self.path.display(), document.proxy_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PacError;
    use crate::models::{ChainEntry, FallbackChain};
    use chrono::{TimeZone, Utc};

    fn document(chain: FallbackChain) -> PacDocument {
        PacDocument::new(chain, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
    }

    fn two_proxy_chain() -> FallbackChain {
        FallbackChain::terminated(vec![
            ChainEntry::Proxy {
                keyword: "PROXY",
                address: "1.2.3.4:80".to_string(),
            },
            ChainEntry::Proxy {
                keyword: "SOCKS",
                address: "5.6.7.8:1080".to_string(),
            },
        ])
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pacgen-{}-{}.pac", name, std::process::id()))
    }

    #[test]
    fn test_render_contains_metadata_and_chain() {
        let pac = render_pac(&document(two_proxy_chain()));

        assert!(pac.starts_with("function FindProxyForURL(url, host) {"));
        assert!(pac.contains("// Generated on: 2024-05-01 12:30:00 UTC"));
        assert!(pac.contains("// Live proxies: 2"));
        assert!(pac.contains(r#"return "PROXY 1.2.3.4:80; SOCKS 5.6.7.8:1080; DIRECT";"#));
        assert!(pac.contains(r#"shExpMatch(host, "*.local")"#));
        assert!(pac.contains(r#""192.168.0.0", "255.255.0.0""#));
    }

    #[test]
    fn test_render_direct_only() {
        let pac = render_pac(&document(FallbackChain::direct_only()));

        assert!(pac.contains("// Live proxies: 0"));
        assert!(pac.contains(r#"    return "DIRECT";
}"#));
    }

    #[tokio::test]
    async fn test_file_sink_replaces_existing_file() {
        let path = scratch_path("replace");
        std::fs::write(&path, "stale").unwrap();

        let sink = PacFileSink::new(&path);
        sink.write(&document(two_proxy_chain())).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, render_pac(&document(two_proxy_chain())));
        assert!(!sink.temp_path().exists());

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_file_sink_missing_directory_is_io_error() {
        let path = std::env::temp_dir()
            .join(format!("pacgen-missing-{}", std::process::id()))
            .join("dynamic.pac");
        let sink = PacFileSink::new(&path);

        let err = sink.write(&document(FallbackChain::direct_only())).await.unwrap_err();
        assert!(matches!(err, PacError::Io(_)));
    }

    #[test]
    fn test_temp_path_is_a_sibling() {
        let sink = PacFileSink::new("/srv/pac/dynamic.pac");
        let temp = sink.temp_path();

        assert_eq!(temp.parent(), Some(Path::new("/srv/pac")));
        assert!(temp.to_string_lossy().ends_with(".tmp"));
        assert!(PacFileSink::new("-").is_stdout());
    }
}
