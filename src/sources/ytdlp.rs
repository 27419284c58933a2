use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{watch_url, LookupService, SearchResult};
use crate::error::ResolveError;

const FIELD_SEPARATOR: char = '\t';

/// Cliente que usa yt-dlp para buscar, resolver y descargar.
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    binary: String,
    resolve_timeout: Duration,
    download_timeout: Duration,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>, resolve_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            resolve_timeout,
            download_timeout,
        }
    }

    /// Verifica que yt-dlp esté disponible
    pub async fn verify_available(&self) -> Result<String, ResolveError> {
        let output = self.run(&["--version"], Duration::from_secs(10)).await?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp version: {}", version);
        Ok(version)
    }

    async fn run(&self, args: &[&str], limit: Duration) -> Result<Output, ResolveError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("running {} {}", self.binary, args.join(" "));

        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Err(_) => return Err(ResolveError::Timeout(limit)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::Unavailable(format!("{} not found in PATH", self.binary)))
            }
            Ok(Err(e)) => return Err(ResolveError::transient(e)),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResolveError::Transient(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

/// Parses one `id<TAB>title<TAB>channel` line printed by a flat search.
pub fn parse_search_line(line: &str) -> Option<SearchResult> {
    let mut parts = line.split(FIELD_SEPARATOR);
    let id = parts.next()?.trim();
    if id.is_empty() {
        return None;
    }
    let title = parts.next().unwrap_or("Unknown").trim();
    let channel = parts
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "NA")
        .unwrap_or("Unknown");

    Some(SearchResult {
        id: id.to_string(),
        title: title.to_string(),
        channel: channel.to_string(),
        thumbnail_url: format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id),
        description: String::new(),
    })
}

#[async_trait]
impl LookupService for YtDlpClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, ResolveError> {
        info!("🔍 yt-dlp search: {}", query);
        let search_query = format!("ytsearch{}:{}", limit, query);
        let output = self
            .run(
                &[
                    "--flat-playlist",
                    "--skip-download",
                    "--quiet",
                    "--no-warnings",
                    "--print",
                    "%(id)s\t%(title)s\t%(channel)s",
                    &search_query,
                ],
                self.resolve_timeout,
            )
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let results: Vec<SearchResult> = stdout
            .lines()
            .filter_map(|line| {
                let parsed = parse_search_line(line);
                if parsed.is_none() && !line.trim().is_empty() {
                    warn!("⚠️ Unexpected yt-dlp line: {}", line);
                }
                parsed
            })
            .take(limit)
            .collect();

        info!("🔍 {} results for: {}", results.len(), query);
        Ok(results)
    }

    async fn resolve_stream(&self, item_id: &str) -> Result<String, ResolveError> {
        let output = self
            .run(&["-g", "-f", "bestaudio", &watch_url(item_id)], self.resolve_timeout)
            .await?;

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::NotFound(item_id.to_string()))
    }

    async fn download(&self, item_id: &str, dest: &Path) -> Result<(), ResolveError> {
        let dest_str = dest.to_string_lossy();
        info!("⬇️ Downloading audio for {}", item_id);
        self.run(
            &[
                "-f",
                "bestaudio",
                "--concurrent-fragments",
                "4",
                "--no-playlist",
                "--quiet",
                "--no-warnings",
                "-o",
                &dest_str,
                &watch_url(item_id),
            ],
            self.download_timeout,
        )
        .await?;

        if tokio::fs::metadata(dest).await.is_err() {
            return Err(ResolveError::Transient(format!(
                "yt-dlp finished without producing {}",
                dest.display()
            )));
        }
        Ok(())
    }

    fn source_name(&self) -> &'static str {
        "yt-dlp"
    }
}
