use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::logw;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    /// Seconds, when the index reports it.
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    pub max_height: u32,
    /// Only the first `section_secs` seconds are fetched.
    pub section_secs: u32,
    pub socket_timeout: Duration,
    pub retries: u32,
}

impl DownloadOptions {
    pub const PRIMARY: DownloadOptions = DownloadOptions {
        max_height: 720,
        section_secs: 45,
        socket_timeout: Duration::from_secs(30),
        retries: 3,
    };

    pub const ALTERNATIVE: DownloadOptions = DownloadOptions {
        max_height: 480,
        section_secs: 45,
        socket_timeout: Duration::from_secs(20),
        retries: 2,
    };

    pub fn with_section(mut self, secs: u32) -> Self {
        self.section_secs = secs;
        self
    }
}

/// External video index: query in, candidate entries out; entries can be
/// fetched to a local file.
#[async_trait]
pub trait MediaSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;

    async fn download(&self, hit: &SearchHit, opts: &DownloadOptions, dest: &Path)
    -> Result<PathBuf>;
}

/// yt-dlp backed search (`ytsearchN:`) and section downloads.
#[derive(Debug, Clone)]
pub struct YtDlp {
    bin: String,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
}

impl FlatEntry {
    fn into_hit(self) -> Option<SearchHit> {
        let url = match (self.webpage_url, self.url, self.id) {
            (Some(u), _, _) if u.starts_with("http") => u,
            (_, Some(u), _) if u.starts_with("http") => u,
            (_, _, Some(id)) if !id.is_empty() => format!("https://www.youtube.com/watch?v={id}"),
            _ => return None,
        };
        Some(SearchHit {
            url,
            title: self.title.unwrap_or_default(),
            duration: self.duration,
        })
    }
}

pub fn build_search_args(query: &str, max_results: usize) -> Vec<String> {
    vec![
        format!("ytsearch{}:{}", max_results.max(1), query),
        "--flat-playlist".to_string(),
        "--dump-json".to_string(),
        "--no-warnings".to_string(),
    ]
}

pub fn build_download_args(url: &str, opts: &DownloadOptions, dest: &Path) -> Vec<String> {
    let h = opts.max_height;
    vec![
        "-f".to_string(),
        format!("best[height<={h}][ext=mp4]/best[height<={h}]"),
        "--download-sections".to_string(),
        format!("*0-{}", opts.section_secs),
        "--socket-timeout".to_string(),
        opts.socket_timeout.as_secs().to_string(),
        "--retries".to_string(),
        opts.retries.to_string(),
        "--fragment-retries".to_string(),
        opts.retries.to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--force-overwrites".to_string(),
        "-o".to_string(),
        dest.display().to_string(),
        "--".to_string(),
        url.to_string(),
    ]
}

pub fn parse_search_output(stdout: &str) -> Vec<SearchHit> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => entry.into_hit(),
            Err(err) => {
                logw(format!("Skipping unparsable search entry: {}", err));
                None
            }
        })
        .collect()
}

impl YtDlp {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl MediaSearch for YtDlp {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let output = Command::new(&self.bin)
            .args(build_search_args(query, max_results))
            .output()
            .await
            .with_context(|| format!("{} search failed to start", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("search for {:?} failed: {}", query, stderr.trim());
        }

        let mut hits = parse_search_output(&String::from_utf8_lossy(&output.stdout));
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn download(
        &self,
        hit: &SearchHit,
        opts: &DownloadOptions,
        dest: &Path,
    ) -> Result<PathBuf> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        let output = Command::new(&self.bin)
            .args(build_download_args(&hit.url, opts, dest))
            .output()
            .await
            .with_context(|| format!("{} download failed to start", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("download of {} failed: {}", hit.url, stderr.trim());
        }
        if !dest.exists() {
            anyhow::bail!("download of {} produced no file", hit.url);
        }
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_args_request_flat_json() {
        let args = build_search_args("rust tutorial", 3);
        assert_eq!(args[0], "ytsearch3:rust tutorial");
        assert!(args.contains(&"--flat-playlist".to_string()));
        assert!(args.contains(&"--dump-json".to_string()));
    }

    #[test]
    fn download_args_carry_tier_limits() {
        let args = build_download_args(
            "https://www.youtube.com/watch?v=abc",
            &DownloadOptions::ALTERNATIVE,
            Path::new("downloads/alt_clip_0.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("best[height<=480][ext=mp4]/best[height<=480]"));
        assert!(joined.contains("--download-sections *0-45"));
        assert!(joined.contains("--socket-timeout 20"));
        assert!(joined.contains("--retries 2"));
        assert_eq!(args.last().unwrap(), "https://www.youtube.com/watch?v=abc");
    }

    #[test]
    fn parses_flat_playlist_lines() {
        let stdout = r#"{"id": "abc123", "url": "abc123", "title": "Intro", "duration": 61.0}
not json
{"id": "x", "webpage_url": "https://www.youtube.com/watch?v=x", "title": "Other"}
{"title": "no id"}
"#;
        let hits = parse_search_output(stdout);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(hits[0].duration, Some(61.0));
        assert_eq!(hits[1].url, "https://www.youtube.com/watch?v=x");
        assert_eq!(hits[1].duration, None);
    }
}
