use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::logi;

/// How output and staging file names are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputNaming {
    /// Per-run staging directory and run id in the output name.
    #[default]
    RequestScoped,
    /// Names derived from style and duration only; identical requests overwrite
    /// each other's output.
    Deterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub downloads_dir: PathBuf,
    pub output_dir: PathBuf,
    pub static_dir: PathBuf,
    pub ytdlp_bin: String,
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub speech_endpoint: String,
    pub speech_lang: String,
    pub speech_slow: bool,
    pub video_bitrate: String,
    pub search_backoff_ms: u64,
    pub output_naming: OutputNaming,
    /// Keep `downloads/<run_id>/` after a request-scoped run finishes.
    pub keep_staging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            output_dir: PathBuf::from("output"),
            static_dir: PathBuf::from("static"),
            ytdlp_bin: "yt-dlp".to_string(),
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            speech_endpoint: "https://translate.google.{tld}/translate_tts".to_string(),
            speech_lang: "en".to_string(),
            speech_slow: false,
            video_bitrate: "2000k".to_string(),
            search_backoff_ms: 1000,
            output_naming: OutputNaming::default(),
            keep_staging: false,
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        if config.speech_lang.trim().is_empty() {
            anyhow::bail!("config.json: speech_lang must not be empty");
        }
        if config.video_bitrate.trim().is_empty() {
            anyhow::bail!("config.json: video_bitrate must not be empty");
        }

        Ok(config)
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_err() {
            logi(format!(
                "No config at {}; using defaults",
                path.as_ref().display()
            ));
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Roots every relative directory at `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        for dir in [
            &mut self.downloads_dir,
            &mut self.output_dir,
            &mut self.static_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        self
    }

    pub fn search_backoff(&self) -> Duration {
        Duration::from_millis(self.search_backoff_ms)
    }

    /// Optional font for text overlays, looked up in the static directory.
    pub fn overlay_font(&self) -> Option<PathBuf> {
        let font = self.static_dir.join("font.ttf");
        font.exists().then_some(font)
    }

    pub fn required_dirs(&self) -> [&Path; 3] {
        [&self.downloads_dir, &self.output_dir, &self.static_dir]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("config.json"))
            .await
            .unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.search_backoff(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"speech_lang": "de", "output_naming": "deterministic"}"#,
        )
        .unwrap();

        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.speech_lang, "de");
        assert_eq!(cfg.output_naming, OutputNaming::Deterministic);
        assert_eq!(cfg.ffmpeg_bin, "ffmpeg");
        assert!(!cfg.keep_staging);
    }

    #[tokio::test]
    async fn empty_language_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"speech_lang": ""}"#).unwrap();
        assert!(Config::load(&path).await.is_err());
    }

    #[test]
    fn rooted_at_only_touches_relative_dirs() {
        let mut cfg = Config::default();
        cfg.static_dir = PathBuf::from("/srv/static");
        let cfg = cfg.rooted_at(Path::new("/work"));
        assert_eq!(cfg.downloads_dir, PathBuf::from("/work/downloads"));
        assert_eq!(cfg.static_dir, PathBuf::from("/srv/static"));
    }
}
