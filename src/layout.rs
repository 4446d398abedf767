use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::{Config, OutputNaming};
use crate::init::remove_tree;
use crate::model::{ClipSource, Style, VoiceKind};

/// Where one run stages its downloads and writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    run_id: String,
    naming: OutputNaming,
    staging: PathBuf,
    output_dir: PathBuf,
}

pub fn new_run_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}-{:06x}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

impl RunLayout {
    pub fn new(config: &Config) -> Self {
        Self::with_run_id(config, new_run_id())
    }

    pub fn with_run_id(config: &Config, run_id: String) -> Self {
        let staging = match config.output_naming {
            OutputNaming::RequestScoped => config.downloads_dir.join(&run_id),
            OutputNaming::Deterministic => config.downloads_dir.clone(),
        };
        Self {
            run_id,
            naming: config.output_naming,
            staging,
            output_dir: config.output_dir.clone(),
        }
    }

    pub async fn prepare(&self) -> Result<()> {
        for dir in [&self.staging, &self.output_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
        }
        Ok(())
    }

    /// Removes this run's own staging directory. Shared deterministic staging
    /// is left for the next run to overwrite.
    pub async fn discard_staging(&self) -> Result<usize> {
        match self.naming {
            OutputNaming::RequestScoped => remove_tree(&self.staging, false)
                .await
                .with_context(|| format!("Failed to remove {}", self.staging.display())),
            OutputNaming::Deterministic => Ok(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn clip_path(&self, source: ClipSource, index: usize) -> PathBuf {
        let name = match source {
            ClipSource::Primary => format!("clip_{index}.mp4"),
            ClipSource::Alternative => format!("alt_clip_{index}.mp4"),
            ClipSource::Placeholder => format!("placeholder_{index}.mp4"),
            ClipSource::TextMarker => format!("placeholder_{index}.txt"),
        };
        self.staging.join(name)
    }

    pub fn voice_path(&self, kind: VoiceKind) -> PathBuf {
        let name = match kind {
            VoiceKind::Speech => "voiceover.mp3",
            VoiceKind::Silence => "voiceover_silence.wav",
            VoiceKind::TextMarker => "voiceover_marker.txt",
        };
        self.staging.join(name)
    }

    /// Scratch file in the staging directory.
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.staging.join(name)
    }

    pub fn output_path(&self, style: Style, duration: u32, extension: &str) -> PathBuf {
        let stem = format!("final_video_{}_{}min", style.as_str(), duration);
        let name = match self.naming {
            OutputNaming::RequestScoped => format!("{stem}_{}.{extension}", self.run_id),
            OutputNaming::Deterministic => format!("{stem}.{extension}"),
        };
        self.output_dir.join(name)
    }
}
