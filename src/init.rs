use anyhow::Result;
use std::path::Path;
use tokio::fs;
use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::Config;
use crate::{logi, logok};

pub async fn ensure_directories(config: &Config) -> Result<()> {
    for dir in config.required_dirs() {
        if fs::metadata(dir).await.is_err() {
            fs::create_dir_all(dir).await?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

async fn tool_responds(bin: &str, flag: &str) -> bool {
    match Command::new(bin).arg(flag).output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

pub async fn check_ffmpeg(config: &Config) -> bool {
    tool_responds(&config.ffmpeg_bin, "-version").await
}

pub async fn check_ytdlp(config: &Config) -> bool {
    tool_responds(&config.ytdlp_bin, "--version").await
}

/// Deletes the files and directories under `root`, and `root` itself unless
/// `keep_root`. Returns the number of files removed.
pub async fn remove_tree(root: &Path, keep_root: bool) -> Result<usize> {
    if fs::metadata(root).await.is_err() {
        return Ok(0);
    }

    let min_depth = if keep_root { 1 } else { 0 };
    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(min_depth).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path).await.ok();
        } else if fs::remove_file(path).await.is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Empties the download staging directory, keeping the directory itself.
pub async fn clear_staging(config: &Config) -> Result<usize> {
    let root = &config.downloads_dir;
    let removed = remove_tree(root, true).await?;
    logok(format!("Cleared {} files from {}", removed, root.display()));
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_all_three_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::default().rooted_at(dir.path());
        ensure_directories(&cfg).await.unwrap();
        for d in cfg.required_dirs() {
            assert!(d.is_dir(), "{} missing", d.display());
        }
    }

    #[tokio::test]
    async fn clear_staging_removes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::default().rooted_at(dir.path());
        ensure_directories(&cfg).await.unwrap();
        let nested = cfg.downloads_dir.join("run-1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("clip_0.mp4"), b"x").unwrap();
        std::fs::write(cfg.downloads_dir.join("clip_1.mp4"), b"y").unwrap();

        let removed = clear_staging(&cfg).await.unwrap();
        assert_eq!(removed, 2);
        assert!(cfg.downloads_dir.is_dir());
        assert!(!nested.exists());
    }

    #[tokio::test]
    async fn remove_tree_can_take_the_root_too() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("run-2");
        std::fs::create_dir_all(run.join("nested")).unwrap();
        std::fs::write(run.join("nested/seg.mp4"), b"x").unwrap();
        std::fs::write(run.join("voiceover.mp3"), b"y").unwrap();

        assert_eq!(remove_tree(&run, false).await.unwrap(), 2);
        assert!(!run.exists());
        assert_eq!(remove_tree(&run, false).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_tool_is_reported_absent() {
        let cfg = Config {
            ffmpeg_bin: "definitely-not-a-real-ffmpeg".into(),
            ..Config::default()
        };
        assert!(!check_ffmpeg(&cfg).await);
    }
}
