use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::Config;

pub const OUTPUT_FPS: u32 = 24;
const ENCODE_PRESET: &str = "fast";
const AUDIO_BITRATE: &str = "192k";
const SILENCE_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

/// Trim/resize instructions for one clip before concatenation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    pub seconds: f64,
    /// Set when the source must be scaled down to this size.
    pub scale_to: Option<(u32, u32)>,
    /// Common frame every segment is padded to.
    pub canvas: (u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextCard {
    pub text: String,
    pub color: String,
    pub size: (u32, u32),
    pub seconds: f64,
    pub font: Option<PathBuf>,
}

/// Encoding backend used for placeholders, silence and assembly.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<MediaInfo>;

    async fn color_clip(&self, color: &str, size: (u32, u32), seconds: f64, out: &Path)
    -> Result<()>;

    async fn silence(&self, seconds: f64, out: &Path) -> Result<()>;

    async fn segment(&self, input: &Path, plan: &SegmentPlan, out: &Path) -> Result<()>;

    async fn concat(&self, segments: &[PathBuf], out: &Path) -> Result<()>;

    /// Loops or truncates `video` to exactly `target_secs` and replaces its
    /// audio with `audio` (or drops audio when `None`).
    async fn finalize(
        &self,
        video: &Path,
        audio: Option<&Path>,
        target_secs: f64,
        out: &Path,
    ) -> Result<()>;

    async fn text_card(&self, card: &TextCard, audio: Option<&Path>, out: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
    video_bitrate: String,
}

async fn run_cmd(bin: &str, args: &[String]) -> Result<()> {
    let output = Command::new(bin)
        .args(args)
        .output()
        .await
        .with_context(|| format!("{} execution failed", bin))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let snippet = stderr.trim().chars().take(600).collect::<String>();
        return Err(anyhow::anyhow!("{} failed: {}", bin, snippet));
    }

    Ok(())
}

fn even(v: u32) -> u32 {
    v & !1
}

/// Output size for a source frame: sources wider than `max_width` are scaled
/// down keeping aspect ratio, everything else is left alone.
pub fn fit_width(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
    if width <= max_width || width == 0 {
        return None;
    }
    let scaled_h = ((height as f64) * (max_width as f64) / (width as f64)).round() as u32;
    Some((even(max_width), even(scaled_h.max(2))))
}

/// Escapes a path for use inside an ffmpeg filter argument.
fn filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn concat_entry(segment: &Path, list_dir: &Path) -> String {
    let rel = pathdiff::diff_paths(segment, list_dir).unwrap_or_else(|| segment.to_path_buf());
    let name = rel.display().to_string().replace('\'', "'\\''");
    format!("file '{}'\n", name)
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, video_bitrate: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            video_bitrate: video_bitrate.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.ffmpeg_bin.clone(),
            config.ffprobe_bin.clone(),
            config.video_bitrate.clone(),
        )
    }

    fn base_args() -> Vec<String> {
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ]
    }

    fn video_encode_args(&self) -> Vec<String> {
        vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-preset".to_string(),
            ENCODE_PRESET.to_string(),
            "-b:v".to_string(),
            self.video_bitrate.clone(),
            "-r".to_string(),
            OUTPUT_FPS.to_string(),
        ]
    }

    fn audio_encode_args() -> Vec<String> {
        vec![
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
        ]
    }

    pub async fn ffprobe_video_dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ])
            .arg(path)
            .output()
            .await
            .context("ffprobe execution failed")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!("ffprobe failed on {}", path.display()));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let mut parts = text.split('x');
        let w = parts
            .next()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);
        let h = parts
            .next()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(0);

        if w == 0 || h == 0 {
            return Err(anyhow::anyhow!("Invalid dimensions for {}", path.display()));
        }

        Ok((w, h))
    }

    pub async fn ffprobe_duration_seconds(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .context("ffprobe duration failed")?;

        if !output.status.success() {
            return Err(anyhow::anyhow!("ffprobe failed on {}", path.display()));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let duration = text.parse::<f64>().unwrap_or(-1.0);
        if duration <= 0.1 {
            return Err(anyhow::anyhow!("Invalid duration for {}", path.display()));
        }
        Ok(duration)
    }
}

#[async_trait]
impl Encoder for Ffmpeg {
    async fn probe(&self, input: &Path) -> Result<MediaInfo> {
        let (width, height) = self.ffprobe_video_dimensions(input).await?;
        let duration = self.ffprobe_duration_seconds(input).await?;
        Ok(MediaInfo {
            width,
            height,
            duration,
        })
    }

    async fn color_clip(
        &self,
        color: &str,
        size: (u32, u32),
        seconds: f64,
        out: &Path,
    ) -> Result<()> {
        let mut args = Self::base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=c={}:s={}x{}:d={:.3}:r={}",
                color, size.0, size.1, seconds, OUTPUT_FPS
            ),
            "-t".to_string(),
            format!("{:.3}", seconds),
        ]);
        args.extend(self.video_encode_args());
        args.push(out.display().to_string());
        run_cmd(&self.ffmpeg, &args).await
    }

    async fn silence(&self, seconds: f64, out: &Path) -> Result<()> {
        let mut args = Self::base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!("anullsrc=r={}:cl=mono", SILENCE_SAMPLE_RATE),
            "-t".to_string(),
            format!("{:.3}", seconds),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            out.display().to_string(),
        ]);
        run_cmd(&self.ffmpeg, &args).await
    }

    async fn segment(&self, input: &Path, plan: &SegmentPlan, out: &Path) -> Result<()> {
        let mut filter = String::new();
        if let Some((w, h)) = plan.scale_to {
            filter.push_str(&format!("scale={}:{},", w, h));
        }
        filter.push_str(&format!(
            "pad={}:{}:(ow-iw)/2:(oh-ih)/2:black,setsar=1,fps={},format=yuv420p",
            plan.canvas.0, plan.canvas.1, OUTPUT_FPS
        ));

        let mut args = Self::base_args();
        args.extend([
            "-i".to_string(),
            input.display().to_string(),
            "-t".to_string(),
            format!("{:.3}", plan.seconds),
            "-an".to_string(),
            "-vf".to_string(),
            filter,
        ]);
        args.extend(self.video_encode_args());
        args.push(out.display().to_string());
        run_cmd(&self.ffmpeg, &args).await
    }

    async fn concat(&self, segments: &[PathBuf], out: &Path) -> Result<()> {
        let list_dir = out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut list = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile_in(list_dir)
            .with_context(|| format!("Failed to create concat list in {}", list_dir.display()))?;
        for segment in segments {
            list.write_all(concat_entry(segment, list_dir).as_bytes())?;
        }
        list.flush()?;

        let mut args = Self::base_args();
        args.extend([
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.path().display().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            out.display().to_string(),
        ]);
        run_cmd(&self.ffmpeg, &args).await
    }

    async fn finalize(
        &self,
        video: &Path,
        audio: Option<&Path>,
        target_secs: f64,
        out: &Path,
    ) -> Result<()> {
        let mut args = Self::base_args();
        args.extend([
            "-stream_loop".to_string(),
            "-1".to_string(),
            "-i".to_string(),
            video.display().to_string(),
        ]);
        if let Some(audio) = audio {
            args.extend(["-i".to_string(), audio.display().to_string()]);
        }
        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        if audio.is_some() {
            args.extend(["-map".to_string(), "1:a:0".to_string()]);
        }
        args.extend(["-t".to_string(), format!("{:.3}", target_secs)]);
        args.extend(self.video_encode_args());
        if audio.is_some() {
            args.extend(Self::audio_encode_args());
        } else {
            args.push("-an".to_string());
        }
        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            out.display().to_string(),
        ]);
        run_cmd(&self.ffmpeg, &args).await
    }

    async fn text_card(&self, card: &TextCard, audio: Option<&Path>, out: &Path) -> Result<()> {
        let text_dir = out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut text_file = tempfile::Builder::new()
            .prefix("overlay_")
            .suffix(".txt")
            .tempfile_in(text_dir)
            .context("Failed to create overlay text file")?;
        text_file.write_all(card.text.as_bytes())?;
        text_file.flush()?;

        let drawtext = drawtext_filter(text_file.path(), card.font.as_deref());

        let mut args = Self::base_args();
        args.extend([
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=c={}:s={}x{}:d={:.3}:r={}",
                card.color, card.size.0, card.size.1, card.seconds, OUTPUT_FPS
            ),
        ]);
        if let Some(audio) = audio {
            args.extend([
                "-i".to_string(),
                audio.display().to_string(),
                "-map".to_string(),
                "0:v:0".to_string(),
                "-map".to_string(),
                "1:a:0".to_string(),
            ]);
        }
        args.extend([
            "-vf".to_string(),
            drawtext,
            "-t".to_string(),
            format!("{:.3}", card.seconds),
        ]);
        args.extend(self.video_encode_args());
        if audio.is_some() {
            args.extend(Self::audio_encode_args());
        }
        args.extend([
            "-movflags".to_string(),
            "+faststart".to_string(),
            out.display().to_string(),
        ]);
        run_cmd(&self.ffmpeg, &args).await
    }
}

/// Centered white text read verbatim from `text_file`; `%` is not expanded.
fn drawtext_filter(text_file: &Path, font: Option<&Path>) -> String {
    let mut filter = format!(
        "drawtext=textfile='{}':expansion=none:fontcolor=white:fontsize=36:line_spacing=10:x=(w-text_w)/2:y=(h-text_h)/2",
        filter_path(text_file)
    );
    if let Some(font) = font {
        filter.push_str(&format!(":fontfile='{}'", filter_path(font)));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_sources_are_not_scaled() {
        assert_eq!(fit_width(1280, 720, 1280), None);
        assert_eq!(fit_width(640, 360, 1280), None);
    }

    #[test]
    fn wide_sources_scale_to_even_dimensions() {
        assert_eq!(fit_width(1920, 1080, 1280), Some((1280, 720)));
        assert_eq!(fit_width(2560, 1081, 1280), Some((1280, 540)));
    }

    #[test]
    fn concat_entries_are_relative_to_the_list() {
        let entry = concat_entry(
            Path::new("/tmp/run/seg_0.mp4"),
            Path::new("/tmp/run"),
        );
        assert_eq!(entry, "file 'seg_0.mp4'\n");
        let quoted = concat_entry(Path::new("/tmp/run/it's.mp4"), Path::new("/tmp/run"));
        assert_eq!(quoted, "file 'it'\\''s.mp4'\n");
    }

    #[test]
    fn filter_paths_escape_colons_and_quotes() {
        assert_eq!(filter_path(Path::new("C:\\a'b.txt")), "C\\:/a\\'b.txt");
    }

    #[test]
    fn overlay_text_is_drawn_without_expansion() {
        let filter = drawtext_filter(Path::new("/tmp/run/overlay.txt"), None);
        assert!(filter.starts_with("drawtext=textfile='/tmp/run/overlay.txt':expansion=none:"));
        assert!(!filter.contains("fontfile"));

        let filter = drawtext_filter(
            Path::new("/tmp/run/overlay.txt"),
            Some(Path::new("/srv/static/font.ttf")),
        );
        assert!(filter.ends_with(":fontfile='/srv/static/font.ttf'"));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let ff = Ffmpeg::new("no-such-ffmpeg-bin", "no-such-ffprobe-bin", "2000k");
        let dir = tempfile::tempdir().unwrap();
        assert!(ff.silence(1.0, &dir.path().join("s.wav")).await.is_err());
        assert!(ff.probe(&dir.path().join("x.mp4")).await.is_err());
    }
}
