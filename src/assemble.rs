use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::activity::ActivityLog;
use crate::fallback::{Exhausted, FallbackChain, OrUnavailable, Tier, Unavailable};
use crate::ffmpeg::{fit_width, Encoder, SegmentPlan, TextCard};
use crate::layout::RunLayout;
use crate::model::{
    ArtifactKind, Clip, ClipSet, ClipSource, GenerationRequest, OutputArtifact, Presenter,
    ScriptText, Style, VoiceTrack,
};
use crate::voice::truncate_chars;
use crate::{logi, logok};

pub const MIN_CLIP_BYTES: u64 = 10 * 1024;
pub const MAX_CLIPS_USED: usize = 2;
pub const MAX_SEGMENT_SECONDS: f64 = 15.0;
pub const MAX_FRAME_WIDTH: u32 = 1280;
pub const OVERLAY_CHARS: usize = 200;
const OVERLAY_LINE_CHARS: usize = 40;
const CARD_SIZE: (u32, u32) = (1280, 720);

#[derive(Debug, Clone)]
struct AssemblyJob {
    clips: Vec<Clip>,
    voice: VoiceTrack,
    script: String,
    topics: Vec<String>,
    duration: u32,
    style: Style,
    presenter: Presenter,
    layout: RunLayout,
}

impl AssemblyJob {
    fn target_seconds(&self) -> f64 {
        (self.duration * 60) as f64
    }

    fn output_path(&self, kind: ArtifactKind) -> PathBuf {
        self.layout
            .output_path(self.style, self.duration, kind.extension())
    }
}

async fn written(path: &Path, tier: &'static str) -> Result<(), Unavailable> {
    match fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(Unavailable::new(
            tier,
            format!("{} was not written", path.display()),
        )),
    }
}

/// Per-clip trim length: the target split evenly, capped at 15 s.
pub fn segment_seconds(target_secs: f64, clip_count: usize) -> f64 {
    if clip_count == 0 {
        return 0.0;
    }
    (target_secs / clip_count as f64).min(MAX_SEGMENT_SECONDS)
}

/// Frame every segment is padded to: the largest scaled width and height.
pub fn common_canvas(sizes: &[(u32, u32)]) -> (u32, u32) {
    let w = sizes.iter().map(|s| s.0).max().unwrap_or(CARD_SIZE.0);
    let h = sizes.iter().map(|s| s.1).max().unwrap_or(CARD_SIZE.1);
    ((w + 1) & !1, (h + 1) & !1)
}

struct CompiledTier {
    encoder: Arc<dyn Encoder>,
}

impl CompiledTier {
    async fn usable_clips(job: &AssemblyJob) -> Vec<Clip> {
        let mut usable = Vec::new();
        for clip in &job.clips {
            if usable.len() >= MAX_CLIPS_USED {
                break;
            }
            if clip.source == ClipSource::TextMarker {
                continue;
            }
            let size = fs::metadata(&clip.path).await.map(|m| m.len()).unwrap_or(0);
            if size > MIN_CLIP_BYTES {
                usable.push(clip.clone());
            }
        }
        usable
    }

    async fn compile(
        &self,
        job: &AssemblyJob,
        scratch: &mut Vec<PathBuf>,
    ) -> Result<OutputArtifact, Unavailable> {
        let clips = Self::usable_clips(job).await;
        if clips.is_empty() {
            return Err(Unavailable::new(self.name(), "no clip larger than 10 KB"));
        }

        let mut scaled = Vec::with_capacity(clips.len());
        for clip in &clips {
            let info = self
                .encoder
                .probe(&clip.path)
                .await
                .or_unavailable(self.name())?;
            let fitted = fit_width(info.width, info.height, MAX_FRAME_WIDTH);
            let size = fitted.unwrap_or((info.width, info.height));
            scaled.push((fitted, size));
        }
        let canvas = common_canvas(&scaled.iter().map(|s| s.1).collect::<Vec<_>>());
        let seconds = segment_seconds(job.target_seconds(), clips.len());

        let mut segments = Vec::with_capacity(clips.len());
        for (i, (clip, (scale_to, _))) in clips.iter().zip(&scaled).enumerate() {
            let plan = SegmentPlan {
                seconds,
                scale_to: *scale_to,
                canvas,
            };
            let seg = job.layout.scratch_path(&format!("segment_{i}.mp4"));
            scratch.push(seg.clone());
            self.encoder
                .segment(&clip.path, &plan, &seg)
                .await
                .or_unavailable(self.name())?;
            segments.push(seg);
        }

        let joined = if segments.len() == 1 {
            segments[0].clone()
        } else {
            let joined = job.layout.scratch_path("joined.mp4");
            scratch.push(joined.clone());
            self.encoder
                .concat(&segments, &joined)
                .await
                .or_unavailable(self.name())?;
            joined
        };

        let out = job.output_path(ArtifactKind::CompiledVideo);
        self.encoder
            .finalize(&joined, job.voice.audio(), job.target_seconds(), &out)
            .await
            .or_unavailable(self.name())?;
        written(&out, self.name()).await?;

        Ok(OutputArtifact {
            path: out,
            kind: ArtifactKind::CompiledVideo,
        })
    }
}

#[async_trait]
impl Tier<AssemblyJob, OutputArtifact> for CompiledTier {
    fn name(&self) -> &'static str {
        "compiled-video"
    }

    async fn attempt(&self, job: &AssemblyJob) -> Result<OutputArtifact, Unavailable> {
        let mut scratch = Vec::new();
        let result = self.compile(job, &mut scratch).await;
        for path in &scratch {
            let _ = fs::remove_file(path).await;
        }
        result
    }
}

pub fn wrap_lines(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join("\n")
}

struct TextBurnTier {
    encoder: Arc<dyn Encoder>,
    font: Option<PathBuf>,
}

#[async_trait]
impl Tier<AssemblyJob, OutputArtifact> for TextBurnTier {
    fn name(&self) -> &'static str {
        "text-burn"
    }

    async fn attempt(&self, job: &AssemblyJob) -> Result<OutputArtifact, Unavailable> {
        let excerpt = truncate_chars(&job.script, OVERLAY_CHARS);
        let card = TextCard {
            text: wrap_lines(excerpt, OVERLAY_LINE_CHARS),
            color: job.style.backdrop_color().to_string(),
            size: CARD_SIZE,
            seconds: job.target_seconds(),
            font: self.font.clone(),
        };
        let out = job.output_path(ArtifactKind::TextBurnVideo);
        self.encoder
            .text_card(&card, job.voice.audio(), &out)
            .await
            .or_unavailable(self.name())?;
        written(&out, self.name()).await?;

        Ok(OutputArtifact {
            path: out,
            kind: ArtifactKind::TextBurnVideo,
        })
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn render_document(job: &AssemblyJob) -> String {
    let title = format!(
        "{} video: {}",
        job.style,
        job.topics.join(", ")
    );
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("  <meta charset=\"utf-8\">\n");
    html.push_str(&format!("  <title>{}</title>\n", escape_html(&title)));
    html.push_str("  <style>\n");
    html.push_str(&format!(
        "    body {{ font-family: sans-serif; max-width: 48em; margin: 2em auto; line-height: 1.5; }}\n    header {{ background: #{}; color: #fff; padding: 1em 1.5em; }}\n    dl {{ display: grid; grid-template-columns: max-content 1fr; gap: .25em 1em; }}\n    .script p {{ margin: 0 0 1em; }}\n",
        job.style.backdrop_color().trim_start_matches("0x")
    ));
    html.push_str("  </style>\n</head>\n<body>\n");
    html.push_str(&format!("  <header><h1>{}</h1></header>\n", escape_html(&title)));

    html.push_str("  <dl>\n");
    for (key, value) in [
        ("Topics", job.topics.join(", ")),
        ("Duration", format!("{} min", job.duration)),
        ("Style", job.style.to_string()),
        ("Presenter", job.presenter.to_string()),
        ("Voice", job.voice.path.display().to_string()),
        ("Clips", job.clips.len().to_string()),
        ("Generated", Utc::now().to_rfc3339()),
    ] {
        html.push_str(&format!(
            "    <dt>{}</dt><dd>{}</dd>\n",
            key,
            escape_html(&value)
        ));
    }
    html.push_str("  </dl>\n");

    html.push_str("  <section class=\"script\">\n");
    for para in job.script.split("\n\n").filter(|p| !p.trim().is_empty()) {
        html.push_str(&format!("    <p>{}</p>\n", escape_html(para.trim())));
    }
    html.push_str("  </section>\n</body>\n</html>\n");
    html
}

struct DocumentTier;

#[async_trait]
impl Tier<AssemblyJob, OutputArtifact> for DocumentTier {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn attempt(&self, job: &AssemblyJob) -> Result<OutputArtifact, Unavailable> {
        let out = job.output_path(ArtifactKind::Document);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))
                .or_unavailable(self.name())?;
        }
        fs::write(&out, render_document(job))
            .await
            .with_context(|| format!("Failed to write {}", out.display()))
            .or_unavailable(self.name())?;

        Ok(OutputArtifact {
            path: out,
            kind: ArtifactKind::Document,
        })
    }
}

pub struct Assembler {
    chain: FallbackChain<AssemblyJob, OutputArtifact>,
    log: ActivityLog,
}

impl Assembler {
    pub fn new(encoder: Arc<dyn Encoder>, font: Option<PathBuf>, log: ActivityLog) -> Self {
        let chain = FallbackChain::new("assemble")
            .then(CompiledTier {
                encoder: Arc::clone(&encoder),
            })
            .then(TextBurnTier { encoder, font })
            .then(DocumentTier);
        Self { chain, log }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.chain.tier_names()
    }

    pub async fn assemble(
        &self,
        layout: &RunLayout,
        clips: &ClipSet,
        voice: &VoiceTrack,
        script: &ScriptText,
        request: &GenerationRequest,
    ) -> Result<OutputArtifact, Exhausted> {
        let job = AssemblyJob {
            clips: clips.clips.clone(),
            voice: voice.clone(),
            script: script.as_str().to_string(),
            topics: request.topics().to_vec(),
            duration: request.duration(),
            style: request.style(),
            presenter: request.presenter(),
            layout: layout.clone(),
        };
        logi(format!(
            "Assembling {} s from {} clips",
            job.target_seconds(),
            job.clips.len()
        ));

        let artifact = self.chain.run(&job).await?;
        logok(format!(
            "Output via {} tier: {}",
            artifact.tier,
            artifact.value.path.display()
        ));
        self.log.record(
            "assemble",
            "assemble",
            json!({
                "tier": artifact.tier,
                "kind": artifact.value.kind,
                "path": artifact.value.path.display().to_string(),
                "clips_offered": job.clips.len(),
            }),
        );
        Ok(artifact.value)
    }
}
