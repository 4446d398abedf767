use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::activity::ActivityLog;
use crate::fallback::{Exhausted, FallbackChain, OrUnavailable, Tier, Unavailable};
use crate::ffmpeg::Encoder;
use crate::layout::RunLayout;
use crate::logok;
use crate::model::{ScriptText, VoiceKind, VoiceTrack, VoiceType};
use crate::speech::{SpeechRequest, SpeechService};

/// Longest script excerpt sent to the speech service.
pub const MAX_SPOKEN_CHARS: usize = 1000;
/// Audio files at or below this size are treated as failed renders.
pub const MIN_AUDIO_BYTES: u64 = 1000;
pub const SILENCE_SECONDS: f64 = 10.0;

/// First `max_chars` characters of `input`, never splitting a code point.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((cut, _)) => &input[..cut],
        None => input,
    }
}

struct VoiceJob {
    text: String,
    voice: VoiceType,
    speech_out: PathBuf,
    silence_out: PathBuf,
    marker_out: PathBuf,
}

async fn audio_size_ok(path: &Path, tier: &'static str) -> Result<(), Unavailable> {
    let size = fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    if size > MIN_AUDIO_BYTES {
        Ok(())
    } else {
        Err(Unavailable::new(
            tier,
            format!("{} is only {} bytes", path.display(), size),
        ))
    }
}

struct SpeechTier {
    speech: Arc<dyn SpeechService>,
    lang: String,
    slow: bool,
}

#[async_trait]
impl Tier<VoiceJob, VoiceTrack> for SpeechTier {
    fn name(&self) -> &'static str {
        "speech"
    }

    async fn attempt(&self, job: &VoiceJob) -> Result<VoiceTrack, Unavailable> {
        let req = SpeechRequest {
            text: &job.text,
            lang: &self.lang,
            slow: self.slow,
            voice: job.voice,
        };
        self.speech
            .synthesize(&req, &job.speech_out)
            .await
            .or_unavailable(self.name())?;
        audio_size_ok(&job.speech_out, self.name()).await?;
        Ok(VoiceTrack {
            path: job.speech_out.clone(),
            kind: VoiceKind::Speech,
        })
    }
}

struct SilenceTier {
    encoder: Arc<dyn Encoder>,
}

#[async_trait]
impl Tier<VoiceJob, VoiceTrack> for SilenceTier {
    fn name(&self) -> &'static str {
        "silence"
    }

    async fn attempt(&self, job: &VoiceJob) -> Result<VoiceTrack, Unavailable> {
        self.encoder
            .silence(SILENCE_SECONDS, &job.silence_out)
            .await
            .or_unavailable(self.name())?;
        audio_size_ok(&job.silence_out, self.name()).await?;
        Ok(VoiceTrack {
            path: job.silence_out.clone(),
            kind: VoiceKind::Silence,
        })
    }
}

struct MarkerTier;

#[async_trait]
impl Tier<VoiceJob, VoiceTrack> for MarkerTier {
    fn name(&self) -> &'static str {
        "text-marker"
    }

    async fn attempt(&self, job: &VoiceJob) -> Result<VoiceTrack, Unavailable> {
        let body = format!(
            "VOICEOVER PLACEHOLDER\nvoice: {}\n\n{}\n",
            job.voice, job.text
        );
        fs::write(&job.marker_out, body)
            .await
            .with_context(|| format!("Failed to write {}", job.marker_out.display()))
            .or_unavailable(self.name())?;
        Ok(VoiceTrack {
            path: job.marker_out.clone(),
            kind: VoiceKind::TextMarker,
        })
    }
}

pub struct VoiceSynthesizer {
    chain: FallbackChain<VoiceJob, VoiceTrack>,
    log: ActivityLog,
}

impl VoiceSynthesizer {
    pub fn new(
        speech: Arc<dyn SpeechService>,
        encoder: Arc<dyn Encoder>,
        lang: impl Into<String>,
        slow: bool,
        log: ActivityLog,
    ) -> Self {
        let chain = FallbackChain::new("voice")
            .then(SpeechTier {
                speech,
                lang: lang.into(),
                slow,
            })
            .then(SilenceTier { encoder })
            .then(MarkerTier);
        Self { chain, log }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.chain.tier_names()
    }

    pub async fn synthesize(
        &self,
        script: &ScriptText,
        voice: VoiceType,
        layout: &RunLayout,
    ) -> Result<VoiceTrack, Exhausted> {
        let job = VoiceJob {
            text: truncate_chars(script.as_str(), MAX_SPOKEN_CHARS).to_string(),
            voice,
            speech_out: layout.voice_path(VoiceKind::Speech),
            silence_out: layout.voice_path(VoiceKind::Silence),
            marker_out: layout.voice_path(VoiceKind::TextMarker),
        };

        let track = self.chain.run(&job).await?;
        logok(format!(
            "Voiceover via {} tier: {}",
            track.tier,
            track.value.path.display()
        ));
        self.log.record(
            "voice",
            "synthesize",
            json!({
                "voice_type": voice.as_str(),
                "chars": job.text.chars().count(),
                "tier": track.tier,
                "path": track.value.path.display().to_string(),
            }),
        );
        Ok(track.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OutputNaming};
    use crate::ffmpeg::{MediaInfo, SegmentPlan, TextCard};
    use anyhow::Result;
    use std::sync::Mutex;

    struct FixedSpeech {
        bytes: usize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechService for FixedSpeech {
        async fn synthesize(&self, req: &SpeechRequest<'_>, out: &Path) -> Result<()> {
            self.seen.lock().unwrap().push(req.text.to_string());
            fs::write(out, vec![7u8; self.bytes]).await?;
            Ok(())
        }
    }

    struct OfflineSpeech;

    #[async_trait]
    impl SpeechService for OfflineSpeech {
        async fn synthesize(&self, _req: &SpeechRequest<'_>, _out: &Path) -> Result<()> {
            anyhow::bail!("network unreachable")
        }
    }

    struct SilenceOnly {
        works: bool,
    }

    #[async_trait]
    impl Encoder for SilenceOnly {
        async fn probe(&self, _input: &Path) -> Result<MediaInfo> {
            anyhow::bail!("unused")
        }
        async fn color_clip(&self, _c: &str, _s: (u32, u32), _secs: f64, _out: &Path) -> Result<()> {
            anyhow::bail!("unused")
        }
        async fn silence(&self, _seconds: f64, out: &Path) -> Result<()> {
            if !self.works {
                anyhow::bail!("ffmpeg not found");
            }
            fs::write(out, vec![0u8; 4096]).await?;
            Ok(())
        }
        async fn segment(&self, _i: &Path, _p: &SegmentPlan, _out: &Path) -> Result<()> {
            anyhow::bail!("unused")
        }
        async fn concat(&self, _s: &[PathBuf], _out: &Path) -> Result<()> {
            anyhow::bail!("unused")
        }
        async fn finalize(&self, _v: &Path, _a: Option<&Path>, _t: f64, _out: &Path) -> Result<()> {
            anyhow::bail!("unused")
        }
        async fn text_card(&self, _c: &TextCard, _a: Option<&Path>, _out: &Path) -> Result<()> {
            anyhow::bail!("unused")
        }
    }

    async fn layout(dir: &Path) -> RunLayout {
        let cfg = Config {
            output_naming: OutputNaming::Deterministic,
            ..Config::default()
        }
        .rooted_at(dir);
        let layout = RunLayout::with_run_id(&cfg, "test".into());
        layout.prepare().await.unwrap();
        layout
    }

    fn synth(speech: Arc<dyn SpeechService>, silence_works: bool, log: ActivityLog) -> VoiceSynthesizer {
        VoiceSynthesizer::new(
            speech,
            Arc::new(SilenceOnly {
                works: silence_works,
            }),
            "en",
            false,
            log,
        )
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "é".repeat(1500);
        let cut = truncate_chars(&text, MAX_SPOKEN_CHARS);
        assert_eq!(cut.chars().count(), 1000);
        assert_eq!(truncate_chars("short", 1000), "short");
    }

    #[tokio::test]
    async fn speech_is_preferred_and_script_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path()).await;
        let speech = Arc::new(FixedSpeech {
            bytes: 5000,
            seen: Mutex::new(Vec::new()),
        });
        let log = ActivityLog::new();
        let voice = synth(speech.clone(), true, log.clone());

        let script = ScriptText::new("word ".repeat(400));
        let track = voice
            .synthesize(&script, VoiceType::Female, &layout)
            .await
            .unwrap();

        assert_eq!(track.kind, VoiceKind::Speech);
        assert!(track.path.ends_with("voiceover.mp3"));
        assert_eq!(speech.seen.lock().unwrap()[0].chars().count(), 1000);
        assert_eq!(log.history()[0].payload["tier"], "speech");
    }

    #[tokio::test]
    async fn tiny_speech_output_falls_back_to_silence() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path()).await;
        let speech = Arc::new(FixedSpeech {
            bytes: 1000,
            seen: Mutex::new(Vec::new()),
        });
        let voice = synth(speech, true, ActivityLog::new());

        let track = voice
            .synthesize(&ScriptText::new("hello"), VoiceType::Male, &layout)
            .await
            .unwrap();
        assert_eq!(track.kind, VoiceKind::Silence);
        assert!(track.audio().is_some());
    }

    #[tokio::test]
    async fn everything_offline_leaves_a_text_marker() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path()).await;
        let voice = synth(Arc::new(OfflineSpeech), false, ActivityLog::new());

        let track = voice
            .synthesize(&ScriptText::new("the script body"), VoiceType::Male, &layout)
            .await
            .unwrap();
        assert_eq!(track.kind, VoiceKind::TextMarker);
        assert!(track.audio().is_none());
        let body = std::fs::read_to_string(&track.path).unwrap();
        assert!(body.contains("the script body"));
    }

    #[test]
    fn tiers_run_in_declared_order() {
        let voice = synth(Arc::new(OfflineSpeech), false, ActivityLog::new());
        assert_eq!(voice.tier_names(), vec!["speech", "silence", "text-marker"]);
    }
}
