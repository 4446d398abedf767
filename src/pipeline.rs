use anyhow::{Context, Result};
use crossbeam::channel::Sender;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::acquire::{ClipAcquirer, DurationRange};
use crate::activity::ActivityLog;
use crate::assemble::Assembler;
use crate::config::Config;
use crate::ffmpeg::{Encoder, Ffmpeg};
use crate::layout::RunLayout;
use crate::model::{CompletedRun, FailedRun, GenerationRequest, GenerationResult};
use crate::script::ScriptSynthesizer;
use crate::search::{MediaSearch, YtDlp};
use crate::speech::{SpeechService, TranslateTts};
use crate::voice::VoiceSynthesizer;
use crate::{logi, logok, logw};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Scripting,
    Acquiring,
    Voicing,
    Assembling,
    Done,
    Failed,
}

impl Stage {
    pub fn percent(self) -> u8 {
        match self {
            Stage::Init => 0,
            Stage::Scripting => 10,
            Stage::Acquiring => 20,
            Stage::Voicing => 60,
            Stage::Assembling => 80,
            Stage::Done | Stage::Failed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Scripting => "scripting",
            Stage::Acquiring => "acquiring",
            Stage::Voicing => "voicing",
            Stage::Assembling => "assembling",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub stage: Stage,
    pub percent: u8,
}

/// Clips requested for a video of `duration` minutes: one per 30 s of
/// runtime, never fewer than five.
pub fn clip_count(duration: u32) -> usize {
    let by_minutes = (duration / 3).max(5);
    let by_runtime = duration * 60 / 30;
    by_minutes.max(by_runtime) as usize
}

struct Progress<'a> {
    run_id: &'a str,
    tx: Option<&'a Sender<Checkpoint>>,
}

impl Progress<'_> {
    fn emit(&self, stage: Stage) {
        if let Some(tx) = self.tx {
            let _ = tx.send(Checkpoint {
                run_id: self.run_id.to_string(),
                stage,
                percent: stage.percent(),
            });
        }
    }
}

pub struct Pipeline {
    config: Config,
    log: ActivityLog,
    script: ScriptSynthesizer,
    acquirer: ClipAcquirer,
    voice: VoiceSynthesizer,
    assembler: Assembler,
}

impl Pipeline {
    pub fn new(
        config: Config,
        log: ActivityLog,
        search: Arc<dyn MediaSearch>,
        speech: Arc<dyn SpeechService>,
        encoder: Arc<dyn Encoder>,
    ) -> Self {
        let script = ScriptSynthesizer::new(log.clone());
        let acquirer = ClipAcquirer::new(
            search,
            Arc::clone(&encoder),
            log.clone(),
            config.search_backoff(),
        );
        let voice = VoiceSynthesizer::new(
            speech,
            Arc::clone(&encoder),
            config.speech_lang.clone(),
            config.speech_slow,
            log.clone(),
        );
        let assembler = Assembler::new(encoder, config.overlay_font(), log.clone());
        Self {
            config,
            log,
            script,
            acquirer,
            voice,
            assembler,
        }
    }

    /// yt-dlp search, Translate TTS and ffmpeg, as named in `config`.
    pub fn from_config(config: Config, log: ActivityLog) -> Result<Self> {
        let search = Arc::new(YtDlp::new(config.ytdlp_bin.clone()));
        let speech = Arc::new(TranslateTts::from_config(&config)?);
        let encoder = Arc::new(Ffmpeg::from_config(&config));
        Ok(Self::new(config, log, search, speech, encoder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.log
    }

    pub async fn run(&self, request: &GenerationRequest) -> GenerationResult {
        self.run_with_progress(request, None).await
    }

    /// Runs every stage in order. Failures never escape: they come back as
    /// `GenerationResult::Error` with the request echoed.
    pub async fn run_with_progress(
        &self,
        request: &GenerationRequest,
        progress: Option<&Sender<Checkpoint>>,
    ) -> GenerationResult {
        let layout = RunLayout::new(&self.config);
        let progress = Progress {
            run_id: layout.run_id(),
            tx: progress,
        };

        let result = match self.execute(request, &layout, &progress).await {
            Ok(run) => {
                progress.emit(Stage::Done);
                logok(format!(
                    "Run {} completed: {}",
                    run.run_id,
                    run.video_path.display()
                ));
                GenerationResult::Completed(run)
            }
            Err(err) => {
                progress.emit(Stage::Failed);
                logw(format!("Run {} failed: {:#}", layout.run_id(), err));
                GenerationResult::Error(FailedRun {
                    message: format!("{:#}", err),
                    request: request.clone(),
                })
            }
        };

        if !self.config.keep_staging {
            if let Err(err) = layout.discard_staging().await {
                logw(format!("{:#}", err));
            }
        }

        self.log.record(
            "pipeline",
            "run",
            json!({
                "run_id": layout.run_id(),
                "status": result.status(),
                "topics": request.topics(),
                "duration": request.duration(),
                "style": request.style().as_str(),
                "video_path": result.video_path().map(|p| p.display().to_string()),
            }),
        );
        result
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        layout: &RunLayout,
        progress: &Progress<'_>,
    ) -> Result<CompletedRun> {
        progress.emit(Stage::Init);
        request.validate()?;
        layout.prepare().await.context("Failed to prepare run directories")?;
        logi(format!(
            "Run {}: {} min {} video on {}",
            layout.run_id(),
            request.duration(),
            request.style(),
            request.topics().join(", ")
        ));

        progress.emit(Stage::Scripting);
        let script = self
            .script
            .generate(request.topics(), request.duration(), request.style());

        progress.emit(Stage::Acquiring);
        let clips = self
            .acquirer
            .acquire(
                layout,
                request.topics(),
                clip_count(request.duration()),
                DurationRange::default(),
            )
            .await;

        progress.emit(Stage::Voicing);
        let voice = self
            .voice
            .synthesize(&script, request.voice_type(), layout)
            .await?;

        progress.emit(Stage::Assembling);
        let artifact = self
            .assembler
            .assemble(layout, &clips, &voice, &script, request)
            .await?;

        Ok(CompletedRun {
            run_id: layout.run_id().to_string(),
            script: script.into_string(),
            clips: clips.paths(),
            real_clips: clips.real_count(),
            placeholder_clips: clips.placeholder_count(),
            voice: voice.path,
            voice_kind: voice.kind,
            video_path: artifact.path,
            output_kind: artifact.kind,
            request: request.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_count_follows_runtime() {
        assert_eq!(clip_count(5), 10);
        assert_eq!(clip_count(12), 24);
        assert_eq!(clip_count(45), 90);
        assert_eq!(clip_count(1), 5);
    }

    #[test]
    fn stage_percentages_are_monotonic() {
        let stages = [
            Stage::Init,
            Stage::Scripting,
            Stage::Acquiring,
            Stage::Voicing,
            Stage::Assembling,
            Stage::Done,
        ];
        let pcts: Vec<u8> = stages.iter().map(|s| s.percent()).collect();
        assert_eq!(pcts, vec![0, 10, 20, 60, 80, 100]);
    }

    #[test]
    fn pipeline_is_shareable_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Pipeline>();
    }
}
