use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VoiceType {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Presenter {
    None,
    Expert,
    Narrator,
    Text,
    Avatar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Cinematic,
    Documentary,
    News,
    Educational,
}

impl VoiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            VoiceType::Male => "male",
            VoiceType::Female => "female",
        }
    }
}

impl Presenter {
    pub fn as_str(self) -> &'static str {
        match self {
            Presenter::None => "none",
            Presenter::Expert => "expert",
            Presenter::Narrator => "narrator",
            Presenter::Text => "text",
            Presenter::Avatar => "avatar",
        }
    }
}

impl Style {
    pub fn as_str(self) -> &'static str {
        match self {
            Style::Cinematic => "cinematic",
            Style::Documentary => "documentary",
            Style::News => "news",
            Style::Educational => "educational",
        }
    }

    /// Background color for synthetic visuals (ffmpeg color syntax).
    pub fn backdrop_color(self) -> &'static str {
        match self {
            Style::Cinematic => "0x101018",
            Style::Documentary => "0x1e2a1e",
            Style::News => "0x0b2545",
            Style::Educational => "0x2b2d42",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(VoiceType, Presenter, Style);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("topic list is empty")]
    EmptyTopics,
    #[error("duration {0} min is outside 5..=45")]
    DurationOutOfRange(u32),
}

/// One video job. Construction never fails; `validate` is run by the pipeline
/// so malformed payloads still come back as an error result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RequestPayload")]
pub struct GenerationRequest {
    topics: Vec<String>,
    duration: u32,
    voice_type: VoiceType,
    presenter: Presenter,
    style: Style,
}

#[derive(Deserialize)]
struct RequestPayload {
    topics: Vec<String>,
    duration: u32,
    voice_type: VoiceType,
    presenter: Presenter,
    style: Style,
}

impl From<RequestPayload> for GenerationRequest {
    fn from(p: RequestPayload) -> Self {
        Self::new(p.topics, p.duration, p.voice_type, p.presenter, p.style)
    }
}

impl GenerationRequest {
    pub fn new(
        topics: Vec<String>,
        duration: u32,
        voice_type: VoiceType,
        presenter: Presenter,
        style: Style,
    ) -> Self {
        let topics = topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            topics,
            duration,
            voice_type,
            presenter,
            style,
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.topics.iter().all(|t| t.trim().is_empty()) {
            return Err(RequestError::EmptyTopics);
        }
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration) {
            return Err(RequestError::DurationOutOfRange(self.duration));
        }
        Ok(())
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn voice_type(&self) -> VoiceType {
        self.voice_type
    }

    pub fn presenter(&self) -> Presenter {
        self.presenter
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn target_seconds(&self) -> u32 {
        self.duration * 60
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScriptText(String);

impl ScriptText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ScriptText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A search result while it is being downloaded and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipCandidate {
    pub source_query: String,
    pub url: String,
    pub local_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
}

impl ClipCandidate {
    pub fn new(source_query: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            source_query: source_query.into(),
            url: url.into(),
            local_path: None,
            size_bytes: None,
        }
    }

    pub fn is_valid(&self, min_bytes: u64) -> bool {
        self.local_path.is_some() && self.size_bytes.is_some_and(|size| size > min_bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSource {
    Primary,
    Alternative,
    Placeholder,
    TextMarker,
}

impl ClipSource {
    pub fn is_real(self) -> bool {
        matches!(self, ClipSource::Primary | ClipSource::Alternative)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clip {
    pub path: PathBuf,
    pub source: ClipSource,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSet {
    pub clips: Vec<Clip>,
}

impl ClipSet {
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn real_count(&self) -> usize {
        self.clips.iter().filter(|c| c.source.is_real()).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.len() - self.real_count()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.clips.iter().map(|c| c.path.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceKind {
    Speech,
    Silence,
    TextMarker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceTrack {
    pub path: PathBuf,
    pub kind: VoiceKind,
}

impl VoiceTrack {
    /// The track as an audio input, or `None` for a text marker.
    pub fn audio(&self) -> Option<&Path> {
        match self.kind {
            VoiceKind::Speech | VoiceKind::Silence => Some(&self.path),
            VoiceKind::TextMarker => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    CompiledVideo,
    TextBurnVideo,
    Document,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::CompiledVideo | ArtifactKind::TextBurnVideo => "mp4",
            ArtifactKind::Document => "html",
        }
    }

    pub fn is_playable(self) -> bool {
        !matches!(self, ArtifactKind::Document)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedRun {
    pub run_id: String,
    pub script: String,
    pub clips: Vec<PathBuf>,
    pub real_clips: usize,
    pub placeholder_clips: usize,
    pub voice: PathBuf,
    pub voice_kind: VoiceKind,
    pub video_path: PathBuf,
    pub output_kind: ArtifactKind,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRun {
    pub message: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

/// Uniform contract handed back to every caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationResult {
    Completed(CompletedRun),
    Error(FailedRun),
}

impl GenerationResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, GenerationResult::Completed(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            GenerationResult::Completed(_) => "completed",
            GenerationResult::Error(_) => "error",
        }
    }

    pub fn request(&self) -> &GenerationRequest {
        match self {
            GenerationResult::Completed(run) => &run.request,
            GenerationResult::Error(run) => &run.request,
        }
    }

    pub fn video_path(&self) -> Option<&Path> {
        match self {
            GenerationResult::Completed(run) => Some(&run.video_path),
            GenerationResult::Error(_) => None,
        }
    }
}
