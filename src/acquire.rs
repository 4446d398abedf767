use anyhow::Context;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

use crate::activity::ActivityLog;
use crate::fallback::{FallbackChain, OrUnavailable, Tier, Unavailable};
use crate::ffmpeg::Encoder;
use crate::layout::RunLayout;
use crate::model::{Clip, ClipCandidate, ClipSet, ClipSource};
use crate::search::{DownloadOptions, MediaSearch, SearchHit};
use crate::{logi, logok, logw};

pub const PRIMARY_MIN_BYTES: u64 = 100_000;
pub const ALTERNATIVE_MIN_BYTES: u64 = 50_000;

pub const PRIMARY_SUFFIXES: [&str; 8] = [
    "educational video",
    "tutorial",
    "explanation",
    "documentary clip",
    "news report",
    "overview",
    "guide",
    "introduction",
];

pub const ALTERNATIVE_SUFFIXES: [&str; 5] =
    ["video", "footage", "explained", "highlights", "facts"];

const PRIMARY_HITS_PER_QUERY: usize = 3;
const ALTERNATIVE_HITS_PER_QUERY: usize = 1;
const PLACEHOLDER_SECONDS: f64 = 5.0;
const PLACEHOLDER_SIZE: (u32, u32) = (640, 360);
const PLACEHOLDER_COLORS: [&str; 4] = ["0x1f3b73", "0x3b1f73", "0x1f7350", "0x73521f"];

/// Acceptable clip length in seconds. Downloads are cut at `max`; hits the
/// index reports as shorter than `min` are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
}

impl Default for DurationRange {
    fn default() -> Self {
        Self { min: 10, max: 45 }
    }
}

pub fn build_query_pool(topics: &[String], suffixes: &[&str]) -> Vec<String> {
    topics
        .iter()
        .flat_map(|topic| suffixes.iter().map(move |suffix| format!("{topic} {suffix}")))
        .collect()
}

/// Random order, no repeats until the pool is used up.
pub struct QueryRotation {
    pool: Vec<String>,
    used: HashSet<usize>,
    rng: StdRng,
}

impl QueryRotation {
    pub fn new(pool: Vec<String>, rng: StdRng) -> Self {
        Self {
            pool,
            used: HashSet::new(),
            rng,
        }
    }

    pub fn next_query(&mut self) -> Option<String> {
        if self.pool.is_empty() {
            return None;
        }
        if self.used.len() >= self.pool.len() {
            self.used.clear();
        }
        let unused: Vec<usize> = (0..self.pool.len())
            .filter(|i| !self.used.contains(i))
            .collect();
        let pick = unused[self.rng.gen_range(0..unused.len())];
        self.used.insert(pick);
        Some(self.pool[pick].clone())
    }
}

/// Deletes the download unless it clears `min_bytes`.
pub async fn accept_candidate(candidate: &mut ClipCandidate, min_bytes: u64) -> bool {
    let Some(path) = candidate.local_path.clone() else {
        return false;
    };
    candidate.size_bytes = fs::metadata(&path).await.ok().map(|m| m.len());
    if candidate.is_valid(min_bytes) {
        return true;
    }
    logw(format!(
        "Rejected {} ({} bytes, need > {})",
        path.display(),
        candidate.size_bytes.unwrap_or(0),
        min_bytes
    ));
    let _ = fs::remove_file(&path).await;
    false
}

struct SearchTier {
    source: ClipSource,
    hits_per_query: usize,
    min_bytes: u64,
    opts: DownloadOptions,
}

#[derive(Debug, Clone)]
struct PlaceholderJob {
    index: usize,
    topic: String,
    video_path: PathBuf,
    marker_path: PathBuf,
}

struct ColorCardTier {
    encoder: Arc<dyn Encoder>,
}

#[async_trait]
impl Tier<PlaceholderJob, Clip> for ColorCardTier {
    fn name(&self) -> &'static str {
        "color-card"
    }

    async fn attempt(&self, job: &PlaceholderJob) -> Result<Clip, Unavailable> {
        let color = PLACEHOLDER_COLORS[job.index % PLACEHOLDER_COLORS.len()];
        self.encoder
            .color_clip(color, PLACEHOLDER_SIZE, PLACEHOLDER_SECONDS, &job.video_path)
            .await
            .or_unavailable(self.name())?;
        let size = file_size(&job.video_path).await;
        if size == 0 {
            return Err(Unavailable::new(self.name(), "encoder wrote no data"));
        }
        Ok(Clip {
            path: job.video_path.clone(),
            source: ClipSource::Placeholder,
            size_bytes: size,
        })
    }
}

struct TextMarkerTier;

#[async_trait]
impl Tier<PlaceholderJob, Clip> for TextMarkerTier {
    fn name(&self) -> &'static str {
        "text-marker"
    }

    async fn attempt(&self, job: &PlaceholderJob) -> Result<Clip, Unavailable> {
        let body = format!(
            "PLACEHOLDER CLIP {}\ntopic: {}\nreason: no footage could be downloaded or rendered\n",
            job.index + 1,
            job.topic
        );
        fs::write(&job.marker_path, &body)
            .await
            .with_context(|| format!("Failed to write {}", job.marker_path.display()))
            .or_unavailable(self.name())?;
        Ok(Clip {
            path: job.marker_path.clone(),
            source: ClipSource::TextMarker,
            size_bytes: body.len() as u64,
        })
    }
}

async fn file_size(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

pub struct ClipAcquirer {
    search: Arc<dyn MediaSearch>,
    placeholders: FallbackChain<PlaceholderJob, Clip>,
    log: ActivityLog,
    backoff: Duration,
    seed: Option<u64>,
}

impl ClipAcquirer {
    pub fn new(
        search: Arc<dyn MediaSearch>,
        encoder: Arc<dyn Encoder>,
        log: ActivityLog,
        backoff: Duration,
    ) -> Self {
        let placeholders = FallbackChain::new("placeholder")
            .then(ColorCardTier { encoder })
            .then(TextMarkerTier);
        Self {
            search,
            placeholders,
            log,
            backoff,
            seed: None,
        }
    }

    /// Fixes the query rotation order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub async fn acquire(
        &self,
        layout: &RunLayout,
        topics: &[String],
        num_clips: usize,
        range: DurationRange,
    ) -> ClipSet {
        let num_clips = num_clips.max(1);
        let mut clips = Vec::with_capacity(num_clips);

        let primary_pool = build_query_pool(topics, &PRIMARY_SUFFIXES);
        let rounds = (num_clips * 3).min(primary_pool.len());
        let mut rotation = QueryRotation::new(primary_pool, self.rng());
        let primary = SearchTier {
            source: ClipSource::Primary,
            hits_per_query: PRIMARY_HITS_PER_QUERY,
            min_bytes: PRIMARY_MIN_BYTES,
            opts: DownloadOptions::PRIMARY.with_section(range.max),
        };
        logi(format!(
            "Searching for {} clips ({} primary rounds)",
            num_clips, rounds
        ));
        for _ in 0..rounds {
            if clips.len() >= num_clips {
                break;
            }
            let Some(query) = rotation.next_query() else {
                break;
            };
            self.search_round(&primary, layout, &query, range, num_clips, &mut clips)
                .await;
        }
        let from_primary = clips.len();

        if clips.len() < num_clips {
            let shortfall = num_clips - clips.len();
            let mut rotation =
                QueryRotation::new(build_query_pool(topics, &ALTERNATIVE_SUFFIXES), self.rng());
            let alternative = SearchTier {
                source: ClipSource::Alternative,
                hits_per_query: ALTERNATIVE_HITS_PER_QUERY,
                min_bytes: ALTERNATIVE_MIN_BYTES,
                opts: DownloadOptions::ALTERNATIVE.with_section(range.max),
            };
            logi(format!(
                "Primary search short by {}; trying alternative queries",
                shortfall
            ));
            for _ in 0..shortfall {
                if clips.len() >= num_clips {
                    break;
                }
                let Some(query) = rotation.next_query() else {
                    break;
                };
                self.search_round(&alternative, layout, &query, range, num_clips, &mut clips)
                    .await;
            }
        }
        let from_alternative = clips.len() - from_primary;

        if clips.is_empty() {
            logw(format!(
                "No footage found; generating {} placeholders",
                num_clips
            ));
            clips = self.placeholders(layout, topics, num_clips).await;
        }

        let set = ClipSet { clips };
        logok(format!(
            "Clips ready: {} real, {} placeholder",
            set.real_count(),
            set.placeholder_count()
        ));
        self.log.record(
            "acquire",
            "acquire",
            json!({
                "requested": num_clips,
                "primary": from_primary,
                "alternative": from_alternative,
                "real": set.real_count(),
                "placeholder": set.placeholder_count(),
            }),
        );
        set
    }

    async fn search_round(
        &self,
        tier: &SearchTier,
        layout: &RunLayout,
        query: &str,
        range: DurationRange,
        num_clips: usize,
        clips: &mut Vec<Clip>,
    ) {
        let before = clips.len();
        match self.search.search(query, tier.hits_per_query).await {
            Ok(hits) => {
                for hit in hits.into_iter().take(tier.hits_per_query) {
                    if clips.len() >= num_clips {
                        break;
                    }
                    if let Some(clip) = self.try_hit(tier, layout, query, &hit, range, clips.len()).await {
                        clips.push(clip);
                    }
                }
            }
            Err(err) => logw(format!("Search failed for {:?}: {:#}", query, err)),
        }

        if clips.len() == before && !self.backoff.is_zero() {
            tokio::time::sleep(self.backoff).await;
        }
    }

    async fn try_hit(
        &self,
        tier: &SearchTier,
        layout: &RunLayout,
        query: &str,
        hit: &SearchHit,
        range: DurationRange,
        index: usize,
    ) -> Option<Clip> {
        if let Some(duration) = hit.duration {
            if duration < range.min as f64 {
                logi(format!(
                    "Skipping {} ({:.0}s shorter than {}s)",
                    hit.url, duration, range.min
                ));
                return None;
            }
        }

        let dest = layout.clip_path(tier.source, index);
        let mut candidate = ClipCandidate::new(query, hit.url.clone());
        match self.search.download(hit, &tier.opts, &dest).await {
            Ok(path) => candidate.local_path = Some(path),
            Err(err) => {
                logw(format!("Download failed for {}: {:#}", hit.url, err));
                let _ = fs::remove_file(&dest).await;
                return None;
            }
        }

        if !accept_candidate(&mut candidate, tier.min_bytes).await {
            return None;
        }

        let path = candidate.local_path?;
        let size_bytes = candidate.size_bytes.unwrap_or(0);
        logok(format!(
            "Clip {} from {:?}: {} ({} bytes)",
            index + 1,
            candidate.source_query,
            path.display(),
            size_bytes
        ));
        Some(Clip {
            path,
            source: tier.source,
            size_bytes,
        })
    }

    async fn placeholders(
        &self,
        layout: &RunLayout,
        topics: &[String],
        num_clips: usize,
    ) -> Vec<Clip> {
        let mut clips = Vec::with_capacity(num_clips);
        for index in 0..num_clips {
            let topic = if topics.is_empty() {
                "untitled".to_string()
            } else {
                topics[index % topics.len()].clone()
            };
            let job = PlaceholderJob {
                index,
                topic,
                video_path: layout.clip_path(ClipSource::Placeholder, index),
                marker_path: layout.clip_path(ClipSource::TextMarker, index),
            };
            match self.placeholders.run(&job).await {
                Ok(made) => clips.push(made.value),
                Err(err) => logw(format!("Placeholder {} failed: {}", index + 1, err)),
            }
        }
        clips
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OutputNaming};
    use crate::ffmpeg::{MediaInfo, SegmentPlan, TextCard};
    use anyhow::Result;
    use std::sync::Mutex;

    /// Fails every search and remembers what was asked.
    #[derive(Default)]
    struct DeadSearch {
        asked: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl MediaSearch for DeadSearch {
        async fn search(&self, query: &str, max: usize) -> Result<Vec<SearchHit>> {
            self.asked.lock().unwrap().push((query.to_string(), max));
            anyhow::bail!("index offline")
        }

        async fn download(&self, _h: &SearchHit, _o: &DownloadOptions, _d: &Path) -> Result<PathBuf> {
            anyhow::bail!("index offline")
        }
    }

    struct BigFiles;

    #[async_trait]
    impl MediaSearch for BigFiles {
        async fn search(&self, query: &str, max: usize) -> Result<Vec<SearchHit>> {
            Ok((0..max)
                .map(|i| SearchHit {
                    url: format!("https://video.test/{query}/{i}"),
                    title: query.to_string(),
                    duration: Some(30.0),
                })
                .collect())
        }

        async fn download(&self, _h: &SearchHit, _o: &DownloadOptions, dest: &Path) -> Result<PathBuf> {
            fs::write(dest, vec![0u8; 200_000]).await?;
            Ok(dest.to_path_buf())
        }
    }

    struct NoEncoder;

    #[async_trait]
    impl Encoder for NoEncoder {
        async fn probe(&self, _input: &Path) -> Result<MediaInfo> {
            anyhow::bail!("ffprobe: not found")
        }
        async fn color_clip(&self, _c: &str, _s: (u32, u32), _secs: f64, _out: &Path) -> Result<()> {
            anyhow::bail!("ffmpeg: not found")
        }
        async fn silence(&self, _seconds: f64, _out: &Path) -> Result<()> {
            anyhow::bail!("ffmpeg: not found")
        }
        async fn segment(&self, _i: &Path, _p: &SegmentPlan, _out: &Path) -> Result<()> {
            anyhow::bail!("ffmpeg: not found")
        }
        async fn concat(&self, _s: &[PathBuf], _out: &Path) -> Result<()> {
            anyhow::bail!("ffmpeg: not found")
        }
        async fn finalize(&self, _v: &Path, _a: Option<&Path>, _t: f64, _out: &Path) -> Result<()> {
            anyhow::bail!("ffmpeg: not found")
        }
        async fn text_card(&self, _c: &TextCard, _a: Option<&Path>, _out: &Path) -> Result<()> {
            anyhow::bail!("ffmpeg: not found")
        }
    }

    async fn staged(dir: &Path) -> RunLayout {
        let cfg = Config {
            output_naming: OutputNaming::Deterministic,
            ..Config::default()
        }
        .rooted_at(dir);
        let layout = RunLayout::with_run_id(&cfg, "t".into());
        layout.prepare().await.unwrap();
        layout
    }

    fn acquirer(search: Arc<dyn MediaSearch>, backoff: Duration) -> ClipAcquirer {
        ClipAcquirer::new(search, Arc::new(NoEncoder), ActivityLog::new(), backoff)
    }

    #[tokio::test(start_paused = true)]
    async fn every_empty_round_is_followed_by_a_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let layout = staged(dir.path()).await;
        let search = Arc::new(DeadSearch::default());
        let backoff = Duration::from_millis(250);
        let acquirer = acquirer(search.clone(), backoff);

        let start = tokio::time::Instant::now();
        let set = acquirer
            .acquire(&layout, &topics(&["tides"]), 10, DurationRange::default())
            .await;
        let elapsed = start.elapsed();

        // 8 primary queries for one topic, then one alternative round per missing clip.
        let rounds = search.asked.lock().unwrap().len();
        assert_eq!(rounds, 18);
        assert!(elapsed >= backoff * 18, "elapsed {elapsed:?}");
        assert!(elapsed < backoff * 19, "elapsed {elapsed:?}");
        assert_eq!(set.placeholder_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn productive_rounds_do_not_back_off() {
        let dir = tempfile::tempdir().unwrap();
        let layout = staged(dir.path()).await;
        let backoff = Duration::from_secs(1);
        let acquirer = acquirer(Arc::new(BigFiles), backoff);

        let start = tokio::time::Instant::now();
        let set = acquirer
            .acquire(&layout, &topics(&["tides"]), 5, DurationRange::default())
            .await;

        assert_eq!(set.real_count(), 5);
        assert!(start.elapsed() < backoff);
    }

    #[tokio::test]
    async fn alternative_queries_rotate_across_topics() {
        let mut first_topics = HashSet::new();
        for seed in 0..16 {
            let dir = tempfile::tempdir().unwrap();
            let layout = staged(dir.path()).await;
            let search = Arc::new(DeadSearch::default());
            acquirer(search.clone(), Duration::ZERO)
                .with_seed(seed)
                .acquire(&layout, &topics(&["alpha", "beta"]), 1, DurationRange::default())
                .await;

            let asked = search.asked.lock().unwrap().clone();
            let alternative: Vec<&String> = asked
                .iter()
                .filter(|(_, max)| *max == ALTERNATIVE_HITS_PER_QUERY)
                .map(|(q, _)| q)
                .collect();
            assert_eq!(alternative.len(), 1);
            let topic = alternative[0].split(' ').next().unwrap().to_string();
            first_topics.insert(topic);
        }
        assert!(first_topics.contains("alpha"));
        assert!(first_topics.contains("beta"));
    }

    fn topics(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pool_crosses_topics_with_suffixes() {
        let pool = build_query_pool(&topics(&["ai", "ml"]), &PRIMARY_SUFFIXES);
        assert_eq!(pool.len(), 16);
        assert_eq!(pool[0], "ai educational video");
        assert_eq!(pool[15], "ml introduction");
    }

    #[test]
    fn rotation_uses_every_query_before_repeating() {
        let pool = build_query_pool(&topics(&["a"]), &ALTERNATIVE_SUFFIXES);
        let mut rotation = QueryRotation::new(pool.clone(), StdRng::seed_from_u64(7));
        let first: HashSet<String> = (0..5).filter_map(|_| rotation.next_query()).collect();
        assert_eq!(first.len(), 5);
        let again = rotation.next_query().unwrap();
        assert!(pool.contains(&again));
    }

    #[test]
    fn empty_pool_yields_nothing() {
        let mut rotation = QueryRotation::new(Vec::new(), StdRng::seed_from_u64(1));
        assert_eq!(rotation.next_query(), None);
    }

    async fn candidate_with_size(dir: &Path, name: &str, size: usize) -> ClipCandidate {
        let path = dir.join(name);
        fs::write(&path, vec![0u8; size]).await.unwrap();
        let mut candidate = ClipCandidate::new("q", "https://example.com");
        candidate.local_path = Some(path);
        candidate
    }

    #[tokio::test]
    async fn primary_floor_is_exclusive_at_100kb() {
        let dir = tempfile::tempdir().unwrap();

        let mut small = candidate_with_size(dir.path(), "small.mp4", 99_999).await;
        assert!(!accept_candidate(&mut small, PRIMARY_MIN_BYTES).await);
        assert_eq!(small.size_bytes, Some(99_999));
        assert!(!dir.path().join("small.mp4").exists());

        let mut big = candidate_with_size(dir.path(), "big.mp4", 100_001).await;
        assert!(accept_candidate(&mut big, PRIMARY_MIN_BYTES).await);
        assert!(dir.path().join("big.mp4").exists());
    }

    #[tokio::test]
    async fn alternative_floor_accepts_smaller_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut clip = candidate_with_size(dir.path(), "alt.mp4", 60_000).await;
        assert!(accept_candidate(&mut clip, ALTERNATIVE_MIN_BYTES).await);
    }

    #[tokio::test]
    async fn missing_download_is_rejected() {
        let mut candidate = ClipCandidate::new("q", "https://example.com");
        candidate.local_path = Some(PathBuf::from("/nonexistent/clip.mp4"));
        assert!(!accept_candidate(&mut candidate, PRIMARY_MIN_BYTES).await);
        assert_eq!(candidate.size_bytes, None);
    }
}
