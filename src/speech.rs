use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::config::Config;
use crate::logw;
use crate::model::VoiceType;

/// Longest text the translate endpoint accepts in one request.
const CHUNK_CHARS: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechRequest<'a> {
    pub text: &'a str,
    pub lang: &'a str,
    pub slow: bool,
    pub voice: VoiceType,
}

#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Writes an mp3 rendition of `req.text` to `out`.
    async fn synthesize(&self, req: &SpeechRequest<'_>, out: &Path) -> Result<()>;
}

/// Google Translate's public TTS endpoint. The voice type selects the regional
/// domain, which changes the accent.
#[derive(Debug, Clone)]
pub struct TranslateTts {
    client: Client,
    endpoint: String,
}

fn regional_domain(voice: VoiceType) -> &'static str {
    match voice {
        VoiceType::Male => "co.uk",
        VoiceType::Female => "com",
    }
}

/// Splits text into pieces of at most `max_chars` characters at word
/// boundaries. Single words longer than the limit are cut.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            chunks.push(head);
        }

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

impl TranslateTts {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.speech_endpoint.clone())
    }

    fn endpoint_for(&self, voice: VoiceType) -> String {
        self.endpoint.replace("{tld}", regional_domain(voice))
    }
}

#[async_trait]
impl SpeechService for TranslateTts {
    async fn synthesize(&self, req: &SpeechRequest<'_>, out: &Path) -> Result<()> {
        let chunks = chunk_text(req.text, CHUNK_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("nothing to speak");
        }

        let url = self.endpoint_for(req.voice);
        let total = chunks.len().to_string();
        let speed = if req.slow { "0.3" } else { "1" };
        let mut audio = Vec::new();

        for (idx, chunk) in chunks.iter().enumerate() {
            let idx_s = idx.to_string();
            let len_s = chunk.chars().count().to_string();
            let resp = self
                .client
                .get(&url)
                .query(&[
                    ("ie", "UTF-8"),
                    ("q", chunk.as_str()),
                    ("tl", req.lang),
                    ("total", total.as_str()),
                    ("idx", idx_s.as_str()),
                    ("textlen", len_s.as_str()),
                    ("client", "tw-ob"),
                    ("ttsspeed", speed),
                ])
                .send()
                .await
                .context("Speech request failed")?;

            if !resp.status().is_success() {
                logw(format!(
                    "Speech service HTTP {} on chunk {}/{}",
                    resp.status().as_u16(),
                    idx + 1,
                    chunks.len()
                ));
                anyhow::bail!("speech service returned HTTP {}", resp.status().as_u16());
            }

            let bytes = resp.bytes().await.context("Speech response read failed")?;
            audio.extend_from_slice(&bytes);
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(out, &audio)
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_respect_word_boundaries() {
        let text = "one two three four five six seven";
        let chunks = chunk_text(text, 10);
        assert_eq!(chunks, vec!["one two", "three four", "five six", "seven"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn oversized_words_are_cut() {
        let chunks = chunk_text("ab abcdefghij xyz", 4);
        assert_eq!(chunks, vec!["ab", "abcd", "efgh", "ij", "xyz"]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("   ", 100).is_empty());
    }

    #[test]
    fn voice_type_picks_regional_domain() {
        let tts = TranslateTts::new("https://translate.google.{tld}/translate_tts").unwrap();
        assert_eq!(
            tts.endpoint_for(VoiceType::Male),
            "https://translate.google.co.uk/translate_tts"
        );
        assert_eq!(
            tts.endpoint_for(VoiceType::Female),
            "https://translate.google.com/translate_tts"
        );
    }
}
