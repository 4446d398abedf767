use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

use crate::model::{Style, VoiceType, MAX_DURATION_MINUTES, MIN_DURATION_MINUTES};

const MAX_KEYWORD_TOPICS: usize = 5;
const RELATED_PER_CATEGORY: usize = 3;

const STOP_WORDS: [&str; 9] = [
    "create", "make", "video", "about", "want", "need", "please", "show", "tell",
];

const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "news",
        &[
            "politics",
            "technology",
            "sports",
            "business",
            "health",
            "entertainment",
            "world news",
            "local news",
        ],
    ),
    (
        "technology",
        &[
            "artificial intelligence",
            "machine learning",
            "blockchain",
            "cybersecurity",
            "mobile apps",
            "web development",
            "cloud computing",
        ],
    ),
    (
        "science",
        &[
            "physics",
            "biology",
            "chemistry",
            "astronomy",
            "climate change",
            "medical research",
            "space exploration",
        ],
    ),
    (
        "business",
        &[
            "finance",
            "marketing",
            "entrepreneurship",
            "startups",
            "e-commerce",
            "corporate strategy",
            "leadership",
        ],
    ),
    (
        "health",
        &[
            "fitness",
            "nutrition",
            "mental health",
            "medical breakthroughs",
            "disease prevention",
            "wellness",
            "healthcare",
        ],
    ),
    (
        "sports",
        &[
            "football",
            "basketball",
            "tennis",
            "olympics",
            "athletes",
            "training",
            "sports medicine",
        ],
    ),
    (
        "entertainment",
        &[
            "movies",
            "music",
            "gaming",
            "celebrities",
            "streaming",
            "social media",
            "pop culture",
        ],
    ),
    (
        "education",
        &[
            "online learning",
            "STEM education",
            "higher education",
            "skill development",
            "teaching methods",
            "educational technology",
        ],
    ),
];

const DEFAULT_SUGGESTIONS: [&str; 5] = [
    "latest developments",
    "key insights",
    "future trends",
    "expert analysis",
    "real-world applications",
];

fn duration_regex() -> Result<&'static Regex> {
    static DURATION_RE: OnceCell<Regex> = OnceCell::new();
    DURATION_RE.get_or_try_init(|| {
        Regex::new(r"(\d+)\s*min").context("failed to compile duration regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestHints {
    pub topics: Vec<String>,
    pub duration: u32,
    pub voice_type: VoiceType,
    pub style: Style,
    pub original_input: String,
}

/// Extracts topics, duration, voice and style from free text. Unmentioned
/// fields keep the defaults (5 min, male, cinematic).
pub fn extract_hints(input: &str) -> RequestHints {
    let lower = input.to_lowercase();

    let duration = duration_regex()
        .ok()
        .and_then(|re| re.captures(&lower))
        .and_then(|c| c[1].parse::<u32>().ok())
        .map(|d| d.clamp(MIN_DURATION_MINUTES, MAX_DURATION_MINUTES))
        .unwrap_or(MIN_DURATION_MINUTES);

    let voice_type = if lower.contains("female") || lower.contains("woman") {
        VoiceType::Female
    } else {
        VoiceType::Male
    };

    let style = if lower.contains("news") {
        Style::News
    } else if lower.contains("documentary") {
        Style::Documentary
    } else {
        Style::Cinematic
    };

    let topics: Vec<String> = match CATEGORIES.iter().find(|(c, _)| lower.contains(c)) {
        Some((category, related)) => std::iter::once(*category)
            .chain(related.iter().take(RELATED_PER_CATEGORY).copied())
            .map(str::to_string)
            .collect(),
        None => input
            .split_whitespace()
            .map(|w| w.trim_matches(|c| matches!(c, '.' | ',' | '!' | '?')).to_lowercase())
            .filter(|w| w.chars().count() > 3 && !STOP_WORDS.contains(&w.as_str()))
            .take(MAX_KEYWORD_TOPICS)
            .collect(),
    };

    RequestHints {
        topics,
        duration,
        voice_type,
        style,
        original_input: input.to_string(),
    }
}

pub fn suggest_subtopics(main_topic: &str) -> Vec<&'static str> {
    let topic = main_topic.trim().to_lowercase();
    if let Some((_, related)) = CATEGORIES.iter().find(|(c, _)| *c == topic) {
        return related.to_vec();
    }
    if !topic.is_empty() {
        if let Some((_, related)) = CATEGORIES
            .iter()
            .find(|(c, _)| topic.contains(c) || c.contains(topic.as_str()))
        {
            return related.to_vec();
        }
    }
    DEFAULT_SUGGESTIONS.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_is_read_and_clamped() {
        assert_eq!(extract_hints("a 12 minute clip on tides").duration, 12);
        assert_eq!(extract_hints("90 min on tides").duration, 45);
        assert_eq!(extract_hints("2min on tides").duration, 5);
        assert_eq!(extract_hints("tides").duration, 5);
    }

    #[test]
    fn voice_and_style_keywords() {
        let hints = extract_hints("Documentary with a female narrator");
        assert_eq!(hints.voice_type, VoiceType::Female);
        assert_eq!(hints.style, Style::Documentary);

        let hints = extract_hints("latest news roundup");
        assert_eq!(hints.voice_type, VoiceType::Male);
        assert_eq!(hints.style, Style::News);
    }

    #[test]
    fn category_mention_pulls_related_topics() {
        let hints = extract_hints("Make a video about science for kids");
        assert_eq!(hints.topics, vec!["science", "physics", "biology", "chemistry"]);
    }

    #[test]
    fn keywords_skip_short_and_stop_words() {
        let hints = extract_hints("Please make a video about volcanoes, glaciers and deserts!");
        assert_eq!(hints.topics, vec!["volcanoes", "glaciers", "deserts"]);
        assert_eq!(hints.original_input, "Please make a video about volcanoes, glaciers and deserts!");
    }

    #[test]
    fn subtopics_match_exactly_then_loosely() {
        assert_eq!(suggest_subtopics("Sports")[0], "football");
        assert_eq!(suggest_subtopics("tech")[0], "artificial intelligence");
        assert_eq!(suggest_subtopics("gardening"), DEFAULT_SUGGESTIONS.to_vec());
    }
}
