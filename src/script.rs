use serde_json::json;

use crate::activity::ActivityLog;
use crate::model::{ScriptText, Style};

const SENTENCES_PER_PARAGRAPH: usize = 4;
const PARAGRAPHS_PER_CHAPTER: usize = 2;
const LONG_FORM_THRESHOLD: u32 = 10;

/// Narration pace; longer videos are read slightly faster.
pub fn words_per_minute(duration: u32) -> u32 {
    if duration <= 10 {
        120
    } else if duration <= 20 {
        130
    } else {
        140
    }
}

pub fn target_word_count(duration: u32) -> usize {
    (words_per_minute(duration) * duration) as usize
}

fn filler(style: Style) -> &'static str {
    match style {
        Style::Cinematic | Style::News => "technology",
        Style::Documentary => "innovation",
        Style::Educational => "every aspect of modern life",
    }
}

fn is_long_form(style: Style, duration: u32) -> bool {
    style != Style::News && duration > LONG_FORM_THRESHOLD
}

fn opening(style: Style, long_form: bool) -> &'static str {
    match (style, long_form) {
        (Style::Cinematic, false) => {
            "In a world transformed by {t0}, every frame tells a story worth watching.\n\n\
             What begins as a simple idea grows into a force that reshapes the way we live. \
             And standing right beside it is {t1}.\n\n\
             This is the story of that change."
        }
        (Style::Cinematic, true) => {
            "Chapter One: The Spark.\n\n\
             Every revolution starts quietly. For {t0}, it started with a question nobody could answer.\n\n\
             Chapter Two: The Collision.\n\n\
             Then {t0} met {t1}, and nothing stayed the same.\n\n\
             Chapter Three: The Road Ahead.\n\n\
             What follows is the journey from that first spark to the world being built right now."
        }
        (Style::Documentary, false) => {
            "This film explores {t0}, a subject that touches more lives than most of us realize.\n\n\
             Along the way we will see how {t0} connects with {t1}, and what that means for the years ahead."
        }
        (Style::Documentary, true) => {
            "Part One: Origins.\n\n\
             Long before {t0} became a household term, a small group of people began asking hard questions.\n\n\
             Part Two: Convergence.\n\n\
             As {t0} matured, it collided with {t1}, and the pace of change accelerated.\n\n\
             Part Three: Impact.\n\n\
             Today the consequences can be seen everywhere, and this film follows them closely."
        }
        (Style::Educational, false) => {
            "Welcome to this lesson on {t0}.\n\n\
             By the end, you will understand the key ideas behind {t0} and how it relates to {t1}. \
             Let's start with the basics."
        }
        (Style::Educational, true) => {
            "Module One: Foundations of {t0}.\n\n\
             We begin with the core vocabulary and the problems {t0} was designed to solve.\n\n\
             Module Two: {t0} and {t1}.\n\n\
             Next we connect these ideas to {t1} and look at how the two influence each other.\n\n\
             Module Three: Putting It Into Practice.\n\n\
             Finally, we work through examples so the concepts stick."
        }
        (Style::News, _) => {
            "Good evening. Tonight's top story: {t0}.\n\n\
             New developments are changing the conversation, and experts are watching closely. \
             In related news, {t1} continues to make headlines.\n\n\
             Here is the full report."
        }
    }
}

fn segments(style: Style) -> &'static [&'static str] {
    match style {
        Style::Cinematic => &[
            "The camera lingers on {topic}, and the stakes become clear.",
            "Behind every breakthrough in {topic} are people who refused to give up.",
            "Some saw {topic} as a threat, while others saw a promise.",
            "The quiet moments matter too, when {topic} simply becomes part of everyday life.",
            "Nobody could have predicted how far {topic} would travel.",
            "Each new chapter of {topic} raises the bar for what comes next.",
        ],
        Style::Documentary => &[
            "Researchers studying {topic} have documented steady change over the past decade.",
            "To understand {topic}, we have to look at where it came from.",
            "Experts describe {topic} as one of the defining subjects of our time.",
            "The evidence around {topic} tells a more nuanced story than the headlines suggest.",
            "Communities around the world experience {topic} in very different ways.",
            "Archival records show how public understanding of {topic} has evolved.",
        ],
        Style::News => &[
            "Analysts say {topic} will remain a key issue in the weeks ahead.",
            "Officials are monitoring developments in {topic} closely.",
            "New figures released today shed fresh light on {topic}.",
            "Reaction to the latest news about {topic} has been swift.",
            "Our correspondents continue to follow the story of {topic}.",
            "Industry leaders weighed in on {topic} earlier today.",
        ],
        Style::Educational => &[
            "A useful way to think about {topic} is to break it into smaller ideas.",
            "Let's look at a concrete example of {topic} in action.",
            "One common misconception about {topic} is that it only matters to specialists.",
            "Try to connect what you know about {topic} to something you use every day.",
            "Before moving on, let's review the key terms related to {topic}.",
            "Understanding {topic} builds a foundation for more advanced material.",
        ],
    }
}

fn chapter_heading(style: Style, number: usize, topic: &str) -> String {
    match style {
        Style::Cinematic => format!("Chapter {number}: {topic}."),
        Style::Documentary => format!("Part {number}: {topic}."),
        Style::Educational => format!("Module {number}: {topic}."),
        Style::News => String::new(),
    }
}

fn closing(style: Style) -> &'static str {
    match style {
        Style::Cinematic => "And so the story of {t0} continues, one frame at a time.",
        Style::Documentary => {
            "The story of {t0} and {t1} is still being written. Thank you for watching."
        }
        Style::News => {
            "That's all for tonight's report on {t0}. Stay informed, and we'll see you next time."
        }
        Style::Educational => {
            "That wraps up our lesson on {t0}. Keep exploring, and keep asking questions."
        }
    }
}

fn fill(template: &str, t0: &str, t1: &str) -> String {
    template.replace("{t0}", t0).replace("{t1}", t1)
}

fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Template-driven narration writer.
#[derive(Debug, Clone)]
pub struct ScriptSynthesizer {
    log: ActivityLog,
}

impl ScriptSynthesizer {
    pub fn new(log: ActivityLog) -> Self {
        Self { log }
    }

    pub fn generate(&self, topics: &[String], duration: u32, style: Style) -> ScriptText {
        let script = compose(topics, duration, style);
        self.log.record(
            "script",
            "generate",
            json!({
                "topics": topics,
                "duration": duration,
                "style": style.as_str(),
                "wpm": words_per_minute(duration),
                "words": script.word_count(),
            }),
        );
        script
    }
}

/// Builds the narration without touching the activity log.
pub fn compose(topics: &[String], duration: u32, style: Style) -> ScriptText {
    let fallback = filler(style);
    let t0 = topics.first().map(String::as_str).unwrap_or(fallback);
    let t1 = topics.get(1).map(String::as_str).unwrap_or(fallback);
    let rotation: Vec<&str> = if topics.is_empty() {
        vec![fallback]
    } else {
        topics.iter().map(String::as_str).collect()
    };

    let long_form = is_long_form(style, duration);
    let target = target_word_count(duration);
    let ending = fill(closing(style), t0, t1);
    let ending_words = count_words(&ending);

    let mut paragraphs = vec![fill(opening(style, long_form), t0, t1)];
    let mut words = count_words(&paragraphs[0]);

    let pool = segments(style);
    let mut sentence_idx = 0;
    let mut paragraph_count = 0;
    let mut chapter = 4;

    while words + ending_words < target {
        let topic = rotation[(sentence_idx / SENTENCES_PER_PARAGRAPH) % rotation.len()];

        if long_form && sentence_idx % (SENTENCES_PER_PARAGRAPH * PARAGRAPHS_PER_CHAPTER) == 0 {
            let heading = chapter_heading(style, chapter, topic);
            words += count_words(&heading);
            paragraphs.push(heading);
            chapter += 1;
        }

        let mut paragraph = Vec::with_capacity(SENTENCES_PER_PARAGRAPH);
        while paragraph.len() < SENTENCES_PER_PARAGRAPH && words + ending_words < target {
            let sentence = pool[sentence_idx % pool.len()].replace("{topic}", topic);
            words += count_words(&sentence);
            paragraph.push(sentence);
            sentence_idx += 1;
        }
        // Keep sentence_idx aligned to paragraph boundaries for topic rotation.
        sentence_idx = sentence_idx.div_ceil(SENTENCES_PER_PARAGRAPH) * SENTENCES_PER_PARAGRAPH;
        paragraph_count += 1;
        if !paragraph.is_empty() {
            paragraphs.push(paragraph.join(" "));
        }

        if paragraph_count > target {
            break;
        }
    }

    paragraphs.push(ending);
    ScriptText::new(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pace_bands_switch_at_ten_and_twenty_minutes() {
        assert_eq!(words_per_minute(5), 120);
        assert_eq!(words_per_minute(9), 120);
        assert_eq!(words_per_minute(10), 120);
        assert_eq!(words_per_minute(11), 130);
        assert_eq!(words_per_minute(20), 130);
        assert_eq!(words_per_minute(21), 140);
        assert_eq!(words_per_minute(45), 140);
    }

    #[test]
    fn nine_and_eleven_minutes_use_different_pace() {
        let t = topics(&["ai", "robots"]);
        let short = compose(&t, 9, Style::News);
        let longer = compose(&t, 11, Style::News);
        assert_ne!(words_per_minute(9), words_per_minute(11));
        assert!(short.word_count() >= 9 * 120);
        assert!(longer.word_count() >= 11 * 130);
    }

    #[test]
    fn word_count_tracks_target_for_every_style() {
        let t = topics(&["artificial intelligence", "machine learning"]);
        for style in [
            Style::Cinematic,
            Style::Documentary,
            Style::News,
            Style::Educational,
        ] {
            for duration in [5, 15, 30, 45] {
                let script = compose(&t, duration, style);
                let target = target_word_count(duration);
                let words = script.word_count();
                assert!(
                    words >= target && words <= target + 40,
                    "{style} {duration}min: {words} words for target {target}"
                );
            }
        }
    }

    #[test]
    fn single_topic_uses_style_filler() {
        let t = topics(&["oceans"]);
        assert!(compose(&t, 5, Style::Cinematic).as_str().contains("technology"));
        assert!(compose(&t, 5, Style::Documentary).as_str().contains("innovation"));
        assert!(compose(&t, 5, Style::Educational)
            .as_str()
            .contains("every aspect of modern life"));
        assert!(compose(&t, 5, Style::News).as_str().contains("technology"));
    }

    #[test]
    fn long_form_uses_chapter_structure() {
        let t = topics(&["space", "rockets"]);
        let short = compose(&t, 10, Style::Cinematic);
        let long = compose(&t, 11, Style::Cinematic);
        assert!(!short.as_str().contains("Chapter One"));
        assert!(long.as_str().contains("Chapter One"));
        assert!(long.as_str().contains("Chapter 4: space."));
        assert!(compose(&t, 30, Style::Educational).as_str().contains("Module One"));
        assert!(compose(&t, 30, Style::Documentary).as_str().contains("Part One"));
        assert!(!compose(&t, 30, Style::News).as_str().contains("Chapter"));
    }

    #[test]
    fn empty_topics_still_produce_a_script() {
        let script = compose(&[], 5, Style::Documentary);
        assert!(script.as_str().contains("innovation"));
        assert!(script.word_count() >= target_word_count(5));
    }

    #[test]
    fn generate_records_one_activity_entry() {
        let log = ActivityLog::new();
        let synth = ScriptSynthesizer::new(log.clone());
        let a = synth.generate(&topics(&["x"]), 5, Style::News);
        let b = synth.generate(&topics(&["x"]), 5, Style::News);
        assert_eq!(a, b);
        assert_eq!(log.len(), 2);
        assert_eq!(log.history()[0].payload["wpm"], 120);
    }
}
