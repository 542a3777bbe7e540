//! Script segmentation into timed scenes.
//!
//! Pure text processing: sentence-like units are found with language-aware
//! terminators, packed into scenes no longer than the maximum scene duration,
//! and each scene gets an estimated spoken duration, search keywords and a
//! transition into the next scene.

use std::collections::HashMap;
use thiserror::Error;

use reel_models::{GenerationRequest, Scene, TextOverlay, Transition};

use crate::config::env_parse;

/// Terminators that end a unit only when followed by whitespace or end of text.
const LATIN_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Terminators that end a unit immediately.
const WIDE_TERMINATORS: [char; 5] = ['。', '！', '？', '।', '॥'];

const MAX_KEYWORDS: usize = 3;
const MIN_KEYWORD_CHARS: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "because", "been", "before", "being", "below", "between",
    "both", "could", "does", "doing", "down", "during", "each", "even", "every", "from", "further", "have",
    "having", "here", "into", "just", "like", "more", "most", "much", "must", "only", "other", "over",
    "really", "same", "should", "some", "such", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "those", "through", "under", "until", "very", "want", "were", "what", "when", "where",
    "which", "while", "will", "with", "would", "your", "yours",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    #[error("Script contains no text")]
    EmptyScript,

    #[error("Script needs about {estimated_secs:.1}s of narration, target is {target_secs:.1}s")]
    ExceedsTarget { estimated_secs: f64, target_secs: f64 },
}

/// Segmenter tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    /// Words per second of narration
    pub speaking_rate: f64,
    pub min_scene_secs: f64,
    pub max_scene_secs: f64,
    pub default_transition: Transition,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speaking_rate: 2.5,
            min_scene_secs: 2.0,
            max_scene_secs: 10.0,
            default_transition: Transition::Fade,
        }
    }
}

impl SegmenterConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let speaking_rate = env_parse::<f64>("SEGMENT_SPEAKING_RATE")
            .filter(|r| *r > 0.0)
            .unwrap_or(defaults.speaking_rate);
        let min_scene_secs = env_parse::<f64>("SEGMENT_MIN_SECS")
            .filter(|s| *s > 0.0)
            .unwrap_or(defaults.min_scene_secs);
        let max_scene_secs = env_parse::<f64>("SEGMENT_MAX_SECS")
            .filter(|s| *s >= min_scene_secs)
            .unwrap_or(defaults.max_scene_secs.max(min_scene_secs));
        Self {
            speaking_rate,
            min_scene_secs,
            max_scene_secs,
            ..defaults
        }
    }
}

/// Per-request options layered over the config.
#[derive(Debug, Clone, Default)]
pub struct SegmentOptions {
    pub target_secs: Option<f64>,
    pub transition: Option<Transition>,
    pub captions: bool,
}

impl SegmentOptions {
    pub fn for_request(request: &GenerationRequest) -> Self {
        Self {
            target_secs: Some(request.duration_budget_secs() as f64),
            transition: request.transition,
            captions: request.captions,
        }
    }
}

/// A run of text plus its word weight.
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    weight: f64,
    /// Joined to the previous piece with a space
    spaced: bool,
}

#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SegmenterConfig::default())
    }
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment a request's script using its transition, captions and duration budget.
    pub fn segment_request(&self, request: &GenerationRequest) -> Result<Vec<Scene>, SegmentError> {
        self.segment_with(&request.script, &SegmentOptions::for_request(request))
    }

    /// Segment `script` with default options and an optional total-duration hint.
    pub fn segment(&self, script: &str, target_secs: Option<f64>) -> Result<Vec<Scene>, SegmentError> {
        self.segment_with(
            script,
            &SegmentOptions {
                target_secs,
                ..Default::default()
            },
        )
    }

    pub fn segment_with(&self, script: &str, options: &SegmentOptions) -> Result<Vec<Scene>, SegmentError> {
        let normalized = script.split_whitespace().collect::<Vec<_>>().join(" ");
        // nothing speakable: blank or punctuation only
        if word_weight(&normalized) <= 0.0 {
            return Err(SegmentError::EmptyScript);
        }

        let mut units = Vec::new();
        for unit in split_units(&normalized) {
            units.extend(self.split_long_unit(&unit));
        }
        if units.is_empty() {
            return Err(SegmentError::EmptyScript);
        }

        let groups = self.merge_short(self.pack(units));

        let transition = options.transition.unwrap_or(self.config.default_transition);
        let count = groups.len();
        let scenes: Vec<Scene> = groups
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let duration = self
                    .estimate(&text)
                    .clamp(self.config.min_scene_secs, self.config.max_scene_secs);
                let mut scene = Scene::new(i as u32, text, duration);
                scene.keywords = extract_keywords(&scene.text);
                scene.transition = if i + 1 == count { Transition::Cut } else { transition };
                if options.captions {
                    scene.overlay = Some(TextOverlay::new(scene.text.clone()));
                }
                scene
            })
            .collect();

        if let Some(target) = options.target_secs {
            let estimated: f64 = scenes.iter().map(|s| s.duration_secs).sum();
            if estimated > target {
                return Err(SegmentError::ExceedsTarget {
                    estimated_secs: estimated,
                    target_secs: target,
                });
            }
        }

        Ok(scenes)
    }

    /// Estimated narration seconds for `text`.
    pub fn estimate(&self, text: &str) -> f64 {
        word_weight(text) / self.config.speaking_rate
    }

    /// Greedily pack units, starting a new scene when the next unit would exceed the max.
    fn pack(&self, units: Vec<String>) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        let mut current = String::new();

        for unit in units {
            if current.is_empty() {
                current = unit;
                continue;
            }
            let candidate = join_text(&current, &unit);
            if self.estimate(&candidate) <= self.config.max_scene_secs {
                current = candidate;
            } else {
                groups.push(std::mem::replace(&mut current, unit));
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    /// Fold scenes shorter than the minimum into a neighbour when the result fits.
    fn merge_short(&self, groups: Vec<String>) -> Vec<String> {
        let mut merged: Vec<String> = Vec::with_capacity(groups.len());
        let mut pending = groups.into_iter().peekable();

        while let Some(group) = pending.next() {
            if self.estimate(&group) >= self.config.min_scene_secs {
                merged.push(group);
                continue;
            }

            if let Some(previous) = merged.last_mut() {
                let candidate = join_text(previous, &group);
                if self.estimate(&candidate) <= self.config.max_scene_secs {
                    *previous = candidate;
                    continue;
                }
            }

            if let Some(next) = pending.peek_mut() {
                let candidate = join_text(&group, next);
                if self.estimate(&candidate) <= self.config.max_scene_secs {
                    *next = candidate;
                    continue;
                }
            }

            // duration is raised to the minimum later
            merged.push(group);
        }
        merged
    }

    /// Split a unit whose estimate exceeds the max on word (or CJK character) boundaries.
    fn split_long_unit(&self, unit: &str) -> Vec<String> {
        if self.estimate(unit) <= self.config.max_scene_secs {
            return vec![unit.to_string()];
        }

        let budget = self.config.max_scene_secs * self.config.speaking_rate;
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_weight = 0.0;

        for piece in pieces(unit) {
            if !current.is_empty() && current_weight + piece.weight > budget {
                chunks.push(std::mem::take(&mut current));
                current_weight = 0.0;
            }
            if piece.spaced && !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece.text);
            current_weight += piece.weight;
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

fn join_text(left: &str, right: &str) -> String {
    let ends_wide = left.chars().last().map_or(false, |c| WIDE_TERMINATORS.contains(&c) || is_cjk(c));
    if ends_wide {
        format!("{}{}", left, right)
    } else {
        format!("{} {}", left, right)
    }
}

/// Split normalized text into sentence-like units.
fn split_units(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut units = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        current.push(c);
        let next = chars.get(i + 1).copied();
        let boundary = if WIDE_TERMINATORS.contains(&c) {
            next.map_or(true, |n| !WIDE_TERMINATORS.contains(&n))
        } else if LATIN_TERMINATORS.contains(&c) {
            next.map_or(true, char::is_whitespace)
        } else {
            false
        };

        if boundary {
            let unit = current.trim();
            if !unit.is_empty() {
                units.push(unit.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        units.push(rest.to_string());
    }
    units
}

/// CJK ideographs, kana and hangul.
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // compatibility ideographs
        | 0x20000..=0x2A6DF) // extension B
}

/// Word count where each CJK character counts as half a word.
fn word_weight(text: &str) -> f64 {
    pieces(text).iter().map(|p| p.weight).sum()
}

/// Whitespace tokens, with CJK runs broken into single characters.
fn pieces(text: &str) -> Vec<Piece> {
    let mut out = Vec::new();
    for token in text.split_whitespace() {
        let mut spaced = true;
        let mut run = String::new();
        for c in token.chars() {
            if is_cjk(c) {
                if !run.is_empty() {
                    out.push(Piece {
                        weight: latin_weight(&run),
                        text: std::mem::take(&mut run),
                        spaced,
                    });
                    spaced = false;
                }
                out.push(Piece {
                    text: c.to_string(),
                    weight: 0.5,
                    spaced,
                });
                spaced = false;
            } else {
                run.push(c);
            }
        }
        if !run.is_empty() {
            out.push(Piece {
                weight: latin_weight(&run),
                text: run,
                spaced,
            });
        }
    }
    out
}

/// Punctuation-only runs carry no weight.
fn latin_weight(run: &str) -> f64 {
    if run.chars().any(char::is_alphanumeric) {
        1.0
    } else {
        0.0
    }
}

/// Up to three most frequent non-stopword terms, ties broken by first appearance.
fn extract_keywords(text: &str) -> Vec<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (position, token) in text.split_whitespace().enumerate() {
        let word: String = token
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect();
        if word.chars().count() < MIN_KEYWORD_CHARS || word.chars().any(is_cjk) || STOPWORDS.contains(&word.as_str())
        {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().take(MAX_KEYWORDS).map(|(w, _)| w).collect()
}
