//! Scene classification
//!
//! Screenshot in, `(SceneLabel, SceneInfo)` out. Text keywords decide the
//! label in priority order; when no label qualifies, dark HUD regions are
//! taken as a battle in progress. Errors from the recognizer never escape:
//! they degrade the frame to `Unknown`.

use super::types::{BattleOutcome, Frame, Observation, SceneInfo, SceneLabel, SignalBundle};
use crate::config::RecognitionConfig;
use crate::vision::{Region, TemplateLibrary, TextRecognizer, image_ops, ocr};
use image::DynamicImage;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const SCORE_KEYWORDS: [&str; 4] = ["积分", "分数", "point", "score"];
const CURRENCY_KEYWORDS: [&str; 3] = ["信用点", "星琼", "credit"];
const WIN_TOKENS: [&str; 3] = ["胜利", "win", "victory"];
const LOSS_TOKENS: [&str; 3] = ["失败", "lose", "defeat"];

static REWARD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:获得\s*)?(\p{L}+)(?:\s*[×*:：]|\s+[xX])?\s*(\d+)").expect("reward pattern compiles")
});

pub struct SceneClassifier<R: TextRecognizer> {
    recognizer: R,
    templates: TemplateLibrary,
    config: RecognitionConfig,
}

impl<R: TextRecognizer> SceneClassifier<R> {
    pub fn new(recognizer: R, templates: TemplateLibrary, config: RecognitionConfig) -> Self {
        Self {
            recognizer,
            templates,
            config,
        }
    }

    /// Run text recognition and template matching over a fresh screenshot.
    pub async fn perceive(&self, image: DynamicImage, index: u64) -> Frame {
        let mut signals = match self.recognizer.recognize(&image, None).await {
            Ok(texts) => SignalBundle::from_recognized(texts, self.config.ocr_confidence),
            Err(e) => {
                log::warn!("⚠️ Text recognition failed on frame #{index}: {e}");
                SignalBundle::failed()
            }
        };
        if !self.templates.is_empty() {
            signals.templates = self
                .templates
                .match_all(&image.to_luma8(), self.config.template_threshold);
        }
        log::debug!(
            "🔍 Frame #{index}: {} text fragment(s), {} template hit(s)",
            signals.texts.len(),
            signals.templates.len()
        );
        Frame {
            image,
            signals,
            index,
        }
    }

    pub async fn classify(&self, frame: &Frame) -> (SceneLabel, SceneInfo) {
        if frame.signals.recognition_failed {
            return (SceneLabel::Unknown, SceneInfo::default());
        }

        if let Some(label) = self.label_from_text(&frame.signals) {
            let info = self.extract_info(label, frame).await;
            return (label, info);
        }

        if self.has_dark_hud(&frame.image) {
            log::debug!("🌑 Dark HUD regions, assuming battle in progress");
            return (SceneLabel::BattleInProgress, SceneInfo::default());
        }

        (SceneLabel::Unknown, SceneInfo::default())
    }

    pub async fn observe(&self, image: DynamicImage, index: u64) -> Observation {
        let frame = self.perceive(image, index).await;
        let (label, info) = self.classify(&frame).await;
        log::info!("🎮 Frame #{index} classified as {label}");
        Observation { frame, label, info }
    }

    /// First label in priority order whose keyword ratio reaches the threshold.
    pub fn label_from_text(&self, signals: &SignalBundle) -> Option<SceneLabel> {
        let text = signals.full_text();
        let qualifying: Vec<SceneLabel> = SceneLabel::PRIORITY
            .into_iter()
            .filter(|label| {
                let keywords = self.config.keywords.for_label(*label);
                keyword_ratio(&text, keywords) >= self.config.scene_threshold
                    && !keywords.is_empty()
            })
            .collect();
        if qualifying.len() > 1 {
            log::debug!("🔀 Several labels qualify {qualifying:?}, taking {}", qualifying[0]);
        }
        qualifying.first().copied()
    }

    fn has_dark_hud(&self, image: &DynamicImage) -> bool {
        let (w, h) = (image.width(), image.height());
        hud_regions(w, h).into_iter().any(|region| {
            image_ops::average_color(image, region)
                .is_some_and(|[r, g, b]| r + g + b < self.config.dark_region_threshold)
        })
    }

    async fn extract_info(&self, label: SceneLabel, frame: &Frame) -> SceneInfo {
        let texts: Vec<&str> = frame.signals.texts.iter().map(|t| t.text.as_str()).collect();
        let mut info = SceneInfo::default();
        match label {
            SceneLabel::ActivityMenu | SceneLabel::ScoreDisplay => {
                info.score = self.extract_score(&texts, frame).await;
                info.currency = number_near_keyword(&texts, &CURRENCY_KEYWORDS);
            }
            SceneLabel::BattleResult => {
                info.score = self.extract_score(&texts, frame).await;
                info.result = Some(battle_outcome(&texts));
            }
            SceneLabel::RewardCollection => {
                let rewards = parse_rewards(&texts);
                if !rewards.is_empty() {
                    info.reward = Some(rewards);
                }
            }
            SceneLabel::MainMenu | SceneLabel::BattlePrepare | SceneLabel::BattleInProgress => {}
            SceneLabel::Unknown => {}
        }
        info
    }

    /// Balance next to a currency keyword, else the first number read inside `region`.
    pub async fn read_currency(&self, frame: &Frame, region: Option<Region>) -> Option<u64> {
        let texts: Vec<&str> = frame.signals.texts.iter().map(|t| t.text.as_str()).collect();
        if let Some(currency) = number_near_keyword(&texts, &CURRENCY_KEYWORDS) {
            return Some(currency);
        }
        let (w, h) = frame.dimensions();
        let region = region?.clip_to_screen(w, h)?;
        match self.recognizer.recognize_number(&frame.image, Some(region)).await {
            Ok(currency) => currency,
            Err(e) => {
                log::debug!("Currency region {region} unreadable: {e}");
                None
            }
        }
    }

    /// Confident text fragments inside `region`, empty when it is off screen or unreadable.
    pub async fn read_region(&self, frame: &Frame, region: Region) -> Vec<String> {
        let (w, h) = frame.dimensions();
        let Some(region) = region.clip_to_screen(w, h) else {
            return Vec::new();
        };
        match self.recognizer.recognize(&frame.image, Some(region)).await {
            Ok(texts) => texts
                .into_iter()
                .filter(|t| t.confidence >= self.config.ocr_confidence)
                .map(|t| t.text)
                .collect(),
            Err(e) => {
                log::debug!("Region {region} unreadable: {e}");
                Vec::new()
            }
        }
    }

    async fn extract_score(&self, texts: &[&str], frame: &Frame) -> Option<u64> {
        if let Some(score) = number_near_keyword(texts, &SCORE_KEYWORDS) {
            return Some(score);
        }
        if let Some(region) = self.config.score_region {
            let (w, h) = frame.dimensions();
            if region.clip_to_screen(w, h).is_some() {
                match self.recognizer.recognize_number(&frame.image, Some(region)).await {
                    Ok(Some(score)) => return Some(score),
                    Ok(None) => {}
                    Err(e) => log::debug!("Score region {region} unreadable: {e}"),
                }
            }
        }
        texts.iter().flat_map(|t| ocr::numbers(t)).max()
    }
}

/// Fraction of `keywords` present in `text`; an empty set scores 0.
pub fn keyword_ratio(text: &str, keywords: &[String]) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let text = text.to_lowercase();
    let found = keywords
        .iter()
        .filter(|k| text.contains(&k.to_lowercase()))
        .count();
    found as f32 / keywords.len() as f32
}

/// Upper-right status corner and lower-center skill bar.
pub fn hud_regions(width: u32, height: u32) -> [Region; 2] {
    [
        Region::new(width * 7 / 8, height / 8, width / 8, height / 4),
        Region::new(width / 8, height * 3 / 4, width * 3 / 4, height / 4),
    ]
}

fn contains_any(text: &str, tokens: &[&str]) -> bool {
    let lower = text.to_lowercase();
    tokens.iter().any(|t| lower.contains(t))
}

/// Number inside the first fragment mentioning a keyword, or in the purely
/// numeric fragment right after it.
fn number_near_keyword(texts: &[&str], keywords: &[&str]) -> Option<u64> {
    texts.iter().enumerate().find_map(|(i, text)| {
        if !contains_any(text, keywords) {
            return None;
        }
        ocr::first_number(text).or_else(|| {
            texts
                .get(i + 1)
                .filter(|next| is_numeric(next))
                .and_then(|next| ocr::first_number(next))
        })
    })
}

fn is_numeric(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == ',')
}

fn battle_outcome(texts: &[&str]) -> BattleOutcome {
    texts
        .iter()
        .find_map(|text| {
            if contains_any(text, &WIN_TOKENS) {
                Some(BattleOutcome::Win)
            } else if contains_any(text, &LOSS_TOKENS) {
                Some(BattleOutcome::Loss)
            } else {
                None
            }
        })
        .unwrap_or(BattleOutcome::Unknown)
}

/// Latin names keep a trailing `x` ("Box5"); after CJK it is the quantity marker ("金币x100").
fn reward_item(raw: &str) -> String {
    let mut chars = raw.chars().rev();
    match (chars.next(), chars.next()) {
        (Some('x' | 'X'), Some(before)) if !before.is_ascii() => {
            raw[..raw.len() - 1].to_string()
        }
        _ => raw.to_string(),
    }
}

/// Item/quantity pairs across all fragments; a repeated item keeps its last quantity.
pub fn parse_rewards(texts: &[&str]) -> BTreeMap<String, u64> {
    let mut rewards = BTreeMap::new();
    for text in texts {
        for caps in REWARD.captures_iter(text) {
            let item = reward_item(caps[1].trim_start_matches("获得"));
            if item.is_empty() {
                continue;
            }
            if let Ok(quantity) = caps[2].parse::<u64>() {
                rewards.insert(item, quantity);
            }
        }
    }
    rewards
}
