// Types and enums for game automation
use super::stats::RunStats;
use crate::vision::{RecognizedText, TemplateHit};
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Discrete on-screen state. Declaration order is the classification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum SceneLabel {
    #[default]
    Unknown,
    MainMenu,
    ActivityMenu,
    BattlePrepare,
    BattleInProgress,
    BattleResult,
    RewardCollection,
    ScoreDisplay,
}

impl SceneLabel {
    /// Classifiable labels, first match wins.
    pub const PRIORITY: [SceneLabel; 7] = [
        SceneLabel::MainMenu,
        SceneLabel::ActivityMenu,
        SceneLabel::BattlePrepare,
        SceneLabel::BattleInProgress,
        SceneLabel::BattleResult,
        SceneLabel::RewardCollection,
        SceneLabel::ScoreDisplay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SceneLabel::Unknown => "unknown",
            SceneLabel::MainMenu => "main_menu",
            SceneLabel::ActivityMenu => "activity_menu",
            SceneLabel::BattlePrepare => "battle_prepare",
            SceneLabel::BattleInProgress => "battle_in_progress",
            SceneLabel::BattleResult => "battle_result",
            SceneLabel::RewardCollection => "reward_collection",
            SceneLabel::ScoreDisplay => "score_display",
        }
    }

    /// Labels that end the battle polling loop.
    pub fn ends_battle(&self) -> bool {
        matches!(self, SceneLabel::BattleResult | SceneLabel::RewardCollection)
    }
}

impl fmt::Display for SceneLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BattleOutcome {
    Win,
    Loss,
    Unknown,
}

/// Label-specific data read off the screen. `None` means "not observed".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SceneInfo {
    pub score: Option<u64>,
    pub currency: Option<u64>,
    pub result: Option<BattleOutcome>,
    pub reward: Option<BTreeMap<String, u64>>,
}

impl SceneInfo {
    pub fn is_empty(&self) -> bool {
        self.score.is_none()
            && self.currency.is_none()
            && self.result.is_none()
            && self.reward.is_none()
    }
}

/// Evidence gathered from one screenshot.
#[derive(Debug, Clone, Default)]
pub struct SignalBundle {
    /// Text fragments at or above the confidence floor
    pub texts: Vec<RecognizedText>,
    pub templates: Vec<TemplateHit>,
    /// Text recognition errored; classification yields Unknown
    pub recognition_failed: bool,
}

impl SignalBundle {
    /// Keep fragments whose confidence reaches `floor`.
    pub fn from_recognized(texts: Vec<RecognizedText>, floor: f32) -> Self {
        Self {
            texts: texts
                .into_iter()
                .filter(|t| t.confidence >= floor && !t.text.trim().is_empty())
                .collect(),
            ..Self::default()
        }
    }

    pub fn failed() -> Self {
        Self {
            recognition_failed: true,
            ..Self::default()
        }
    }

    /// All fragments joined with spaces, the haystack for keyword search.
    pub fn full_text(&self) -> String {
        self.texts
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A screenshot with the signals extracted from it. Never reused after a new capture.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub signals: SignalBundle,
    pub index: u64,
}

impl Frame {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

/// Result of perceiving and classifying one screenshot.
#[derive(Debug, Clone)]
pub struct Observation {
    pub frame: Frame,
    pub label: SceneLabel,
    pub info: SceneInfo,
}

/// Named targets to screen coordinates, valid for one frame only.
pub type InteractionPoints = BTreeMap<String, (u32, u32)>;

#[derive(Debug, Clone, PartialEq)]
pub enum AutomationCommand {
    /// Finish the current cycle, then leave the loop
    Stop,
    ResetStats,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    SceneChanged(SceneLabel),
    CycleFinished { cycle: u64, success: bool },
    StatsUpdated(RunStats),
    Error(String),
    Stopped,
}
