// Interaction point resolution: where to tap for a given scene
use super::types::{Frame, InteractionPoints, SceneLabel};
use crate::vision::Region;
use std::collections::BTreeMap;

pub const ENTER_ACTIVITY: &str = "enter_activity";
pub const START_CHALLENGE: &str = "start_challenge";
pub const START_BATTLE: &str = "start_battle";
pub const SKILLS: [&str; 3] = ["skill_1", "skill_2", "skill_3"];
pub const CONFIRM: &str = "confirm";
pub const COLLECT_REWARD: &str = "collect_reward";
pub const BACK: &str = "back";

/// A point as fractions of the frame size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativePoint {
    pub fx: f64,
    pub fy: f64,
}

impl RelativePoint {
    pub const fn new(fx: f64, fy: f64) -> Self {
        Self { fx, fy }
    }

    pub fn at(&self, width: u32, height: u32) -> (u32, u32) {
        (
            (width as f64 * self.fx).round() as u32,
            (height as f64 * self.fy).round() as u32,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSpec {
    pub name: String,
    /// Text on the button, searched in the recognized fragments first
    pub button_text: Option<String>,
    pub fallback: Option<RelativePoint>,
}

impl TargetSpec {
    pub fn new(name: &str, button_text: Option<&str>, fallback: Option<RelativePoint>) -> Self {
        Self {
            name: name.to_string(),
            button_text: button_text.map(str::to_string),
            fallback,
        }
    }
}

/// Targets per scene.
#[derive(Debug, Clone)]
pub struct Layout {
    targets: BTreeMap<SceneLabel, Vec<TargetSpec>>,
}

impl Default for Layout {
    fn default() -> Self {
        let lower = Some(RelativePoint::new(0.5, 0.75));
        let skill_y = 0.875;
        let mut targets = BTreeMap::new();
        targets.insert(
            SceneLabel::MainMenu,
            vec![TargetSpec::new(ENTER_ACTIVITY, Some("货币战争"), None)],
        );
        targets.insert(
            SceneLabel::ActivityMenu,
            vec![TargetSpec::new(START_CHALLENGE, Some("开始挑战"), lower)],
        );
        targets.insert(
            SceneLabel::BattlePrepare,
            vec![TargetSpec::new(START_BATTLE, Some("开始"), lower)],
        );
        targets.insert(
            SceneLabel::BattleInProgress,
            SKILLS
                .iter()
                .zip([0.25, 0.5, 0.75])
                .map(|(name, fx)| TargetSpec::new(name, None, Some(RelativePoint::new(fx, skill_y))))
                .collect(),
        );
        targets.insert(
            SceneLabel::BattleResult,
            vec![TargetSpec::new(CONFIRM, Some("确定"), lower)],
        );
        targets.insert(
            SceneLabel::RewardCollection,
            vec![TargetSpec::new(COLLECT_REWARD, Some("领取奖励"), lower)],
        );
        targets.insert(
            SceneLabel::ScoreDisplay,
            vec![TargetSpec::new(BACK, Some("返回"), None)],
        );
        Self { targets }
    }
}

impl Layout {
    pub fn with_targets(mut self, label: SceneLabel, specs: Vec<TargetSpec>) -> Self {
        self.targets.insert(label, specs);
        self
    }

    pub fn targets(&self, label: SceneLabel) -> &[TargetSpec] {
        self.targets.get(&label).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default)]
pub struct InteractionResolver {
    layout: Layout,
}

impl InteractionResolver {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Screen coordinates for every target of `label` that can be located.
    pub fn resolve(&self, label: SceneLabel, frame: &Frame) -> InteractionPoints {
        self.layout
            .targets(label)
            .iter()
            .filter_map(|spec| {
                resolve_target(spec, frame).map(|point| (spec.name.clone(), point))
            })
            .collect()
    }

    /// Single-target lookup.
    pub fn resolve_one(&self, label: SceneLabel, frame: &Frame, name: &str) -> Option<(u32, u32)> {
        self.layout
            .targets(label)
            .iter()
            .find(|spec| spec.name == name)
            .and_then(|spec| resolve_target(spec, frame))
    }
}

fn resolve_target(spec: &TargetSpec, frame: &Frame) -> Option<(u32, u32)> {
    let (width, height) = frame.dimensions();
    let screen = Region::full_screen(width, height);
    let inside = |(x, y): (u32, u32)| screen.contains_point(x, y);

    let by_text = spec.button_text.as_deref().and_then(|button| {
        frame
            .signals
            .texts
            .iter()
            .filter(|t| t.text.contains(button))
            .filter_map(|t| t.bbox.map(|b| b.center()))
            .find(|p| inside(*p))
    });
    if by_text.is_some() {
        return by_text;
    }

    let by_template = frame
        .signals
        .templates
        .iter()
        .find(|hit| hit.name == spec.name)
        .map(|hit| hit.center())
        .filter(|p| inside(*p));
    if by_template.is_some() {
        return by_template;
    }

    spec.fallback.map(|f| f.at(width, height))
}

pub fn center(width: u32, height: u32) -> (u32, u32) {
    RelativePoint::new(0.5, 0.5).at(width, height)
}

/// Where the recovery tap lands.
pub fn lower_center(width: u32, height: u32) -> (u32, u32) {
    RelativePoint::new(0.5, 0.75).at(width, height)
}
