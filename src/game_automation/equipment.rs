//! Relic stat parsing and scoring
//!
//! Stat panel text is parsed into an [`Equipment`] and rated by
//! [`EquipmentScorer`]. The first attribute on the panel is the main one.

use crate::config::EquipmentConfig;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Stats shown as percentages; they weigh twice as much per point.
const PERCENT_ATTRIBUTES: [&str; 5] = ["暴击", "暴伤", "效果命中", "效果抵抗", "能量恢复"];
const DEFAULT_WEIGHT: f64 = 0.5;

static LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:等级\s*|[Ll][Vv]\.?\s*)(\d+)").expect("level pattern compiles")
});
static RARITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*星").expect("rarity pattern compiles"));
static ATTRIBUTES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("暴击", "暴击"),
        ("暴伤", "暴伤"),
        ("攻击", "攻击力?"),
        ("速度", "速度"),
        ("防御", "防御力?"),
        ("生命值", "生命值?"),
        ("能量恢复", "能量恢复"),
        ("效果命中", "效果命中"),
        ("效果抵抗", "效果抵抗"),
    ]
    .into_iter()
    .map(|(name, stem)| {
        let pattern = format!(r"{stem}\s*[+:：]?\s*(\d+(?:\.\d+)?)%?");
        (name, Regex::new(&pattern).expect("attribute pattern compiles"))
    })
    .collect()
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Equipment {
    pub name: Option<String>,
    pub level: u32,
    pub rarity: u32,
    /// In panel order
    pub attributes: Vec<(String, f64)>,
}

impl Equipment {
    pub fn main_attribute(&self) -> Option<&(String, f64)> {
        self.attributes.first()
    }

    pub fn sub_attributes(&self) -> &[(String, f64)] {
        self.attributes.get(1..).unwrap_or_default()
    }
}

/// Parse a stat panel. Rarity falls back to an estimate from the amount of
/// text when no star count is printed.
pub fn parse_equipment(texts: &[&str]) -> Equipment {
    let joined = texts.join(" ");
    let level = LEVEL
        .captures(&joined)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);
    let rarity = RARITY
        .captures(&joined)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or_else(|| match joined.chars().count() {
            n if n > 50 => 5,
            n if n > 30 => 4,
            _ => 3,
        });

    let mut found: Vec<(usize, String, f64)> = ATTRIBUTES
        .iter()
        .filter_map(|(name, pattern)| {
            let caps = pattern.captures(&joined)?;
            let value = caps[1].parse().ok()?;
            Some((caps.get(0)?.start(), name.to_string(), value))
        })
        .collect();
    found.sort_by_key(|(position, _, _)| *position);

    let name = texts
        .iter()
        .map(|t| t.trim())
        .find(|t| {
            !t.is_empty()
                && !LEVEL.is_match(t)
                && !RARITY.is_match(t)
                && !ATTRIBUTES.iter().any(|(_, p)| p.is_match(t))
        })
        .map(str::to_string);

    Equipment {
        name,
        level,
        rarity,
        attributes: found.into_iter().map(|(_, name, value)| (name, value)).collect(),
    }
}

pub struct EquipmentScorer {
    config: EquipmentConfig,
}

impl EquipmentScorer {
    pub fn new(config: EquipmentConfig) -> Self {
        Self { config }
    }

    fn weight(&self, attribute: &str) -> f64 {
        self.config
            .weights
            .get(attribute)
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }

    fn optimal_subs(&self, equipment: &Equipment) -> usize {
        equipment
            .sub_attributes()
            .iter()
            .filter(|(name, _)| self.config.optimal_attributes.contains(name))
            .count()
    }

    /// Rarity, level and weighted stats, rounded to two decimals.
    pub fn score(&self, equipment: &Equipment) -> f64 {
        let rarity = equipment.rarity as f64 * 10.0;
        let level = equipment.level as f64 / self.config.max_level.max(1) as f64 * 20.0;
        let stats: f64 = equipment
            .attributes
            .iter()
            .map(|(name, value)| {
                let scale = if PERCENT_ATTRIBUTES.contains(&name.as_str()) {
                    0.1
                } else {
                    0.05
                };
                value * self.weight(name) * scale
            })
            .sum();
        let optimal = self.optimal_subs(equipment) as f64 * 5.0;
        ((rarity + level + stats + optimal) * 100.0).round() / 100.0
    }

    /// A clear score margin, or more of the wanted sub-stats.
    pub fn is_better(&self, candidate: &Equipment, current: &Equipment) -> bool {
        self.score(candidate) - self.score(current) >= 10.0
            || self.optimal_subs(candidate) > self.optimal_subs(current)
    }

    /// Highest scoring piece; the first one on ties.
    pub fn best<'a>(&self, pieces: &'a [Equipment]) -> Option<&'a Equipment> {
        pieces.iter().fold(None, |best: Option<(&Equipment, f64)>, piece| {
            let score = self.score(piece);
            match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((piece, score)),
            }
        })
        .map(|(piece, _)| piece)
    }
}
