//! Bot configuration
//!
//! One [`BotConfig`] is read from a TOML file at startup and handed to each
//! component by reference. Every field has a default, so a partial file (or
//! no file at all) is valid.

use crate::adb::{BackendKind, ConnectOptions};
use crate::game_automation::SceneLabel;
use crate::vision::{Region, TesseractOptions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {source}")]
    Serialize {
        #[from]
        source: toml::ser::Error,
    },

    #[error("Failed to write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub adb: AdbConfig,
    pub ocr: TesseractOptions,
    pub recognition: RecognitionConfig,
    pub flow: FlowConfig,
    pub game: GameConfig,
    pub trading: TradingConfig,
    pub equipment: EquipmentConfig,
    pub logging: LoggingConfig,
    pub debug: DebugConfig,
    pub progress: ProgressConfig,
}

impl BotConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            log::info!("⚙️ No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BotConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let unit = |field: &'static str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside 0.0..=1.0"),
                })
            }
        };
        unit("recognition.scene_threshold", self.recognition.scene_threshold)?;
        unit("recognition.ocr_confidence", self.recognition.ocr_confidence)?;
        unit("recognition.template_threshold", self.recognition.template_threshold)?;

        let (px, py) = self.flow.popup_dismiss;
        if !(0.0..=1.0).contains(&px) || !(0.0..=1.0).contains(&py) {
            return Err(ConfigError::Invalid {
                field: "flow.popup_dismiss",
                reason: format!("({px}, {py}) must be screen fractions"),
            });
        }
        for (field, (fx, fy)) in [
            ("trading.buy_button", self.trading.buy_button),
            ("trading.sell_button", self.trading.sell_button),
            ("trading.confirm_button", self.trading.confirm_button),
            ("trading.cancel_button", self.trading.cancel_button),
        ] {
            if !(0.0..=1.0).contains(&fx) || !(0.0..=1.0).contains(&fy) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("({fx}, {fy}) must be screen fractions"),
                });
            }
        }
        if self.equipment.max_level == 0 {
            return Err(ConfigError::Invalid {
                field: "equipment.max_level",
                reason: "must be positive".to_string(),
            });
        }
        if self.flow.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "flow.max_retries",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if self.flow.battle_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "flow.battle_poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    pub backend: BackendKind,
    pub adb_path: String,
    /// Serial / identifier; empty picks the first device
    pub device: String,
    pub command_timeout_secs: u64,
    pub capture_timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Shell,
            adb_path: "adb".to_string(),
            device: String::new(),
            command_timeout_secs: 5,
            capture_timeout_secs: 10,
            retries: 1,
            retry_delay_ms: 500,
        }
    }
}

impl AdbConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            adb_path: self.adb_path.clone(),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            capture_timeout: Duration::from_secs(self.capture_timeout_secs),
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Keyword sets per label; a label matches when enough of its set appears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneKeywords {
    pub main_menu: Vec<String>,
    pub activity_menu: Vec<String>,
    pub battle_prepare: Vec<String>,
    pub battle_in_progress: Vec<String>,
    pub battle_result: Vec<String>,
    pub reward_collection: Vec<String>,
    pub score_display: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for SceneKeywords {
    fn default() -> Self {
        Self {
            main_menu: words(&["星穹铁道", "开始游戏", "设置"]),
            activity_menu: words(&["货币战争", "开始挑战", "积分"]),
            battle_prepare: words(&["准备战斗", "开始", "编队"]),
            battle_in_progress: words(&["战斗", "技能", "撤退"]),
            battle_result: words(&["战斗结束", "获得"]),
            reward_collection: words(&["领取奖励", "确定", "奖励"]),
            score_display: words(&["积分", "排名", "段位"]),
        }
    }
}

impl SceneKeywords {
    pub fn for_label(&self, label: SceneLabel) -> &[String] {
        match label {
            SceneLabel::Unknown => &[],
            SceneLabel::MainMenu => &self.main_menu,
            SceneLabel::ActivityMenu => &self.activity_menu,
            SceneLabel::BattlePrepare => &self.battle_prepare,
            SceneLabel::BattleInProgress => &self.battle_in_progress,
            SceneLabel::BattleResult => &self.battle_result,
            SceneLabel::RewardCollection => &self.reward_collection,
            SceneLabel::ScoreDisplay => &self.score_display,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Fraction of a label's keywords that must be present
    pub scene_threshold: f32,
    /// Text fragments below this confidence are dropped
    pub ocr_confidence: f32,
    pub template_threshold: f32,
    pub template_dir: PathBuf,
    /// Downscale factor applied before template matching
    pub template_scale: f32,
    /// Average R+G+B below this marks a HUD region as dark
    pub dark_region_threshold: f64,
    /// Fixed region read for the score when no keyword is adjacent to one
    pub score_region: Option<Region>,
    pub keywords: SceneKeywords,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            scene_threshold: 0.8,
            ocr_confidence: 0.8,
            template_threshold: 0.8,
            template_dir: PathBuf::from("templates"),
            template_scale: 0.5,
            dark_region_threshold: 300.0,
            score_region: Some(Region::new(100, 50, 300, 100)),
            keywords: SceneKeywords::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Cycles per run, 0 runs until stopped
    pub cycle_limit: u32,
    pub operation_delay_ms: u64,
    pub long_operation_delay_ms: u64,
    /// Relative jitter applied to paced delays
    pub delay_variation: f64,
    /// Every n-th paced operation adds an extra pause, 0 disables
    pub extra_pause_every: u64,
    pub extra_pause_ms: u64,
    pub success_delay_ms: u64,
    pub success_variation: f64,
    pub failure_delay_ms: u64,
    pub failure_variation: f64,
    /// Fractional tap position used to close popups after a failed cycle
    pub popup_dismiss: (f64, f64),
    pub battle_timeout_secs: u64,
    pub battle_poll_interval_ms: u64,
    pub skill_tap_interval_ms: u64,
    /// Attempts for capture and tap, including the first
    pub max_retries: u32,
    pub retry_timeout_secs: u64,
    pub retry_base_delay_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            cycle_limit: 0,
            operation_delay_ms: 500,
            long_operation_delay_ms: 2000,
            delay_variation: 0.3,
            extra_pause_every: 10,
            extra_pause_ms: 1000,
            success_delay_ms: 2000,
            success_variation: 0.5,
            failure_delay_ms: 4000,
            failure_variation: 0.25,
            popup_dismiss: (0.5, 0.8333),
            battle_timeout_secs: 60,
            battle_poll_interval_ms: 2000,
            skill_tap_interval_ms: 1000,
            max_retries: 3,
            retry_timeout_secs: 10,
            retry_base_delay_ms: 500,
        }
    }
}

impl FlowConfig {
    pub fn operation_delay(&self) -> Duration {
        Duration::from_millis(self.operation_delay_ms)
    }

    pub fn long_operation_delay(&self) -> Duration {
        Duration::from_millis(self.long_operation_delay_ms)
    }

    pub fn battle_timeout(&self) -> Duration {
        Duration::from_secs(self.battle_timeout_secs)
    }

    pub fn battle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.battle_poll_interval_ms)
    }

    pub fn skill_tap_interval(&self) -> Duration {
        Duration::from_millis(self.skill_tap_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Brought to the foreground before the first cycle; empty skips it
    pub package: String,
    pub activity: String,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            package: "com.miHoYo.hkrpg".to_string(),
            activity: "com.miHoYo.hkrpg.GameActivity".to_string(),
        }
    }
}

/// Buy/sell decisions on the shop screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub enabled: bool,
    /// Offers above this are never bought
    pub max_buy_price: u64,
    /// Offers below this are never sold
    pub min_sell_price: u64,
    /// Minimum time between two trades
    pub cooldown_ms: u64,
    /// Any of these on an unclassified screen marks it as the shop
    pub screen_keywords: Vec<String>,
    /// Where the offer (item name and price) is printed
    pub offer_region: Region,
    /// Read for the balance when no currency keyword is adjacent to a number
    pub credits_region: Option<Region>,
    pub buy_button: (f64, f64),
    pub sell_button: (f64, f64),
    pub confirm_button: (f64, f64),
    pub cancel_button: (f64, f64),
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_buy_price: 10000,
            min_sell_price: 5000,
            cooldown_ms: 1500,
            screen_keywords: words(&["购买", "出售", "价格"]),
            offer_region: Region::new(100, 200, 1000, 1400),
            credits_region: Some(Region::new(200, 100, 400, 50)),
            buy_button: (0.74, 0.625),
            sell_button: (0.74, 0.667),
            confirm_button: (0.556, 0.708),
            cancel_button: (0.37, 0.708),
        }
    }
}

impl TradingConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Relic stat parsing and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentConfig {
    /// Where the stat panel is printed
    pub region: Region,
    pub max_level: u32,
    /// Sub-stats worth a flat bonus
    pub optimal_attributes: Vec<String>,
    /// Per-stat weight; unlisted stats weigh 0.5
    pub weights: BTreeMap<String, f64>,
}

impl Default for EquipmentConfig {
    fn default() -> Self {
        let weights = [
            ("暴击", 1.5),
            ("暴伤", 1.2),
            ("攻击", 1.0),
            ("速度", 1.3),
            ("防御", 0.5),
            ("生命值", 0.4),
            ("能量恢复", 1.1),
            ("效果命中", 0.8),
            ("效果抵抗", 0.7),
        ]
        .into_iter()
        .map(|(name, weight)| (name.to_string(), weight))
        .collect();
        Self {
            region: Region::new(200, 300, 800, 1200),
            max_level: 80,
            optimal_attributes: words(&["暴击", "暴伤", "攻击", "速度"]),
            weights,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub save_screenshots: bool,
    pub screenshot_dir: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            save_screenshots: false,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Write the progress record after every cycle
    pub save: bool,
    pub file: PathBuf,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            save: false,
            file: PathBuf::from("progress.json"),
        }
    }
}
