use crate::adb::BackendKind;
use crate::config::BotConfig;
use crate::vision::Region;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Run the automation loop
    Run,
    /// Print the devices the chosen transport can see
    ListDevices,
    /// Save one screenshot to `cli-screenshot.png`
    Screenshot,
    /// Classify a PNG from disk, no device needed
    Classify(PathBuf),
    /// Cut a template out of a fresh screenshot
    CaptureTemplate { name: String, region: Region },
    /// Parse and score the relic stat panel of a PNG from disk
    RateEquipment(PathBuf),
}

#[derive(Debug, Parser)]
#[command(name = "adb-scene-bot")]
#[command(version = env!("APP_VERSION_DISPLAY"))]
#[command(about = "🤖 Screen-driven Android game automation over ADB")]
#[command(after_help = "EXAMPLES:
    adb-scene-bot --cycles 20 --save-progress
    adb-scene-bot --impl usb --device R58M123 --resume
    adb-scene-bot --dry-run --log-level debug
    adb-scene-bot --impl server --list-devices
    adb-scene-bot --screenshot
    adb-scene-bot --classify cli-screenshot.png
    adb-scene-bot --rate-equipment relic.png
    adb-scene-bot --capture-template start_challenge=820,1650,440,120")]
pub struct Args {
    /// TOML config file; missing means built-in defaults
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Cycles to run, 0 runs until Ctrl-C
    #[arg(short, long)]
    pub cycles: Option<u32>,

    /// error, warn, info, debug or trace
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Device serial; first available device when omitted
    #[arg(short = 's', long)]
    pub device: Option<String>,

    /// ADB transport
    #[arg(long = "impl", value_enum)]
    pub backend: Option<BackendKind>,

    #[arg(long)]
    pub template_dir: Option<PathBuf>,

    /// Capture and classify, but only log input events
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Write progress after every cycle
    #[arg(long)]
    pub save_progress: bool,

    #[arg(long)]
    pub progress_file: Option<PathBuf>,

    /// Continue counters from the progress file
    #[arg(long)]
    pub resume: bool,

    /// List devices and exit
    #[arg(long, conflicts_with_all = ["screenshot", "classify", "capture_template", "rate_equipment"])]
    pub list_devices: bool,

    /// Save a screenshot and exit
    #[arg(long, conflicts_with_all = ["classify", "capture_template", "rate_equipment"])]
    pub screenshot: bool,

    /// Classify a saved screenshot and exit
    #[arg(long, value_name = "PNG", conflicts_with_all = ["capture_template", "rate_equipment"])]
    pub classify: Option<PathBuf>,

    /// Score the relic shown in a saved screenshot and exit
    #[arg(long, value_name = "PNG", conflicts_with = "capture_template")]
    pub rate_equipment: Option<PathBuf>,

    /// Save NAME from region X,Y,W,H of a fresh screenshot into the template dir
    #[arg(long, value_name = "NAME=X,Y,W,H", value_parser = parse_template_spec)]
    pub capture_template: Option<(String, Region)>,
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.list_devices {
            Mode::ListDevices
        } else if self.screenshot {
            Mode::Screenshot
        } else if let Some(path) = &self.classify {
            Mode::Classify(path.clone())
        } else if let Some(path) = &self.rate_equipment {
            Mode::RateEquipment(path.clone())
        } else if let Some((name, region)) = &self.capture_template {
            Mode::CaptureTemplate {
                name: name.clone(),
                region: *region,
            }
        } else {
            Mode::Run
        }
    }

    /// Command-line values win over the config file.
    pub fn apply(&self, config: &mut BotConfig) {
        if let Some(cycles) = self.cycles {
            config.flow.cycle_limit = cycles;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(device) = &self.device {
            config.adb.device = device.clone();
        }
        if let Some(backend) = self.backend {
            config.adb.backend = backend;
        }
        if let Some(dir) = &self.template_dir {
            config.recognition.template_dir = dir.clone();
        }
        if self.save_progress {
            config.progress.save = true;
        }
        if let Some(file) = &self.progress_file {
            config.progress.file = file.clone();
        }
    }
}

fn parse_template_spec(raw: &str) -> Result<(String, Region), String> {
    let (name, coords) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=X,Y,W,H, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("template name is empty".to_string());
    }
    let values = coords
        .split(',')
        .map(|v| v.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("bad coordinate in '{coords}': {e}"))?;
    match values[..] {
        [x, y, w, h] if w > 0 && h > 0 => Ok((name.to_string(), Region::new(x, y, w, h))),
        [_, _, _, _] => Err("width and height must be positive".to_string()),
        _ => Err(format!("expected 4 coordinates, got {}", values.len())),
    }
}
