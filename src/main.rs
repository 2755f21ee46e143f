use adb_scene_bot::adb::{AdbBackend, AdbClient, AdbError, DryRun};
use adb_scene_bot::args::{Args, Mode};
use adb_scene_bot::config::{BotConfig, ConfigError};
use adb_scene_bot::game_automation::{
    AutomationCommand, EquipmentScorer, FlowController, InteractionResolver, OperationSummary,
    RandomizedDelay, RunStats, SceneClassifier, TradeRecord, parse_equipment,
};
use adb_scene_bot::progress::{ProgressError, ProgressStore};
use adb_scene_bot::vision::{
    Region, TemplateLibrary, TesseractRecognizer, TextRecognizer, VisionError, save_template,
};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;

const SCREENSHOT_FILE: &str = "cli-screenshot.png";

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Adb(#[from] AdbError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = BotConfig::load(&args.config).map(|mut config| {
        args.apply(&mut config);
        config
    });
    let level = match &config {
        Ok(config) => config.logging.level.clone(),
        Err(_) => args.log_level.clone().unwrap_or_else(|| "info".to_string()),
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();

    let result = match config {
        Ok(config) => run(&args, config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, config: BotConfig) -> Result<(), AppError> {
    match args.mode() {
        Mode::Classify(path) => classify_file(&path, &config).await,
        Mode::RateEquipment(path) => rate_equipment(&path, &config).await,
        Mode::ListDevices => {
            let kind = config.adb.backend;
            let devices = AdbBackend::list_devices(kind, &config.adb.connect_options()).await?;
            if devices.is_empty() {
                println!("❌ No devices found ({} backend)", kind.as_str());
            }
            for device in devices {
                match device.transport_id {
                    Some(id) => println!("📱 {} (transport {id})", device.name),
                    None => println!("📱 {}", device.name),
                }
            }
            Ok(())
        }
        Mode::Screenshot => {
            let device = connect(&config).await?;
            let capture = device.screen_capture().await?;
            capture.image.save(SCREENSHOT_FILE)?;
            println!(
                "✅ Screenshot {}x{} ({}ms) saved to {SCREENSHOT_FILE}",
                capture.image.width(),
                capture.image.height(),
                capture.duration_ms
            );
            Ok(())
        }
        Mode::CaptureTemplate { name, region } => {
            let device = connect(&config).await?;
            capture_template(&device, &config, &name, region).await
        }
        Mode::Run => {
            let device = connect(&config).await?;
            let report = if args.dry_run {
                log::info!("🧪 Dry run: input events are logged, not sent");
                automate(DryRun::new(device), args, &config).await?
            } else {
                automate(device, args, &config).await?
            };
            print_summary(&report);
            Ok(())
        }
    }
}

async fn connect(config: &BotConfig) -> Result<AdbBackend, AdbError> {
    let device = AdbBackend::connect(
        config.adb.backend,
        &config.adb.device,
        config.adb.connect_options(),
    )
    .await?;
    let (w, h) = device.screen_dimensions();
    log::info!(
        "📱 Device: {} ({w}x{h}) via {} backend",
        device.device_name(),
        device.kind().as_str()
    );
    Ok(device)
}

fn load_templates(config: &BotConfig) -> TemplateLibrary {
    let dir = &config.recognition.template_dir;
    let scale = config.recognition.template_scale;
    match TemplateLibrary::load_from_directory(dir, scale) {
        Ok(library) => {
            log::info!("🖼️ Loaded {} template(s) from {}", library.len(), dir.display());
            library
        }
        Err(e) => {
            log::warn!("⚠️ No templates ({e}), relying on text and fallbacks");
            TemplateLibrary::new(scale)
        }
    }
}

struct RunReport {
    stats: RunStats,
    operations: OperationSummary,
    trades: Vec<TradeRecord>,
}

async fn automate<D: AdbClient>(
    device: D,
    args: &Args,
    config: &BotConfig,
) -> Result<RunReport, AppError> {
    let device_id = device.device_name().to_string();
    let store = ProgressStore::new(&config.progress.file);
    let resume = if args.resume {
        let record = store.load(&device_id)?;
        if record.is_none() {
            log::info!("📂 No saved progress for {device_id}, starting fresh");
        }
        record
    } else {
        None
    };

    let recognizer = TesseractRecognizer::new(config.ocr.clone());
    let mut flow = FlowController::new(
        device,
        recognizer,
        load_templates(config),
        config,
        Arc::new(RandomizedDelay::default()),
    );
    if config.progress.save {
        flow = flow.with_persistence(store, device_id);
    }

    let commands = flow.commands();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("🛑 Ctrl-C received, stopping after the current cycle");
            let _ = commands.send(AutomationCommand::Stop).await;
        }
    });

    let stats = flow.start(config.flow.cycle_limit, resume).await;
    Ok(RunReport {
        stats,
        operations: flow.status().operation_summary(),
        trades: flow.trade_history(),
    })
}

async fn classify_file(path: &Path, config: &BotConfig) -> Result<(), AppError> {
    let image = image::open(path)?;
    let classifier = SceneClassifier::new(
        TesseractRecognizer::new(config.ocr.clone()),
        load_templates(config),
        config.recognition.clone(),
    );
    let observation = classifier.observe(image, 0).await;

    println!("🎮 Scene: {}", observation.label);
    for text in &observation.frame.signals.texts {
        println!("   📝 {:?} ({:.2})", text.text, text.confidence);
    }
    for hit in &observation.frame.signals.templates {
        println!("   🖼️ {} at {} ({:.2})", hit.name, hit.region, hit.score);
    }
    if !observation.info.is_empty() {
        println!("   ℹ️ {:?}", observation.info);
    }
    let points = InteractionResolver::default().resolve(observation.label, &observation.frame);
    for (name, (x, y)) in &points {
        println!("   👆 {name}: ({x}, {y})");
    }
    Ok(())
}

async fn rate_equipment(path: &Path, config: &BotConfig) -> Result<(), AppError> {
    let image = image::open(path)?;
    let region = config
        .equipment
        .region
        .clip_to_screen(image.width(), image.height());
    let recognizer = TesseractRecognizer::new(config.ocr.clone());
    let texts = recognizer.recognize(&image, region).await?;
    let texts: Vec<&str> = texts
        .iter()
        .filter(|t| t.confidence >= config.recognition.ocr_confidence)
        .map(|t| t.text.as_str())
        .collect();

    let equipment = parse_equipment(&texts);
    let scorer = EquipmentScorer::new(config.equipment.clone());
    println!(
        "🛡️ {} Lv.{} {}★",
        equipment.name.as_deref().unwrap_or("unnamed"),
        equipment.level,
        equipment.rarity
    );
    if let Some((name, value)) = equipment.main_attribute() {
        println!("   ⭐ {name} {value}");
    }
    for (name, value) in equipment.sub_attributes() {
        println!("   ▫️ {name} {value}");
    }
    println!("📊 Score: {:.2}", scorer.score(&equipment));
    Ok(())
}

async fn capture_template<D: AdbClient>(
    device: &D,
    config: &BotConfig,
    name: &str,
    region: Region,
) -> Result<(), AppError> {
    let capture = device.screen_capture().await?;
    let path = save_template(&config.recognition.template_dir, name, &capture.image, region)?;
    println!("✅ Template {name} saved to {}", path.display());
    Ok(())
}

fn print_summary(report: &RunReport) {
    let stats = &report.stats;
    println!("📊 Cycles: {} ({} failed)", stats.total_cycles, stats.failed_cycles);
    println!(
        "⚔️ Battles: {}  🏆 Wins: {}  ({:.1}%)",
        stats.total_battles,
        stats.win_count,
        stats.win_rate() * 100.0
    );
    if let Some(score) = stats.current_score {
        println!("📈 Score: {score}");
    }
    if let Some(currency) = stats.current_currency {
        println!("💰 Currency: {currency}");
    }
    if report.operations.total > 0 {
        println!(
            "📝 Operations: {} ({:.1}% ok)",
            report.operations.total,
            report.operations.success_rate() * 100.0
        );
        for (name, count) in &report.operations.by_operation {
            println!(
                "   {name}: {}/{} ({:.1}%)",
                count.succeeded,
                count.total,
                count.success_rate() * 100.0
            );
        }
    }
    for trade in &report.trades {
        let mark = if trade.success { "✅" } else { "❌" };
        println!("💱 {mark} {} {} for {}", trade.side, trade.item, trade.price);
    }
}
