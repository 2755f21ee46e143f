// Tests for the scene engine
// Focus: classification, point resolution, per-scene handlers, the flow loop

#[cfg(test)]
mod scene_engine_tests {
    use super::super::actions::DeviceActions;
    use super::super::classifier::{SceneClassifier, hud_regions, keyword_ratio, parse_rewards};
    use super::super::delay::{
        DelayStrategy, FixedDelay, NoDelay, Pacer, RandomizedDelay, RetryPolicy, wait_and_retry,
    };
    use super::super::dispatcher::{ActionDispatcher, BattleTiming};
    use super::super::equipment::{Equipment, EquipmentScorer, parse_equipment};
    use super::super::flow::FlowController;
    use super::super::resolver::{InteractionResolver, Layout, RelativePoint, TargetSpec};
    use super::super::stats::{OperationCount, RunStats, StatusHandle};
    use super::super::trading::{TradeDesk, TradeOffer, TradePolicy, TradeSide, parse_offer};
    use super::super::types::{
        AutomationCommand, AutomationEvent, BattleOutcome, Frame, SceneInfo, SceneLabel,
        SignalBundle,
    };
    use crate::adb::{AdbClient, AdbError, AdbResult, ImageCapture};
    use crate::config::{BotConfig, EquipmentConfig, FlowConfig, RecognitionConfig, TradingConfig};
    use crate::progress::{ProgressRecord, ProgressStore};
    use crate::vision::{
        RecognizedText, Region, TemplateHit, TemplateLibrary, TextRecognizer, VisionError,
        VisionResult,
    };
    use image::{DynamicImage, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;
    use tokio::time::Instant;

    const W: u32 = 200;
    const H: u32 = 100;

    // ============================================================
    // TEST DOUBLES
    // ============================================================

    #[derive(Default)]
    struct DeviceState {
        frames: VecDeque<DynamicImage>,
        last: Option<DynamicImage>,
        taps: Vec<(u32, u32)>,
        shell: Vec<String>,
        captures: usize,
        fail_captures: usize,
        fail_taps: bool,
    }

    /// Shows queued frames (the last one repeats) and records input.
    #[derive(Clone, Default)]
    struct FakeDevice {
        state: Arc<Mutex<DeviceState>>,
    }

    impl FakeDevice {
        fn showing(image: DynamicImage) -> Self {
            let device = Self::default();
            device.queue(image);
            device
        }

        fn lock(&self) -> MutexGuard<'_, DeviceState> {
            self.state.lock().expect("device state")
        }

        fn queue(&self, image: DynamicImage) {
            self.lock().frames.push_back(image);
        }

        fn taps(&self) -> Vec<(u32, u32)> {
            self.lock().taps.clone()
        }

        fn captures(&self) -> usize {
            self.lock().captures
        }

        fn shell_log(&self) -> Vec<String> {
            self.lock().shell.clone()
        }
    }

    impl AdbClient for FakeDevice {
        async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>> {
            let capture = self.screen_capture().await?;
            let mut png = Vec::new();
            capture
                .image
                .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
            Ok(png)
        }

        async fn screen_capture(&self) -> AdbResult<ImageCapture> {
            let mut state = self.lock();
            state.captures += 1;
            if state.fail_captures > 0 {
                state.fail_captures -= 1;
                return Err(AdbError::Timeout {
                    duration: Duration::from_secs(1),
                    description: "screencap".to_string(),
                });
            }
            let image = match state.frames.pop_front() {
                Some(image) => {
                    state.last = Some(image.clone());
                    image
                }
                None => state.last.clone().unwrap_or_else(bright),
            };
            Ok(ImageCapture {
                image,
                duration_ms: 0,
            })
        }

        async fn tap(&self, x: u32, y: u32) -> AdbResult<()> {
            let mut state = self.lock();
            if state.fail_taps {
                return Err(AdbError::TapOutOfBounds { x, y });
            }
            state.taps.push((x, y));
            Ok(())
        }

        async fn swipe(&self, _: u32, _: u32, _: u32, _: u32, _: Option<u32>) -> AdbResult<()> {
            Ok(())
        }

        async fn shell(&self, args: &[&str]) -> AdbResult<String> {
            self.lock().shell.push(args.join(" "));
            Ok(String::new())
        }

        fn screen_dimensions(&self) -> (u32, u32) {
            (W, H)
        }

        fn device_name(&self) -> &str {
            "fake"
        }
    }

    #[derive(Default)]
    struct Script {
        /// Full-screen results in call order; `None` is a recognition error
        screens: VecDeque<Option<Vec<RecognizedText>>>,
        last: Vec<RecognizedText>,
        region: Vec<RecognizedText>,
        panics: bool,
        /// Simulated recognition time
        latency: Option<Duration>,
    }

    #[derive(Clone, Default)]
    struct ScriptedRecognizer {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedRecognizer {
        fn reading(texts: &[&str]) -> Self {
            let recognizer = Self::default();
            recognizer.then(texts);
            recognizer
        }

        fn then(&self, texts: &[&str]) -> &Self {
            let fragments = texts.iter().map(|t| text(t)).collect();
            self.lock().screens.push_back(Some(fragments));
            self
        }

        fn then_fragments(&self, fragments: Vec<RecognizedText>) -> &Self {
            self.lock().screens.push_back(Some(fragments));
            self
        }

        fn then_fail(&self) -> &Self {
            self.lock().screens.push_back(None);
            self
        }

        fn with_region(&self, texts: &[&str]) -> &Self {
            self.lock().region = texts.iter().map(|t| text(t)).collect();
            self
        }

        fn lock(&self) -> MutexGuard<'_, Script> {
            self.script.lock().expect("script")
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        async fn recognize(
            &self,
            _image: &DynamicImage,
            region: Option<Region>,
        ) -> VisionResult<Vec<RecognizedText>> {
            let (panics, latency) = {
                let script = self.lock();
                (script.panics, script.latency)
            };
            if panics {
                panic!("recognizer exploded");
            }
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let mut script = self.lock();
            if region.is_some() {
                return Ok(script.region.clone());
            }
            match script.screens.pop_front() {
                Some(Some(texts)) => {
                    script.last = texts.clone();
                    Ok(texts)
                }
                Some(None) => Err(VisionError::OcrFailed {
                    status: "exit 1".to_string(),
                    stderr: "scripted failure".to_string(),
                }),
                None => Ok(script.last.clone()),
            }
        }
    }

    fn text(s: &str) -> RecognizedText {
        RecognizedText::new(s, 0.95)
    }

    fn solid(rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(W, H, Rgb(rgb)))
    }

    fn bright() -> DynamicImage {
        solid([200, 200, 200])
    }

    fn frame(texts: Vec<RecognizedText>) -> Frame {
        Frame {
            image: bright(),
            signals: SignalBundle::from_recognized(texts, 0.0),
            index: 1,
        }
    }

    fn classifier(recognizer: ScriptedRecognizer) -> SceneClassifier<ScriptedRecognizer> {
        SceneClassifier::new(recognizer, TemplateLibrary::default(), RecognitionConfig::default())
    }

    async fn classify(texts: &[&str]) -> (SceneLabel, SceneInfo) {
        let observation = classifier(ScriptedRecognizer::reading(texts))
            .observe(bright(), 1)
            .await;
        (observation.label, observation.info)
    }

    struct Harness {
        device: FakeDevice,
        recognizer: ScriptedRecognizer,
        status: StatusHandle,
        dispatcher: ActionDispatcher<FakeDevice, ScriptedRecognizer>,
    }

    fn harness(layout: Layout) -> Harness {
        build_harness(layout, None)
    }

    fn trading_harness(trading: TradingConfig) -> Harness {
        build_harness(Layout::default(), Some(trading))
    }

    fn build_harness(layout: Layout, trading: Option<TradingConfig>) -> Harness {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::default();
        let status = StatusHandle::new();
        let flow = FlowConfig::default();
        let actions = Arc::new(DeviceActions::new(
            Arc::new(device.clone()),
            &flow,
            Arc::new(NoDelay),
        ));
        let classifier = Arc::new(classifier(recognizer.clone()));
        let mut dispatcher = ActionDispatcher::new(
            actions.clone(),
            classifier.clone(),
            InteractionResolver::new(layout),
            status.clone(),
            BattleTiming::from(&flow),
        );
        if let Some(trading) = trading {
            dispatcher =
                dispatcher.with_trading(TradeDesk::new(actions, classifier, status.clone(), trading));
        }
        Harness {
            device,
            recognizer,
            status,
            dispatcher,
        }
    }

    fn controller(
        device: &FakeDevice,
        recognizer: &ScriptedRecognizer,
    ) -> FlowController<FakeDevice, ScriptedRecognizer> {
        FlowController::new(
            device.clone(),
            recognizer.clone(),
            TemplateLibrary::default(),
            &BotConfig::default(),
            Arc::new(NoDelay),
        )
    }

    // ============================================================
    // SCENE CLASSIFIER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_activity_menu_with_score() {
        let (label, info) = classify(&["货币战争", "开始挑战", "积分: 150"]).await;

        assert_eq!(label, SceneLabel::ActivityMenu);
        assert_eq!(info.score, Some(150));
        assert_eq!(info.currency, None);
        assert_eq!(info.result, None);
    }

    #[tokio::test]
    async fn test_first_label_in_priority_order_wins() {
        let (label, _) =
            classify(&["星穹铁道", "开始游戏", "设置", "货币战争", "开始挑战", "积分"]).await;
        assert_eq!(label, SceneLabel::MainMenu);
    }

    #[tokio::test]
    async fn test_below_threshold_is_unknown_with_empty_info() {
        let (label, info) = classify(&["货币战争", "开始挑战"]).await;
        assert_eq!(label, SceneLabel::Unknown);
        assert!(info.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_fragments_are_ignored() {
        let recognizer = ScriptedRecognizer::default();
        recognizer.then_fragments(vec![
            RecognizedText::new("货币战争", 0.95),
            RecognizedText::new("开始挑战", 0.5),
            RecognizedText::new("积分", 0.95),
        ]);
        let observation = classifier(recognizer).observe(bright(), 1).await;

        assert_eq!(observation.frame.signals.texts.len(), 2);
        assert_eq!(observation.label, SceneLabel::Unknown);
    }

    #[tokio::test]
    async fn test_dark_hud_without_text_means_battle() {
        let observation = classifier(ScriptedRecognizer::default())
            .observe(solid([10, 10, 10]), 1)
            .await;
        assert_eq!(observation.label, SceneLabel::BattleInProgress);
        assert!(observation.info.is_empty());
    }

    #[tokio::test]
    async fn test_single_dark_region_is_enough() {
        let mut image = RgbImage::from_pixel(W, H, Rgb([200, 200, 200]));
        let corner = hud_regions(W, H)[0];
        assert_eq!(corner, Region::new(175, 12, 25, 25));
        for x in corner.x..corner.x + corner.width {
            for y in corner.y..corner.y + corner.height {
                image.put_pixel(x, y, Rgb([50, 50, 50]));
            }
        }
        let observation = classifier(ScriptedRecognizer::reading(&["加载中"]))
            .observe(DynamicImage::ImageRgb8(image), 1)
            .await;
        assert_eq!(observation.label, SceneLabel::BattleInProgress);
    }

    #[tokio::test]
    async fn test_recognition_failure_is_unknown_even_when_dark() {
        let recognizer = ScriptedRecognizer::default();
        recognizer.then_fail();
        let observation = classifier(recognizer).observe(solid([0, 0, 0]), 1).await;

        assert!(observation.frame.signals.recognition_failed);
        assert_eq!(observation.label, SceneLabel::Unknown);
        assert!(observation.info.is_empty());
    }

    #[tokio::test]
    async fn test_score_from_numeric_fragment_after_keyword() {
        let (label, info) = classify(&["货币战争", "开始挑战", "积分", "1,200"]).await;
        assert_eq!(label, SceneLabel::ActivityMenu);
        assert_eq!(info.score, Some(1200));
    }

    #[tokio::test]
    async fn test_score_from_fixed_region() {
        let recognizer = ScriptedRecognizer::reading(&["货币战争", "开始挑战", "积分"]);
        recognizer.with_region(&["350"]);
        let observation = classifier(recognizer).observe(bright(), 1).await;
        assert_eq!(observation.info.score, Some(350));
    }

    #[tokio::test]
    async fn test_score_falls_back_to_largest_number() {
        let (label, info) = classify(&["积分", "排名", "段位", "第 3 名", "8800 pts"]).await;
        assert_eq!(label, SceneLabel::ScoreDisplay);
        assert_eq!(info.score, Some(8800));
    }

    #[tokio::test]
    async fn test_currency_next_to_keyword() {
        let (_, info) = classify(&["货币战争", "开始挑战", "积分 150", "信用点", "52,000"]).await;
        assert_eq!(info.score, Some(150));
        assert_eq!(info.currency, Some(52000));
    }

    #[tokio::test]
    async fn test_battle_outcome_tokens() {
        let (label, info) = classify(&["战斗结束", "获得", "胜利"]).await;
        assert_eq!(label, SceneLabel::BattleResult);
        assert_eq!(info.result, Some(BattleOutcome::Win));

        let (_, info) = classify(&["战斗结束", "获得", "DEFEAT"]).await;
        assert_eq!(info.result, Some(BattleOutcome::Loss));

        let (_, info) = classify(&["战斗结束", "获得"]).await;
        assert_eq!(info.result, Some(BattleOutcome::Unknown));
    }

    #[tokio::test]
    async fn test_rewards_accumulate_and_last_duplicate_wins() {
        let (label, info) = classify(&[
            "领取奖励",
            "确定",
            "获得 信用点 x1000",
            "星琼×50",
            "信用点 x2000",
        ])
        .await;

        assert_eq!(label, SceneLabel::RewardCollection);
        let rewards = info.reward.expect("rewards parsed");
        assert_eq!(rewards.len(), 2);
        assert_eq!(rewards["信用点"], 2000);
        assert_eq!(rewards["星琼"], 50);
    }

    #[test]
    fn test_parse_rewards_separators() {
        let rewards = parse_rewards(&["credit: 300", "获得遗器残骸*4", "nothing here"]);
        assert_eq!(rewards.get("credit"), Some(&300));
        assert_eq!(rewards.get("遗器残骸"), Some(&4));
        assert_eq!(rewards.len(), 2);
    }

    #[test]
    fn test_parse_rewards_keeps_x_inside_latin_names() {
        let rewards = parse_rewards(&["Box5", "Gold x20", "金币x100", "Xenon X3"]);
        assert_eq!(rewards.get("Box"), Some(&5));
        assert_eq!(rewards.get("Gold"), Some(&20));
        assert_eq!(rewards.get("金币"), Some(&100));
        assert_eq!(rewards.get("Xenon"), Some(&3));
        assert_eq!(rewards.len(), 4);
    }

    #[test]
    fn test_keyword_ratio() {
        let keywords = vec!["积分".to_string(), "排名".to_string(), "段位".to_string()];
        assert_eq!(keyword_ratio("积分 排名", &keywords), 2.0 / 3.0);
        assert_eq!(keyword_ratio("anything", &[]), 0.0);
        assert_eq!(keyword_ratio("SCORE board", &["score".to_string()]), 1.0);
    }

    #[tokio::test]
    async fn test_empty_keyword_set_never_matches() {
        let mut config = RecognitionConfig::default();
        config.scene_threshold = 0.0;
        config.keywords.main_menu.clear();
        let classifier = SceneClassifier::new(
            ScriptedRecognizer::reading(&["随便"]),
            TemplateLibrary::default(),
            config,
        );
        let observation = classifier.observe(bright(), 1).await;
        // threshold 0 lets every non-empty set qualify, so the next label wins
        assert_eq!(observation.label, SceneLabel::ActivityMenu);
    }

    // ============================================================
    // INTERACTION RESOLVER TESTS
    // ============================================================

    #[test]
    fn test_button_text_beats_fallback() {
        let resolver = InteractionResolver::default();
        let frame = frame(vec![
            text("货币战争"),
            text("开始挑战").with_bbox(Region::new(20, 10, 40, 20)),
        ]);

        let points = resolver.resolve(SceneLabel::ActivityMenu, &frame);
        assert_eq!(points.get("start_challenge"), Some(&(40, 20)));
    }

    #[test]
    fn test_text_box_outside_frame_is_ignored() {
        let resolver = InteractionResolver::default();
        let frame = frame(vec![text("开始挑战").with_bbox(Region::new(500, 500, 10, 10))]);

        let points = resolver.resolve(SceneLabel::ActivityMenu, &frame);
        assert_eq!(points.get("start_challenge"), Some(&(100, 75)));
    }

    #[test]
    fn test_template_hit_used_before_fallback() {
        let resolver = InteractionResolver::default();
        let mut frame = frame(vec![]);
        frame.signals.templates.push(TemplateHit {
            name: "confirm".to_string(),
            region: Region::new(150, 10, 20, 10),
            score: 0.93,
        });

        let points = resolver.resolve(SceneLabel::BattleResult, &frame);
        assert_eq!(points.get("confirm"), Some(&(160, 15)));
    }

    #[test]
    fn test_missing_targets_are_absent() {
        let resolver = InteractionResolver::default();
        let frame = frame(vec![text("星穹铁道")]);

        assert!(resolver.resolve(SceneLabel::MainMenu, &frame).is_empty());
        assert!(resolver.resolve(SceneLabel::ScoreDisplay, &frame).is_empty());
        assert!(resolver.resolve(SceneLabel::Unknown, &frame).is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let resolver = InteractionResolver::default();
        let frame = frame(vec![text("领取奖励").with_bbox(Region::new(60, 40, 30, 10))]);

        let first = resolver.resolve(SceneLabel::RewardCollection, &frame);
        let second = resolver.resolve(SceneLabel::RewardCollection, &frame);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fallback_points_scale_with_resolution() {
        let resolver = InteractionResolver::default();
        let sized = |w, h| Frame {
            image: DynamicImage::new_rgb8(w, h),
            signals: SignalBundle::default(),
            index: 1,
        };

        let a = resolver.resolve(SceneLabel::BattleInProgress, &sized(200, 120));
        let b = resolver.resolve(SceneLabel::BattleInProgress, &sized(400, 240));
        assert_eq!(a.len(), 3);
        for (name, (x, y)) in &a {
            assert_eq!(b[name], (x * 2, y * 2), "{name}");
        }
        assert_eq!(a["skill_1"], (50, 105));
    }

    #[test]
    fn test_relative_point_rounds() {
        assert_eq!(RelativePoint::new(0.5, 0.8333).at(W, H), (100, 83));
        assert_eq!(RelativePoint::new(0.0, 1.0).at(1080, 2400), (0, 2400));
    }

    // ============================================================
    // ACTION DISPATCHER TESTS
    // ============================================================

    fn only_first_skill() -> Layout {
        Layout::default().with_targets(
            SceneLabel::BattleInProgress,
            vec![
                TargetSpec::new("skill_1", None, Some(RelativePoint::new(0.25, 0.875))),
                TargetSpec::new("skill_2", None, None),
                TargetSpec::new("skill_3", None, None),
            ],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_battle_times_out_with_one_skill() {
        let h = harness(only_first_skill());
        let started = Instant::now();

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::BattleInProgress, &frame(vec![]), &SceneInfo::default())
            .await;

        assert!(!handled);
        assert_eq!(h.device.taps(), vec![(50, 88)]);
        let timing = BattleTiming::from(&FlowConfig::default());
        assert!(started.elapsed() <= timing.timeout + timing.poll_interval);
        assert!(started.elapsed() >= timing.timeout);
        assert!(h.device.captures() >= 29);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_recognition_does_not_stretch_battle_timeout() {
        let h = harness(only_first_skill());
        h.recognizer.lock().latency = Some(Duration::from_secs(5));
        let started = Instant::now();

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::BattleInProgress, &frame(vec![]), &SceneInfo::default())
            .await;

        assert!(!handled);
        let timing = BattleTiming::from(&FlowConfig::default());
        assert!(started.elapsed() <= timing.timeout + timing.poll_interval);
        assert!(started.elapsed() >= timing.timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_battle_ends_on_result_screen() {
        let h = harness(Layout::default());
        h.recognizer.then(&["战斗中"]).then(&["战斗结束", "获得", "胜利"]);
        let started = Instant::now();

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::BattleInProgress, &frame(vec![]), &SceneInfo::default())
            .await;

        assert!(handled);
        assert_eq!(h.device.taps().len(), 3);
        assert_eq!(h.status.current_scene(), SceneLabel::BattleResult);
        assert!(started.elapsed() < Duration::from_secs(10));
        // the result screen itself is handled by the next cycle
        assert_eq!(h.status.snapshot().win_count, 0);
    }

    #[tokio::test]
    async fn test_score_display_without_back_taps_center() {
        let h = harness(Layout::default());
        let handled = h
            .dispatcher
            .dispatch(SceneLabel::ScoreDisplay, &frame(vec![text("积分")]), &SceneInfo::default())
            .await;

        assert!(handled);
        assert_eq!(h.device.taps(), vec![(100, 50)]);
    }

    #[tokio::test]
    async fn test_score_display_prefers_back_button() {
        let h = harness(Layout::default());
        let frame = frame(vec![text("返回").with_bbox(Region::new(0, 0, 20, 10))]);
        h.dispatcher
            .dispatch(SceneLabel::ScoreDisplay, &frame, &SceneInfo::default())
            .await;
        assert_eq!(h.device.taps(), vec![(10, 5)]);
    }

    #[tokio::test]
    async fn test_battle_prepare_counts_battle() {
        let h = harness(Layout::default());
        let handled = h
            .dispatcher
            .dispatch(SceneLabel::BattlePrepare, &frame(vec![]), &SceneInfo::default())
            .await;

        assert!(handled);
        assert_eq!(h.device.taps(), vec![(100, 75)]);
        assert_eq!(h.status.snapshot().total_battles, 1);
    }

    #[tokio::test]
    async fn test_battle_result_counts_only_wins() {
        let h = harness(Layout::default());
        let win = SceneInfo {
            result: Some(BattleOutcome::Win),
            ..SceneInfo::default()
        };
        let loss = SceneInfo {
            result: Some(BattleOutcome::Loss),
            ..SceneInfo::default()
        };

        assert!(h.dispatcher.dispatch(SceneLabel::BattleResult, &frame(vec![]), &win).await);
        assert!(h.dispatcher.dispatch(SceneLabel::BattleResult, &frame(vec![]), &loss).await);

        let stats = h.status.snapshot();
        assert_eq!(stats.win_count, 1);
        assert_eq!(stats.total_battles, 0);
    }

    #[tokio::test]
    async fn test_missing_target_fails_without_tapping() {
        let h = harness(Layout::default());
        let handled = h
            .dispatcher
            .dispatch(SceneLabel::MainMenu, &frame(vec![text("星穹铁道")]), &SceneInfo::default())
            .await;

        assert!(!handled);
        assert!(h.device.taps().is_empty());
    }

    #[tokio::test]
    async fn test_main_menu_taps_activity_entry() {
        let h = harness(Layout::default());
        let frame = frame(vec![text("货币战争").with_bbox(Region::new(120, 30, 40, 20))]);
        assert!(h.dispatcher.dispatch(SceneLabel::MainMenu, &frame, &SceneInfo::default()).await);
        assert_eq!(h.device.taps(), vec![(140, 40)]);
    }

    #[tokio::test]
    async fn test_failed_tap_fails_handler() {
        let h = harness(Layout::default());
        h.device.lock().fail_taps = true;

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::ActivityMenu, &frame(vec![]), &SceneInfo::default())
            .await;
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_unknown_recovery_reclassifies_once() {
        let h = harness(Layout::default());
        h.recognizer.then(&["星穹铁道", "开始游戏", "设置"]);

        let recovered = h
            .dispatcher
            .dispatch(SceneLabel::Unknown, &frame(vec![]), &SceneInfo::default())
            .await;

        assert!(recovered);
        assert_eq!(h.device.taps(), vec![(100, 75)]);
        assert_eq!(h.device.captures(), 1);
        assert_eq!(h.status.current_scene(), SceneLabel::MainMenu);
    }

    #[tokio::test]
    async fn test_unknown_recovery_fails_when_still_unknown() {
        let h = harness(Layout::default());
        let recovered = h
            .dispatcher
            .dispatch(SceneLabel::Unknown, &frame(vec![]), &SceneInfo::default())
            .await;
        assert!(!recovered);
    }

    // ============================================================
    // FLOW CONTROLLER TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_cycle_limit_and_failure_path_popup_tap() {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::reading(&["星穹铁道", "开始游戏", "设置"]);
        let flow = controller(&device, &recognizer);

        let stats = flow.start(2, None).await;

        assert_eq!(stats.total_cycles, 2);
        assert_eq!(stats.failed_cycles, 2);
        // one dismiss tap between the two cycles, none after the last
        assert_eq!(device.taps(), vec![(100, 83)]);
        assert_eq!(flow.get_current_scene(), SceneLabel::MainMenu);
        assert!(!flow.is_running());

        let summary = flow.status().operation_summary();
        assert_eq!(summary.by_operation["cycle"], OperationCount { total: 2, succeeded: 0 });
        assert_eq!(summary.by_operation["main_menu"], OperationCount { total: 2, succeeded: 0 });
        assert!(flow.trade_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_game_is_brought_to_foreground() {
        let device = FakeDevice::showing(bright());
        let flow = controller(&device, &ScriptedRecognizer::default());
        flow.start(1, None).await;

        assert_eq!(
            device.shell_log(),
            vec!["am start -n com.miHoYo.hkrpg/com.miHoYo.hkrpg.GameActivity"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_stop_prevents_any_cycle() {
        let device = FakeDevice::showing(bright());
        let flow = controller(&device, &ScriptedRecognizer::default());
        flow.commands()
            .send(AutomationCommand::Stop)
            .await
            .expect("send");

        let stats = flow.start(0, None).await;
        assert_eq!(stats.total_cycles, 0);
        assert_eq!(device.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_command_clears_stats_between_cycles() {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::default();
        let flow = controller(&device, &recognizer);
        flow.run_cycle().await;
        flow.run_cycle().await;
        assert_eq!(flow.get_stats().total_cycles, 2);

        flow.commands()
            .send(AutomationCommand::ResetStats)
            .await
            .expect("send");
        let stats = flow.start(1, None).await;
        assert_eq!(stats.total_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_seeds_counters_and_limit_counts_this_run() {
        let device = FakeDevice::showing(bright());
        let flow = controller(&device, &ScriptedRecognizer::default());

        let stats = flow.start(2, Some(ProgressRecord::new(5, 10))).await;
        assert_eq!(stats.total_battles, 5);
        assert_eq!(stats.total_cycles, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_written_after_each_cycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProgressStore::new(dir.path().join("progress.json"));
        let device = FakeDevice::showing(bright());
        let flow = controller(&device, &ScriptedRecognizer::default())
            .with_persistence(store.clone(), "fake");

        flow.start(3, None).await;

        let record = store.load("fake").expect("load").expect("record");
        assert_eq!(record.cycle_count, 3);
        assert_eq!(record.total_battles, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_is_retried_then_fails_cycle() {
        let device = FakeDevice::showing(bright());
        device.lock().fail_captures = usize::MAX;
        let flow = controller(&device, &ScriptedRecognizer::default());

        assert!(!flow.run_cycle().await);
        assert_eq!(device.captures(), 3);
        assert_eq!(flow.get_stats().failed_cycles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_capture_failure_recovers() {
        let device = FakeDevice::showing(bright());
        device.lock().fail_captures = 1;
        let recognizer = ScriptedRecognizer::reading(&["货币战争", "开始挑战", "积分 90"]);
        let flow = controller(&device, &recognizer);

        assert!(flow.run_cycle().await);
        assert_eq!(device.taps(), vec![(100, 75)]);
        assert_eq!(flow.get_stats().current_score, Some(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_layout_replaces_default_targets() {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::reading(&["货币战争", "开始挑战", "积分 90"]);
        let layout = Layout::default().with_targets(
            SceneLabel::ActivityMenu,
            vec![TargetSpec::new(
                "start_challenge",
                None,
                Some(RelativePoint::new(0.1, 0.1)),
            )],
        );
        let flow = controller(&device, &recognizer).with_layout(layout);

        assert!(flow.run_cycle().await);
        assert_eq!(device.taps(), vec![(20, 10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_in_cycle_counts_as_failure() {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::default();
        recognizer.lock().panics = true;
        let flow = controller(&device, &recognizer);

        assert!(!flow.run_cycle().await);
        let stats = flow.get_stats();
        assert_eq!((stats.total_cycles, stats.failed_cycles), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_report_cycles() {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::reading(&["积分 10", "排名", "段位"]);
        let flow = controller(&device, &recognizer);
        let mut events = flow.take_events().expect("first taker");
        assert!(flow.take_events().is_none());

        flow.start(1, None).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&AutomationEvent::SceneChanged(SceneLabel::ScoreDisplay)));
        assert!(seen.contains(&AutomationEvent::CycleFinished {
            cycle: 1,
            success: true
        }));
        assert_eq!(seen.last(), Some(&AutomationEvent::Stopped));
    }

    // ============================================================
    // DELAY AND RETRY TESTS
    // ============================================================

    #[test]
    fn test_randomized_delay_stays_in_band() {
        let delays = RandomizedDelay::default();
        for _ in 0..200 {
            let d = delays.jitter(Duration::from_secs(2), 0.5);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(3), "{d:?}");
        }
        assert_eq!(delays.jitter(Duration::ZERO, 0.5), Duration::ZERO);
        assert_eq!(delays.jitter(Duration::from_millis(10), 0.0), Duration::from_millis(100));
    }

    #[test]
    fn test_pacer_adds_extra_pause_periodically() {
        let pacer = Pacer::new(
            Arc::new(FixedDelay),
            Duration::from_millis(500),
            Duration::from_secs(2),
            0.3,
        )
        .with_extra_pause(3, Duration::from_secs(1));

        assert_eq!(pacer.next_delay(false), Duration::from_millis(500));
        assert_eq!(pacer.next_delay(true), Duration::from_secs(2));
        assert_eq!(pacer.next_delay(false), Duration::from_millis(1500));
        assert_eq!(pacer.next_delay(false), Duration::from_millis(500));
    }

    #[test]
    fn test_extra_pause_uses_pacing_variation() {
        let pacer = Pacer::new(
            Arc::new(RandomizedDelay::default()),
            Duration::ZERO,
            Duration::ZERO,
            0.3,
        )
        .with_extra_pause(1, Duration::from_secs(1));

        for _ in 0..200 {
            let delay = pacer.next_delay(false);
            assert!(delay >= Duration::from_millis(699), "{delay:?}");
            assert!(delay <= Duration::from_millis(1301), "{delay:?}");
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_retry_until_success() {
        let calls = Mutex::new(0u32);
        let counter = &calls;
        let result: Result<u32, String> =
            wait_and_retry("op", &RetryPolicy::default(), &FixedDelay, || async move {
                let mut n = counter.lock().expect("calls");
                *n += 1;
                if *n < 3 { Err(format!("attempt {}", *n)) } else { Ok(*n) }
            })
            .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_and_retry_respects_elapsed_ceiling() {
        let policy = RetryPolicy {
            attempts: 10,
            ceiling: Duration::from_secs(5),
            base_delay: Duration::from_secs(4),
        };
        let calls = Mutex::new(0u32);
        let counter = &calls;
        let started = Instant::now();
        let result: Result<(), &str> = wait_and_retry("op", &policy, &FixedDelay, || async move {
            *counter.lock().expect("calls") += 1;
            Err("down")
        })
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(*calls.lock().expect("calls"), 2);
        assert!(started.elapsed() < policy.ceiling);
    }

    // ============================================================
    // STATISTICS TESTS
    // ============================================================

    #[test]
    fn test_win_rate() {
        let mut stats = RunStats::default();
        assert_eq!(stats.win_rate(), 0.0);
        stats.total_battles = 4;
        stats.win_count = 3;
        assert_eq!(stats.win_rate(), 0.75);
    }

    #[test]
    fn test_status_handle_is_shared() {
        let status = StatusHandle::new();
        let reader = status.clone();
        status.record_battle();
        status.record_win();
        status.observe(
            SceneLabel::ScoreDisplay,
            &SceneInfo {
                score: Some(400),
                currency: Some(7),
                ..SceneInfo::default()
            },
        );
        status.finish_cycle(false);

        let stats = reader.snapshot();
        assert_eq!(stats.total_battles, 1);
        assert_eq!(stats.win_count, 1);
        assert_eq!(stats.failed_cycles, 1);
        assert_eq!(stats.current_score, Some(400));
        assert_eq!(reader.current_scene(), SceneLabel::ScoreDisplay);

        reader.reset();
        assert_eq!(status.snapshot(), RunStats::default());
    }

    #[test]
    fn test_operation_log_is_capped_and_summarized() {
        let status = StatusHandle::new();
        for i in 0..1005 {
            status.log_operation("tap", i % 5 != 0, None);
        }
        status.log_operation("buy", true, Some("星光碎片 @ 1200".to_string()));

        let log = status.operation_log(usize::MAX);
        assert_eq!(log.len(), 1000);
        let recent = status.operation_log(2);
        assert_eq!(recent[0].name, "tap");
        assert_eq!(recent[1].name, "buy");
        assert_eq!(recent[1].details.as_deref(), Some("星光碎片 @ 1200"));
        assert_eq!(status.last_operation().as_deref(), Some("buy"));

        let summary = status.operation_summary();
        assert_eq!(summary.total, 1000);
        assert_eq!(summary.by_operation["buy"], OperationCount { total: 1, succeeded: 1 });
        let taps = summary.by_operation["tap"];
        assert_eq!(taps.total, 999);
        assert_eq!(taps.total - taps.succeeded, 199);
        assert!(summary.success_rate() > 0.79 && summary.success_rate() < 0.81);

        status.reset();
        assert!(status.operation_log(10).is_empty());
        assert_eq!(status.operation_summary().success_rate(), 0.0);
    }

    // ============================================================
    // TRADING TESTS
    // ============================================================

    /// Whole-frame offer panel and buttons on round pixel positions.
    fn shop_config() -> TradingConfig {
        TradingConfig {
            enabled: true,
            offer_region: Region::new(0, 0, W, H),
            credits_region: None,
            buy_button: (0.75, 0.5),
            sell_button: (0.75, 0.7),
            confirm_button: (0.5, 0.8),
            cancel_button: (0.25, 0.8),
            ..TradingConfig::default()
        }
    }

    fn shop_frame(extra: &[&str]) -> Frame {
        let mut texts = vec![text("购买"), text("出售")];
        texts.extend(extra.iter().map(|t| text(t)));
        frame(texts)
    }

    #[test]
    fn test_parse_offer() {
        assert_eq!(
            parse_offer(&["星光碎片", "价格: 1,200", "库存 3"]),
            Some(TradeOffer {
                item: "星光碎片".to_string(),
                price: 1200,
                available: true,
            })
        );
        let sold_out = parse_offer(&["Relic2 950", "售罄"]).expect("offer");
        assert_eq!(sold_out.item, "Relic");
        assert_eq!(sold_out.price, 950);
        assert!(!sold_out.available);
        assert_eq!(parse_offer(&["购买", "取消"]), None);
    }

    #[test]
    fn test_trade_policy_decisions() {
        let policy = TradePolicy::from(&TradingConfig::default());
        let offer = |price| TradeOffer {
            item: "碎片".to_string(),
            price,
            available: true,
        };

        assert_eq!(policy.decide(&offer(800), Some(1000), None), Some(TradeSide::Buy));
        // a balance below the price or an unknown balance never buys
        assert_eq!(policy.decide(&offer(800), Some(500), None), None);
        assert_eq!(policy.decide(&offer(800), None, None), None);
        assert_eq!(policy.decide(&offer(6000), None, None), Some(TradeSide::Sell));
        // cheap enough to buy but unaffordable, expensive enough to sell
        assert_eq!(policy.decide(&offer(7000), Some(100), None), Some(TradeSide::Sell));
        assert_eq!(
            policy.decide(&offer(800), Some(1000), Some(Duration::from_millis(200))),
            None
        );
        assert_eq!(
            policy.decide(&offer(800), Some(1000), Some(Duration::from_secs(2))),
            Some(TradeSide::Buy)
        );
        let sold_out = TradeOffer {
            available: false,
            ..offer(6000)
        };
        assert_eq!(policy.decide(&sold_out, Some(10_000), None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shop_screen_buys_affordable_offer() {
        let h = trading_harness(shop_config());
        h.recognizer.with_region(&["星光碎片", "价格: 1200"]);

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::Unknown, &shop_frame(&["信用点", "20000"]), &SceneInfo::default())
            .await;

        assert!(handled);
        assert_eq!(h.device.taps(), vec![(150, 50), (100, 80)]);
        let desk = h.dispatcher.trading().expect("desk");
        assert_eq!(desk.credits(), Some(18800));
        assert_eq!(h.status.snapshot().current_currency, Some(18800));

        let history = desk.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].side, TradeSide::Buy);
        assert_eq!(history[0].item, "星光碎片");
        assert!(history[0].success);

        let summary = h.status.operation_summary();
        assert_eq!(summary.by_operation["buy"], OperationCount { total: 1, succeeded: 1 });
        assert_eq!(summary.by_operation["unknown"], OperationCount { total: 1, succeeded: 1 });
        assert_eq!(h.device.captures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trades_wait_for_cooldown() {
        let h = trading_harness(shop_config());
        h.recognizer.with_region(&["星辉 6000"]);
        let shop = shop_frame(&[]);

        assert!(h.dispatcher.dispatch(SceneLabel::Unknown, &shop, &SceneInfo::default()).await);
        assert!(h.dispatcher.dispatch(SceneLabel::Unknown, &shop, &SceneInfo::default()).await);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(h.dispatcher.dispatch(SceneLabel::Unknown, &shop, &SceneInfo::default()).await);

        // sell + confirm, cancel inside the cooldown, sell + confirm again
        assert_eq!(
            h.device.taps(),
            vec![(150, 70), (100, 80), (50, 80), (150, 70), (100, 80)]
        );
        let desk = h.dispatcher.trading().expect("desk");
        assert_eq!(desk.history().len(), 2);
        assert_eq!(desk.credits(), None);
    }

    #[tokio::test]
    async fn test_failed_trade_tap_is_recorded() {
        let h = trading_harness(shop_config());
        h.recognizer.with_region(&["星辉 6000"]);
        h.device.lock().fail_taps = true;

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::Unknown, &shop_frame(&[]), &SceneInfo::default())
            .await;

        assert!(!handled);
        let history = h.dispatcher.trading().expect("desk").history();
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(h.status.operation_summary().by_operation["sell"].succeeded, 0);
    }

    #[tokio::test]
    async fn test_unreadable_offer_backs_out() {
        let h = trading_harness(shop_config());

        let handled = h
            .dispatcher
            .dispatch(SceneLabel::Unknown, &shop_frame(&[]), &SceneInfo::default())
            .await;

        assert!(handled);
        assert_eq!(h.device.taps(), vec![(50, 80)]);
        assert!(h.dispatcher.trading().expect("desk").history().is_empty());
    }

    #[tokio::test]
    async fn test_credits_read_from_region_without_keyword() {
        let mut config = shop_config();
        config.credits_region = Some(Region::new(0, 0, 50, 20));
        let h = trading_harness(config);
        // the scripted region reading serves both the balance and the offer
        h.recognizer.with_region(&["900 星辉"]);

        h.dispatcher
            .dispatch(SceneLabel::Unknown, &shop_frame(&[]), &SceneInfo::default())
            .await;

        let desk = h.dispatcher.trading().expect("desk");
        assert_eq!(desk.history()[0].side, TradeSide::Buy);
        assert_eq!(desk.credits(), Some(0));
    }

    #[tokio::test]
    async fn test_non_shop_unknown_still_recovers() {
        let h = trading_harness(shop_config());
        h.recognizer.then(&["星穹铁道", "开始游戏", "设置"]);

        let recovered = h
            .dispatcher
            .dispatch(SceneLabel::Unknown, &frame(vec![text("加载中")]), &SceneInfo::default())
            .await;

        assert!(recovered);
        assert_eq!(h.device.taps(), vec![(100, 75)]);
        assert!(h.dispatcher.trading().expect("desk").history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_trades_when_enabled() {
        let device = FakeDevice::showing(bright());
        let recognizer = ScriptedRecognizer::reading(&["购买", "信用点", "20000"]);
        recognizer.with_region(&["星光碎片 1200"]);
        let mut config = BotConfig::default();
        config.trading = shop_config();
        let flow = FlowController::new(
            device.clone(),
            recognizer.clone(),
            TemplateLibrary::default(),
            &config,
            Arc::new(NoDelay),
        );

        assert!(flow.run_cycle().await);

        let trades = flow.trade_history();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, TradeSide::Buy);
        assert_eq!(flow.get_stats().current_currency, Some(18800));
    }

    // ============================================================
    // EQUIPMENT TESTS
    // ============================================================

    fn relic(attributes: &[(&str, f64)]) -> Equipment {
        Equipment {
            name: None,
            level: 15,
            rarity: 5,
            attributes: attributes.iter().map(|(n, v)| (n.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn test_parse_equipment_panel() {
        let equipment = parse_equipment(&["星辰护符", "等级15", "5星", "攻击力 500", "暴击 10%", "速度+8"]);

        assert_eq!(equipment.name.as_deref(), Some("星辰护符"));
        assert_eq!(equipment.level, 15);
        assert_eq!(equipment.rarity, 5);
        assert_eq!(
            equipment.main_attribute(),
            Some(&("攻击".to_string(), 500.0))
        );
        assert_eq!(
            equipment.sub_attributes(),
            &[("暴击".to_string(), 10.0), ("速度".to_string(), 8.0)]
        );
    }

    #[test]
    fn test_parse_equipment_follows_panel_order_and_estimates_rarity() {
        let equipment = parse_equipment(&["Lv.3", "速度 8", "生命 120"]);
        assert_eq!(equipment.level, 3);
        assert_eq!(equipment.rarity, 3);
        assert_eq!(equipment.main_attribute(), Some(&("速度".to_string(), 8.0)));
        assert_eq!(equipment.sub_attributes(), &[("生命值".to_string(), 120.0)]);
        assert_eq!(equipment.name, None);

        assert!(parse_equipment(&[]).attributes.is_empty());
        assert!(parse_equipment(&[]).sub_attributes().is_empty());
    }

    #[test]
    fn test_equipment_score() {
        let scorer = EquipmentScorer::new(EquipmentConfig::default());
        let equipment = relic(&[("攻击", 500.0), ("暴击", 10.0), ("速度", 8.0)]);

        // 50 rarity + 3.75 level + 25 + 1.5 + 0.52 stats + 2 optimal subs
        assert!((scorer.score(&equipment) - 90.77).abs() < 1e-9);

        let unweighted = relic(&[("穿透", 10.0)]);
        assert!((scorer.score(&unweighted) - 54.0).abs() < 1e-9);
    }

    #[test]
    fn test_equipment_comparison() {
        let scorer = EquipmentScorer::new(EquipmentConfig::default());
        let plain = relic(&[("生命值", 100.0), ("防御", 20.0)]);
        let crit = relic(&[("生命值", 100.0), ("暴击", 3.0)]);
        let strong = Equipment {
            rarity: 6,
            ..plain.clone()
        };

        assert!(scorer.is_better(&crit, &plain));
        assert!(!scorer.is_better(&plain, &crit));
        assert!(scorer.is_better(&strong, &plain));

        let pieces = vec![plain.clone(), crit.clone(), strong.clone()];
        assert_eq!(scorer.best(&pieces), Some(&strong));
        assert_eq!(scorer.best(&[]), None);
    }
}
