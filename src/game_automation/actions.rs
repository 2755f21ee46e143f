// Paced, retried device operations used by the dispatcher and the flow loop
use super::delay::{DelayStrategy, Pacer, RetryPolicy, wait_and_retry};
use crate::adb::{AdbClient, AdbResult};
use crate::config::FlowConfig;
use image::DynamicImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

pub struct DeviceActions<D: AdbClient> {
    device: Arc<D>,
    pacer: Pacer,
    retry: RetryPolicy,
    delays: Arc<dyn DelayStrategy>,
    captures: AtomicU64,
}

impl<D: AdbClient> DeviceActions<D> {
    pub fn new(device: Arc<D>, flow: &FlowConfig, delays: Arc<dyn DelayStrategy>) -> Self {
        let pacer = Pacer::new(
            delays.clone(),
            flow.operation_delay(),
            flow.long_operation_delay(),
            flow.delay_variation,
        )
        .with_extra_pause(flow.extra_pause_every, Duration::from_millis(flow.extra_pause_ms));
        let retry = RetryPolicy {
            attempts: flow.max_retries,
            ceiling: Duration::from_secs(flow.retry_timeout_secs),
            base_delay: Duration::from_millis(flow.retry_base_delay_ms),
        };
        Self {
            device,
            pacer,
            retry,
            delays,
            captures: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &D {
        self.device.as_ref()
    }

    pub fn delays(&self) -> &dyn DelayStrategy {
        self.delays.as_ref()
    }

    /// Fresh screenshot with its sequence number, retried per policy.
    pub async fn capture(&self) -> AdbResult<(DynamicImage, u64)> {
        let capture = wait_and_retry("screen capture", &self.retry, self.delays(), || {
            self.device.screen_capture()
        })
        .await?;
        Ok((capture.image, self.next_index()))
    }

    /// Single attempt, for polling loops that already retry on their own schedule.
    pub async fn capture_once(&self) -> AdbResult<(DynamicImage, u64)> {
        let capture = self.device.screen_capture().await?;
        Ok((capture.image, self.next_index()))
    }

    fn next_index(&self) -> u64 {
        self.captures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Tap with retries; failures are logged and reported as `false`.
    pub async fn tap(&self, (x, y): (u32, u32)) -> bool {
        let result = wait_and_retry("tap", &self.retry, self.delays(), || self.device.tap(x, y)).await;
        match result {
            Ok(()) => {
                log::debug!("👆 Tap ({x}, {y})");
                true
            }
            Err(e) => {
                log::warn!("⚠️ Tap ({x}, {y}) failed: {e}");
                false
            }
        }
    }

    pub async fn shell(&self, args: &[&str]) -> AdbResult<String> {
        self.device.shell(args).await
    }

    pub async fn pause_short(&self) {
        self.pacer.pause_short().await;
    }

    pub async fn pause_long(&self) {
        self.pacer.pause_long().await;
    }

    pub async fn sleep_jittered(&self, base: Duration, variation: f64) {
        sleep(self.delays.jitter(base, variation)).await;
    }

    /// Sleep exactly `duration` unless the strategy suppresses waiting.
    pub async fn sleep_fixed(&self, duration: Duration) {
        sleep(self.delays.jitter(duration, 0.0)).await;
    }
}
