// Read-only wrapper: screenshots go through, input events are only logged
use super::error::AdbResult;
use super::types::AdbClient;

pub struct DryRun<D> {
    inner: D,
}

impl<D: AdbClient> DryRun<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: AdbClient> AdbClient for DryRun<D> {
    async fn screen_capture_bytes(&self) -> AdbResult<Vec<u8>> {
        self.inner.screen_capture_bytes().await
    }

    async fn tap(&self, x: u32, y: u32) -> AdbResult<()> {
        log::info!("🧪 [dry-run] tap ({x}, {y})");
        Ok(())
    }

    async fn swipe(
        &self,
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        duration: Option<u32>,
    ) -> AdbResult<()> {
        log::info!("🧪 [dry-run] swipe ({x1}, {y1}) -> ({x2}, {y2}) {duration:?}ms");
        Ok(())
    }

    async fn shell(&self, args: &[&str]) -> AdbResult<String> {
        log::info!("🧪 [dry-run] shell {}", args.join(" "));
        Ok(String::new())
    }

    fn screen_dimensions(&self) -> (u32, u32) {
        self.inner.screen_dimensions()
    }

    fn device_name(&self) -> &str {
        self.inner.device_name()
    }
}
