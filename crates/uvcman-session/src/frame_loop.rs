//! Per-device render loop that runs while a session is previewing

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uvcman_core::DeviceId;

use crate::driver::{DeviceHandle, RenderSurfaceProvider};

/// Cancellable task issuing one render request per tick.
///
/// Every render call happens while holding `gate`, and [`FrameLoop::stop`]
/// clears the gate under the same lock. Once `stop` returns no render call is
/// running and none will start.
pub struct FrameLoop {
    gate: Arc<Mutex<bool>>,
    cancel: CancellationToken,
}

impl FrameLoop {
    pub fn spawn(
        runtime: &Handle,
        device: DeviceId,
        handle: DeviceHandle,
        period: Duration,
        surfaces: Arc<dyn RenderSurfaceProvider>,
    ) -> Self {
        let gate = Arc::new(Mutex::new(true));
        let cancel = CancellationToken::new();

        let task_gate = gate.clone();
        let task_cancel = cancel.clone();
        runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(device = %device, handle = %handle, "Frame loop started");

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let running = task_gate.lock();
                if !*running {
                    break;
                }
                trace!(device = %device, "Render frame");
                surfaces.render_frame(&device, handle);
            }

            debug!(device = %device, "Frame loop finished");
        });

        Self { gate, cancel }
    }

    /// Stop the loop. Blocks until an in-flight render call returns.
    pub fn stop(&self) {
        *self.gate.lock() = false;
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        *self.gate.lock()
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
