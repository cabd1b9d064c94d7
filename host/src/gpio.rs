//! ==============================================================================
//! gpio.rs - physical reset control
//! ==============================================================================
//!
//! purpose:
//!     the reset button and the reset indicator led.
//!
//! button:
//!     level-triggered input polled every `poll_ms`. a press is a low -> high
//!     transition; holding the button does not repeat.
//!
//! indicator:
//!     driven high for the reset dwell period. write failures are logged and
//!     otherwise ignored; a dead led must not stall a reset.
//!
//! relationships:
//!     - uses: hal.rs (HardwareProvider)
//!     - used by: runtime.rs (button worker), reset.rs (indicator)
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::hal::HardwareProvider;

/// fires once per rising edge
#[derive(Debug, Default)]
pub struct EdgeDetector {
    previous: bool,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rising(&mut self, level: bool) -> bool {
        let fired = level && !self.previous;
        self.previous = level;
        fired
    }
}

pub struct ResetIndicator {
    hal: Arc<dyn HardwareProvider>,
    pin: u8,
}

impl ResetIndicator {
    pub fn new(hal: Arc<dyn HardwareProvider>, pin: u8) -> Self {
        Self { hal, pin }
    }

    pub fn set(&self, on: bool) {
        if let Err(e) = self.hal.write_gpio(self.pin, on) {
            tracing::warn!("[GPIO] ⚠ Indicator pin {} write failed: {}", self.pin, e);
        }
    }
}

/// poll the button until cancelled, calling `on_press` on every rising edge
pub async fn monitor_button<F>(
    hal: Arc<dyn HardwareProvider>,
    pin: u8,
    poll: Duration,
    cancel: CancellationToken,
    mut on_press: F,
) where
    F: FnMut(),
{
    let mut edge = EdgeDetector::new();
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!("[GPIO] Watching reset button on pin {}", pin);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match hal.read_gpio(pin) {
            Ok(level) => {
                if edge.rising(level) {
                    tracing::info!("[GPIO] Reset button pressed");
                    on_press();
                }
            }
            Err(e) => tracing::warn!("[GPIO] ⚠ Button read error: {}", e),
        }
    }
    tracing::debug!("[GPIO] Button monitor stopped");
}
