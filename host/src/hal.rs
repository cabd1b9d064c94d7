//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the three pieces of hardware the
//!     host touches: the reset button (gpio input), the reset indicator
//!     (gpio output) and the led matrix (spi).
//!     abstracts away the difference between running on a real Raspberry Pi
//!     (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": The host should compile on Windows/Mac/Linux.
//!     - On the Pi (feature = "hardware") this compiles down to `rppal` calls.
//!     - The mock records every write so tests can assert on it.
//!
//! relationships:
//!     - used by: gpio.rs (button + indicator), display.rs (max7219)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub trait HardwareProvider: Send + Sync {
    fn read_gpio(&self, pin: u8) -> Result<bool>;
    fn write_gpio(&self, pin: u8, level: bool) -> Result<()>;
    fn spi_transfer(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// pick the provider for this build
#[cfg(feature = "hardware")]
pub fn default_provider() -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(RpiHal::new()?))
}

#[cfg(not(feature = "hardware"))]
pub fn default_provider() -> Result<Arc<dyn HardwareProvider>> {
    Ok(Arc::new(MockHal::new()))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[derive(Default)]
#[cfg_attr(feature = "hardware", allow(dead_code))]
pub struct MockHal {
    inputs: Mutex<HashMap<u8, bool>>,
    outputs: Mutex<HashMap<u8, bool>>,
    output_history: Mutex<Vec<(u8, bool)>>,
    spi_writes: Mutex<Vec<Vec<u8>>>,
}

#[cfg_attr(feature = "hardware", allow(dead_code))]
impl MockHal {
    pub fn new() -> Self {
        tracing::info!("Using MOCK HAL (No hardware access)");
        Self::default()
    }
}

#[cfg(test)]
impl MockHal {
    /// drive a simulated input pin
    pub fn set_input(&self, pin: u8, level: bool) {
        lock(&self.inputs).insert(pin, level);
    }

    pub fn output(&self, pin: u8) -> Option<bool> {
        lock(&self.outputs).get(&pin).copied()
    }

    pub fn output_history(&self) -> Vec<(u8, bool)> {
        lock(&self.output_history).clone()
    }

    pub fn spi_writes(&self) -> Vec<Vec<u8>> {
        lock(&self.spi_writes).clone()
    }
}

impl HardwareProvider for MockHal {
    fn read_gpio(&self, pin: u8) -> Result<bool> {
        Ok(lock(&self.inputs).get(&pin).copied().unwrap_or(false))
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        tracing::debug!("[MOCK GPIO] Pin {} write {}", pin, level);
        lock(&self.outputs).insert(pin, level);
        lock(&self.output_history).push((pin, level));
        Ok(())
    }

    fn spi_transfer(&self, data: &[u8]) -> Result<Vec<u8>> {
        tracing::trace!("[MOCK SPI] Write: {:?} ({} bytes)", data, data.len());
        lock(&self.spi_writes).push(data.to_vec());
        Ok(data.to_vec()) // Loopback
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct RpiHal {
    gpio: rppal::gpio::Gpio,
    inputs: Mutex<HashMap<u8, rppal::gpio::InputPin>>,
    outputs: Mutex<HashMap<u8, rppal::gpio::OutputPin>>,
    spi: Mutex<rppal::spi::Spi>,
}

#[cfg(feature = "hardware")]
impl RpiHal {
    pub fn new() -> Result<Self> {
        use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
        tracing::info!("Using REAL HARDWARE HAL (rppal)");
        Ok(Self {
            gpio: rppal::gpio::Gpio::new()?,
            inputs: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            spi: Mutex::new(Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?),
        })
    }
}

#[cfg(feature = "hardware")]
impl HardwareProvider for RpiHal {
    fn read_gpio(&self, pin: u8) -> Result<bool> {
        let mut inputs = lock(&self.inputs);
        let input = match inputs.entry(pin) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => e.insert(self.gpio.get(pin)?.into_input()),
        };
        Ok(input.is_high())
    }

    fn write_gpio(&self, pin: u8, level: bool) -> Result<()> {
        let mut outputs = lock(&self.outputs);
        let output = match outputs.entry(pin) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let mut p = self.gpio.get(pin)?.into_output_low();
                // keep the level when the host exits mid-dwell
                p.set_reset_on_drop(false);
                e.insert(p)
            }
        };
        if level { output.set_high(); } else { output.set_low(); }
        Ok(())
    }

    fn spi_transfer(&self, data: &[u8]) -> Result<Vec<u8>> {
        let spi = lock(&self.spi);
        let mut read_buf = vec![0u8; data.len()];
        spi.transfer(&mut read_buf, data)?;
        Ok(read_buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_inputs_default_low() {
        let hal = MockHal::new();
        assert!(!hal.read_gpio(22).unwrap());
        hal.set_input(22, true);
        assert!(hal.read_gpio(22).unwrap());
    }

    #[test]
    fn test_mock_records_writes() {
        let hal = MockHal::new();
        hal.write_gpio(26, true).unwrap();
        hal.write_gpio(26, false).unwrap();
        assert_eq!(hal.output(26), Some(false));
        assert_eq!(hal.output_history(), vec![(26, true), (26, false)]);

        assert_eq!(hal.spi_transfer(&[0x0C, 0x01]).unwrap(), vec![0x0C, 0x01]);
        assert_eq!(hal.spi_writes(), vec![vec![0x0C, 0x01]]);
    }
}
