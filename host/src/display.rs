//! ==============================================================================
//! display.rs - led matrix frames
//! ==============================================================================
//!
//! each ring slot becomes one column, mirrored so the newest sample sits on
//! the left. the averaged value maps linearly onto a bar height:
//!
//!     h = min(height - 1, value * (height - 1) / max_reading)
//!
//! and the bottom `h + 1` rows of that column are lit.
//!
//! ==============================================================================

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::config::DisplayConfig;
use crate::hal::HardwareProvider;

#[derive(Debug, Clone, Copy)]
pub struct DisplayGeometry {
    pub width: usize,
    pub height: usize,
    pub max_reading: u16,
}

impl From<&DisplayConfig> for DisplayGeometry {
    fn from(config: &DisplayConfig) -> Self {
        Self {
            width: config.matrix_width,
            height: config.matrix_height,
            max_reading: config.max_reading,
        }
    }
}

/// row-major pixel grid; row 0 is the top of the matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PixelGrid {
    pub width: usize,
    pub height: usize,
    pub rows: Vec<Vec<bool>>,
}

impl PixelGrid {
    pub fn blank(width: usize, height: usize) -> Self {
        Self { width, height, rows: vec![vec![false; width]; height] }
    }

    pub fn is_lit(&self, x: usize, y: usize) -> bool {
        self.rows.get(y).and_then(|r| r.get(x)).copied().unwrap_or(false)
    }

    /// first eight columns of a row, column 0 in the most significant bit
    pub fn row_bits(&self, y: usize) -> u8 {
        (0..self.width.min(8)).fold(0u8, |acc, x| {
            if self.is_lit(x, y) { acc | (0x80 >> x) } else { acc }
        })
    }

    pub fn to_ascii(&self) -> String {
        self.rows
            .iter()
            .map(|row| row.iter().map(|&lit| if lit { '#' } else { '.' }).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn map_reading_to_height(value: u16, height: usize, max_reading: u16) -> usize {
    let top = height.saturating_sub(1);
    let scaled = usize::from(value) * top / usize::from(max_reading.max(1));
    scaled.min(top)
}

/// render the display ring (oldest first) into a pixel grid
pub fn produce_display_frame(ring: &[u16], geometry: DisplayGeometry) -> PixelGrid {
    let mut grid = PixelGrid::blank(geometry.width, geometry.height);
    if geometry.height == 0 {
        return grid;
    }

    // a ring wider than the matrix shows its newest samples
    let visible = &ring[ring.len().saturating_sub(geometry.width)..];
    for (x, &value) in visible.iter().enumerate() {
        let column = geometry.width - 1 - x;
        let bar = map_reading_to_height(value, geometry.height, geometry.max_reading);
        for y in 0..=bar {
            grid.rows[geometry.height - 1 - y][column] = true;
        }
    }
    grid
}

pub trait DisplaySink: Send + Sync {
    fn render(&self, frame: &PixelGrid) -> Result<()>;
}

/// dumps frames to the log; the default sink off the pi
pub struct LogDisplay;

impl DisplaySink for LogDisplay {
    fn render(&self, frame: &PixelGrid) -> Result<()> {
        tracing::debug!("[DISPLAY]\n{}", frame.to_ascii());
        Ok(())
    }
}

// max7219 register map
const REG_DIGIT0: u8 = 0x01;
const REG_DECODE_MODE: u8 = 0x09;
const REG_INTENSITY: u8 = 0x0A;
const REG_SCAN_LIMIT: u8 = 0x0B;
const REG_SHUTDOWN: u8 = 0x0C;
const REG_DISPLAY_TEST: u8 = 0x0F;

/// single max7219 8x8 matrix on the hal's spi bus
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub struct Max7219Display {
    hal: Arc<dyn HardwareProvider>,
}

#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
impl Max7219Display {
    pub fn new(hal: Arc<dyn HardwareProvider>, intensity: u8) -> Result<Self> {
        let display = Self { hal };
        display.write(REG_DISPLAY_TEST, 0x00)?;
        display.write(REG_DECODE_MODE, 0x00)?;
        display.write(REG_SCAN_LIMIT, 0x07)?;
        display.write(REG_INTENSITY, intensity.min(0x0F))?;
        display.write(REG_SHUTDOWN, 0x01)?;
        Ok(display)
    }

    fn write(&self, register: u8, data: u8) -> Result<()> {
        self.hal.spi_transfer(&[register, data])?;
        Ok(())
    }
}

impl DisplaySink for Max7219Display {
    fn render(&self, frame: &PixelGrid) -> Result<()> {
        for y in 0..frame.height.min(8) {
            self.write(REG_DIGIT0 + y as u8, frame.row_bits(y))?;
        }
        Ok(())
    }
}
