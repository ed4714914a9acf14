//! # Printer Models
//!
//! Hardware specifications for supported label printers.
//!
//! ## Supported Printers
//!
//! | Model | Printhead (dots) | Resolution | Density | Default | Direction   |
//! |-------|------------------|------------|---------|---------|-------------|
//! | b1    | 384              | 203 DPI    | 1-5     | 3       | along feed  |
//! | b18   | 120              | 203 DPI    | 1-3     | 2       | along feed  |
//! | b21   | 384              | 203 DPI    | 1-5     | 3       | along feed  |
//! | d11   | 96               | 203 DPI    | 1-3     | 2       | across feed |
//! | d11_h | 136              | 300 DPI    | 1-5     | 3       | across feed |
//! | d101  | 192              | 203 DPI    | 1-3     | 2       | across feed |
//! | d110  | 96               | 203 DPI    | 1-3     | 2       | across feed |
//!
//! ## Usage
//!
//! ```
//! use etiqueta::printer::models;
//!
//! let spec = models::lookup("d11_h").unwrap();
//! println!("Row: {} dots ({} bytes)", spec.printhead_pixels, spec.row_bytes());
//! ```

use std::ops::RangeInclusive;

use crate::error::EtiquetaError;

/// How the label's reading direction relates to paper feed.
///
/// The rasterizer uses this to orient text and QR codes. The session never
/// rotates image data: it always packs rows along the printhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintDirection {
    /// Label content reads with rows across the printhead, no rotation.
    AlongFeed,
    /// Label content must be rotated 90° so its long edge follows the feed.
    AcrossFeed,
}

/// # Model Specification
///
/// ## Calculations
///
/// ```text
/// dots_per_mm = dpi / 25.4
/// row_bytes   = ceil(printhead_pixels / 8)
///
/// For d11_h:
///   dots_per_mm = 300 / 25.4 ≈ 11.8
///   row_bytes   = 136 / 8 = 17
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    /// Registry key (lower case)
    pub id: &'static str,

    /// Display name
    pub name: &'static str,

    /// Thermal elements across the printhead
    pub printhead_pixels: u16,

    /// Resolution in dots per inch
    pub dpi: u16,

    /// Accepted density settings
    pub density: RangeInclusive<u8>,

    /// Density used when the caller does not pick one
    pub default_density: u8,

    pub print_direction: PrintDirection,
}

impl ModelSpec {
    /// Bytes per packed row.
    #[inline]
    pub fn row_bytes(&self) -> usize {
        (self.printhead_pixels as usize).div_ceil(8)
    }

    #[inline]
    pub fn dots_per_mm(&self) -> f32 {
        self.dpi as f32 / 25.4
    }

    /// Printhead width in millimeters
    #[inline]
    pub fn width_mm(&self) -> f32 {
        self.printhead_pixels as f32 / self.dots_per_mm()
    }

    #[inline]
    pub fn mm_to_dots(&self, mm: f32) -> u16 {
        (mm * self.dots_per_mm()).round() as u16
    }

    /// Check a density setting against this model.
    pub fn validate_density(&self, density: u8) -> Result<(), EtiquetaError> {
        if self.density.contains(&density) {
            Ok(())
        } else {
            Err(EtiquetaError::InvalidConfiguration(format!(
                "density {} out of range {}-{} for {}",
                density,
                self.density.start(),
                self.density.end(),
                self.id
            )))
        }
    }
}

const fn model(
    id: &'static str,
    name: &'static str,
    printhead_pixels: u16,
    dpi: u16,
    density: RangeInclusive<u8>,
    default_density: u8,
    print_direction: PrintDirection,
) -> ModelSpec {
    ModelSpec {
        id,
        name,
        printhead_pixels,
        dpi,
        density,
        default_density,
        print_direction,
    }
}

/// Every supported model.
pub static MODELS: [ModelSpec; 7] = [
    model("b1", "B1", 384, 203, 1..=5, 3, PrintDirection::AlongFeed),
    model("b18", "B18", 120, 203, 1..=3, 2, PrintDirection::AlongFeed),
    model("b21", "B21", 384, 203, 1..=5, 3, PrintDirection::AlongFeed),
    model("d11", "D11", 96, 203, 1..=3, 2, PrintDirection::AcrossFeed),
    model("d11_h", "D11-H", 136, 300, 1..=5, 3, PrintDirection::AcrossFeed),
    model("d101", "D101", 192, 203, 1..=3, 2, PrintDirection::AcrossFeed),
    model("d110", "D110", 96, 203, 1..=3, 2, PrintDirection::AcrossFeed),
];

/// Find a model by id (case-insensitive, `-` and `_` interchangeable).
pub fn lookup(id: &str) -> Option<&'static ModelSpec> {
    let wanted = id.trim().to_lowercase().replace('-', "_");
    MODELS.iter().find(|m| m.id == wanted)
}

/// Like [`lookup`], failing with `InvalidConfiguration` for unknown ids.
pub fn require(id: &str) -> Result<&'static ModelSpec, EtiquetaError> {
    lookup(id).ok_or_else(|| EtiquetaError::InvalidConfiguration(format!("unknown model '{}'", id)))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_d11_h_dimensions() {
        let spec = lookup("d11_h").unwrap();
        assert_eq!(spec.printhead_pixels, 136);
        assert_eq!(spec.row_bytes(), 17);
        assert_eq!(spec.dpi, 300);
        assert_eq!(spec.print_direction, PrintDirection::AcrossFeed);
    }

    #[test]
    fn test_lookup_is_forgiving() {
        assert_eq!(lookup("D11-H").map(|m| m.id), Some("d11_h"));
        assert_eq!(lookup(" b21 ").map(|m| m.id), Some("b21"));
        assert!(lookup("p1").is_none());
    }

    #[test]
    fn test_require_unknown_model() {
        let err = require("zz9").unwrap_err();
        assert!(matches!(err, EtiquetaError::InvalidConfiguration(ref m) if m.contains("unknown model")));
    }

    #[test]
    fn test_defaults_within_range() {
        for spec in &MODELS {
            assert!(spec.density.contains(&spec.default_density), "{}", spec.id);
            assert!(spec.row_bytes() <= crate::protocol::commands::MAX_ROW_BYTES);
        }
    }

    #[test]
    fn test_validate_density() {
        let spec = lookup("d110").unwrap();
        assert!(spec.validate_density(3).is_ok());
        assert!(spec.validate_density(0).is_err());
        assert!(spec.validate_density(4).is_err());
    }

    #[test]
    fn test_dots_per_mm() {
        let spec = lookup("b21").unwrap();
        assert!((spec.dots_per_mm() - 8.0).abs() < 0.1);
        assert!((spec.width_mm() - 48.0).abs() < 1.0);
        assert_eq!(spec.mm_to_dots(10.0), 80);
    }
}
