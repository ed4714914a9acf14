//! # Printer Module
//!
//! This module provides printer-specific configurations.
//!
//! ## Modules
//!
//! - [`models`]: Model registry (printhead width, DPI, density range)

pub mod models;

pub use models::{ModelSpec, PrintDirection};
