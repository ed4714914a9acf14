//! # Golden Tests
//!
//! These tests pin the exact bytes a print job puts on the wire.
//!
//! ## Test Coverage
//!
//! - **Job tests** (`.bin`): every buffer handed to the transport during a
//!   complete connect → calibrate → print → disconnect run, concatenated.
//!
//! ## Regenerating Golden Files
//!
//! ```bash
//! cargo test --test golden_tests -- --ignored generate_golden_files
//! ```

use std::fs;

use etiqueta::config::SessionConfig;
use etiqueta::raster::RasterImage;
use etiqueta::session::PrinterSession;
use etiqueta::transport::MockTransport;

/// Path to golden test directory
const GOLDEN_DIR: &str = "tests/golden";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// 64x472: 100 blank rows, 200 rows of alternating dots, 172 blank rows.
fn stripes() -> RasterImage {
    RasterImage::from_fn(64, 472, |x, y| (100..300).contains(&y) && x % 2 == 0)
}

/// Run a full job against an acking mock and return the bytes sent.
fn job_bytes(model: &str, density: u8, image: &RasterImage) -> Vec<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime");

    runtime.block_on(async {
        let mock = MockTransport::acking();
        let handle = mock.handle();

        let mut session = PrinterSession::new(SessionConfig::default());
        session.connect(Box::new(mock), "mock").await.unwrap();
        session.calibrate(model, density).await.unwrap();
        session.print_image(image, density).await.unwrap();
        session.disconnect().await;

        handle.sent_bytes().concat()
    })
}

/// Write binary data to a golden file
fn write_golden(name: &str, ext: &str, data: &[u8]) {
    let path = format!("{}/{}.{}", GOLDEN_DIR, name, ext);
    fs::write(&path, data).unwrap_or_else(|e| panic!("Failed to write {}: {}", path, e));
    println!("Wrote {} ({} bytes)", path, data.len());
}

/// Compare data against a golden file
fn check_golden(name: &str, ext: &str, data: &[u8]) {
    let path = format!("{}/{}.{}", GOLDEN_DIR, name, ext);
    let golden = fs::read(&path).unwrap_or_else(|_| {
        panic!(
            "Golden file not found: {}. Run the ignored generate_golden_files test.",
            path
        )
    });

    if data.len() != golden.len() {
        panic!(
            "Golden file size mismatch for {}:\n\
             - Golden: {} bytes\n\
             - Actual: {} bytes",
            path,
            golden.len(),
            data.len()
        );
    }

    if let Some(offset) = data.iter().zip(golden.iter()).position(|(a, b)| a != b) {
        panic!(
            "Golden file mismatch for {} at byte {}: golden {:#04x}, actual {:#04x}",
            path, offset, golden[offset], data[offset]
        );
    }
}

#[test]
#[ignore]
fn generate_golden_files() {
    write_golden("d11_h_stripes", "bin", &job_bytes("d11_h", 3, &stripes()));
}

// ============================================================================
// JOB TESTS
// ============================================================================

#[test]
fn test_binary_d11_h_stripes() {
    check_golden("d11_h_stripes", "bin", &job_bytes("d11_h", 3, &stripes()));
}

#[test]
fn test_job_determinism() {
    let a = job_bytes("b21", 3, &stripes());
    let b = job_bytes("b21", 3, &stripes());
    assert_eq!(a, b, "Job bytes should be deterministic");
}
