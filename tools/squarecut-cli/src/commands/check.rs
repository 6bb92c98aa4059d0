//! Check GStreamer and the elements an edit needs.

use squarecut_common::EditConfig;
use squarecut_edit_engine::backend::GstBackend;

pub fn run(config: &EditConfig) -> anyhow::Result<()> {
    println!("squarecut System Check");
    println!("{}", "=".repeat(50));

    if let Err(e) = GstBackend::new() {
        println!("[FAIL] {e}");
        return Err(e.into());
    }
    println!("[OK] {}", GstBackend::version());

    let encoder = config.encoder.element.as_str();
    let missing = GstBackend::missing_elements(&[encoder]);
    if missing.is_empty() {
        println!("[OK] All required elements found (encoder: {encoder})");
    } else {
        for name in &missing {
            println!("[FAIL] Missing element: {name}");
        }
    }

    println!();
    if missing.is_empty() {
        println!("All required elements are available. squarecut is ready.");
        Ok(())
    } else {
        anyhow::bail!("{} required element(s) missing", missing.len())
    }
}
