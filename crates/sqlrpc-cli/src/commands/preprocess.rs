//! `sqlrpc preprocess` — Run a text processor over a file.

use std::path::Path;

use sqlrpc_core::registry::ServiceRegistry;

/// Process `text` with the named processor of a default registry.
pub fn render(processor: &str, text: &str) -> Result<String, String> {
    let registry = ServiceRegistry::builder()
        .build()
        .map_err(|e| e.to_string())?;
    let processor = registry
        .text_processor(processor)
        .ok_or_else(|| format!("Text processor '{}' is not registered", processor))?;
    processor
        .process(text)
        .map_err(|e| format!("{}: {}", e.type_name(), e))
}

pub async fn run(file: &Path, processor: &str) -> Result<(), String> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("Failed to read {}: {}", file.display(), e))?;
    print!("{}", render(processor, &text)?);
    Ok(())
}
