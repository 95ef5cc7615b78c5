use anyhow::{bail, Context, Result};
use std::{fs, path::Path};

/// Formats that need an OCR or PDF text extractor in front of this crate.
const EXTERNAL_FORMATS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

/// Read the raw text of a source document. Only plain text is read here;
/// PDFs and images have to be converted to text upstream.
pub fn read_text<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" => fs::read_to_string(path)
            .with_context(|| format!("reading text from {}", path.display())),
        e if EXTERNAL_FORMATS.contains(&e) => bail!(
            "{} is a .{} document; extract its text first and pass the .txt",
            path.display(),
            e
        ),
        _ => bail!("unsupported file format: {}", path.display()),
    }
}
