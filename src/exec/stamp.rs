// src/exec/stamp.rs

//! Up-to-date detection for stage outputs.
//!
//! A stamp records the digest of the stage's recipe (its generated script
//! with resource values zeroed), of each input and of each output. A stage
//! whose stamp matches what is on disk now is skipped without invoking any
//! external command.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::exec::artifact::write_atomic;

/// File name of the stamp inside a stage directory.
pub const STAMP_FILE: &str = "stamp";

/// Compute the hash of a single file.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// What a stage consumed and produced.
#[derive(Debug, Clone)]
pub struct StampSubject<'a> {
    pub recipe: &'a str,
    pub inputs: &'a [PathBuf],
    pub outputs: &'a [PathBuf],
}

impl StampSubject<'_> {
    /// Render the stamp text, or `None` if any input or output is missing.
    fn render(&self) -> Result<Option<String>> {
        let mut lines = vec![format!(
            "recipe {}",
            blake3::hash(self.recipe.as_bytes()).to_hex()
        )];

        for (label, paths) in [("input", self.inputs), ("output", self.outputs)] {
            for path in paths {
                if !path.is_file() {
                    debug!(path = ?path, "{label} missing; stamp cannot be current");
                    return Ok(None);
                }
                lines.push(format!("{label} {} {}", path.display(), compute_file_hash(path)?));
            }
        }

        let mut text = lines.join("\n");
        text.push('\n');
        Ok(Some(text))
    }
}

/// Whether the stamp at `stamp_path` matches the current state of `subject`.
pub fn is_current(stamp_path: &Path, subject: &StampSubject<'_>) -> Result<bool> {
    if !stamp_path.is_file() {
        return Ok(false);
    }
    let recorded = std::fs::read_to_string(stamp_path)
        .with_context(|| format!("reading stamp {:?}", stamp_path))?;
    Ok(subject.render()?.is_some_and(|now| now == recorded))
}

/// Record a stamp for `subject`. Fails if any input or output is missing.
pub fn write_stamp(stamp_path: &Path, subject: &StampSubject<'_>) -> Result<()> {
    let text = subject
        .render()?
        .with_context(|| format!("cannot stamp {:?}: an input or output is missing", stamp_path))?;
    write_atomic(stamp_path, text.as_bytes())
}

/// Drop a stamp so the stage re-runs next time.
pub fn invalidate(stamp_path: &Path) -> Result<()> {
    crate::exec::artifact::remove_if_exists(stamp_path)
}
