//! Temporary-file management for external-compiler invocations.
//!
//! A single manager owns every temporary CNF/NNF file created during a
//! run. Files live in the system temp directory, named after the input
//! formula and a sequence number, and are removed by [`TmpFiles::flush`]
//! unless the keep flag is set.

use std::env;
use std::path::{Path, PathBuf};

use log::warn;

pub struct TmpFiles {
    dir: PathBuf,
    root: String,
    sequence_number: u32,
    keep: bool,
    names: Vec<PathBuf>,
}

impl TmpFiles {
    pub fn new(keep: bool) -> Self {
        TmpFiles {
            dir: env::temp_dir(),
            root: format!("pkc-{}", std::process::id()),
            sequence_number: 1_000_000,
            keep,
            names: Vec::new(),
        }
    }

    /// Derives the name root from the input formula's file stem.
    pub fn set_root(&mut self, source: &Path) {
        if let Some(stem) = source.file_stem().and_then(|s| s.to_str()) {
            self.root = format!("pkc-{}-{}", std::process::id(), stem);
        }
    }

    /// Builds the next temporary file path. With `new_sequence` a fresh
    /// sequence number is drawn; otherwise the path shares the current one
    /// (pairing a CNF with its NNF).
    pub fn build_name(&mut self, extension: &str, new_sequence: bool) -> PathBuf {
        if new_sequence {
            self.sequence_number += 1;
        }
        let path = self
            .dir
            .join(format!("{}-{}.{}", self.root, self.sequence_number, extension));
        self.names.push(path.clone());
        path
    }

    /// Deletes every registered file, unless files are being kept.
    pub fn flush(&mut self) {
        if self.keep {
            return;
        }
        for path in self.names.drain(..) {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("attempt to delete file {} failed: {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for TmpFiles {
    fn drop(&mut self) {
        self.flush();
    }
}
