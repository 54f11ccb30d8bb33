//! JSON-lines input: one [`ChainInput`] per line.
//!
//! Blank lines and lines starting with `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use hybrid_projection::ChainInput;

use crate::errors::IndexerError;

/// A line that could not be turned into a [`ChainInput`].
#[derive(Debug)]
pub struct RejectedLine {
    pub line: usize,
    pub reason: String,
}

/// Iterator over the inputs of a replay file, with 1-based line numbers.
pub struct ReplayReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl ReplayReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, IndexerError> {
        let file = File::open(path).map_err(|e| IndexerError::Input {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplayReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for ReplayReader<R> {
    type Item = Result<ChainInput, RejectedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.lines.next()?;
            self.line += 1;

            let raw = match raw {
                Ok(raw) => raw,
                Err(e) => {
                    return Some(Err(RejectedLine {
                        line: self.line,
                        reason: e.to_string(),
                    }))
                }
            };
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            return Some(serde_json::from_str(trimmed).map_err(|e| RejectedLine {
                line: self.line,
                reason: e.to_string(),
            }));
        }
    }
}
