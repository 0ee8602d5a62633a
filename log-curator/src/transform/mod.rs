use std::collections::HashSet;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use thiserror::Error;

pub mod rules;

pub use rules::TransformRules;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("failed to decode archive: {0}")]
    Decode(#[from] io::Error),
}

/// Why an archive was abandoned part way through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// The device reported FASE enabled
    FaseOn,
    /// The device runs the legacy LTC4156 charger
    LegacyCharger,
}

impl TerminationReason {
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::FaseOn => "fase_on",
            TerminationReason::LegacyCharger => "legacy_charger",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformResult {
    pub ordered_lines: Vec<String>,
    pub termination: Option<TerminationReason>,
}

impl TransformResult {
    fn terminated(reason: TerminationReason) -> Self {
        Self {
            ordered_lines: Vec::new(),
            termination: Some(reason),
        }
    }

    /// Lines joined with `\n`, newline terminated, as written to the destination artifact
    pub fn to_artifact(&self) -> Vec<u8> {
        let mut out = self.ordered_lines.join("\n");
        out.push('\n');
        out.into_bytes()
    }
}

/// Wraps a gzip stream (possibly several concatenated members) in a buffered reader.
pub fn decode<R: Read>(compressed: R) -> BufReader<MultiGzDecoder<R>> {
    BufReader::new(MultiGzDecoder::new(compressed))
}

/// Line iterator that tolerates invalid UTF-8 and strips `\n` / `\r\n`.
pub struct LossyLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LossyLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(1024),
        }
    }
}

impl<R: BufRead> Iterator for LossyLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// Single forward pass over one archive's lines: early exit on sentinels, keep and
/// exclusion filters, status rewrites, per-archive de-duplication, and the
/// priority line moved to the end.
#[derive(Clone)]
pub struct TransformEngine {
    rules: Arc<TransformRules>,
}

impl TransformEngine {
    pub fn new(rules: Arc<TransformRules>) -> Self {
        Self { rules }
    }

    fn sentinel(&self, line: &str) -> Option<TerminationReason> {
        if line.contains(self.rules.fase_sentinel.as_str()) {
            Some(TerminationReason::FaseOn)
        } else if line.contains(self.rules.legacy_charger_sentinel.as_str()) {
            Some(TerminationReason::LegacyCharger)
        } else {
            None
        }
    }

    pub fn run<R: BufRead>(&self, reader: R) -> Result<TransformResult, TransformError> {
        let rules = self.rules.as_ref();
        // Scoped to this call; never shared between archives
        let mut seen: HashSet<String> = HashSet::new();
        let mut ordered_lines = Vec::new();
        let mut priority_line: Option<String> = None;

        for line in LossyLines::new(reader) {
            let line = line?;

            if let Some(reason) = self.sentinel(&line) {
                return Ok(TransformResult::terminated(reason));
            }
            if !rules.keep.is_match(&line) || rules.is_excluded(&line) {
                continue;
            }

            let line = rules.rewrite(line);

            if line.contains(rules.priority_marker.as_str()) {
                priority_line = Some(line);
                continue;
            }
            if !seen.contains(&line) {
                seen.insert(line.clone());
                ordered_lines.push(line);
            }
        }

        if let Some(line) = priority_line {
            if !seen.contains(&line) {
                ordered_lines.push(line);
            }
        }

        Ok(TransformResult {
            ordered_lines,
            termination: None,
        })
    }

    /// Decodes and transforms a gzip stream as it is read.
    pub fn run_compressed<R: Read>(&self, compressed: R) -> Result<TransformResult, TransformError> {
        self.run(decode(compressed))
    }
}
