//! Input file loading
//!
//! Sequence files hold one example per line: space-separated word ids
//! (optionally wrapped in double quotes, as a one-column CSV). Rows are
//! cleaned to a fixed length:
//!
//! - sources are left-padded with `-1`, which the embedding shift turns
//!   into the constant-zero id
//! - targets are right-padded with `-2`, which the shift turns into EOS
//! - longer rows are truncated
//!
//! Category files hold one integer per line.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::EcmError;
use crate::models::embeddings::special_tokens::EMBED_SHIFT;

/// Source padding value (zero embedding after the shift)
pub const SOURCE_PAD: i64 = -1;
/// Target padding value (EOS after the shift)
pub const TARGET_PAD: i64 = -2;

/// Pad or truncate one parsed row to `max_length`
pub fn clean_row(row: &[i64], is_source: bool, max_length: usize) -> Vec<i64> {
    if row.len() >= max_length {
        return row[..max_length].to_vec();
    }

    let pad = max_length - row.len();
    let mut cleaned = Vec::with_capacity(max_length);
    if is_source {
        cleaned.extend(std::iter::repeat(SOURCE_PAD).take(pad));
        cleaned.extend_from_slice(row);
    } else {
        cleaned.extend_from_slice(row);
        cleaned.extend(std::iter::repeat(TARGET_PAD).take(pad));
    }
    cleaned
}

/// Parse and clean every row of a sequence file
pub fn load_sequences<P: AsRef<Path>>(path: P, is_source: bool, max_length: usize) -> Result<Vec<Vec<i64>>> {
    let path = path.as_ref();
    let text = read_input(path, if is_source { "source" } else { "target" })?;

    let mut rows = Vec::new();
    for (line_no, line) in data_lines(&text) {
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<i64>().map_err(|_| EcmError::Data {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: format!("'{}' is not an integer id", tok),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.push(clean_row(&row, is_source, max_length));
    }

    tracing::debug!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Parse a category file (one integer per line)
pub fn load_categories<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let text = read_input(path, "category")?;

    data_lines(&text)
        .map(|(line_no, line)| {
            line.trim().parse::<u32>().map_err(|_| {
                anyhow::Error::from(EcmError::Data {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: format!("'{}' is not an emotion category", line.trim()),
                })
            })
        })
        .collect()
}

/// Add the embedding shift to cleaned rows; rows are reported 1-based
pub fn shift_ids(rows: &[Vec<i64>]) -> Result<Vec<Vec<u32>>> {
    rows.iter()
        .enumerate()
        .map(|(row_idx, row)| {
            row.iter()
                .map(|&id| {
                    u32::try_from(id + EMBED_SHIFT).map_err(|_| {
                        anyhow::Error::from(EcmError::InvalidId {
                            row: row_idx + 1,
                            id,
                        })
                    })
                })
                .collect::<Result<Vec<u32>>>()
        })
        .collect()
}

fn read_input(path: &Path, what: &'static str) -> Result<String> {
    if !path.is_file() {
        return Err(EcmError::MissingFile {
            what,
            path: path.to_path_buf(),
        }
        .into());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {} file {}", what, path.display()))
}

/// Non-blank lines with their 1-based line numbers, outer quotes removed
fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines().enumerate().filter_map(|(i, line)| {
        let line = line.trim();
        let line = line
            .strip_prefix('"')
            .and_then(|l| l.strip_suffix('"'))
            .unwrap_or(line);
        if line.trim().is_empty() {
            None
        } else {
            Some((i + 1, line))
        }
    })
}
