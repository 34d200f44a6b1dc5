//! Turn joined decoder ids into vocabulary ids and choice flags

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::EcmError;
use crate::models::embeddings::special_tokens::EMBED_SHIFT;

/// Decoded rows split into word ids (`-1` for reserved ids) and choice flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demultiplexed {
    pub ids: Vec<Vec<i64>>,
    /// 1 where the word came from the emotion vocabulary
    pub choices: Vec<Vec<u8>>,
}

/// Split joined ids of a `vocab_size` model
///
/// For every id: subtract the embedding shift; ids at or above
/// `vocab_size` are emotion words and lose a further `vocab_size + 3`;
/// anything negative (SOS / EOS / padding) becomes `-1`.
pub fn demultiplex(raw: &[Vec<u32>], vocab_size: usize) -> Result<Demultiplexed> {
    let vocab = vocab_size as i64;
    let joined_width = 2 * (vocab + EMBED_SHIFT);

    let mut ids = Vec::with_capacity(raw.len());
    let mut choices = Vec::with_capacity(raw.len());
    for row in raw {
        let mut id_row = Vec::with_capacity(row.len());
        let mut choice_row = Vec::with_capacity(row.len());
        for &token in row {
            let token = token as i64;
            if token >= joined_width {
                return Err(EcmError::VocabMismatch {
                    id: token,
                    space: "joined output",
                    width: joined_width as usize,
                }
                .into());
            }

            let mut id = token - EMBED_SHIFT;
            let choice = id >= vocab;
            if choice {
                id -= vocab + EMBED_SHIFT;
            }
            id_row.push(id.max(-1));
            choice_row.push(choice as u8);
        }
        ids.push(id_row);
        choices.push(choice_row);
    }

    Ok(Demultiplexed { ids, choices })
}

/// Space-joined decimal rows
pub fn to_lines<T: ToString>(rows: &[Vec<T>]) -> Vec<String> {
    rows.iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" "))
        .collect()
}

/// Write one line per row (single-column CSV, no header)
pub fn write_lines<P: AsRef<Path>>(path: P, lines: &[String]) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    tracing::info!("Wrote {} rows to {}", lines.len(), path.display());
    Ok(())
}

impl Demultiplexed {
    /// Write ids and choices to their two output files
    pub fn write<P: AsRef<Path>, Q: AsRef<Path>>(&self, output_path: P, choice_path: Q) -> Result<()> {
        write_lines(output_path, &to_lines(&self.ids))?;
        write_lines(choice_path, &to_lines(&self.choices))
    }
}
