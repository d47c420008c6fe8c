//! Row source: gzip decompression and CSV tokenization.
//!
//! Turns an uploaded `.csv.gz` payload into a [`RowSet`]. Records may have
//! differing field counts; the header's length is what capacity planning
//! uses. Decompression and parsing are split so each can be timed on its
//! own.

use std::io::{self, Read};

use flate2::read::MultiGzDecoder;

use crate::error::InputError;
use crate::models::RowSet;

/// Fully decompress a gzip stream. Concatenated gzip members are read as
/// one stream. Output larger than `limit` bytes is rejected.
pub fn decompress_gzip<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, InputError> {
    let mut decoder = MultiGzDecoder::new(reader).take(limit.saturating_add(1));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(InputError::Decompress)?;
    if out.len() as u64 > limit {
        return Err(InputError::Decompress(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decompressed size exceeds limit of {} bytes", limit),
        )));
    }
    Ok(out)
}

/// Tokenize CSV bytes into rows, header first.
pub fn parse_rows(data: &[u8]) -> Result<RowSet, InputError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| InputError::Csv {
            row: rows.len() as u64,
            message: e.to_string(),
        })?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    match rows.first() {
        None => Err(InputError::MissingHeader),
        Some(header) if header.is_empty() => Err(InputError::EmptyHeader),
        Some(_) => Ok(RowSet::new(rows)),
    }
}
