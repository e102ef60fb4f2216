//! Donor row decoding

use crate::donor::DonorRow;
use crate::lsn::{LogPosition, Lsn};
use crate::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A decoded donor log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonorRecord {
    /// Position of the record; `size` is the payload length
    pub lsn: LogPosition,
    /// Record type tag
    pub record_type: i64,
    /// Generation of the master that wrote the record
    pub generation: u64,
    /// Commit time
    pub timestamp: DateTime<Utc>,
    /// Raw log record
    pub payload: Bytes,
}

/// Turns donor rows into [`DonorRecord`]s
pub struct RecordDecoder;

impl RecordDecoder {
    /// Generation of a row, read before anything else is decoded
    pub fn generation(row: &DonorRow) -> u64 {
        row.generation
    }

    /// Decode a row, failing on a malformed LSN token or oversized payload
    pub fn decode(row: &DonorRow) -> Result<DonorRecord> {
        let lsn: Lsn = row
            .lsn
            .parse()
            .map_err(|_| Error::decode(format!("malformed lsn token '{}'", row.lsn)))?;
        Self::build(row, lsn)
    }

    /// Decode a row, degrading a malformed LSN token to the zero position
    pub fn decode_lenient(row: &DonorRow) -> Result<DonorRecord> {
        Self::build(row, Lsn::parse_lenient(&row.lsn))
    }

    fn build(row: &DonorRow, lsn: Lsn) -> Result<DonorRecord> {
        let size = u32::try_from(row.payload.len()).map_err(|_| {
            Error::decode(format!(
                "payload of {} bytes at {} exceeds a log record",
                row.payload.len(),
                lsn
            ))
        })?;

        Ok(DonorRecord {
            lsn: LogPosition::at(lsn, size),
            record_type: row.record_type,
            generation: row.generation,
            timestamp: DateTime::<Utc>::from_timestamp(row.timestamp, 0).unwrap_or_default(),
            payload: row.payload.clone(),
        })
    }
}
