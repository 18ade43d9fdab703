//! Byte-level log repair
//!
//! A crash mid-write can leave a truncated line, or glue a new record onto the
//! tail of a partial one. The scanner below ignores line boundaries entirely
//! and pulls every well-formed record object out of the raw bytes.

use crate::store::{Record, RecordSet};

/// Well-formed records recovered from a raw log
#[derive(Debug, Default)]
pub struct FragmentScan {
    /// Recovered records, deduplicated last-write-wins
    pub records: Vec<Record>,

    /// Records superseded by a later record with the same identity
    pub duplicates: usize,

    /// Non-whitespace bytes outside every recovered record
    pub discarded_bytes: usize,
}

/// Extracts every maximal well-formed record fragment from raw bytes
///
/// Parsing is attempted at each `{`. A successful parse consumes the whole
/// object; a failed one advances by a single byte, so a record glued to the end
/// of garbage is still found.
pub fn scan_fragments(bytes: &[u8]) -> FragmentScan {
    let mut merged = RecordSet::default();
    let mut discarded_bytes = 0;
    let mut consumed = 0;
    let mut pos = 0;

    while let Some(offset) = bytes[pos..].iter().position(|&b| b == b'{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_slice(&bytes[start..]).into_iter::<Record>();

        match stream.next() {
            Some(Ok(record)) => {
                let end = start + stream.byte_offset();
                match record.normalized() {
                    Some(record) => {
                        discarded_bytes += count_garbage(&bytes[consumed..start]);
                        merged.upsert(record);
                        consumed = end;
                    }
                    None => {
                        tracing::debug!("Discarding record with invalid identity at byte {}", start);
                    }
                }
                pos = end;
            }
            _ => pos = start + 1,
        }
    }

    discarded_bytes += count_garbage(&bytes[consumed..]);

    let duplicates = merged.duplicates();
    FragmentScan {
        records: merged.into_records(),
        duplicates,
        discarded_bytes,
    }
}

fn count_garbage(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| !b.is_ascii_whitespace()).count()
}
