//! Journal frames and replay.

use crate::error::{StoreError, StoreResult};
use driftsync_protocol::{from_cbor, to_cbor, RecordId, SyncableRecord};

/// Magic bytes opening every journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"DSJL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 2;

/// magic (4) + version (2) + kind (1) + length (4).
const PREFIX_SIZE: usize = 11;

/// prefix + CRC32 of the prefix (4). The length is trusted only after the
/// header checksum matches.
const HEADER_SIZE: usize = PREFIX_SIZE + 4;

const CRC_SIZE: usize = 4;

/// Kind of journal frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Full record image.
    Put = 1,
    /// Physical removal of a record.
    Remove = 2,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Remove),
            _ => None,
        }
    }

    /// Converts the frame kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One logical journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// The latest image of a record.
    Put(SyncableRecord),
    /// The record was purged.
    Remove(RecordId),
}

impl JournalEntry {
    /// Returns the frame kind.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Put(_) => FrameKind::Put,
            Self::Remove(_) => FrameKind::Remove,
        }
    }

    /// Encodes the entry as a complete frame.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be encoded or exceeds `u32::MAX` bytes.
    pub fn encode_frame(&self) -> StoreResult<Vec<u8>> {
        let payload = match self {
            Self::Put(record) => record.encode()?,
            Self::Remove(id) => to_cbor(id)?,
        };
        let len = u32::try_from(payload.len()).map_err(|_| {
            StoreError::corrupted(format!("frame payload too large: {} bytes", payload.len()))
        })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&JOURNAL_MAGIC);
        frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        frame.push(self.kind().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        let header_crc = compute_crc32(&frame);
        frame.extend_from_slice(&header_crc.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    fn decode_payload(kind: FrameKind, payload: &[u8]) -> StoreResult<Self> {
        Ok(match kind {
            FrameKind::Put => Self::Put(SyncableRecord::decode(payload)?),
            FrameKind::Remove => Self::Remove(from_cbor(payload)?),
        })
    }
}

/// Result of replaying a journal image.
#[derive(Debug, Default)]
pub struct Replay {
    /// Complete entries, in write order.
    pub entries: Vec<JournalEntry>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes of an incomplete trailing frame.
    pub torn_bytes: u64,
}

impl Replay {
    /// Decodes every complete frame in `bytes`.
    ///
    /// An incomplete trailing frame is a crash mid-write: it is reported in
    /// `torn_bytes` and otherwise ignored. A frame only counts as torn when
    /// it runs past the end of `bytes`, either inside its header or, with a
    /// verified header, inside its body.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupted`] on bad magic, unknown version or
    /// kind, or a header or frame checksum mismatch.
    pub fn scan(bytes: &[u8]) -> StoreResult<Self> {
        let mut entries = Vec::new();
        let mut pos = 0usize;

        while pos < bytes.len() {
            let rest = &bytes[pos..];
            if rest.len() < HEADER_SIZE {
                break;
            }
            if rest[0..4] != JOURNAL_MAGIC {
                return Err(StoreError::corrupted(format!("invalid magic at offset {pos}")));
            }
            let version = u16::from_le_bytes([rest[4], rest[5]]);
            if version != JOURNAL_VERSION {
                return Err(StoreError::corrupted(format!(
                    "unsupported version {version} at offset {pos}"
                )));
            }
            let kind = FrameKind::from_byte(rest[6]).ok_or_else(|| {
                StoreError::corrupted(format!("unknown frame kind {} at offset {pos}", rest[6]))
            })?;
            let stored_header = u32::from_le_bytes([
                rest[PREFIX_SIZE],
                rest[PREFIX_SIZE + 1],
                rest[PREFIX_SIZE + 2],
                rest[PREFIX_SIZE + 3],
            ]);
            if stored_header != compute_crc32(&rest[..PREFIX_SIZE]) {
                return Err(StoreError::corrupted(format!(
                    "header checksum mismatch at offset {pos}"
                )));
            }
            let payload_len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;
            let total = HEADER_SIZE + payload_len + CRC_SIZE;
            if rest.len() < total {
                break;
            }

            let body_end = HEADER_SIZE + payload_len;
            let stored = u32::from_le_bytes([
                rest[body_end],
                rest[body_end + 1],
                rest[body_end + 2],
                rest[body_end + 3],
            ]);
            let computed = compute_crc32(&rest[..body_end]);
            if stored != computed {
                return Err(StoreError::corrupted(format!(
                    "checksum mismatch at offset {pos}: stored {stored:#010x}, computed {computed:#010x}"
                )));
            }

            entries.push(JournalEntry::decode_payload(kind, &rest[HEADER_SIZE..body_end])?);
            pos += total;
        }

        Ok(Self {
            entries,
            valid_len: pos as u64,
            torn_bytes: (bytes.len() - pos) as u64,
        })
    }
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(id: &str) -> JournalEntry {
        JournalEntry::Put(SyncableRecord::with_id(
            id.into(),
            "o".into(),
            b"payload".to_vec(),
            10,
        ))
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn scan_reads_all_frames() {
        let mut bytes = put("a").encode_frame().unwrap();
        bytes.extend(JournalEntry::Remove("a".into()).encode_frame().unwrap());

        let replay = Replay::scan(&bytes).unwrap();
        assert_eq!(replay.entries, vec![put("a"), JournalEntry::Remove("a".into())]);
        assert_eq!(replay.valid_len, bytes.len() as u64);
        assert_eq!(replay.torn_bytes, 0);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let first = put("a").encode_frame().unwrap();
        let second = put("b").encode_frame().unwrap();
        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..second.len() - 3]);

        let replay = Replay::scan(&bytes).unwrap();
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.valid_len, first.len() as u64);
        assert_eq!(replay.torn_bytes, (second.len() - 3) as u64);

        // partial header
        let replay = Replay::scan(&second[..5]).unwrap();
        assert!(replay.entries.is_empty());
        assert_eq!(replay.torn_bytes, 5);
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let mut bytes = put("a").encode_frame().unwrap();
        let mid = HEADER_SIZE + 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(Replay::scan(&bytes), Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn damaged_length_is_corruption_not_torn_tail() {
        let first = put("a").encode_frame().unwrap();
        let mut bytes = first.clone();
        bytes.extend(put("b").encode_frame().unwrap());
        bytes.extend(put("c").encode_frame().unwrap());

        // high byte of the middle frame's length
        bytes[first.len() + 10] = 0x7F;
        assert!(matches!(Replay::scan(&bytes), Err(StoreError::Corrupted(_))));

        // a shrunken length is caught the same way
        let mut bytes = first.clone();
        bytes.extend(put("b").encode_frame().unwrap());
        bytes[first.len() + 7] ^= 0x01;
        assert!(matches!(Replay::scan(&bytes), Err(StoreError::Corrupted(_))));
    }

    #[test]
    fn torn_header_of_last_frame_is_dropped() {
        let first = put("a").encode_frame().unwrap();
        let second = put("b").encode_frame().unwrap();
        let mut bytes = first.clone();
        bytes.extend_from_slice(&second[..HEADER_SIZE - 1]);

        let replay = Replay::scan(&bytes).unwrap();
        assert_eq!(replay.entries.len(), 1);
        assert_eq!(replay.torn_bytes, (HEADER_SIZE - 1) as u64);
    }

    #[test]
    fn bad_magic_and_kind_are_corruption() {
        let mut bytes = put("a").encode_frame().unwrap();
        bytes[0] = b'X';
        assert!(matches!(Replay::scan(&bytes), Err(StoreError::Corrupted(_))));

        let mut bytes = put("a").encode_frame().unwrap();
        bytes[6] = 9;
        assert!(matches!(Replay::scan(&bytes), Err(StoreError::Corrupted(_))));
    }
}
