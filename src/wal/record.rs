//! # Log Records
//!
//! Wire format of the write-ahead log. Every record starts with the same
//! 20-byte header; the body depends on the record type:
//!
//! ```text
//! header:          size (4) | lsn (4) | txn_id (4) | prev_lsn (4) | type (4)
//! BEGIN/COMMIT/
//! ABORT:           header only
//! INSERT,
//! MARKDELETE,
//! APPLYDELETE,
//! ROLLBACKDELETE:  header | rid (8) | tuple_size (4) | tuple_bytes
//! UPDATE:          header | rid (8) | old_size (4) | old_bytes
//!                         | new_size (4) | new_bytes
//! NEWPAGE:         header | prev_page_id (4)
//! ```
//!
//! All integers little-endian. `size` is the full record length including
//! the header, which is what lets a sequential reader skip from record to
//! record. `prev_lsn` chains a transaction's records together in program
//! order.
//!
//! Only log *production* ships in this engine; `decode_from` exists so the
//! format is round-trip tested and a future recovery driver has something
//! to build on.

use eyre::{ensure, Result};
use zerocopy::little_endian::I32 as I32le;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{Lsn, PageId, TxnId, INVALID_LSN, LOG_RECORD_HEADER_SIZE};
use crate::table::{Rid, RID_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    Invalid = 0,
    Insert = 1,
    MarkDelete = 2,
    ApplyDelete = 3,
    RollbackDelete = 4,
    Update = 5,
    Begin = 6,
    Commit = 7,
    Abort = 8,
    NewPage = 9,
}

impl LogRecordType {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => LogRecordType::Insert,
            2 => LogRecordType::MarkDelete,
            3 => LogRecordType::ApplyDelete,
            4 => LogRecordType::RollbackDelete,
            5 => LogRecordType::Update,
            6 => LogRecordType::Begin,
            7 => LogRecordType::Commit,
            8 => LogRecordType::Abort,
            9 => LogRecordType::NewPage,
            _ => LogRecordType::Invalid,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct LogRecordHeader {
    size: I32le,
    lsn: I32le,
    txn_id: I32le,
    prev_lsn: I32le,
    record_type: I32le,
}

const _: () = assert!(std::mem::size_of::<LogRecordHeader>() == LOG_RECORD_HEADER_SIZE);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    Begin,
    Commit,
    Abort,
    Insert { rid: Rid, tuple: Vec<u8> },
    MarkDelete { rid: Rid, tuple: Vec<u8> },
    ApplyDelete { rid: Rid, tuple: Vec<u8> },
    RollbackDelete { rid: Rid, tuple: Vec<u8> },
    Update { rid: Rid, old: Vec<u8>, new: Vec<u8> },
    NewPage { prev_page_id: PageId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub payload: LogPayload,
}

impl LogRecord {
    /// A record as produced by the mutation paths: the LSN is assigned later
    /// by the log manager, at append time.
    pub fn new(txn_id: TxnId, prev_lsn: Lsn, payload: LogPayload) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            payload,
        }
    }

    pub fn record_type(&self) -> LogRecordType {
        match &self.payload {
            LogPayload::Begin => LogRecordType::Begin,
            LogPayload::Commit => LogRecordType::Commit,
            LogPayload::Abort => LogRecordType::Abort,
            LogPayload::Insert { .. } => LogRecordType::Insert,
            LogPayload::MarkDelete { .. } => LogRecordType::MarkDelete,
            LogPayload::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            LogPayload::RollbackDelete { .. } => LogRecordType::RollbackDelete,
            LogPayload::Update { .. } => LogRecordType::Update,
            LogPayload::NewPage { .. } => LogRecordType::NewPage,
        }
    }

    /// Encoded length, header included.
    pub fn size(&self) -> usize {
        LOG_RECORD_HEADER_SIZE
            + match &self.payload {
                LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => 0,
                LogPayload::Insert { tuple, .. }
                | LogPayload::MarkDelete { tuple, .. }
                | LogPayload::ApplyDelete { tuple, .. }
                | LogPayload::RollbackDelete { tuple, .. } => RID_SIZE + 4 + tuple.len(),
                LogPayload::Update { old, new, .. } => RID_SIZE + 4 + old.len() + 4 + new.len(),
                LogPayload::NewPage { .. } => 4,
            }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let header = LogRecordHeader {
            size: I32le::new(self.size() as i32),
            lsn: I32le::new(self.lsn),
            txn_id: I32le::new(self.txn_id),
            prev_lsn: I32le::new(self.prev_lsn),
            record_type: I32le::new(self.record_type() as i32),
        };
        buf.extend_from_slice(header.as_bytes());

        match &self.payload {
            LogPayload::Begin | LogPayload::Commit | LogPayload::Abort => {}
            LogPayload::Insert { rid, tuple }
            | LogPayload::MarkDelete { rid, tuple }
            | LogPayload::ApplyDelete { rid, tuple }
            | LogPayload::RollbackDelete { rid, tuple } => {
                buf.extend_from_slice(rid.as_bytes());
                buf.extend_from_slice(&(tuple.len() as i32).to_le_bytes());
                buf.extend_from_slice(tuple);
            }
            LogPayload::Update { rid, old, new } => {
                buf.extend_from_slice(rid.as_bytes());
                buf.extend_from_slice(&(old.len() as i32).to_le_bytes());
                buf.extend_from_slice(old);
                buf.extend_from_slice(&(new.len() as i32).to_le_bytes());
                buf.extend_from_slice(new);
            }
            LogPayload::NewPage { prev_page_id } => {
                buf.extend_from_slice(&prev_page_id.to_le_bytes());
            }
        }
    }

    /// Decodes one record from the front of `buf`, returning it together
    /// with its encoded length. `Ok(None)` means the buffer holds no
    /// complete record at this position (end of usable log).
    pub fn decode_from(buf: &[u8]) -> Result<Option<(LogRecord, usize)>> {
        if buf.len() < LOG_RECORD_HEADER_SIZE {
            return Ok(None);
        }
        let header = LogRecordHeader::read_from_bytes(&buf[..LOG_RECORD_HEADER_SIZE])
            .expect("header slice has exact size");
        let size = header.size.get();
        if size < LOG_RECORD_HEADER_SIZE as i32 || size as usize > buf.len() {
            return Ok(None);
        }
        let record_type = LogRecordType::from_i32(header.record_type.get());
        if record_type == LogRecordType::Invalid {
            return Ok(None);
        }

        let body = &buf[LOG_RECORD_HEADER_SIZE..size as usize];
        let payload = match record_type {
            LogRecordType::Begin => LogPayload::Begin,
            LogRecordType::Commit => LogPayload::Commit,
            LogRecordType::Abort => LogPayload::Abort,
            LogRecordType::NewPage => {
                ensure!(body.len() == 4, "malformed NEWPAGE record body");
                LogPayload::NewPage {
                    prev_page_id: i32::from_le_bytes([body[0], body[1], body[2], body[3]]),
                }
            }
            LogRecordType::Update => {
                let (rid, rest) = decode_rid(body)?;
                let (old, rest) = decode_blob(rest)?;
                let (new, rest) = decode_blob(rest)?;
                ensure!(rest.is_empty(), "trailing bytes in UPDATE record");
                LogPayload::Update { rid, old, new }
            }
            LogRecordType::Insert
            | LogRecordType::MarkDelete
            | LogRecordType::ApplyDelete
            | LogRecordType::RollbackDelete => {
                let (rid, rest) = decode_rid(body)?;
                let (tuple, rest) = decode_blob(rest)?;
                ensure!(rest.is_empty(), "trailing bytes in tuple record");
                match record_type {
                    LogRecordType::Insert => LogPayload::Insert { rid, tuple },
                    LogRecordType::MarkDelete => LogPayload::MarkDelete { rid, tuple },
                    LogRecordType::ApplyDelete => LogPayload::ApplyDelete { rid, tuple },
                    _ => LogPayload::RollbackDelete { rid, tuple },
                }
            }
            LogRecordType::Invalid => unreachable!(),
        };

        Ok(Some((
            LogRecord {
                lsn: header.lsn.get(),
                txn_id: header.txn_id.get(),
                prev_lsn: header.prev_lsn.get(),
                payload,
            },
            size as usize,
        )))
    }
}

fn decode_rid(buf: &[u8]) -> Result<(Rid, &[u8])> {
    ensure!(buf.len() >= RID_SIZE, "record body too short for rid");
    let rid = Rid::read_from_bytes(&buf[..RID_SIZE]).expect("rid slice has exact size");
    Ok((rid, &buf[RID_SIZE..]))
}

fn decode_blob(buf: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    ensure!(buf.len() >= 4, "record body too short for length prefix");
    let len = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    ensure!(len >= 0, "negative blob length in log record");
    let end = 4 + len as usize;
    ensure!(buf.len() >= end, "record body shorter than its blob");
    Ok((buf[4..end].to_vec(), &buf[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: LogPayload) {
        let mut record = LogRecord::new(3, 11, payload);
        record.lsn = 42;

        let mut buf = Vec::new();
        record.encode_into(&mut buf);
        assert_eq!(buf.len(), record.size());

        let (decoded, consumed) = LogRecord::decode_from(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn header_only_records() {
        roundtrip(LogPayload::Begin);
        roundtrip(LogPayload::Commit);
        roundtrip(LogPayload::Abort);
    }

    #[test]
    fn tuple_records() {
        let rid = Rid::new(7, 2);
        roundtrip(LogPayload::Insert {
            rid,
            tuple: vec![1, 2, 3, 4],
        });
        roundtrip(LogPayload::MarkDelete { rid, tuple: vec![] });
        roundtrip(LogPayload::ApplyDelete {
            rid,
            tuple: vec![9; 100],
        });
        roundtrip(LogPayload::RollbackDelete {
            rid,
            tuple: vec![5],
        });
    }

    #[test]
    fn update_record() {
        roundtrip(LogPayload::Update {
            rid: Rid::new(1, 0),
            old: vec![1, 1, 1],
            new: vec![2, 2, 2, 2],
        });
    }

    #[test]
    fn new_page_record() {
        roundtrip(LogPayload::NewPage { prev_page_id: -1 });
        roundtrip(LogPayload::NewPage { prev_page_id: 12 });
    }

    #[test]
    fn several_records_decode_sequentially() {
        let mut buf = Vec::new();
        let payloads = [
            LogPayload::Begin,
            LogPayload::Insert {
                rid: Rid::new(1, 1),
                tuple: vec![0xAA; 10],
            },
            LogPayload::Commit,
        ];
        for (i, payload) in payloads.iter().enumerate() {
            let mut record = LogRecord::new(1, i as Lsn - 1, payload.clone());
            record.lsn = i as Lsn;
            record.encode_into(&mut buf);
        }

        let mut offset = 0;
        let mut seen = Vec::new();
        while let Some((record, consumed)) = LogRecord::decode_from(&buf[offset..]).unwrap() {
            seen.push(record.payload);
            offset += consumed;
        }
        assert_eq!(seen.as_slice(), &payloads);
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn truncated_buffer_yields_none() {
        let mut record = LogRecord::new(1, -1, LogPayload::Insert {
            rid: Rid::new(0, 0),
            tuple: vec![7; 32],
        });
        record.lsn = 0;
        let mut buf = Vec::new();
        record.encode_into(&mut buf);

        assert!(LogRecord::decode_from(&buf[..10]).unwrap().is_none());
        assert!(LogRecord::decode_from(&buf[..buf.len() - 1]).unwrap().is_none());
        // All-zero tail (as read from a zero-filled log region).
        assert!(LogRecord::decode_from(&[0u8; 64]).unwrap().is_none());
    }
}
