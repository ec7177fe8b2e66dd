//! Decoder for the pgoutput logical replication protocol (v2, insert-only).
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html
//!
//! Only the messages the outbox stream needs are fully decoded: `Relation`
//! (column metadata, sent once per table per session) and `Insert`.
//! `Begin`/`Commit` are decoded for their positions; everything else —
//! updates, deletes, truncates, origins, type metadata — is reported as
//! [`LogicalMessage::Skipped`] and dropped by the receive loop.

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use super::error::{WalError, WalResult};

/// A decoded pgoutput message.
#[derive(Debug, Clone)]
pub enum LogicalMessage {
    Begin(BeginBody),
    Commit(CommitBody),
    Relation(RelationBody),
    Insert(InsertBody),
    /// Any message kind the outbox stream does not consume.
    Skipped(char),
}

#[derive(Debug, Clone)]
pub struct BeginBody {
    pub final_lsn: u64,
    /// Microseconds since 2000-01-01 00:00:00 UTC.
    pub timestamp: i64,
    pub xid: u32,
}

#[derive(Debug, Clone)]
pub struct CommitBody {
    pub flags: u8,
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct RelationBody {
    pub id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: u8,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone)]
pub struct RelationColumn {
    /// Bit 1 marks the column as part of the replica key.
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

#[derive(Debug, Clone)]
pub struct InsertBody {
    pub relation_id: u32,
    pub tuple: Tuple,
}

#[derive(Debug, Clone)]
pub struct Tuple {
    pub columns: Vec<TupleValue>,
}

/// One column of a replicated tuple, by its wire kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleValue {
    Null,
    /// A TOASTed value that did not change; its bytes are not in the WAL.
    UnchangedToast,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// Decode one logical replication message from an XLogData payload.
pub fn decode(data: &[u8]) -> WalResult<LogicalMessage> {
    let Some((&kind, payload)) = data.split_first() else {
        return Err(WalError::Decode("empty logical message".into()));
    };

    let decoded = match kind {
        b'B' => decode_begin(payload).map(LogicalMessage::Begin),
        b'C' => decode_commit(payload).map(LogicalMessage::Commit),
        b'R' => decode_relation(payload).map(LogicalMessage::Relation),
        b'I' => decode_insert(payload).map(LogicalMessage::Insert),
        other => return Ok(LogicalMessage::Skipped(other as char)),
    };

    decoded.map_err(|e| WalError::Decode(format!("'{}' message: {}", kind as char, e)))
}

fn decode_begin(data: &[u8]) -> io::Result<BeginBody> {
    let mut cursor = Cursor::new(data);
    Ok(BeginBody {
        final_lsn: cursor.read_u64::<BigEndian>()?,
        timestamp: cursor.read_i64::<BigEndian>()?,
        xid: cursor.read_u32::<BigEndian>()?,
    })
}

fn decode_commit(data: &[u8]) -> io::Result<CommitBody> {
    let mut cursor = Cursor::new(data);
    Ok(CommitBody {
        flags: cursor.read_u8()?,
        commit_lsn: cursor.read_u64::<BigEndian>()?,
        end_lsn: cursor.read_u64::<BigEndian>()?,
        timestamp: cursor.read_i64::<BigEndian>()?,
    })
}

fn decode_relation(data: &[u8]) -> io::Result<RelationBody> {
    let mut cursor = Cursor::new(data);
    let id = cursor.read_u32::<BigEndian>()?;
    let namespace = read_cstring(&mut cursor)?;
    let name = read_cstring(&mut cursor)?;
    let replica_identity = cursor.read_u8()?;
    let num_columns = cursor.read_i16::<BigEndian>()?.max(0) as usize;

    let mut columns = Vec::with_capacity(num_columns);
    for _ in 0..num_columns {
        columns.push(RelationColumn {
            flags: cursor.read_u8()?,
            name: read_cstring(&mut cursor)?,
            type_oid: cursor.read_u32::<BigEndian>()?,
            type_modifier: cursor.read_i32::<BigEndian>()?,
        });
    }

    Ok(RelationBody {
        id,
        namespace,
        name,
        replica_identity,
        columns,
    })
}

fn decode_insert(data: &[u8]) -> io::Result<InsertBody> {
    let mut cursor = Cursor::new(data);
    let relation_id = cursor.read_u32::<BigEndian>()?;

    let tuple_kind = cursor.read_u8()?;
    if tuple_kind != b'N' {
        return Err(invalid_data(format!(
            "expected 'N' new-tuple marker, got '{}'",
            tuple_kind as char
        )));
    }

    Ok(InsertBody {
        relation_id,
        tuple: decode_tuple(&mut cursor)?,
    })
}

fn decode_tuple(cursor: &mut Cursor<&[u8]>) -> io::Result<Tuple> {
    let num_columns = cursor.read_i16::<BigEndian>()?.max(0) as usize;
    let mut columns = Vec::with_capacity(num_columns);

    for _ in 0..num_columns {
        let kind = cursor.read_u8()?;
        let value = match kind {
            b'n' => TupleValue::Null,
            b'u' => TupleValue::UnchangedToast,
            b't' => TupleValue::Text(read_len_prefixed(cursor)?),
            b'b' => TupleValue::Binary(read_len_prefixed(cursor)?),
            other => {
                return Err(invalid_data(format!(
                    "unknown column kind '{}' (0x{:02X})",
                    other as char, other
                )));
            }
        };
        columns.push(value);
    }

    Ok(Tuple { columns })
}

fn read_len_prefixed(cursor: &mut Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let len = cursor.read_i32::<BigEndian>()?;
    if len < 0 {
        return Err(invalid_data(format!("negative column length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_cstring(cursor: &mut Cursor<&[u8]>) -> io::Result<String> {
    let mut bytes = Vec::new();
    loop {
        let b = cursor.read_u8()?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_begin() {
        // 'B' + Int64(final_lsn) + Int64(timestamp) + Int32(xid)
        let mut data = vec![b'B'];
        data.extend_from_slice(&0x16B3748u64.to_be_bytes());
        data.extend_from_slice(&12345678i64.to_be_bytes());
        data.extend_from_slice(&123u32.to_be_bytes());

        match decode(&data).unwrap() {
            LogicalMessage::Begin(b) => {
                assert_eq!(b.final_lsn, 0x16B3748);
                assert_eq!(b.timestamp, 12345678);
                assert_eq!(b.xid, 123);
            }
            other => panic!("expected Begin, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_commit() {
        let mut data = vec![b'C'];
        data.push(0); // flags
        data.extend_from_slice(&100u64.to_be_bytes());
        data.extend_from_slice(&200u64.to_be_bytes());
        data.extend_from_slice(&12345i64.to_be_bytes());

        match decode(&data).unwrap() {
            LogicalMessage::Commit(c) => {
                assert_eq!(c.flags, 0);
                assert_eq!(c.commit_lsn, 100);
                assert_eq!(c.end_lsn, 200);
            }
            other => panic!("expected Commit, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_relation() {
        let mut data = vec![b'R'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.extend_from_slice(b"public\0");
        data.extend_from_slice(b"outbox_messages\0");
        data.push(b'd'); // default replica identity
        data.extend_from_slice(&2i16.to_be_bytes());

        // id: int8, part of key
        data.push(1);
        data.extend_from_slice(b"id\0");
        data.extend_from_slice(&20u32.to_be_bytes());
        data.extend_from_slice(&(-1i32).to_be_bytes());

        // broker: text
        data.push(0);
        data.extend_from_slice(b"broker\0");
        data.extend_from_slice(&25u32.to_be_bytes());
        data.extend_from_slice(&(-1i32).to_be_bytes());

        match decode(&data).unwrap() {
            LogicalMessage::Relation(r) => {
                assert_eq!(r.id, 16384);
                assert_eq!(r.namespace, "public");
                assert_eq!(r.name, "outbox_messages");
                assert_eq!(r.replica_identity, b'd');
                assert_eq!(r.columns.len(), 2);
                assert_eq!(r.columns[0].name, "id");
                assert_eq!(r.columns[0].type_oid, 20);
                assert_eq!(r.columns[0].flags, 1);
                assert_eq!(r.columns[1].name, "broker");
                assert_eq!(r.columns[1].type_oid, 25);
            }
            other => panic!("expected Relation, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_insert() {
        let mut data = vec![b'I'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.push(b'N');
        data.extend_from_slice(&2i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&1i32.to_be_bytes());
        data.push(b'1');
        data.push(b't');
        data.extend_from_slice(&5i32.to_be_bytes());
        data.extend_from_slice(b"kafka");

        match decode(&data).unwrap() {
            LogicalMessage::Insert(i) => {
                assert_eq!(i.relation_id, 16384);
                assert_eq!(i.tuple.columns.len(), 2);
                assert_eq!(i.tuple.columns[0], TupleValue::Text(b"1".to_vec()));
                assert_eq!(i.tuple.columns[1], TupleValue::Text(b"kafka".to_vec()));
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_insert_with_null_and_toast() {
        let mut data = vec![b'I'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.push(b'N');
        data.extend_from_slice(&3i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&1i32.to_be_bytes());
        data.push(b'1');
        data.push(b'n');
        data.push(b'u');

        match decode(&data).unwrap() {
            LogicalMessage::Insert(i) => {
                assert_eq!(i.tuple.columns[1], TupleValue::Null);
                assert_eq!(i.tuple.columns[2], TupleValue::UnchangedToast);
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn test_update_and_delete_are_skipped() {
        for kind in [b'U', b'D', b'T', b'O', b'Y', b'M'] {
            let data = vec![kind, 0, 0, 0, 0];
            match decode(&data).unwrap() {
                LogicalMessage::Skipped(c) => assert_eq!(c, kind as char),
                other => panic!("expected Skipped, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_empty_message() {
        assert!(matches!(decode(&[]), Err(WalError::Decode(_))));
    }

    #[test]
    fn test_decode_truncated_insert() {
        let mut data = vec![b'I'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.push(b'N');
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&100i32.to_be_bytes()); // claims 100 bytes
        data.push(b'x'); // delivers 1

        assert!(matches!(decode(&data), Err(WalError::Decode(_))));
    }

    #[test]
    fn test_decode_insert_rejects_wrong_tuple_marker() {
        let mut data = vec![b'I'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.push(b'O');

        assert!(matches!(decode(&data), Err(WalError::Decode(_))));
    }
}
