//! Raw column maps decoded from replicated inserts.

use std::collections::HashMap;

use relaybox_core::{Message, Metadata};

use super::error::{WalError, WalResult};
use super::pgoutput::{InsertBody, TupleValue};
use super::relation_cache::RelationCache;

// Type OIDs from pg_type.dat.
const BOOL_OID: u32 = 16;
const INT8_OID: u32 = 20;
const INT2_OID: u32 = 21;
const INT4_OID: u32 = 23;
const FLOAT4_OID: u32 = 700;
const FLOAT8_OID: u32 = 701;
const NUMERIC_OID: u32 = 1700;
const JSONB_OID: u32 = 3802;

/// A decoded column value.
///
/// JSONB columns keep their bytes verbatim so that payloads survive the
/// trip unreshaped; other recognised OIDs decode from their text form, and
/// anything unrecognised falls back to a string.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl CellValue {
    fn kind(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "bool",
            CellValue::Int(_) => "int",
            CellValue::Float(_) => "float",
            CellValue::String(_) => "string",
            CellValue::Bytes(_) => "bytes",
        }
    }
}

/// Column-name-to-value mapping for one replicated insert, produced by the
/// WAL decoder before conversion to a typed [`Message`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMessage {
    columns: HashMap<String, CellValue>,
}

impl RawMessage {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.columns.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: CellValue) {
        self.columns.insert(column.into(), value);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Lift the raw column map into an outbox [`Message`], checking that
    /// every outbox column carries the type the table contract promises.
    pub fn to_message(&self) -> WalResult<Message> {
        let id = match self.get("id") {
            Some(CellValue::Int(id)) => *id,
            other => return Err(invalid_column("id", "int8", other)),
        };

        let broker = match self.get("broker") {
            Some(CellValue::String(broker)) => broker.clone(),
            other => return Err(invalid_column("broker", "text", other)),
        };

        let topic = match self.get("topic") {
            Some(CellValue::String(topic)) => topic.clone(),
            other => return Err(invalid_column("topic", "text", other)),
        };

        let metadata = match self.get("metadata") {
            None | Some(CellValue::Null) => None,
            Some(CellValue::Bytes(bytes)) => Some(
                serde_json::from_slice::<Metadata>(bytes).map_err(|e| WalError::InvalidColumn {
                    column: "metadata".into(),
                    message: format!("not a JSON string map: {e}"),
                })?,
            ),
            other => return Err(invalid_column("metadata", "jsonb", other)),
        };

        let payload = match self.get("payload") {
            Some(CellValue::Bytes(bytes)) => bytes.clone(),
            other => return Err(invalid_column("payload", "jsonb", other)),
        };

        Ok(Message {
            id,
            broker,
            topic,
            metadata,
            payload,
        })
    }
}

fn invalid_column(column: &str, expected: &str, got: Option<&CellValue>) -> WalError {
    WalError::InvalidColumn {
        column: column.to_string(),
        message: match got {
            Some(value) => format!("expected {expected}, got {}", value.kind()),
            None => format!("expected {expected}, column is missing"),
        },
    }
}

/// Translate an insert tuple into a [`RawMessage`] using the cached
/// relation schema. Unchanged TOAST columns are skipped; they were not
/// written and their bytes are not in the WAL.
pub(crate) fn insert_to_raw(
    insert: &InsertBody,
    relations: &RelationCache,
) -> WalResult<RawMessage> {
    let mut raw = RawMessage::default();

    for (index, value) in insert.tuple.columns.iter().enumerate() {
        let column = relations.column(insert.relation_id, index)?;

        match value {
            TupleValue::Null => raw.insert(column.name.clone(), CellValue::Null),
            TupleValue::UnchangedToast => {}
            TupleValue::Text(data) => raw.insert(
                column.name.clone(),
                decode_text_cell(data, column.type_oid)
                    .map_err(|message| WalError::InvalidColumn {
                        column: column.name.clone(),
                        message,
                    })?,
            ),
            TupleValue::Binary(data) => {
                raw.insert(column.name.clone(), CellValue::Bytes(data.clone()))
            }
        }
    }

    Ok(raw)
}

/// Decode one text-format column by its type OID. JSONB stays verbatim
/// bytes; unknown OIDs fall back to a string.
fn decode_text_cell(data: &[u8], type_oid: u32) -> Result<CellValue, String> {
    if type_oid == JSONB_OID {
        return Ok(CellValue::Bytes(data.to_vec()));
    }

    let text = String::from_utf8_lossy(data);
    let value = match type_oid {
        BOOL_OID => CellValue::Bool(text == "t" || text == "true"),
        INT2_OID | INT4_OID | INT8_OID => CellValue::Int(
            text.parse::<i64>()
                .map_err(|_| format!("'{text}' is not a valid integer"))?,
        ),
        FLOAT4_OID | FLOAT8_OID => CellValue::Float(
            text.parse::<f64>()
                .map_err(|_| format!("'{text}' is not a valid float"))?,
        ),
        NUMERIC_OID => text
            .parse::<f64>()
            .map(CellValue::Float)
            .unwrap_or_else(|_| CellValue::String(text.into_owned())),
        _ => CellValue::String(text.into_owned()),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::super::pgoutput::{RelationBody, RelationColumn, Tuple};
    use super::*;

    const TEXT_OID: u32 = 25;
    const TIMESTAMPTZ_OID: u32 = 1184;

    fn outbox_relation() -> RelationBody {
        let column = |name: &str, type_oid: u32| RelationColumn {
            flags: 0,
            name: name.into(),
            type_oid,
            type_modifier: -1,
        };

        RelationBody {
            id: 16384,
            namespace: "public".into(),
            name: "outbox_messages".into(),
            replica_identity: b'd',
            columns: vec![
                column("id", INT8_OID),
                column("broker", TEXT_OID),
                column("topic", TEXT_OID),
                column("metadata", JSONB_OID),
                column("payload", JSONB_OID),
                column("created_at", TIMESTAMPTZ_OID),
                column("published_at", TIMESTAMPTZ_OID),
            ],
        }
    }

    fn outbox_insert() -> InsertBody {
        InsertBody {
            relation_id: 16384,
            tuple: Tuple {
                columns: vec![
                    TupleValue::Text(b"42".to_vec()),
                    TupleValue::Text(b"kafka".to_vec()),
                    TupleValue::Text(b"x".to_vec()),
                    TupleValue::Text(br#"{"trace_id":"t-1"}"#.to_vec()),
                    TupleValue::Text(br#"{"v": 1}"#.to_vec()),
                    TupleValue::Text(b"2025-01-01 12:00:00+00".to_vec()),
                    TupleValue::Null,
                ],
            },
        }
    }

    fn cache() -> RelationCache {
        let mut cache = RelationCache::new();
        cache.update(outbox_relation());
        cache
    }

    #[test]
    fn test_insert_to_raw_decodes_by_oid() {
        let raw = insert_to_raw(&outbox_insert(), &cache()).unwrap();

        assert_eq!(raw.get("id"), Some(&CellValue::Int(42)));
        assert_eq!(raw.get("broker"), Some(&CellValue::String("kafka".into())));
        // JSONB is kept verbatim
        assert_eq!(
            raw.get("payload"),
            Some(&CellValue::Bytes(br#"{"v": 1}"#.to_vec()))
        );
        // Unknown-to-the-decoder OIDs fall back to strings
        assert_eq!(
            raw.get("created_at"),
            Some(&CellValue::String("2025-01-01 12:00:00+00".into()))
        );
        assert_eq!(raw.get("published_at"), Some(&CellValue::Null));
    }

    #[test]
    fn test_insert_to_raw_skips_unchanged_toast() {
        let mut insert = outbox_insert();
        insert.tuple.columns[4] = TupleValue::UnchangedToast;

        let raw = insert_to_raw(&insert, &cache()).unwrap();
        assert!(raw.get("payload").is_none());
    }

    #[test]
    fn test_insert_to_raw_unknown_relation() {
        let mut insert = outbox_insert();
        insert.relation_id = 99;

        assert!(matches!(
            insert_to_raw(&insert, &cache()),
            Err(WalError::UnknownRelation(99))
        ));
    }

    #[test]
    fn test_insert_to_raw_rejects_bad_integer() {
        let mut insert = outbox_insert();
        insert.tuple.columns[0] = TupleValue::Text(b"not-a-number".to_vec());

        assert!(matches!(
            insert_to_raw(&insert, &cache()),
            Err(WalError::InvalidColumn { .. })
        ));
    }

    #[test]
    fn test_to_message_round_trip() {
        let raw = insert_to_raw(&outbox_insert(), &cache()).unwrap();
        let message = raw.to_message().unwrap();

        assert_eq!(message.id, 42);
        assert_eq!(message.broker, "kafka");
        assert_eq!(message.topic, "x");
        assert_eq!(
            message.metadata,
            Some([("trace_id".to_string(), "t-1".to_string())].into())
        );
        assert_eq!(message.payload, br#"{"v": 1}"#.to_vec());
        assert!(message.validate().is_ok());
    }

    #[test]
    fn test_to_message_without_metadata() {
        let mut insert = outbox_insert();
        insert.tuple.columns[3] = TupleValue::Null;

        let raw = insert_to_raw(&insert, &cache()).unwrap();
        let message = raw.to_message().unwrap();
        assert!(message.metadata.is_none());
    }

    #[test]
    fn test_to_message_missing_id() {
        let mut raw = insert_to_raw(&outbox_insert(), &cache()).unwrap();
        raw.columns.remove("id");

        let err = raw.to_message().unwrap_err();
        assert!(matches!(err, WalError::InvalidColumn { ref column, .. } if column == "id"));
    }

    #[test]
    fn test_to_message_wrong_broker_type() {
        let mut raw = insert_to_raw(&outbox_insert(), &cache()).unwrap();
        raw.insert("broker", CellValue::Int(5));

        let err = raw.to_message().unwrap_err();
        assert!(matches!(err, WalError::InvalidColumn { ref column, .. } if column == "broker"));
    }

    #[test]
    fn test_to_message_metadata_must_be_string_map() {
        let mut raw = insert_to_raw(&outbox_insert(), &cache()).unwrap();
        raw.insert("metadata", CellValue::Bytes(br#"{"n": 7}"#.to_vec()));

        assert!(matches!(
            raw.to_message(),
            Err(WalError::InvalidColumn { .. })
        ));
    }

    #[test]
    fn test_decode_text_cell_bool_and_floats() {
        assert_eq!(
            decode_text_cell(b"t", BOOL_OID).unwrap(),
            CellValue::Bool(true)
        );
        assert_eq!(
            decode_text_cell(b"f", BOOL_OID).unwrap(),
            CellValue::Bool(false)
        );
        assert_eq!(
            decode_text_cell(b"1.5", FLOAT8_OID).unwrap(),
            CellValue::Float(1.5)
        );
        // numeric that does not parse as a float stays textual
        assert_eq!(
            decode_text_cell(b"12.34.56", NUMERIC_OID).unwrap(),
            CellValue::String("12.34.56".into())
        );
    }
}
