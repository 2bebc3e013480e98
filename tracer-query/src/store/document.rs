//! Span documents as written by the collector into the `jaeger-span-*` indices.

use crate::error::ReaderError;
use api_structs::{Log, Process, Reference, ReferenceType, Span};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanDocument {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    pub operation_name: String,
    #[serde(default)]
    pub references: Vec<ReferenceDocument>,
    pub start_time: u64,
    pub duration: u64,
    #[serde(default)]
    pub tags: Vec<KeyValueDocument>,
    #[serde(default)]
    pub logs: Vec<LogDocument>,
    #[serde(default)]
    pub process: ProcessDocument,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDocument {
    pub ref_type: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyValueDocument {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogDocument {
    pub timestamp: u64,
    #[serde(default)]
    pub fields: Vec<KeyValueDocument>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDocument {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub tags: Vec<KeyValueDocument>,
}

fn tag_value_to_string(key: &str, value: Value) -> Result<String, ReaderError> {
    match value {
        Value::String(value) => Ok(value),
        Value::Null => Ok(String::new()),
        Value::Bool(value) => Ok(value.to_string()),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(ReaderError::decode(
            "span tag value",
            format!("tag {key} has a nested value: {other}"),
        )),
    }
}

fn key_values_to_map(
    key_values: Vec<KeyValueDocument>,
) -> Result<HashMap<String, String>, ReaderError> {
    key_values
        .into_iter()
        .map(|kv| {
            let value = tag_value_to_string(&kv.key, kv.value)?;
            Ok((kv.key, value))
        })
        .collect()
}

impl TryFrom<ReferenceDocument> for Reference {
    type Error = ReaderError;

    fn try_from(value: ReferenceDocument) -> Result<Self, Self::Error> {
        let ref_type = match value.ref_type.as_str() {
            "CHILD_OF" => ReferenceType::ChildOf,
            "FOLLOWS_FROM" => ReferenceType::FollowsFrom,
            other => {
                return Err(ReaderError::decode(
                    "span reference",
                    format!("unknown reference type {other}"),
                ))
            }
        };
        Ok(Reference {
            ref_type,
            trace_id: value.trace_id,
            span_id: value.span_id,
        })
    }
}

impl TryFrom<SpanDocument> for Span {
    type Error = ReaderError;

    fn try_from(doc: SpanDocument) -> Result<Self, Self::Error> {
        let references = doc
            .references
            .into_iter()
            .map(Reference::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let logs = doc
            .logs
            .into_iter()
            .map(|log| {
                Ok(Log {
                    timestamp: log.timestamp,
                    fields: key_values_to_map(log.fields)?,
                })
            })
            .collect::<Result<Vec<_>, ReaderError>>()?;
        Ok(Span {
            trace_id: doc.trace_id,
            span_id: doc.span_id,
            operation_name: doc.operation_name,
            references,
            start_time: doc.start_time,
            duration: doc.duration,
            tags: key_values_to_map(doc.tags)?,
            process: Process {
                service_name: doc.process.service_name,
                tags: key_values_to_map(doc.process.tags)?,
            },
            logs,
        })
    }
}

/// Parses the `_source` of a hit into a domain span
pub fn span_from_source(source: Value) -> Result<Span, ReaderError> {
    let doc: SpanDocument = serde_json::from_value(source)
        .map_err(|e| ReaderError::decode("span document", e.to_string()))?;
    Span::try_from(doc)
}

#[cfg(test)]
mod test {
    use super::span_from_source;
    use api_structs::ReferenceType;
    use serde_json::json;

    #[test]
    fn decodes_collector_document() {
        let span = span_from_source(json!({
            "traceID": "abc",
            "spanID": "def",
            "flags": 1,
            "operationName": "/sample",
            "references": [{"refType": "CHILD_OF", "traceID": "abc", "spanID": "aaa"}],
            "startTime": 1535339000000000u64,
            "startTimeMillis": 1535339000000u64,
            "duration": 1200,
            "tags": [
                {"key": "span.layer", "type": "string", "value": "HTTP"},
                {"key": "error", "type": "bool", "value": true},
                {"key": "http.status_code", "type": "int64", "value": 200}
            ],
            "logs": [{"timestamp": 1535339000000100u64, "fields": [{"key": "event", "type": "string", "value": "retry"}]}],
            "process": {"serviceName": "jboss2", "tags": [{"key": "sid", "type": "string", "value": "node-1"}]}
        }))
        .unwrap();
        assert_eq!(span.references[0].ref_type, ReferenceType::ChildOf);
        assert_eq!(span.tags["error"], "true");
        assert_eq!(span.tags["http.status_code"], "200");
        assert_eq!(span.logs[0].fields["event"], "retry");
        assert_eq!(span.process.service_name, "jboss2");
        assert_eq!(span.process.tags["sid"], "node-1");
    }

    #[test]
    fn nested_tag_value_is_a_decode_error() {
        let err = span_from_source(json!({
            "traceID": "abc",
            "spanID": "def",
            "operationName": "op",
            "startTime": 1,
            "duration": 1,
            "tags": [{"key": "weird", "value": {"nested": true}}]
        }))
        .unwrap_err();
        assert_eq!(err.stage(), crate::error::Stage::Decode);
    }
}
