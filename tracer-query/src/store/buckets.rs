//! Reading buckets and metric values out of an aggregation tree.

use crate::error::ReaderError;
use serde_json::{Map, Value};

fn as_object<'a>(value: &'a Value, context: &str) -> Result<&'a Map<String, Value>, ReaderError> {
    value
        .as_object()
        .ok_or_else(|| ReaderError::decode(context, format!("expected an object, got {value}")))
}

/// Buckets of the aggregation `name` found directly under `container`, which
/// is either the top level `aggregations` map or a parent bucket
pub fn buckets<'a>(
    container: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a [Value], ReaderError> {
    let aggregation = container
        .get(name)
        .ok_or_else(|| ReaderError::aggregation_missing(name))?;
    aggregation
        .get("buckets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| ReaderError::decode(format!("aggregation {name}"), "no buckets array"))
}

/// Buckets of a sub aggregation nested inside `bucket`
pub fn sub_buckets<'a>(bucket: &'a Value, name: &str) -> Result<&'a [Value], ReaderError> {
    buckets(as_object(bucket, "bucket")?, name)
}

pub fn string_key(bucket: &Value) -> Result<String, ReaderError> {
    match bucket.get("key") {
        Some(Value::String(key)) => Ok(key.clone()),
        Some(other) => Err(ReaderError::decode(
            "bucket key",
            format!("expected a string, got {other}"),
        )),
        None => Err(ReaderError::decode("bucket key", "missing")),
    }
}

/// Histogram keys are numbers, sometimes rendered with a fraction
pub fn numeric_key(bucket: &Value) -> Result<f64, ReaderError> {
    bucket
        .get("key")
        .and_then(Value::as_f64)
        .ok_or_else(|| ReaderError::decode("bucket key", format!("expected a number in {bucket}")))
}

pub fn doc_count(bucket: &Value) -> Result<u64, ReaderError> {
    bucket
        .get("doc_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| ReaderError::decode("bucket doc_count", format!("missing in {bucket}")))
}

/// `None` when the metric has no value, e.g. an avg over no documents
pub fn metric_value(bucket: &Value, name: &str) -> Result<Option<f64>, ReaderError> {
    let metric = as_object(bucket, "bucket")?
        .get(name)
        .ok_or_else(|| ReaderError::aggregation_missing(name))?;
    match metric.get("value") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            ReaderError::decode(format!("metric {name}"), format!("not a number: {value}"))
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Stage;
    use serde_json::json;

    #[test]
    fn reads_nested_buckets_and_metrics() {
        let tree = json!({
            "agg": {"buckets": [
                {"key": "/users", "doc_count": 3, "avg": {"value": 1500.0}},
                {"key": "/empty", "doc_count": 0, "avg": {"value": null}}
            ]}
        });
        let tree = tree.as_object().unwrap();
        let found = buckets(tree, "agg").unwrap();
        assert_eq!(string_key(&found[0]).unwrap(), "/users");
        assert_eq!(doc_count(&found[0]).unwrap(), 3);
        assert_eq!(metric_value(&found[0], "avg").unwrap(), Some(1500.0));
        assert_eq!(metric_value(&found[1], "avg").unwrap(), None);
    }

    #[test]
    fn missing_aggregation_and_bad_keys() {
        let tree = json!({"agg": {"buckets": [{"key": 12, "doc_count": 1}]}});
        let tree = tree.as_object().unwrap();
        assert!(matches!(
            buckets(tree, "other"),
            Err(ReaderError::AggregationMissing { .. })
        ));
        let found = buckets(tree, "agg").unwrap();
        assert_eq!(string_key(&found[0]).unwrap_err().stage(), Stage::Decode);
        assert_eq!(numeric_key(&found[0]).unwrap(), 12.0);
    }
}
