//! Typed subset of the Elasticsearch query DSL.
//!
//! Only what the read path needs is modelled. Every type renders itself with
//! `to_json`, which is also what its `Serialize` impl writes.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    Bool(BoolQuery),
    Range(RangeQuery),
    Match { field: String, value: String },
    Term { field: String, value: String },
    Nested { path: String, query: Box<Query> },
}

impl Query {
    pub fn match_field(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Match {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn nested(path: impl Into<String>, query: Query) -> Self {
        Query::Nested {
            path: path.into(),
            query: Box::new(query),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Bool(bool_query) => bool_query.to_json(),
            Query::Range(range) => range.to_json(),
            Query::Match { field, value } => json!({ "match": { field.as_str(): value } }),
            Query::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Query::Nested { path, query } => json!({
                "nested": {
                    "path": path,
                    "query": query.to_json(),
                }
            }),
        }
    }
}

impl From<BoolQuery> for Query {
    fn from(value: BoolQuery) -> Self {
        Query::Bool(value)
    }
}

impl From<RangeQuery> for Query {
    fn from(value: RangeQuery) -> Self {
        Query::Range(value)
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, query: impl Into<Query>) -> Self {
        self.must.push(query.into());
        self
    }

    pub fn push_must(&mut self, query: impl Into<Query>) {
        self.must.push(query.into());
    }

    pub fn should(mut self, query: impl Into<Query>) -> Self {
        self.should.push(query.into());
        self
    }

    pub fn minimum_should_match(mut self, minimum: u32) -> Self {
        self.minimum_should_match = Some(minimum);
        self
    }

    fn to_json(&self) -> Value {
        let mut body = Map::new();
        if !self.must.is_empty() {
            body.insert(
                "must".to_string(),
                Value::Array(self.must.iter().map(Query::to_json).collect()),
            );
        }
        if !self.should.is_empty() {
            body.insert(
                "should".to_string(),
                Value::Array(self.should.iter().map(Query::to_json).collect()),
            );
        }
        if let Some(minimum) = self.minimum_should_match {
            body.insert("minimum_should_match".to_string(), json!(minimum));
        }
        json!({ "bool": body })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub field: String,
    pub gte: Option<i64>,
    pub lte: Option<i64>,
    pub lt: Option<i64>,
}

impl RangeQuery {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            gte: None,
            lte: None,
            lt: None,
        }
    }

    pub fn gte(mut self, value: i64) -> Self {
        self.gte = Some(value);
        self
    }

    pub fn lte(mut self, value: i64) -> Self {
        self.lte = Some(value);
        self
    }

    pub fn lt(mut self, value: i64) -> Self {
        self.lt = Some(value);
        self
    }

    fn to_json(&self) -> Value {
        let mut bounds = Map::new();
        if let Some(gte) = self.gte {
            bounds.insert("gte".to_string(), json!(gte));
        }
        if let Some(lte) = self.lte {
            bounds.insert("lte".to_string(), json!(lte));
        }
        if let Some(lt) = self.lt {
            bounds.insert("lt".to_string(), json!(lt));
        }
        json!({ "range": { self.field.as_str(): bounds } })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Terms(TermsAggregation),
    Histogram(HistogramAggregation),
    Avg { field: String },
    Max { field: String },
}

impl Aggregation {
    pub fn avg(field: impl Into<String>) -> Self {
        Aggregation::Avg {
            field: field.into(),
        }
    }

    pub fn max(field: impl Into<String>) -> Self {
        Aggregation::Max {
            field: field.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms(terms) => terms.to_json(),
            Aggregation::Histogram(histogram) => histogram.to_json(),
            Aggregation::Avg { field } => json!({ "avg": { "field": field } }),
            Aggregation::Max { field } => json!({ "max": { "field": field } }),
        }
    }
}

impl From<TermsAggregation> for Aggregation {
    fn from(value: TermsAggregation) -> Self {
        Aggregation::Terms(value)
    }
}

impl From<HistogramAggregation> for Aggregation {
    fn from(value: HistogramAggregation) -> Self {
        Aggregation::Histogram(value)
    }
}

impl Serialize for Aggregation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn with_sub_aggregations(mut aggregation: Map<String, Value>, subs: &[(String, Aggregation)]) -> Value {
    if !subs.is_empty() {
        aggregation.insert("aggs".to_string(), aggregations_to_json(subs));
    }
    Value::Object(aggregation)
}

fn aggregations_to_json(aggregations: &[(String, Aggregation)]) -> Value {
    Value::Object(
        aggregations
            .iter()
            .map(|(name, aggregation)| (name.clone(), aggregation.to_json()))
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermsAggregation {
    pub field: String,
    pub size: Option<usize>,
    pub order: Option<(String, SortOrder)>,
    pub sub_aggregations: Vec<(String, Aggregation)>,
}

impl TermsAggregation {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            size: None,
            order: None,
            sub_aggregations: vec![],
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// `key` is `_count`, `_key` or the name of a metric sub aggregation
    pub fn order_by(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.order = Some((key.into(), order));
        self
    }

    pub fn sub_aggregation(mut self, name: impl Into<String>, aggregation: impl Into<Aggregation>) -> Self {
        self.sub_aggregations.push((name.into(), aggregation.into()));
        self
    }

    fn to_json(&self) -> Value {
        let mut terms = Map::new();
        terms.insert("field".to_string(), json!(self.field));
        if let Some(size) = self.size {
            terms.insert("size".to_string(), json!(size));
        }
        if let Some((key, order)) = &self.order {
            terms.insert("order".to_string(), json!({ key.as_str(): order.as_str() }));
        }
        let mut aggregation = Map::new();
        aggregation.insert("terms".to_string(), Value::Object(terms));
        with_sub_aggregations(aggregation, &self.sub_aggregations)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramAggregation {
    pub field: String,
    pub interval: u64,
    pub offset: Option<i64>,
    pub extended_bounds: Option<(i64, i64)>,
    pub min_doc_count: Option<u64>,
    pub sub_aggregations: Vec<(String, Aggregation)>,
}

impl HistogramAggregation {
    pub fn new(field: impl Into<String>, interval: u64) -> Self {
        Self {
            field: field.into(),
            interval,
            offset: None,
            extended_bounds: None,
            min_doc_count: None,
            sub_aggregations: vec![],
        }
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn extended_bounds(mut self, min: i64, max: i64) -> Self {
        self.extended_bounds = Some((min, max));
        self
    }

    pub fn min_doc_count(mut self, min_doc_count: u64) -> Self {
        self.min_doc_count = Some(min_doc_count);
        self
    }

    pub fn sub_aggregation(mut self, name: impl Into<String>, aggregation: impl Into<Aggregation>) -> Self {
        self.sub_aggregations.push((name.into(), aggregation.into()));
        self
    }

    fn to_json(&self) -> Value {
        let mut histogram = Map::new();
        histogram.insert("field".to_string(), json!(self.field));
        histogram.insert("interval".to_string(), json!(self.interval));
        if let Some(offset) = self.offset {
            histogram.insert("offset".to_string(), json!(offset));
        }
        if let Some((min, max)) = self.extended_bounds {
            histogram.insert("extended_bounds".to_string(), json!({ "min": min, "max": max }));
        }
        if let Some(min_doc_count) = self.min_doc_count {
            histogram.insert("min_doc_count".to_string(), json!(min_doc_count));
        }
        let mut aggregation = Map::new();
        aggregation.insert("histogram".to_string(), Value::Object(histogram));
        with_sub_aggregations(aggregation, &self.sub_aggregations)
    }
}

/// Body of a single `_search` request, or of one item in a `_msearch`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub query: Option<Query>,
    pub size: usize,
    pub sort: Vec<(String, SortOrder)>,
    pub search_after: Vec<Value>,
    pub aggregations: Vec<(String, Aggregation)>,
    pub track_total_hits: bool,
}

impl SearchRequest {
    /// Aggregation only, no documents returned
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn search_after(mut self, sort_values: Vec<Value>) -> Self {
        self.search_after = sort_values;
        self
    }

    pub fn aggregation(mut self, name: impl Into<String>, aggregation: impl Into<Aggregation>) -> Self {
        self.aggregations.push((name.into(), aggregation.into()));
        self
    }

    pub fn track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = track;
        self
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(query) = &self.query {
            body.insert("query".to_string(), query.to_json());
        }
        body.insert("size".to_string(), json!(self.size));
        if !self.sort.is_empty() {
            body.insert(
                "sort".to_string(),
                Value::Array(
                    self.sort
                        .iter()
                        .map(|(field, order)| json!({ field.as_str(): order.as_str() }))
                        .collect(),
                ),
            );
        }
        if !self.search_after.is_empty() {
            body.insert(
                "search_after".to_string(),
                Value::Array(self.search_after.clone()),
            );
        }
        if !self.aggregations.is_empty() {
            body.insert("aggs".to_string(), aggregations_to_json(&self.aggregations));
        }
        if self.track_total_hits {
            body.insert("track_total_hits".to_string(), json!(true));
        }
        Value::Object(body)
    }
}

impl Serialize for SearchRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bool_query_omits_empty_clauses() {
        let query: Query = BoolQuery::new()
            .must(RangeQuery::new("startTime").gte(1).lte(2))
            .into();
        assert_eq!(
            query.to_json(),
            json!({"bool": {"must": [{"range": {"startTime": {"gte": 1, "lte": 2}}}]}})
        );
    }

    #[test]
    fn terms_with_metric_sub_aggregation() {
        let aggregation: Aggregation = TermsAggregation::new("operationName")
            .size(3)
            .order_by("avg", SortOrder::Desc)
            .sub_aggregation("avg", Aggregation::avg("duration"))
            .into();
        insta::assert_json_snapshot!(aggregation, @r###"
        {
          "aggs": {
            "avg": {
              "avg": {
                "field": "duration"
              }
            }
          },
          "terms": {
            "field": "operationName",
            "order": {
              "avg": "desc"
            },
            "size": 3
          }
        }
        "###);
    }

    #[test]
    fn aggregation_only_search_has_zero_size() {
        let request = SearchRequest::new()
            .query(Query::MatchAll)
            .aggregation("agg", TermsAggregation::new("serviceName"));
        assert_eq!(
            request.to_json(),
            json!({
                "query": {"match_all": {}},
                "size": 0,
                "aggs": {"agg": {"terms": {"field": "serviceName"}}}
            })
        );
    }
}
