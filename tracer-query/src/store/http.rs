use crate::config::StoreConfig;
use crate::store::{MultiSearchResponse, SearchClient, SearchRequest, SearchResponse, StoreError};
use async_trait::async_trait;
use backtraced_error::{ReqwestError, SerdeJsonError};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

/// Talks to Elasticsearch over its REST API
#[derive(Clone)]
pub struct HttpSearchClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpSearchClient {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ReqwestError::from_reqwest_error(e, "building reqwest client"))?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, indices: &[String], endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, indices.join(","), endpoint)
    }

    /// Missing daily indices are skipped by the store instead of failing the search
    fn search_request(&self, indices: &[String], request: &SearchRequest) -> RequestBuilder {
        self.authenticated(
            self.client
                .post(self.url(indices, "_search"))
                .query(&[("ignore_unavailable", "true")])
                .json(request),
        )
    }

    fn multi_search_request(&self, indices: &[String], requests: &[SearchRequest]) -> RequestBuilder {
        let body = multi_search_body(requests);
        debug!("multi search body is {} bytes", body.len());
        self.authenticated(
            self.client
                .post(self.url(indices, "_msearch"))
                .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                .body(body),
        )
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    async fn send_and_parse<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| ReqwestError::from_reqwest_error(e, format!("sending {context}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ReqwestError::from_reqwest_error(e, format!("reading {context} body")))?;
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        match serde_json::from_str(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(SerdeJsonError::from_serde_json_error(
                e,
                format!("parsing {context} response"),
                body,
            )
            .into()),
        }
    }
}

/// Newline delimited header and body pairs, the last line ends with a newline too
fn multi_search_body(requests: &[SearchRequest]) -> String {
    let header = json!({ "ignore_unavailable": true }).to_string();
    let mut body = String::new();
    for request in requests {
        body.push_str(&header);
        body.push('\n');
        body.push_str(&request.to_json().to_string());
        body.push('\n');
    }
    body
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    #[instrument(skip_all, fields(indices = indices.len()))]
    async fn search(
        &self,
        indices: &[String],
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        self.send_and_parse(self.search_request(indices, request), "search request")
            .await
    }

    #[instrument(skip_all, fields(indices = indices.len(), requests = requests.len()))]
    async fn multi_search(
        &self,
        indices: &[String],
        requests: &[SearchRequest],
    ) -> Result<Vec<SearchResponse>, StoreError> {
        let http_request = self.multi_search_request(indices, requests);
        let response: MultiSearchResponse = self
            .send_and_parse(http_request, "multi search request")
            .await?;
        Ok(response.responses)
    }
}
