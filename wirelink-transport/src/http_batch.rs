//! HTTP batch wire format.
//!
//! A group of sub-requests travels to the batch endpoint as one request:
//!
//! - `GET ?batch=1&{i}.method=..&{i}.path=..&{i}.query.{k}=..` when no
//!   sub-request method carries a body;
//! - `POST ?batch=1` with a multipart form otherwise, adding
//!   `{i}.body_type` (`json` | `formdata`) and `{i}.body` / `{i}.body.{k}`.
//!
//! The response is a JSON array of `{data, error, status, statusText}`
//! aligned with the sub-requests. Response headers named `{i}.name` belong
//! to sub-request `i`; unprefixed headers are shared by all.

use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Method, Request, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use wirelink_core::{
    ClientError, Envelope, FetchError, RawResponse, RequestBody, RequestParams,
};

use crate::dataloader::{BatchFetch, BatchLoader, UnitResolver};
use crate::fetcher::network_error;
use crate::requester::{append_form, parse_body, status_text, Requester};

pub const BATCH_PARAM: &str = "batch";

/// One element of a batch response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub status: u16,
    #[serde(rename = "statusText", default)]
    pub status_text: String,
}

/// Result of one sub-request; a transformer failure stays local to its item.
pub type BatchItemResult = Result<Envelope, ClientError>;

pub fn batch_uses_post(items: &[RequestParams]) -> bool {
    items.iter().any(RequestParams::has_body)
}

/// Query pairs of a GET batch, `batch=1` first.
pub fn encode_get_query(items: &[RequestParams]) -> Vec<(String, String)> {
    let mut pairs = vec![(BATCH_PARAM.to_string(), "1".to_string())];
    for (i, params) in items.iter().enumerate() {
        pairs.push((format!("{}.method", i), params.method.to_string()));
        pairs.push((format!("{}.path", i), params.path.clone()));
        for (key, value) in &params.query {
            pairs.push((format!("{}.query.{}", i, key), value.clone()));
        }
    }
    pairs
}

/// Multipart form of a POST batch. Json bodies pass through `requester`'s transformer.
pub fn encode_post_form(
    requester: &Requester,
    items: &[RequestParams],
) -> Result<Form, ClientError> {
    let mut form = Form::new();
    for (i, params) in items.iter().enumerate() {
        form = form
            .text(format!("{}.path", i), params.path.clone())
            .text(format!("{}.method", i), params.method.to_string());
        for (key, value) in &params.query {
            form = form.text(format!("{}.query.{}", i, key), value.clone());
        }
        if !params.has_body() {
            continue;
        }
        match &params.body {
            Some(RequestBody::Json(value)) => {
                let value = requester.transformer_for(params).serialize(value.clone())?;
                form = form
                    .text(format!("{}.body_type", i), "json")
                    .text(format!("{}.body", i), serde_json::to_string(&value)?);
            }
            Some(body @ RequestBody::Form(data)) => {
                form = form.text(format!("{}.body_type", i), body.body_type());
                form = append_form(form, &format!("{}.body.", i), data)?;
            }
            None => {}
        }
    }
    Ok(form)
}

/// URL the group is sent to. GET batches carry every sub-request in the query.
pub fn batch_url(base: &str, items: &[RequestParams]) -> Result<Url, ClientError> {
    let mut url = Url::parse(base)
        .map_err(|e| ClientError::config(format!("invalid batch URL '{}': {}", base, e)))?;
    if batch_uses_post(items) {
        url.query_pairs_mut().append_pair(BATCH_PARAM, "1");
    } else {
        url.query_pairs_mut().extend_pairs(encode_get_query(items));
    }
    Ok(url)
}

/// Link-level headers apply to the batch; the multipart encoder owns `content-type`.
pub fn build_batch_request(
    requester: &Requester,
    items: &[RequestParams],
) -> Result<Request, ClientError> {
    let first = items
        .first()
        .ok_or_else(|| ClientError::config("cannot encode an empty batch"))?;
    let url = batch_url(requester.base_for(first), items)?;
    let mut headers = requester.headers().clone();
    let builder = if batch_uses_post(items) {
        headers.remove(CONTENT_TYPE);
        requester
            .pipeline()
            .request(Method::POST, url)
            .headers(headers)
            .multipart(encode_post_form(requester, items)?)
    } else {
        requester.pipeline().request(Method::GET, url).headers(headers)
    };
    builder.build().map_err(network_error)
}

/// Splits batch response headers into one map per sub-request.
pub fn demux_headers(headers: &HeaderMap, count: usize) -> Vec<HeaderMap> {
    let mut shared = HeaderMap::new();
    let mut own = vec![HeaderMap::new(); count];

    for (name, value) in headers {
        let indexed = name.as_str().split_once('.').and_then(|(prefix, rest)| {
            let index = prefix.parse::<usize>().ok()?;
            let name = HeaderName::from_bytes(rest.as_bytes()).ok()?;
            Some((index, name))
        });
        match indexed {
            Some((index, name)) => {
                if let Some(map) = own.get_mut(index) {
                    map.append(name, value.clone());
                }
            }
            None => {
                shared.append(name.clone(), value.clone());
            }
        }
    }

    own.into_iter()
        .map(|mut map| {
            for (name, value) in &shared {
                if !map.contains_key(name) {
                    map.append(name.clone(), value.clone());
                }
            }
            map
        })
        .collect()
}

fn decode_element(
    requester: &Requester,
    params: &RequestParams,
    element: WireEnvelope,
    headers: Option<HeaderMap>,
) -> BatchItemResult {
    let success = (200..300).contains(&element.status) && element.error.is_none();
    let raw_body = element.data.clone().unwrap_or(Value::Null);

    let envelope = if success {
        let data = requester.transformer_for(params).deserialize(raw_body.clone())?;
        Envelope::success(element.status, element.status_text.clone(), data)
    } else {
        let message = if element.status_text.is_empty() {
            element.status.to_string()
        } else {
            element.status_text.clone()
        };
        Envelope::failure(FetchError {
            status: element.status,
            message,
            value: element.error.clone(),
        })
    };

    Ok(match headers {
        Some(headers) if params.raw => envelope.with_raw(RawResponse {
            status: element.status,
            status_text: element.status_text,
            headers,
            body: raw_body,
        }),
        _ => envelope,
    })
}

/// Decodes a batch response into positional per-item results.
pub fn decode_batch(
    requester: &Requester,
    items: &[RequestParams],
    status: u16,
    status_text: &str,
    headers: &HeaderMap,
    body: Value,
) -> Result<Vec<Option<BatchItemResult>>, ClientError> {
    let elements = match body {
        Value::Array(elements) => elements,
        other if !(200..300).contains(&status) => {
            // The endpoint rejected the batch as a whole: every item sees that status.
            let failure = FetchError::with_value(status, status_text, other);
            return Ok(items
                .iter()
                .map(|_| Some(Ok(Envelope::failure(failure.clone()))))
                .collect());
        }
        _ => return Err(ClientError::codec("batch response is not a JSON array")),
    };

    if elements.len() != items.len() {
        warn!(expected = items.len(), got = elements.len(), "batch response length mismatch");
    }

    let mut headers = demux_headers(headers, items.len()).into_iter();
    let mut elements = elements.into_iter();
    Ok(items
        .iter()
        .map(|params| {
            let item_headers = headers.next();
            let element = elements.next()?;
            Some(
                serde_json::from_value::<WireEnvelope>(element)
                    .map_err(ClientError::from)
                    .and_then(|element| decode_element(requester, params, element, item_headers)),
            )
        })
        .collect())
}

/// Sends `items` as one batch and decodes the positional results.
pub async fn execute_batch(
    requester: &Requester,
    items: &[RequestParams],
) -> Result<Vec<Option<BatchItemResult>>, ClientError> {
    let request = build_batch_request(requester, items)?;
    debug!(
        batch_size = items.len(),
        method = %request.method(),
        "executing batch"
    );

    let response = requester.send(request).await?;
    let status = response.status();
    let reason = status_text(&response);
    let headers = response.headers().clone();
    let bytes = response.bytes().await.map_err(network_error)?;
    let body = parse_body(&bytes, status.is_success())?;

    decode_batch(requester, items, status.as_u16(), &reason, &headers, body)
}

/// [`BatchLoader`] that sends each group through the batch endpoint.
#[derive(Debug, Clone)]
pub struct HttpBatchLoader {
    requester: Arc<Requester>,
    max_url_length: Option<usize>,
    max_items: Option<usize>,
}

impl HttpBatchLoader {
    pub fn new(requester: Requester) -> Self {
        HttpBatchLoader {
            requester: Arc::new(requester),
            max_url_length: None,
            max_items: None,
        }
    }

    pub fn max_url_length(mut self, max: Option<usize>) -> Self {
        self.max_url_length = max;
        self
    }

    pub fn max_items(mut self, max: Option<usize>) -> Self {
        self.max_items = max;
        self
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }
}

impl BatchLoader for HttpBatchLoader {
    type Key = RequestParams;
    type Value = BatchItemResult;
    type Error = ClientError;

    fn validate(&self, keys: &[RequestParams]) -> bool {
        let Some(first) = keys.first() else {
            return true;
        };
        if self.max_items.is_some_and(|max| keys.len() > max) {
            return false;
        }
        let base = self.requester.base_for(first);
        if keys.iter().any(|params| self.requester.base_for(params) != base) {
            return false;
        }
        match self.max_url_length {
            Some(max) => batch_url(base, keys).is_ok_and(|url| url.as_str().len() <= max),
            None => true,
        }
    }

    fn fetch(
        &self,
        keys: Vec<RequestParams>,
        _resolver: UnitResolver<BatchItemResult>,
    ) -> BatchFetch<BatchItemResult, ClientError> {
        let requester = Arc::clone(&self.requester);
        BatchFetch::new(async move { execute_batch(&requester, &keys).await })
    }
}
