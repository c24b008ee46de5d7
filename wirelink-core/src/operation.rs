use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::OperationContext;
use crate::ids::OperationId;
use crate::transformer::Transformer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        content_type: Option<String>,
        bytes: Bytes,
    },
}

/// Ordered multipart fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    fields: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), FormValue::Text(value.into())));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        self.fields.push((
            name.into(),
            FormValue::File {
                file_name: file_name.into(),
                content_type,
                bytes: bytes.into(),
            },
        ));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(FormData),
}

impl RequestBody {
    /// Tag used by the batch wire format.
    pub fn body_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => "json",
            RequestBody::Form(_) => "formdata",
        }
    }
}

/// Per-request overrides applied on top of link configuration.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub headers: HeaderMap,
    pub signal: Option<CancellationToken>,
}

/// True for methods whose requests carry a body and may mutate state.
pub fn method_has_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// A resolved request: path, verb and everything needed to put it on the wire.
#[derive(Clone)]
pub struct RequestParams {
    pub path: String,
    pub method: Method,
    pub body: Option<RequestBody>,
    pub query: BTreeMap<String, String>,
    pub fetch: FetchOptions,
    pub transformer: Option<Arc<dyn Transformer>>,
    /// Base URL override; requests with different domains never share a batch.
    pub domain: Option<String>,
    /// Ask for response headers and a raw response in the envelope.
    pub raw: bool,
}

impl RequestParams {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestParams {
            path: path.into(),
            method,
            body: None,
            query: BTreeMap::new(),
            fetch: FetchOptions::default(),
            transformer: None,
            domain: None,
            raw: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, form: FormData) -> Self {
        self.body = Some(RequestBody::Form(form));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.fetch.headers.insert(name, value);
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.fetch.signal = Some(signal);
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn has_body(&self) -> bool {
        method_has_body(&self.method)
    }
}

impl fmt::Debug for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestParams")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("query", &self.query)
            .field("fetch", &self.fetch)
            .field("transformer", &self.transformer)
            .field("domain", &self.domain)
            .field("raw", &self.raw)
            .finish()
    }
}

/// One logical request flowing through the link chain.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub params: RequestParams,
    pub context: OperationContext,
}

impl Operation {
    pub fn new(id: OperationId, kind: OperationKind, params: RequestParams) -> Self {
        Operation {
            id,
            kind,
            params,
            context: OperationContext::new(),
        }
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    pub fn signal(&self) -> Option<&CancellationToken> {
        self.params.fetch.signal.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_some_and(|s| s.is_cancelled())
    }
}
