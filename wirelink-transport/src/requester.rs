//! Universal single-request executor.
//!
//! Turns a [`RequestParams`] into one physical HTTP request and the
//! response into an [`Envelope`]. A non-2xx status is data, not failure:
//! it resolves an envelope carrying a [`FetchError`].

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Request, Response, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use wirelink_core::{
    ClientError, Envelope, FetchError, FormData, FormValue, IdentityTransformer, RawResponse,
    RequestBody, RequestParams, Transformer,
};

use crate::fetcher::{network_error, FetchPipeline};
use crate::stream::JsonLinesStream;

/// Joins `base` and `path` and appends `query` in key order.
pub fn resolve_url(
    base: &str,
    path: &str,
    query: &BTreeMap<String, String>,
) -> Result<Url, ClientError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined)
        .map_err(|e| ClientError::config(format!("invalid URL '{}': {}", joined, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter());
    }
    Ok(url)
}

/// Appends `data` to `form`, prefixing every field name with `prefix`.
pub fn append_form(mut form: Form, prefix: &str, data: &FormData) -> Result<Form, ClientError> {
    for (name, value) in data.iter() {
        let part = match value {
            FormValue::Text(text) => Part::text(text.clone()),
            FormValue::File {
                file_name,
                content_type,
                bytes,
            } => {
                let part = Part::bytes(bytes.to_vec()).file_name(file_name.clone());
                match content_type {
                    Some(mime) => part.mime_str(mime).map_err(network_error)?,
                    None => part,
                }
            }
        };
        form = form.part(format!("{}{}", prefix, name), part);
    }
    Ok(form)
}

/// Parses a response body. Empty bodies are `null`; non-JSON error bodies become strings.
pub(crate) fn parse_body(bytes: &[u8], success: bool) -> Result<Value, ClientError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(value),
        Err(_) if !success => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn status_text(response: &Response) -> String {
    response
        .status()
        .canonical_reason()
        .unwrap_or_default()
        .to_string()
}

/// Resolves `work`, or `ClientError::Aborted` as soon as `signal` fires.
pub async fn with_signal<T>(
    signal: Option<&CancellationToken>,
    work: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    match signal {
        Some(signal) => tokio::select! {
            biased;
            _ = signal.cancelled() => Err(ClientError::Aborted),
            result = work => result,
        },
        None => work.await,
    }
}

/// Outcome of opening a streamed request.
pub enum StreamResponse {
    Lines {
        status: u16,
        status_text: String,
        lines: JsonLinesStream,
    },
    /// The server refused the stream with a non-2xx status.
    Refused(Envelope),
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamResponse::Lines { status, .. } => {
                f.debug_struct("Lines").field("status", status).finish_non_exhaustive()
            }
            StreamResponse::Refused(envelope) => f.debug_tuple("Refused").field(envelope).finish(),
        }
    }
}

#[derive(Clone)]
pub struct Requester {
    pipeline: FetchPipeline,
    base_url: String,
    headers: HeaderMap,
    transformer: Arc<dyn Transformer>,
}

impl Requester {
    pub fn new(base_url: impl Into<String>) -> Self {
        Requester {
            pipeline: FetchPipeline::default(),
            base_url: base_url.into(),
            headers: HeaderMap::new(),
            transformer: Arc::new(IdentityTransformer),
        }
    }

    pub fn with_pipeline(mut self, pipeline: FetchPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.pipeline
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request's domain override, else the configured base URL.
    pub fn base_for<'a>(&'a self, params: &'a RequestParams) -> &'a str {
        params.domain.as_deref().unwrap_or(&self.base_url)
    }

    pub fn transformer_for(&self, params: &RequestParams) -> Arc<dyn Transformer> {
        params
            .transformer
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.transformer))
    }

    /// Configured headers overlaid by the request's own. A request header replaces
    /// every value of that name.
    pub fn merged_headers(&self, params: &RequestParams) -> HeaderMap {
        let mut merged = self.headers.clone();
        for name in params.fetch.headers.keys() {
            merged.remove(name);
        }
        for (name, value) in params.fetch.headers.iter() {
            merged.append(name.clone(), value.clone());
        }
        merged
    }

    pub fn build(&self, params: &RequestParams) -> Result<Request, ClientError> {
        let url = resolve_url(self.base_for(params), &params.path, &params.query)?;
        let mut headers = self.merged_headers(params);
        if params.has_body() && params.body.is_some() {
            headers.remove(CONTENT_TYPE);
        }
        let mut builder = self.pipeline.request(params.method.clone(), url).headers(headers);

        if params.has_body() {
            match &params.body {
                Some(RequestBody::Json(value)) => {
                    let value = self.transformer_for(params).serialize(value.clone())?;
                    builder = builder
                        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                        .body(serde_json::to_vec(&value)?);
                }
                Some(RequestBody::Form(data)) => {
                    builder = builder.multipart(append_form(Form::new(), "", data)?);
                }
                None => {}
            }
        }

        builder.build().map_err(network_error)
    }

    pub(crate) async fn send(&self, request: Request) -> Result<Response, ClientError> {
        self.pipeline.execute(request).await
    }

    /// Executes one request. Honors the request's cancellation signal.
    pub async fn request(&self, params: &RequestParams) -> Result<Envelope, ClientError> {
        let request = self.build(params)?;
        debug!(method = %params.method, path = %params.path, "executing request");

        with_signal(params.fetch.signal.as_ref(), async {
            let response = self.send(request).await?;
            self.read_envelope(response, params).await
        })
        .await
    }

    async fn read_envelope(
        &self,
        response: Response,
        params: &RequestParams,
    ) -> Result<Envelope, ClientError> {
        let status = response.status();
        let status_text = status_text(&response);
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(network_error)?;
        trace!(status = status.as_u16(), len = bytes.len(), "response received");

        let body = parse_body(&bytes, status.is_success())?;
        let envelope = if status.is_success() {
            let data = self.transformer_for(params).deserialize(body.clone())?;
            Envelope::success(status.as_u16(), status_text.clone(), data)
        } else {
            let message = if status_text.is_empty() {
                status.as_str().to_string()
            } else {
                status_text.clone()
            };
            Envelope::failure(FetchError::with_value(status.as_u16(), message, body.clone()))
        };

        Ok(if params.raw {
            envelope.with_raw(RawResponse {
                status: status.as_u16(),
                status_text,
                headers,
                body,
            })
        } else {
            envelope
        })
    }

    /// Opens a newline-delimited JSON response.
    pub async fn stream(&self, params: &RequestParams) -> Result<StreamResponse, ClientError> {
        let request = self.build(params)?;
        debug!(method = %params.method, path = %params.path, "opening stream");

        with_signal(params.fetch.signal.as_ref(), async {
            let response = self.send(request).await?;
            if response.status().is_success() {
                Ok(StreamResponse::Lines {
                    status: response.status().as_u16(),
                    status_text: status_text(&response),
                    lines: JsonLinesStream::from_response(response),
                })
            } else {
                Ok(StreamResponse::Refused(self.read_envelope(response, params).await?))
            }
        })
        .await
    }
}

impl fmt::Debug for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requester")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("transformer", &self.transformer)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mockito::Matcher;
    use reqwest::header::HeaderName;
    use serde_json::json;
    use wirelink_core::WrappingTransformer;

    #[test]
    fn test_resolve_url() {
        let query = BTreeMap::from([
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "x y".to_string()),
        ]);
        let url = resolve_url("http://api.test/v1/", "/users", &query).unwrap();
        assert_eq!(url.as_str(), "http://api.test/v1/users?a=x+y&b=2");

        assert!(matches!(
            resolve_url("not a url", "/x", &BTreeMap::new()),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(b"", true).unwrap(), Value::Null);
        assert_eq!(parse_body(b"{\"a\":1}", true).unwrap(), json!({"a": 1}));
        assert_eq!(parse_body(b"oops", false).unwrap(), json!("oops"));
        assert!(parse_body(b"oops", true).is_err());
    }

    #[test]
    fn test_request_headers_override_configured_ones() {
        let mut headers = HeaderMap::new();
        headers.insert("x-app", HeaderValue::from_static("demo"));
        headers.insert("x-env", HeaderValue::from_static("prod"));
        let requester = Requester::new("http://api.test").with_headers(headers);

        let params = RequestParams::get("/").header(
            HeaderName::from_static("x-env"),
            HeaderValue::from_static("staging"),
        );
        let merged = requester.merged_headers(&params);
        assert_eq!(merged.get("x-app").unwrap(), "demo");
        assert_eq!(merged.get_all("x-env").iter().count(), 1);
        assert_eq!(merged.get("x-env").unwrap(), "staging");
    }

    #[test]
    fn test_body_owns_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert("x-app", HeaderValue::from_static("demo"));
        let requester = Requester::new("http://api.test").with_headers(headers);

        let json = requester
            .build(&RequestParams::post("/users").json(json!({"name": "ada"})))
            .unwrap();
        let values: Vec<_> = json.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values, vec!["application/json"]);
        assert_eq!(json.headers().get("x-app").unwrap(), "demo");

        let form = requester
            .build(&RequestParams::put("/files").form(FormData::new().text("title", "t")))
            .unwrap();
        let values: Vec<_> = form.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values.len(), 1);
        assert!(values[0].to_str().unwrap().starts_with("multipart/form-data; boundary="));

        let get = requester.build(&RequestParams::get("/users")).unwrap();
        assert_eq!(get.headers().get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_get_with_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":1}]"#)
            .expect(1)
            .create_async()
            .await;

        let requester = Requester::new(server.url());
        let envelope = requester
            .request(&RequestParams::get("/users").query("page", "2"))
            .await
            .unwrap();

        assert_eq!(envelope.status, 200);
        assert_eq!(envelope.status_text, "OK");
        assert_eq!(envelope.data, Some(json!([{"id": 1}])));
        assert!(envelope.headers.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_json_through_transformer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/users")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({"json": {"name": "ada"}})))
            .with_status(201)
            .with_body(r#"{"json":{"id":7}}"#)
            .create_async()
            .await;

        let requester = Requester::new(server.url())
            .with_transformer(Arc::new(WrappingTransformer::new("json")));
        let envelope = requester
            .request(&RequestParams::post("/users").json(json!({"name": "ada"})))
            .await
            .unwrap();

        assert_eq!(envelope.status, 201);
        assert_eq!(envelope.data, Some(json!({"id": 7})));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_multipart_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/avatar")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"name="title""#.into()),
                Matcher::Regex(r#"filename="a.png""#.into()),
            ]))
            .with_status(204)
            .create_async()
            .await;

        let form = FormData::new()
            .text("title", "me")
            .file("image", "a.png", Some("image/png".into()), &b"\x89PNG"[..]);
        let envelope = Requester::new(server.url())
            .request(&RequestParams::put("/avatar").form(form))
            .await
            .unwrap();

        assert_eq!(envelope.status, 204);
        assert_eq!(envelope.data, Some(Value::Null));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_resolves_an_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body(r#"{"reason":"gone"}"#)
            .create_async()
            .await;

        let envelope = Requester::new(server.url())
            .request(&RequestParams::get("/missing"))
            .await
            .unwrap();

        let error = envelope.error.clone().unwrap();
        assert_eq!(error.status, 404);
        assert_eq!(error.message, "Not Found");
        assert_eq!(error.value, Some(json!({"reason": "gone"})));
        assert_eq!(envelope.into_data().unwrap_err().status_code(), Some(404));
    }

    #[tokio::test]
    async fn test_raw_mode_and_domain_override() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_header("x-cache", "miss")
            .with_body("true")
            .create_async()
            .await;

        let requester = Requester::new("http://unused.invalid");
        let envelope = requester
            .request(&RequestParams::get("/ping").domain(server.url()).raw(true))
            .await
            .unwrap();

        assert_eq!(envelope.headers.as_ref().unwrap().get("x-cache").unwrap(), "miss");
        let raw = envelope.response.unwrap();
        assert_eq!(raw.body, json!(true));
        assert_eq!(raw.status, 200);
    }

    #[tokio::test]
    async fn test_cancelled_signal_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let err = Requester::new("http://127.0.0.1:9")
            .request(&RequestParams::get("/slow").signal(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Aborted));
    }

    #[tokio::test]
    async fn test_stream_lines() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/events")
            .with_status(200)
            .with_header("content-type", "application/x-ndjson")
            .with_body("{\"n\":1}\n{\"n\":2}\n")
            .create_async()
            .await;

        let response = Requester::new(server.url())
            .stream(&RequestParams::get("/events"))
            .await
            .unwrap();
        let StreamResponse::Lines { status, lines, .. } = response else {
            panic!("expected a stream");
        };
        assert_eq!(status, 200);
        let values: Vec<Value> = lines.map(|v| v.unwrap()).collect().await;
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2})]);
    }
}
