use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::OperationContext;
use crate::error::{ClientError, FetchError};

/// Response reconstituted for callers that asked for raw access.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    /// Payload as it came off the wire, before the transformer ran.
    pub body: Value,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Normalized result of one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub status: u16,
    pub status_text: String,
    /// Present only in raw mode.
    pub headers: Option<HeaderMap>,
    /// Present only in raw mode.
    pub response: Option<Box<RawResponse>>,
}

impl Envelope {
    pub fn success(status: u16, status_text: impl Into<String>, data: Value) -> Self {
        Envelope {
            data: Some(data),
            error: None,
            status,
            status_text: status_text.into(),
            headers: None,
            response: None,
        }
    }

    pub fn failure(error: FetchError) -> Self {
        Envelope {
            data: None,
            status: error.status,
            status_text: error.message.clone(),
            error: Some(error),
            headers: None,
            response: None,
        }
    }

    pub fn with_raw(mut self, raw: RawResponse) -> Self {
        self.headers = Some(raw.headers.clone());
        self.response = Some(Box::new(raw));
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Turns a data-level error into `ClientError::Http`; missing data becomes `null`.
    pub fn into_data(self) -> Result<Value, ClientError> {
        match self.error {
            Some(err) => Err(ClientError::Http(err)),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        if let Some(err) = &self.error {
            return Err(ClientError::Http(err.clone()));
        }
        let data = self.data.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// One message flowing downstream through the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultMessage {
    /// A streaming operation has been accepted.
    Started,
    Data(Envelope),
    /// A streaming operation ended normally.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct OperationResult {
    pub result: ResultMessage,
    pub context: Option<OperationContext>,
}

impl OperationResult {
    pub fn data(envelope: Envelope) -> Self {
        OperationResult {
            result: ResultMessage::Data(envelope),
            context: None,
        }
    }

    pub fn started() -> Self {
        OperationResult {
            result: ResultMessage::Started,
            context: None,
        }
    }

    pub fn stopped() -> Self {
        OperationResult {
            result: ResultMessage::Stopped,
            context: None,
        }
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match &self.result {
            ResultMessage::Data(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn into_envelope(self) -> Option<Envelope> {
        match self.result {
            ResultMessage::Data(envelope) => Some(envelope),
            _ => None,
        }
    }
}
