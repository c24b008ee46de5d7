//! Pass-through link that logs every operation going up the chain and
//! every result or error coming back down.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use wirelink_core::{
    tap, ClientError, Link, NextLink, Operation, OperationLink, OperationObservable,
    OperationResult, ResultMessage, Runtime, Tap,
};

type Filter = Arc<dyn Fn(&Operation) -> bool + Send + Sync>;

pub fn logger_link() -> LoggerLink {
    LoggerLink::default()
}

#[derive(Clone, Default)]
pub struct LoggerLink {
    enabled: Option<Filter>,
}

impl LoggerLink {
    /// Only log operations matching `filter`.
    pub fn enabled(mut self, filter: impl Fn(&Operation) -> bool + Send + Sync + 'static) -> Self {
        self.enabled = Some(Arc::new(filter));
        self
    }
}

impl fmt::Debug for LoggerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggerLink")
            .field("filtered", &self.enabled.is_some())
            .finish()
    }
}

impl Link for LoggerLink {
    fn bind(&self, runtime: &Runtime) -> Result<Arc<dyn OperationLink>, ClientError> {
        Ok(Arc::new(BoundLoggerLink {
            client: Arc::from(runtime.client_name.as_str()),
            enabled: self.enabled.clone(),
        }))
    }
}

struct BoundLoggerLink {
    client: Arc<str>,
    enabled: Option<Filter>,
}

fn describe(result: &OperationResult) -> String {
    match &result.result {
        ResultMessage::Started => "started".to_string(),
        ResultMessage::Stopped => "stopped".to_string(),
        ResultMessage::Data(envelope) => envelope.status.to_string(),
    }
}

impl OperationLink for BoundLoggerLink {
    fn call(&self, op: Operation, next: NextLink) -> OperationObservable {
        if self.enabled.as_ref().is_some_and(|enabled| !enabled(&op)) {
            return next.call(op);
        }

        let started = Instant::now();
        let (id, kind) = (op.id, op.kind);
        let path: Arc<str> = Arc::from(op.params.path.as_str());
        debug!(
            client = %self.client,
            operation_id = %id,
            kind = %kind,
            method = %op.params.method,
            path = %path,
            direction = "up",
            "operation started"
        );

        let (client, down_path) = (Arc::clone(&self.client), Arc::clone(&path));
        let error_client = Arc::clone(&self.client);
        next.call(op).pipe(tap(
            Tap::new()
                .on_next(move |result: &OperationResult| {
                    debug!(
                        client = %client,
                        operation_id = %id,
                        kind = %kind,
                        path = %down_path,
                        direction = "down",
                        result = %describe(result),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "operation result"
                    );
                })
                .on_error(move |err: &ClientError| {
                    warn!(
                        client = %error_client,
                        operation_id = %id,
                        kind = %kind,
                        path = %path,
                        direction = "down",
                        error = %err,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "operation failed"
                    );
                }),
        ))
    }
}
