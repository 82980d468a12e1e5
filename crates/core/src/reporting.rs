//! Centralized error reporting.
//!
//! Handlers write a sanitized message into the affected record and hand the
//! full error to an [`ErrorReporter`], which wraps it in a structured log
//! entry and forwards it to an [`ErrorSink`].

use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

/// Log name every reported error is written under
pub const ERROR_LOG_NAME: &str = "errors";

/// Monitored resource type of the handlers
pub const RESOURCE_TYPE: &str = "cloud_function";

const CLOUD_LOGGING_ENDPOINT: &str = "https://logging.googleapis.com/v2/entries:write";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to reach logging endpoint: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Logging endpoint rejected entry ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContext {
    pub service: String,
    pub resource_type: String,
}

/// Payload of a reported error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Full error chain, outermost first
    pub message: String,
    pub service_context: ServiceContext,
    /// Caller-supplied context, e.g. `{ "user": "<uid>" }`
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
}

/// Structured log entry carrying an [`ErrorEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub log_name: String,
    pub resource: MonitoredResource,
    pub json_payload: ErrorEvent,
    pub severity: Severity,
}

impl LogEntry {
    pub fn function_name(&self) -> Option<&str> {
        self.resource
            .labels
            .get("function_name")
            .and_then(|v| v.as_str())
    }
}

/// Render an error and its sources as one message
pub fn error_chain(err: &(dyn StdError + Send + Sync + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Context identifying the affected user
pub fn user_context(user_id: &str) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("user".to_string(), Value::String(user_id.to_string()));
    context
}

/// Destination of reported errors
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn write(&self, entry: &LogEntry) -> Result<(), ReportError>;
}

/// Writes entries as structured `tracing` events
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl ErrorSink for TracingSink {
    async fn write(&self, entry: &LogEntry) -> Result<(), ReportError> {
        let context = Value::Object(entry.json_payload.context.clone());
        error!(
            log_name = %entry.log_name,
            function = entry.function_name().unwrap_or_default(),
            context = %context,
            "{}",
            entry.json_payload.message
        );
        Ok(())
    }
}

/// Writes entries to the Cloud Logging `entries:write` endpoint
pub struct CloudLoggingSink {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: String,
}

impl CloudLoggingSink {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: CLOUD_LOGGING_ENDPOINT.to_string(),
            project_id: project_id.into(),
            access_token: access_token.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, entry: &LogEntry) -> Value {
        serde_json::json!({
            "entries": [{
                "logName": format!("projects/{}/logs/{}", self.project_id, entry.log_name),
                "resource": entry.resource,
                "jsonPayload": entry.json_payload,
                "severity": entry.severity,
            }]
        })
    }
}

#[async_trait]
impl ErrorSink for CloudLoggingSink {
    async fn write(&self, entry: &LogEntry) -> Result<(), ReportError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&self.request_body(entry))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(project = %self.project_id, "Error entry written to Cloud Logging");
        Ok(())
    }
}

/// Collects entries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ErrorSink for MemorySink {
    async fn write(&self, entry: &LogEntry) -> Result<(), ReportError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Wraps errors into [`LogEntry`] values and forwards them to a sink
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn ErrorSink>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self { sink }
    }

    pub fn entry(
        &self,
        err: &(dyn StdError + Send + Sync + 'static),
        function_name: &str,
        context: Map<String, Value>,
    ) -> LogEntry {
        let mut labels = Map::new();
        labels.insert(
            "function_name".to_string(),
            Value::String(function_name.to_string()),
        );

        LogEntry {
            log_name: ERROR_LOG_NAME.to_string(),
            resource: MonitoredResource {
                kind: RESOURCE_TYPE.to_string(),
                labels,
            },
            json_payload: ErrorEvent {
                message: error_chain(err),
                service_context: ServiceContext {
                    service: function_name.to_string(),
                    resource_type: RESOURCE_TYPE.to_string(),
                },
                context,
            },
            severity: Severity::Error,
        }
    }

    /// Report an error raised by `function_name`
    pub async fn report(
        &self,
        err: &(dyn StdError + Send + Sync + 'static),
        function_name: &str,
        context: Map<String, Value>,
    ) -> Result<(), ReportError> {
        let entry = self.entry(err, function_name, context);
        self.sink.write(&entry).await
    }
}
