//! Error taxonomy shared by every layer of the pipeline.
//!
//! Each kind carries a human readable message plus a free-form context map so
//! failures can be logged as structured JSON. Application code works with
//! `anyhow::Result` and raises these values, which callers can recover with
//! `downcast_ref::<PipelineError>()`.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Free-form key/value context attached to an error.
pub type ErrorContext = BTreeMap<String, Value>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {message}")]
    Validation { message: String, context: ErrorContext },

    #[error("data error: {message}")]
    Data { message: String, context: ErrorContext },

    #[error("configuration error: {message}")]
    Configuration { message: String, context: ErrorContext },

    #[error("processing error: {message}")]
    Processing { message: String, context: ErrorContext },

    #[error("template error: {message}")]
    Template { message: String, context: ErrorContext },

    #[error("type validation error: {message}")]
    TypeValidation { message: String, context: ErrorContext },

    #[error("file {operation} failed for {}: {source}", .path.display())]
    FileOperation {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} request failed with status {status}: {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), context: ErrorContext::new() }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data { message: message.into(), context: ErrorContext::new() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into(), context: ErrorContext::new() }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing { message: message.into(), context: ErrorContext::new() }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template { message: message.into(), context: ErrorContext::new() }
    }

    /// Build a type validation error recording the expected and actual shapes.
    pub fn type_validation(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let mut context = ErrorContext::new();
        context.insert("expected_type".to_string(), Value::String(expected.into()));
        context.insert("actual_type".to_string(), Value::String(actual.into()));
        Self::TypeValidation { message: message.into(), context }
    }

    /// Wrap an I/O failure with the operation and path that produced it.
    pub fn file(operation: impl Into<String>, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileOperation {
            operation: operation.into(),
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn api(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            service: service.into(),
            status,
            message: message.into(),
        }
    }

    /// Attach a context entry. No-op for the variants with fixed fields.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Some(context) = self.context_mut() {
            context.insert(key.into(), value.into());
        }
        self
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Self::Validation { context, .. }
            | Self::Data { context, .. }
            | Self::Configuration { context, .. }
            | Self::Processing { context, .. }
            | Self::Template { context, .. }
            | Self::TypeValidation { context, .. } => Some(context),
            Self::FileOperation { .. } | Self::Api { .. } => None,
        }
    }

    /// Context map, synthesised for the fixed-field variants.
    pub fn context(&self) -> ErrorContext {
        match self {
            Self::Validation { context, .. }
            | Self::Data { context, .. }
            | Self::Configuration { context, .. }
            | Self::Processing { context, .. }
            | Self::Template { context, .. }
            | Self::TypeValidation { context, .. } => context.clone(),
            Self::FileOperation { operation, path, .. } => {
                let mut context = ErrorContext::new();
                context.insert("operation".to_string(), json!(operation));
                context.insert("path".to_string(), json!(path.display().to_string()));
                context
            }
            Self::Api { service, status, .. } => {
                let mut context = ErrorContext::new();
                context.insert("service".to_string(), json!(service));
                context.insert("status".to_string(), json!(status));
                context
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Data { .. } => "DataError",
            Self::Configuration { .. } => "ConfigurationError",
            Self::Processing { .. } => "ProcessingError",
            Self::Template { .. } => "TemplateError",
            Self::TypeValidation { .. } => "TypeValidationError",
            Self::FileOperation { .. } => "FileOperationError",
            Self::Api { .. } => "ApiError",
        }
    }

    /// Rate limiting and server-side failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Api { status, .. } if *status == 429 || *status >= 500)
    }

    /// Structured form used for JSON logging and CLI error output.
    pub fn to_json(&self) -> Value {
        json!({
            "error_type": self.kind(),
            "message": self.to_string(),
            "context": self.context(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_carried_into_json() {
        let err = PipelineError::validation("ticker must not be empty")
            .with_context("field", "ticker")
            .with_context("attempt", 2);

        let json = err.to_json();
        assert_eq!(json["error_type"], "ValidationError");
        assert_eq!(json["context"]["field"], "ticker");
        assert_eq!(json["context"]["attempt"], 2);
        assert!(json["message"].as_str().unwrap().contains("ticker must not be empty"));
    }

    #[test]
    fn test_file_error_reports_operation_and_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = PipelineError::file("read", "/tmp/cache/x.json", io);

        assert_eq!(err.kind(), "FileOperationError");
        let context = err.context();
        assert_eq!(context["operation"], "read");
        assert_eq!(context["path"], "/tmp/cache/x.json");
        assert!(err.to_string().contains("file read failed"));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(PipelineError::api("fred", 429, "slow down").is_retryable());
        assert!(PipelineError::api("fred", 503, "unavailable").is_retryable());
        assert!(!PipelineError::api("fred", 404, "not found").is_retryable());
        assert!(!PipelineError::data("bad payload").is_retryable());
    }

    #[test]
    fn test_type_validation_records_shapes() {
        let err = PipelineError::type_validation("bad discovery file", "object", "array");
        assert_eq!(err.context()["expected_type"], "object");
        assert_eq!(err.context()["actual_type"], "array");
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = PipelineError::configuration("FRED_API_KEY not set").into();
        let inner = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(inner.kind(), "ConfigurationError");
    }
}
