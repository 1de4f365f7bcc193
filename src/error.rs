use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// Service error codes that are worth another attempt.
pub const RETRYABLE_ERROR_CODES: [&str; 2] = ["ThrottlingException", "InternalFailureException"];

/// Errors raised while moving data between the pipeline's managed services
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{service} call failed ({}): {message}", code.as_deref().unwrap_or("no code"))]
    Service {
        service: &'static str,
        code: Option<String>,
        message: String,
    },
    #[error("S3 operation failed: {0}")]
    Storage(String),
    #[error("Data decoding failed: {0}")]
    Decode(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Missing data: {0}")]
    Missing(String),
    #[error("Failed to build request: {0}")]
    Build(String),
    #[error("Query {query_id} did not succeed: {reason}")]
    Query { query_id: String, reason: String },
}

impl PipelineError {
    /// Throttling and internal failures are transient on the SiteWise side.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Service { code: Some(code), .. } => {
                RETRYABLE_ERROR_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }

    pub(crate) fn from_sdk<E, R>(service: &'static str, err: SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        PipelineError::Service {
            service,
            code: err.code().map(str::to_string),
            message: DisplayErrorContext(&err).to_string(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Decode(format!("JSON: {}", err))
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Decode(format!("CSV: {}", err))
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    fn service_error(code: Option<&str>) -> PipelineError {
        PipelineError::Service {
            service: "iotsitewise",
            code: code.map(str::to_string),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_throttling_and_internal_failure_are_retryable() {
        assert!(service_error(Some("ThrottlingException")).is_retryable());
        assert!(service_error(Some("InternalFailureException")).is_retryable());
    }

    #[test]
    fn test_other_errors_are_not_retryable() {
        assert!(!service_error(Some("ResourceNotFoundException")).is_retryable());
        assert!(!service_error(None).is_retryable());
        assert!(!PipelineError::Storage("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = service_error(Some("ThrottlingException"));
        assert_eq!(
            err.to_string(),
            "iotsitewise call failed (ThrottlingException): boom"
        );
        assert!(PipelineError::Missing("asset".to_string())
            .to_string()
            .contains("Missing data"));
        assert!(service_error(None).to_string().contains("no code"));
    }
}
