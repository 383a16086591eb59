use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Web research error: {0}")]
    Web(#[from] WebError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Structured/vector store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Fact not found: {ticker}/{field}")]
    FactNotFound { ticker: String, field: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Language-model collaborator errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Model unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Generation cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Web search/fetch collaborator errors
#[derive(Debug, Error)]
pub enum WebError {
    #[error("Search failed: {message}")]
    Search { message: String },

    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Fetch timeout for {url} after {timeout_ms}ms")]
    FetchTimeout { url: String, timeout_ms: u64 },

    #[error("Empty extraction for {url}")]
    EmptyExtraction { url: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Pipeline-level fatal errors.
///
/// Partial evidence shortfalls never surface here - they degrade the
/// report's completeness instead. Only collaborator-level total failures
/// move the pipeline into `Failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("All store lookups failed: {message}")]
    StoreUnavailable { message: String },

    #[error("Report generation failed: {message}")]
    Generation { message: String },

    #[error("Research cancelled")]
    Cancelled,
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for web research operations
pub type WebResult<T> = Result<T, WebError>;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Database connection failed: failed to connect"
        );

        let err = StoreError::FactNotFound {
            ticker: "7203".to_string(),
            field: "per".to_string(),
        };
        assert_eq!(err.to_string(), "Fact not found: 7203/per");
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::Unavailable {
            message: "server down".to_string(),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "Model unavailable: server down (retries: 3)"
        );

        let err = LlmError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = LlmError::Cancelled;
        assert_eq!(err.to_string(), "Generation cancelled");
    }

    #[test]
    fn test_web_error_display() {
        let err = WebError::Fetch {
            url: "https://example.com/a".to_string(),
            reason: "status 403".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Fetch failed for https://example.com/a: status 403"
        );

        let err = WebError::EmptyExtraction {
            url: "https://example.com/b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Empty extraction for https://example.com/b"
        );
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::StoreUnavailable {
            message: "both stores down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "All store lookups failed: both stores down"
        );

        let err = PipelineError::Cancelled;
        assert_eq!(err.to_string(), "Research cancelled");
    }

    #[test]
    fn test_store_error_conversion_to_app_error() {
        let store_err = StoreError::Query {
            message: "syntax error".to_string(),
        };
        let app_err: AppError = store_err.into();
        assert!(matches!(app_err, AppError::Store(_)));
    }

    #[test]
    fn test_llm_error_conversion_to_app_error() {
        let llm_err = LlmError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = llm_err.into();
        assert!(matches!(app_err, AppError::Llm(_)));
    }

    #[test]
    fn test_pipeline_error_conversion_to_app_error() {
        let err = PipelineError::Generation {
            message: "stream broke".to_string(),
        };
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Pipeline(_)));
    }
}
