use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("embedding backend unavailable: {0}")]
    EmbeddingBackendUnavailable(String),

    #[error("no documents have been indexed yet; upload a PDF first")]
    EmptyIndex,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("answer generation failed: {message}")]
    Generation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("document extraction failed: {0}")]
    Extraction(#[from] IngestError),

    #[error("history store error: {0}")]
    History(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            source: None,
        }
    }

    pub fn generation_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Generation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Caller misuse that should be shown to the user as a prompt rather than a failure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::EmptyIndex | Self::InvalidQuery(_))
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
