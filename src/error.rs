use std::fmt;
use std::path::PathBuf;

/// Errors surfaced by backends, the session layer and the registry.
#[derive(Debug)]
pub enum LlmError {
    /// The library could not load the model file.
    ModelLoad(String),
    /// The model loaded but the library refused to create a context for it.
    ContextCreate(String),
    Tokenize(String),
    /// Forward pass failed; carries the library status code.
    Eval { status: i32 },
    UnsupportedModelType(String),
    ModelNotFound(PathBuf),
    MissingModelType(PathBuf),
    Config(String),
    Tokenizer(String),
    Io(std::io::Error),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ModelLoad(s) => write!(f, "Failed to load model: {}", s),
            LlmError::ContextCreate(s) => write!(f, "Failed to create context: {}", s),
            LlmError::Tokenize(s) => write!(f, "Tokenization failed: {}", s),
            LlmError::Eval { status } => write!(f, "Evaluation failed with status {}", status),
            LlmError::UnsupportedModelType(t) => write!(f, "Model type '{}' is not supported", t),
            LlmError::ModelNotFound(p) => write!(f, "No model file found at {:?}", p),
            LlmError::MissingModelType(p) => write!(
                f,
                "Could not determine model type for {:?}; pass it explicitly",
                p
            ),
            LlmError::Config(s) => write!(f, "Config error: {}", s),
            LlmError::Tokenizer(s) => write!(f, "Tokenizer error: {}", s),
            LlmError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for LlmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LlmError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LlmError {
    fn from(err: std::io::Error) -> Self {
        LlmError::Io(err)
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
