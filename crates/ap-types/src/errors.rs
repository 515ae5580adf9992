use thiserror::Error;

/// Main error type for the Aperture system
#[derive(Error, Debug)]
pub enum ApError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Surrogate error: {0}")]
    Surrogate(#[from] SurrogateError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Scene setup problems found before a run starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Planar and view samplers are empty")]
    NoSamplers,

    #[error("Opening domains are empty")]
    NoDomains,

    #[error("Domain {domain} has no cut target assigned")]
    MissingCutTarget { domain: String },
}

/// Surrogate optimizer failures; the run degrades instead of aborting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurrogateError {
    #[error("Model fit requested on an empty dataset")]
    EmptyDataset,

    #[error("Surrogate optimizer used before initialization")]
    NotInitialized,

    #[error("Model fit failed: {message}")]
    ModelFitFailed { message: String },

    #[error("Acquisition optimization failed: {message}")]
    AcquisitionFailed { message: String },

    #[error("Sample dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Training sample {index} out of range ({available} generated)")]
    TrainSampleOutOfRange { index: usize, available: usize },
}

/// Host requests that cannot be honored as asked
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Requested solution {requested} but only {available} are cached")]
    TopKOutOfRange { requested: usize, available: usize },

    #[error("Optimization is not running")]
    NotRunning,
}

/// Result type alias for Aperture operations
pub type ApResult<T> = Result<T, ApError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::ApError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::ApError::Config(format!($($arg)*))
    };
}
