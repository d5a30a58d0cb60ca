use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("distribution error: {0}")]
    Distribution(String),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimError {
    pub(crate) fn distribution(what: &str, err: impl std::fmt::Display) -> Self {
        SimError::Distribution(format!("{what}: {err}"))
    }
}

#[cfg(feature = "python")]
impl From<SimError> for pyo3::PyErr {
    fn from(err: SimError) -> Self {
        pyo3::exceptions::PyValueError::new_err(err.to_string())
    }
}
