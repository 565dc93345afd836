use thiserror::Error;

#[derive(Error, Debug)]
pub enum SsfError {
    #[error("invalid model configuration: {0}")]
    Configuration(String),

    #[error("parameter length mismatch: expected {expected}, got {got}")]
    ParamLengthMismatch { expected: usize, got: usize },

    #[error("degenerate model: {0}")]
    DegenerateModel(String),

    #[error("linear algebra failure: {0}")]
    Linalg(String),

    #[error("data error: {0}")]
    Data(String),
}

impl SsfError {
    /// True for errors raised before any recursion ran (programming or
    /// model-building mistakes), as opposed to numerical failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SsfError::Configuration(_) | SsfError::ParamLengthMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SsfError>;
