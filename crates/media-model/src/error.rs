//! Validation errors for model values.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid time range: {message}")]
    InvalidTimeRange { message: String },

    #[error("Invalid crop rectangle: {message}")]
    InvalidCrop { message: String },

    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },
}

impl ModelError {
    pub fn time_range(msg: impl Into<String>) -> Self {
        Self::InvalidTimeRange {
            message: msg.into(),
        }
    }

    pub fn crop(msg: impl Into<String>) -> Self {
        Self::InvalidCrop {
            message: msg.into(),
        }
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: msg.into(),
        }
    }
}
