use fly_physics::PhysicsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NmfError {
    /// Construction-time configuration that cannot be resolved against the
    /// body model.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("render mode '{0}' is not supported")]
    RenderMode(String),

    #[error("action has {got} joint targets, expected {expected}")]
    Action { expected: usize, got: usize },

    #[error(transparent)]
    Physics(#[from] PhysicsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl NmfError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, NmfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physics_errors_convert() {
        let err: NmfError = PhysicsError::unknown("joint", "joint_LFCoxa").into();
        assert_eq!(err.to_string(), "unknown joint 'joint_LFCoxa'");
    }

    #[test]
    fn test_action_error_display() {
        let err = NmfError::Action { expected: 42, got: 3 };
        assert_eq!(err.to_string(), "action has 3 joint targets, expected 42");
    }
}
