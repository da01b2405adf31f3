//! Error types for scene loading and engine operations.

use thiserror::Error;

/// Errors raised while loading a body description or driving the engine.
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// XML parsing error.
    #[error("XML parse error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document has no `<mujoco>` root or no `<worldbody>`.
    #[error("missing required element: {element} in {context}")]
    MissingElement {
        element: &'static str,
        context: String,
    },

    /// Missing required attribute.
    #[error("missing required attribute: {attribute} on {element}")]
    MissingAttribute {
        attribute: &'static str,
        element: String,
    },

    /// Attribute present but unparsable or of the wrong arity.
    #[error("invalid value for {attribute} on {element}: {message}")]
    InvalidAttribute {
        attribute: &'static str,
        element: String,
        message: String,
    },

    #[error("unsupported joint type: {0}")]
    UnsupportedJointType(String),

    #[error("unsupported geom type: {0}")]
    UnsupportedGeomType(String),

    #[error("unsupported sensor type: {0}")]
    UnsupportedSensorType(String),

    /// A name that should resolve to an element of the given kind does not.
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    /// The engine could not produce an image.
    #[error("render failed: {0}")]
    Render(String),
}

impl PhysicsError {
    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::UnknownName {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid(
        attribute: &'static str,
        element: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            attribute,
            element: element.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PhysicsError>;
