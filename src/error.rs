//! Error types for skeleton construction and configuration loading.

/// Errors that abort initialization of a skeleton or solver.
#[derive(Debug, thiserror::Error)]
pub enum IkError {
    /// The hierarchy contains no bone without a parent.
    #[error("no root bone supplied")]
    MissingRoot,

    /// More than one bone has no parent.
    #[error("multiple root bones: {first} and {second}")]
    MultipleRoots { first: String, second: String },

    /// Two bones share the same name.
    #[error("duplicate bone name: {0}")]
    DuplicateBone(String),

    /// A bone names a parent that is not in the hierarchy.
    #[error("bone {bone} references unknown parent {parent}")]
    UnknownParent { bone: String, parent: String },

    /// Some bones cannot be reached from the root (parent cycle).
    #[error("{0} bone(s) are not reachable from the root")]
    Disconnected(usize),

    /// Invalid solver configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to read or parse a URDF description.
    #[error("URDF error: {0}")]
    Urdf(#[from] urdf_rs::UrdfError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_owned(),
            message: message.into(),
        }
    }
}
