use thiserror::Error;

/// Top-level error taxonomy for netwarden.
///
/// Crate-specific errors convert into this type at the operator boundary so
/// an outer surface can map them onto status codes.
#[derive(Error, Debug)]
pub enum NetwardenError {
    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    #[error("Device not found: {hardware_id}")]
    NotFound { hardware_id: String },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("User {username} is not allowed to {action}")]
    Unauthorized { username: String, action: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NetwardenError {
    /// HTTP-equivalent status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::Unauthorized { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::InvalidInput(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(NetwardenError::Unauthenticated.http_status(), 401);
        assert_eq!(
            NetwardenError::Unauthorized {
                username: "viewer".to_string(),
                action: "rename devices".to_string(),
            }
            .http_status(),
            403
        );
        assert_eq!(
            NetwardenError::NotFound {
                hardware_id: "zz:zz".to_string()
            }
            .http_status(),
            404
        );
        assert_eq!(NetwardenError::ProbeFailure("down".into()).http_status(), 500);
    }
}
