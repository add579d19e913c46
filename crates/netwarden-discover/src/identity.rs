//! Identity collaborator: resolve a bearer credential to a principal.

use std::collections::HashMap;

use netwarden_core::{NetwardenError, Principal};

use crate::config::IdentityConfig;

pub trait IdentityProvider: Send + Sync {
    /// Fails with `Unauthenticated` when the credential is missing or unknown.
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal, NetwardenError>;
}

/// Fixed token table loaded from the `[identity]` section.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, Principal>,
}

impl StaticIdentity {
    pub fn from_config(config: &IdentityConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .filter(|grant| !grant.token.is_empty())
            .map(|grant| {
                (
                    grant.token.clone(),
                    Principal {
                        username: grant.username.clone(),
                        role: grant.role,
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityProvider for StaticIdentity {
    fn authenticate(&self, credential: Option<&str>) -> Result<Principal, NetwardenError> {
        let token = credential
            .map(|c| c.trim().trim_start_matches("Bearer ").trim())
            .filter(|c| !c.is_empty())
            .ok_or(NetwardenError::Unauthenticated)?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or(NetwardenError::Unauthenticated)
    }
}
