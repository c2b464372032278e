//! KNIME Server credentials.

use crate::config::BridgeConfig;

/// Resolved server credentials.
#[derive(Clone, Default)]
pub enum AuthCredentials {
    /// Basic auth (username, password).
    Basic(String, Option<String>),
    /// No authentication.
    #[default]
    None,
}

impl AuthCredentials {
    /// Resolve credentials from configuration. A user without a password still
    /// authenticates with basic auth.
    pub fn from_config(config: &BridgeConfig) -> Self {
        match (&config.username, &config.password) {
            (Some(user), password) => AuthCredentials::Basic(user.clone(), password.clone()),
            (None, _) => AuthCredentials::None,
        }
    }

    /// Apply credentials to a reqwest request builder.
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthCredentials::Basic(username, password) => request.basic_auth(username, password.as_deref()),
            AuthCredentials::None => request,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AuthCredentials::None)
    }
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthCredentials::Basic(user, _) => f.debug_tuple("Basic").field(user).field(&"***").finish(),
            AuthCredentials::None => f.write_str("None"),
        }
    }
}
