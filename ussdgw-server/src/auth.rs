//! Bind credential validation.
//!
//! The gateway accepts a single configured system_id/password pair. The
//! check sits behind a trait so deployments can plug in their own store
//! without touching the dispatch path.

use crate::config::AuthConfig;

/// Decides whether a system_id/password pair presented in a bind request
/// is accepted. Shared read-only across all connections.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, system_id: &str, password: &str) -> bool;
}

/// Validates binds against one configured credential pair.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    system_id: String,
    password: String,
}

impl StaticCredentials {
    pub fn new(system_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            password: password.into(),
        }
    }
}

impl From<&AuthConfig> for StaticCredentials {
    fn from(config: &AuthConfig) -> Self {
        Self::new(&config.system_id, &config.password)
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate(&self, system_id: &str, password: &str) -> bool {
        system_id == self.system_id && password == self.password
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_correct_pair() {
        let credentials = StaticCredentials::new("test", "test123");
        assert!(credentials.validate("test", "test123"));
    }

    #[test]
    fn test_validate_wrong_password() {
        let credentials = StaticCredentials::new("test", "test123");
        assert!(!credentials.validate("test", "wrong"));
    }

    #[test]
    fn test_validate_wrong_system_id() {
        let credentials = StaticCredentials::new("test", "test123");
        assert!(!credentials.validate("other", "test123"));
    }

    #[test]
    fn test_case_sensitivity() {
        let credentials = StaticCredentials::new("Test", "Secret");
        assert!(credentials.validate("Test", "Secret"));
        assert!(!credentials.validate("test", "Secret"));
        assert!(!credentials.validate("Test", "secret"));
    }

    #[test]
    fn test_from_auth_config() {
        let credentials = StaticCredentials::from(&AuthConfig::default());
        assert!(credentials.validate("test", "test123"));
        assert!(!credentials.validate("", ""));
    }
}
