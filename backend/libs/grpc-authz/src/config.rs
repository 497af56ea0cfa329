//! Interceptor configuration

use crate::error::{ConfigError, Result};
use serde::Deserialize;

/// Path prefix of the gRPC server reflection service.
pub const REFLECTION_PREFIX: &str = "/grpc.reflection";

/// Configuration for [`AuthorizationInterceptor`](crate::AuthorizationInterceptor)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterceptorConfig {
    /// Metadata key holding the caller's locale tag
    pub culture_header: String,

    /// Duplex method path prefixes that skip context propagation and
    /// authorization (matched case-insensitively)
    pub bypass_prefixes: Vec<String>,

    /// Capacity of the outbound channel used by the streaming helpers
    pub stream_buffer: usize,

    /// Optional restriction of accepted locale languages (empty = all known)
    pub supported_languages: Vec<String>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            culture_header: "culture".to_string(),
            bypass_prefixes: vec![REFLECTION_PREFIX.to_string()],
            stream_buffer: 32,
            supported_languages: Vec::new(),
        }
    }
}

impl InterceptorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `AUTHZ_CULTURE_HEADER`: metadata key for the locale (default: culture)
    /// - `AUTHZ_BYPASS_PREFIXES`: comma separated duplex bypass prefixes
    ///   (default: /grpc.reflection)
    /// - `AUTHZ_STREAM_BUFFER`: outbound stream channel capacity (default: 32)
    /// - `AUTHZ_SUPPORTED_LANGUAGES`: comma separated language restriction
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("AUTHZ_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.culture_header.trim().is_empty() {
            return Err(ConfigError::invalid("culture_header must not be empty"));
        }
        if self.culture_header.ends_with("-bin") {
            return Err(ConfigError::invalid(
                "culture_header must name an ASCII metadata key",
            ));
        }
        if self.stream_buffer == 0 {
            return Err(ConfigError::invalid("stream_buffer must be greater than 0"));
        }
        Ok(())
    }

    /// Whether a duplex method path is an infrastructure call
    pub fn is_bypassed(&self, method: &str) -> bool {
        self.bypass_prefixes.iter().any(|prefix| {
            method.len() >= prefix.len()
                && method.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for key in [
            "AUTHZ_CULTURE_HEADER",
            "AUTHZ_BYPASS_PREFIXES",
            "AUTHZ_STREAM_BUFFER",
            "AUTHZ_SUPPORTED_LANGUAGES",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_default_config() {
        let config = InterceptorConfig::default();
        assert_eq!(config.culture_header, "culture");
        assert_eq!(config.bypass_prefixes, vec![REFLECTION_PREFIX.to_string()]);
        assert_eq!(config.stream_buffer, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = InterceptorConfig::from_env().expect("defaults should load");
        assert_eq!(config.culture_header, "culture");
        assert_eq!(config.stream_buffer, 32);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("AUTHZ_BYPASS_PREFIXES", "/grpc.reflection,/grpc.health");
        std::env::set_var("AUTHZ_STREAM_BUFFER", "8");
        std::env::set_var("AUTHZ_SUPPORTED_LANGUAGES", "fr,nl,en");

        let config = InterceptorConfig::from_env().expect("should load");
        assert_eq!(config.bypass_prefixes.len(), 2);
        assert_eq!(config.stream_buffer, 8);
        assert_eq!(config.supported_languages, vec!["fr", "nl", "en"]);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_zero_buffer() {
        clear_env();
        std::env::set_var("AUTHZ_STREAM_BUFFER", "0");
        let result = InterceptorConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        clear_env();
        std::env::set_var("AUTHZ_STREAM_BUFFER", "lots");
        let result = InterceptorConfig::from_env();
        assert!(matches!(result, Err(ConfigError::Env(_))));
        clear_env();
    }

    #[test]
    fn test_bypass_is_case_insensitive_prefix() {
        let config = InterceptorConfig::default();
        assert!(config.is_bypassed(
            "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo"
        ));
        assert!(config.is_bypassed("/GRPC.Reflection.v1.ServerReflection/ServerReflectionInfo"));
        assert!(!config.is_bypassed("/chat.ChatService/Stream"));
        assert!(!config.is_bypassed("/grpc"));
    }
}
