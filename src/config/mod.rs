//! Configuration module for the voice client
//!
//! Configuration comes from .env files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable parsing helpers
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_voice_client::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("voice.yaml");
//! let config = ClientConfig::from_file(&config_path)?;
//!
//! println!("Signaling endpoint: {}", config.signaling_endpoint());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod merge;
mod validation;
mod yaml;

pub use merge::{DEFAULT_SIGNALING_PATH, DEFAULT_SIGNALING_URL};
pub use yaml::YamlConfig;

use crate::core::session::{ProviderKind, SessionOptions};
use crate::core::webrtc::{AudioConstraints, signaling_endpoint};

/// Voice client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Agent the conversation is held with
    pub agent_id: String,
    /// Provider used when a start does not override it
    pub provider: ProviderKind,

    // Signaling
    pub signaling_base_url: String,
    pub signaling_path: String,
    /// Optional bearer token for the SDP exchange
    pub signaling_token: Option<String>,
    /// Accept plain http signaling URLs
    pub allow_insecure_signaling: bool,

    // WebRTC
    pub ice_servers: Vec<String>,
    pub data_channel_label: String,
    pub audio: AudioConstraints,

    /// Agent-level session defaults
    pub defaults: SessionOptions,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("agent_id", &self.agent_id)
            .field("provider", &self.provider)
            .field("signaling_base_url", &self.signaling_base_url)
            .field("signaling_path", &self.signaling_path)
            .field(
                "signaling_token",
                &self.signaling_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_insecure_signaling", &self.allow_insecure_signaling)
            .field("ice_servers", &self.ice_servers)
            .field("data_channel_label", &self.data_channel_label)
            .field("audio", &self.audio)
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// Implement Drop to zeroize the signaling token when the config is dropped.
impl Drop for ClientConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        if let Some(ref mut token) = self.signaling_token {
            token.zeroize();
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables only
    ///
    /// .env values are expected to have been loaded into the environment by
    /// the caller (see `main.rs`).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Merge YAML (when given) over the environment without validating, so
    /// callers can apply their own overrides first and then call
    /// [`validate`](Self::validate).
    pub fn load(path: Option<&PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = match path {
            Some(path) => Some(yaml::YamlConfig::from_file(path)?),
            None => None,
        };
        merge::merge_config(yaml_config)
    }

    /// Re-run validation, e.g. after CLI overrides.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_config(self)
    }

    /// Per-agent SDP exchange URL: `{base_url}/{agent_id}/{path}`
    pub fn signaling_endpoint(&self) -> String {
        signaling_endpoint(
            &self.signaling_base_url,
            &self.agent_id,
            &self.signaling_path,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    const VARS: &[&str] = &[
        "VOICE_AGENT_ID",
        "VOICE_PROVIDER",
        "VOICE_SIGNALING_URL",
        "VOICE_SIGNALING_PATH",
        "VOICE_SIGNALING_TOKEN",
        "VOICE_ALLOW_INSECURE_SIGNALING",
        "VOICE_ICE_SERVERS",
        "VOICE_DATA_CHANNEL_LABEL",
        "VOICE_ECHO_CANCELLATION",
        "VOICE_NOISE_SUPPRESSION",
        "VOICE_AUTO_GAIN_CONTROL",
        "VOICE_LANGUAGE",
        "VOICE_PROMPT",
        "VOICE_FIRST_MESSAGE",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        unsafe { std::env::set_var("VOICE_AGENT_ID", "agent-1") };

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.agent_id, "agent-1");
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(
            config.signaling_endpoint(),
            "https://api.altan.ai/platform/agent/agent-1/openai-realtime-webrtc"
        );
        assert_eq!(config.ice_servers, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(config.data_channel_label, "oai-events");
        assert_eq!(config.audio, AudioConstraints::default());
        assert!(config.signaling_token.is_none());
        assert!(config.defaults.language.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("VOICE_AGENT_ID", "agent-2");
            std::env::set_var("VOICE_PROVIDER", "elevenlabs");
            std::env::set_var("VOICE_ICE_SERVERS", "stun:a:1, stun:b:2");
            std::env::set_var("VOICE_NOISE_SUPPRESSION", "false");
            std::env::set_var("VOICE_LANGUAGE", "fr");
        }

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.provider, ProviderKind::ElevenLabs);
        assert_eq!(config.ice_servers, vec!["stun:a:1", "stun:b:2"]);
        assert!(!config.audio.noise_suppression);
        assert!(config.audio.echo_cancellation);
        assert_eq!(config.defaults.language.as_deref(), Some("fr"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_agent_id_fails() {
        clear_env();
        let err = ClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Agent ID is required"));
    }

    #[test]
    #[serial]
    fn test_invalid_bool_fails() {
        clear_env();
        unsafe {
            std::env::set_var("VOICE_AGENT_ID", "agent");
            std::env::set_var("VOICE_ECHO_CANCELLATION", "sometimes");
        }
        let err = ClientConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("VOICE_ECHO_CANCELLATION"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_insecure_signaling_requires_opt_in() {
        clear_env();
        unsafe {
            std::env::set_var("VOICE_AGENT_ID", "agent");
            std::env::set_var("VOICE_SIGNALING_URL", "http://localhost:9000/agent");
        }
        assert!(ClientConfig::from_env().is_err());

        unsafe { std::env::set_var("VOICE_ALLOW_INSECURE_SIGNALING", "true") };
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(
            config.signaling_endpoint(),
            "http://localhost:9000/agent/agent/openai-realtime-webrtc"
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        unsafe {
            std::env::set_var("VOICE_AGENT_ID", "env-agent");
            std::env::set_var("VOICE_PROMPT", "env prompt");
            std::env::set_var("VOICE_SIGNALING_TOKEN", "env-token");
        }

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("voice.yaml");
        fs::write(
            &config_path,
            r#"
agent:
  id: "yaml-agent"
signaling:
  path: "/custom"
session:
  first_message: "Welcome!"
"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();
        assert_eq!(config.agent_id, "yaml-agent");
        assert_eq!(config.defaults.prompt.as_deref(), Some("env prompt"));
        assert_eq!(config.defaults.first_message.as_deref(), Some("Welcome!"));
        assert_eq!(config.signaling_token.as_deref(), Some("env-token"));
        assert!(config.signaling_endpoint().ends_with("/yaml-agent/custom"));

        clear_env();
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig {
            agent_id: "a".to_string(),
            provider: ProviderKind::OpenAi,
            signaling_base_url: DEFAULT_SIGNALING_URL.to_string(),
            signaling_path: DEFAULT_SIGNALING_PATH.to_string(),
            signaling_token: Some("super-secret".to_string()),
            allow_insecure_signaling: false,
            ice_servers: Vec::new(),
            data_channel_label: "oai-events".to_string(),
            audio: AudioConstraints::default(),
            defaults: SessionOptions::default(),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
