use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// agent:
///   id: "agent-123"
///   provider: "openai"
///
/// signaling:
///   base_url: "https://api.altan.ai/platform/agent"
///   path: "openai-realtime-webrtc"
///   token: "bearer-token"
///   allow_insecure: false
///
/// webrtc:
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///   data_channel_label: "oai-events"
///
/// audio:
///   echo_cancellation: true
///   noise_suppression: true
///   auto_gain_control: true
///
/// session:
///   language: "en"
///   prompt: "You are a friendly assistant."
///   first_message: "Hi! How can I help?"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub agent: Option<AgentYaml>,
    pub signaling: Option<SignalingYaml>,
    pub webrtc: Option<WebRtcYaml>,
    pub audio: Option<AudioYaml>,
    pub session: Option<SessionYaml>,
}

/// Agent selection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentYaml {
    pub id: Option<String>,
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,
}

/// Signaling backend from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SignalingYaml {
    pub base_url: Option<String>,
    pub path: Option<String>,
    pub token: Option<String>,
    pub allow_insecure: Option<bool>,
}

/// Peer connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebRtcYaml {
    pub ice_servers: Option<Vec<String>>,
    pub data_channel_label: Option<String>,
}

/// Microphone processing from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

/// Agent-level session defaults from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub first_message: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
