//! Environment base plus YAML overrides.

use super::ClientConfig;
use super::env::{env_bool, env_list, env_var};
use super::yaml::YamlConfig;
use crate::core::session::{ProviderKind, SessionOptions};
use crate::core::webrtc::{AudioConstraints, DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_ICE_SERVER};

pub const DEFAULT_SIGNALING_URL: &str = "https://api.altan.ai/platform/agent";
pub const DEFAULT_SIGNALING_PATH: &str = "openai-realtime-webrtc";

fn parse_provider(raw: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(raw).ok_or_else(|| format!("Unsupported provider: {raw}"))
}

/// Build the configuration from environment variables (with defaults) and
/// apply `yaml` on top when given.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let yaml = yaml.unwrap_or_default();
    let agent = yaml.agent.unwrap_or_default();
    let signaling = yaml.signaling.unwrap_or_default();
    let webrtc = yaml.webrtc.unwrap_or_default();
    let audio = yaml.audio.unwrap_or_default();
    let session = yaml.session.unwrap_or_default();

    let agent_id = agent
        .id
        .or_else(|| env_var("VOICE_AGENT_ID"))
        .unwrap_or_default();

    let provider = match agent.provider.or_else(|| env_var("VOICE_PROVIDER")) {
        Some(raw) => parse_provider(&raw)?,
        None => ProviderKind::OpenAi,
    };

    let signaling_base_url = signaling
        .base_url
        .or_else(|| env_var("VOICE_SIGNALING_URL"))
        .unwrap_or_else(|| DEFAULT_SIGNALING_URL.to_string());
    let signaling_path = signaling
        .path
        .or_else(|| env_var("VOICE_SIGNALING_PATH"))
        .unwrap_or_else(|| DEFAULT_SIGNALING_PATH.to_string());
    let signaling_token = signaling
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| env_var("VOICE_SIGNALING_TOKEN"));
    let allow_insecure_signaling = match signaling.allow_insecure {
        Some(value) => value,
        None => env_bool("VOICE_ALLOW_INSECURE_SIGNALING")?.unwrap_or(false),
    };

    let ice_servers = webrtc
        .ice_servers
        .or_else(|| env_list("VOICE_ICE_SERVERS"))
        .unwrap_or_else(|| vec![DEFAULT_ICE_SERVER.to_string()]);
    let data_channel_label = webrtc
        .data_channel_label
        .or_else(|| env_var("VOICE_DATA_CHANNEL_LABEL"))
        .unwrap_or_else(|| DEFAULT_DATA_CHANNEL_LABEL.to_string());

    let defaults = AudioConstraints::default();
    let audio = AudioConstraints {
        echo_cancellation: match audio.echo_cancellation {
            Some(value) => value,
            None => env_bool("VOICE_ECHO_CANCELLATION")?.unwrap_or(defaults.echo_cancellation),
        },
        noise_suppression: match audio.noise_suppression {
            Some(value) => value,
            None => env_bool("VOICE_NOISE_SUPPRESSION")?.unwrap_or(defaults.noise_suppression),
        },
        auto_gain_control: match audio.auto_gain_control {
            Some(value) => value,
            None => env_bool("VOICE_AUTO_GAIN_CONTROL")?.unwrap_or(defaults.auto_gain_control),
        },
    };

    let defaults = SessionOptions {
        language: session.language.or_else(|| env_var("VOICE_LANGUAGE")),
        prompt: session.prompt.or_else(|| env_var("VOICE_PROMPT")),
        first_message: session
            .first_message
            .or_else(|| env_var("VOICE_FIRST_MESSAGE")),
        provider: None,
    };

    Ok(ClientConfig {
        agent_id,
        provider,
        signaling_base_url,
        signaling_path,
        signaling_token,
        allow_insecure_signaling,
        ice_servers,
        data_channel_label,
        audio,
        defaults,
    })
}
