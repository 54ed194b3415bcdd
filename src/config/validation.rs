use super::ClientConfig;
use crate::utils::validate_signaling_url;

/// Validate the merged configuration.
pub(crate) fn validate_config(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.agent_id.trim().is_empty() {
        return Err("Agent ID is required (set VOICE_AGENT_ID or agent.id)".into());
    }

    validate_signaling_url(&config.signaling_base_url, config.allow_insecure_signaling)
        .map_err(|e| format!("Invalid signaling URL {}: {e}", config.signaling_base_url))?;

    if config.signaling_path.trim_matches('/').is_empty() {
        return Err("Signaling path must not be empty".into());
    }

    if config.data_channel_label.trim().is_empty() {
        return Err("Data channel label must not be empty".into());
    }

    Ok(())
}
