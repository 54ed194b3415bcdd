use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, trace};

use waav_voice_client::core::webrtc::{OpusTrackDevices, RemoteAudioCallback};
use waav_voice_client::{
    ClientConfig, SessionCallbacks, SessionOptions, ToolRegistry, TranscriptMessage,
    VoiceSession, VoiceSessionBuilder,
};

/// WaaV Voice Client - talk to a realtime voice agent from the terminal
///
/// Microphone frames are expected to be fed by an external capture stack;
/// this binary drives the session and exchanges typed text.
#[derive(Parser, Debug)]
#[command(name = "waav-voice-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Agent to talk to (overrides configuration)
    #[arg(short = 'a', long = "agent-id", value_name = "ID")]
    agent_id: Option<String>,

    /// Conversation language, e.g. "en"
    #[arg(short = 'l', long = "language")]
    language: Option<String>,

    /// System prompt override
    #[arg(short = 'p', long = "prompt")]
    prompt: Option<String>,

    /// Opening line the agent should speak
    #[arg(long = "first-message")]
    first_message: Option<String>,
}

fn demo_tools() -> ToolRegistry {
    ToolRegistry::new().with_tool("get_current_time", |_args| async move {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Ok::<_, anyhow::Error>(json!({ "success": true, "unix_time": seconds }))
    })
}

fn print_message(message: &TranscriptMessage) {
    println!("[{}] {}", message.role, message.content);
}

fn print_help() {
    println!("Commands: /mute /unmute /status /transcript /quit; anything else is sent as text");
}

async fn handle_line(session: &VoiceSession, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/mute" | "/unmute" => {
            let muted = line == "/mute";
            match session.set_muted(muted).await {
                Ok(()) => println!("Microphone {}", if muted { "muted" } else { "unmuted" }),
                Err(e) => eprintln!("Mute failed: {e}"),
            }
        }
        "/status" => {
            println!(
                "Status: {} (muted: {})",
                session.status(),
                session.is_muted()
            );
        }
        "/transcript" => {
            for message in session.transcript() {
                print_message(&message);
            }
        }
        "/help" => print_help(),
        text => {
            if let Err(e) = session.send_text(text).await {
                eprintln!("Failed to send text: {e}");
            }
        }
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config =
        ClientConfig::load(cli.config.as_ref()).map_err(|e| anyhow!(e.to_string()))?;
    if let Some(agent_id) = cli.agent_id {
        config.agent_id = agent_id;
    }
    if cli.language.is_some() {
        config.defaults.language = cli.language;
    }
    if cli.prompt.is_some() {
        config.defaults.prompt = cli.prompt;
    }
    if cli.first_message.is_some() {
        config.defaults.first_message = cli.first_message;
    }
    config.validate().map_err(|e| anyhow!(e.to_string()))?;

    info!(
        agent_id = %config.agent_id,
        provider = %config.provider,
        endpoint = %config.signaling_endpoint(),
        "Configuration loaded"
    );

    let devices = Arc::new(OpusTrackDevices::new("waav-voice-client"));
    let remote_audio: RemoteAudioCallback = Arc::new(|frame| {
        Box::pin(async move {
            trace!(
                track_id = %frame.track_id,
                sequence = frame.sequence_number,
                bytes = frame.payload.len(),
                "Remote audio frame"
            );
        })
    });

    let session = VoiceSessionBuilder::from_config(&config, demo_tools(), devices, Some(remote_audio))?
        .build()?;

    let callbacks = SessionCallbacks::new()
        .on_connect(|| async { println!("Connected. Type /help for commands.") })
        .on_disconnect(|| async { println!("Disconnected.") })
        .on_error(|e| async move { eprintln!("Session error: {e}") })
        .on_status_change(|status| async move { info!(%status, "Status changed") })
        .on_tool_call(|notice| async move {
            println!("Tool call: {} {}", notice.name, notice.arguments)
        });

    // Print each transcript message once it is sealed
    let mut transcript_rx = session.subscribe_transcript();
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while transcript_rx.changed().await.is_ok() {
            let messages = transcript_rx.borrow_and_update().clone();
            if messages.len() < printed {
                printed = 0;
            }
            for message in messages.iter().skip(printed) {
                if message.streaming {
                    break;
                }
                print_message(message);
                printed += 1;
            }
        }
    });

    if !session
        .start_conversation(callbacks, SessionOptions::default())
        .await
    {
        printer.abort();
        anyhow::bail!("Failed to start conversation");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&session, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    session.stop_conversation().await;
    printer.abort();
    Ok(())
}
