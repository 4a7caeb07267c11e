mod cli;

use anyhow::Context;
use huddle_client::{CallCommand, CallEvent, CallOrchestrator, SampleDevices, SignalingChannel};
use huddle_protocol::HuddleConfig;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;

    let mut config = match &args.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {path}"))?;
            toml::from_str::<HuddleConfig>(&text)
                .with_context(|| format!("Failed to parse config file {path}"))?
        }
        None => HuddleConfig::default(),
    };
    if let Some(url) = args.url {
        config.signaling.url = url;
    }
    if let Some(room) = args.room {
        config.signaling.room = room;
    }

    if let Err(issues) = config.validate() {
        let mut fatal = false;
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                error!("{issue}");
                fatal = true;
            } else {
                warn!("{issue}");
            }
        }
        if fatal {
            anyhow::bail!("Invalid configuration, see errors above");
        }
    }

    info!(
        url = %config.signaling.url,
        room = %config.signaling.room,
        user_id = %args.user_id,
        "Starting huddle"
    );

    let channel = SignalingChannel::connect(
        &config.signaling.url,
        &config.signaling.room,
        &args.user_id,
    )
    .await
    .context("Failed to connect to the signaling server")?;
    let (signal_tx, inbound) = channel.into_parts();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<CallEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<CallCommand>();

    let orchestrator = CallOrchestrator::new(
        config.ice.clone(),
        config.signaling.room.clone(),
        args.user_id.clone(),
        SampleDevices::new(),
        signal_tx,
        event_tx,
    );
    let run = tokio::spawn(orchestrator.run(inbound, cmd_rx));

    let stdin_cmds = cmd_tx.clone();
    let stdin_task = tokio::spawn(async move {
        print_commands();
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let cmd = match line.trim() {
                "" => continue,
                "call" => CallCommand::StartCall,
                "hangup" => CallCommand::EndCall,
                "mute" => CallCommand::ToggleAudio,
                "video" => CallCommand::ToggleVideo,
                "share" => CallCommand::StartScreenShare,
                "unshare" => CallCommand::StopScreenShare,
                "quit" => break,
                other => {
                    println!("Unknown command: {other}");
                    print_commands();
                    continue;
                }
            };
            if stdin_cmds.send(cmd).is_err() {
                break;
            }
        }
    });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => report_event(event),
                None => {
                    info!("Call loop finished");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, hanging up");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, hanging up");
                break;
            }
        }
    }

    // Dropping the command feed makes the run loop tear the call down
    // (leave sent, peer connection closed) before it exits.
    stdin_task.abort();
    drop(cmd_tx);
    let _ = run.await;

    info!("Huddle shutdown complete");
    Ok(())
}

fn print_commands() {
    println!("commands: call, hangup, mute, video, share, unshare, quit");
}

fn report_event(event: CallEvent) {
    match event {
        CallEvent::StateChanged(state) => info!(?state, "Call state changed"),
        CallEvent::RemoteJoined { user_id } => info!(user_id, "Remote peer joined the room"),
        CallEvent::RemoteLeft { user_id } => info!(user_id, "Remote peer left the room"),
        CallEvent::TrackToggled { kind, enabled } => info!(?kind, enabled, "Track toggled"),
        CallEvent::VideoSourceChanged(source) => info!(?source, "Video source changed"),
        CallEvent::Error(e) => warn!("Call error: {e}"),
    }
}
