//! Newline-delimited JSON control surface.
//!
//! ```text
//! {"action":"force-activate","region":"eu-west-1"}
//! {"action":"clear-override"}
//! {"action":"status"}
//! ```

use crate::controller::{ControlCommand, ControllerStatus};
use crate::service::ControlHandle;
use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ControlResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerStatus>,
}

impl ControlResponse {
    pub fn success(message: impl Into<String>, controller: ControllerStatus) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
            controller: Some(controller),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
            controller: None,
        }
    }
}

pub fn parse_command(line: &str) -> Result<ControlCommand, serde_json::Error> {
    serde_json::from_str(line.trim())
}

fn describe(command: &ControlCommand) -> String {
    match command {
        ControlCommand::ForceActivate { region } => format!("Region {} forced active", region),
        ControlCommand::ClearOverride => "Manual override cleared".to_string(),
        ControlCommand::Status => "Controller status".to_string(),
    }
}

pub async fn handle_line(handle: &ControlHandle, line: &str) -> ControlResponse {
    let command = match parse_command(line) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "Invalid control request");
            return ControlResponse::failed(format!("Invalid request: {}", e));
        }
    };

    let message = describe(&command);
    match handle.execute(command).await {
        Ok(status) => ControlResponse::success(message, status),
        Err(e) => ControlResponse::failed(e.to_string()),
    }
}

pub async fn serve(
    listener: TcpListener,
    handle: ControlHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    match listener.local_addr() {
        Ok(addr) => info!(addr = %addr, "Admin listener starting"),
        Err(e) => warn!(error = %e, "Admin listener starting on unknown address"),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Admin connection accepted");
                    tokio::spawn(serve_connection(stream, handle.clone()));
                }
                Err(e) => error!(error = %e, "Failed to accept admin connection"),
            },
            _ = shutdown.recv() => {
                info!("Admin listener received shutdown signal, exiting loop");
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, handle: ControlHandle) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Admin connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&handle, &line).await;
        let mut payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode control response");
                break;
            }
        };
        payload.push('\n');

        if writer.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}
