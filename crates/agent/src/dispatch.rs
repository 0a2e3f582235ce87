// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command handling: ack immediately, dispatch to the substrate port (or the
//! VNC tunnel table), then report `complete` or `failed`.

use sessionhub_protocol::{AgentFrame, CommandAction, CommandPayload};
use sessionhub_substrate::SubstratePort;
use tokio::sync::mpsc;
use tracing::warn;

use crate::connection::SessionCounter;
use crate::error::DispatchError;
use crate::vnc::VncTunnels;

pub async fn handle_command(
    substrate: &dyn SubstratePort,
    tunnels: &VncTunnels,
    sessions: &SessionCounter,
    outbound: &mpsc::UnboundedSender<AgentFrame>,
    command: CommandPayload,
) {
    let _ = outbound.send(AgentFrame::Ack { command_id: command.command_id.clone() });
    let action = command.action;

    match run_action(substrate, tunnels, outbound, &command).await {
        Ok(result) => {
            match action {
                CommandAction::StartSession => sessions.increment(),
                CommandAction::StopSession => sessions.decrement(),
                _ => {}
            }
            let _ = outbound.send(AgentFrame::Complete { command_id: command.command_id, result });
        }
        Err(e) => {
            warn!(command_id = %command.command_id, action = ?action, error = %e, "command failed");
            let _ =
                outbound.send(AgentFrame::Failed { command_id: command.command_id, error: e.to_string() });
        }
    }
}

async fn run_action(
    substrate: &dyn SubstratePort,
    tunnels: &VncTunnels,
    outbound: &mpsc::UnboundedSender<AgentFrame>,
    command: &CommandPayload,
) -> Result<serde_json::Value, DispatchError> {
    match command.action {
        CommandAction::StartSession => {
            let manifest =
                command.payload.get("template_manifest").cloned().unwrap_or_else(|| command.payload.clone());
            substrate.start_session(&command.session_id, &manifest).await?;
            Ok(serde_json::json!({}))
        }
        CommandAction::StopSession => {
            substrate.stop_session(&command.session_id).await?;
            Ok(serde_json::json!({}))
        }
        CommandAction::HibernateSession => {
            substrate.hibernate_session(&command.session_id).await?;
            Ok(serde_json::json!({}))
        }
        CommandAction::WakeSession => {
            substrate.wake_session(&command.session_id).await?;
            Ok(serde_json::json!({}))
        }
        CommandAction::CreateVncTunnel => {
            let tunnel_id = command
                .payload
                .get("tunnel_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DispatchError::MalformedPayload("missing tunnel_id".into()))?;
            tunnels.open(substrate, outbound.clone(), &command.session_id, tunnel_id).await?;
            let _ = outbound.send(AgentFrame::VncReady { tunnel_id: tunnel_id.to_owned() });
            Ok(serde_json::json!({ "tunnel_id": tunnel_id }))
        }
        CommandAction::CloseVncTunnel => {
            let tunnel_id = command
                .payload
                .get("tunnel_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| DispatchError::MalformedPayload("missing tunnel_id".into()))?;
            tunnels.close(tunnel_id).await;
            Ok(serde_json::json!({}))
        }
        CommandAction::VncData => Err(DispatchError::Unsupported(command.action)),
    }
}
