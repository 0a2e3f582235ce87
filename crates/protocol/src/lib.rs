// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types shared between the control plane and the agent runtime.
//!
//! Every frame exchanged over the agent WebSocket (`GET /api/v1/agents/connect`)
//! and over the VNC relay WebSockets is one of the enums in this crate. Both
//! sides serialize with an internally tagged `type` discriminant so a frame can
//! be routed without knowing its payload shape in advance.

pub mod constants;
mod timestamp;

use serde::{Deserialize, Serialize};

pub use timestamp::{iso8601_now, iso8601_to_epoch_secs};

/// Opaque per-template launch payload. Never interpreted by the control plane
/// or the agent core; passed through to the substrate port verbatim.
pub type TemplateManifest = serde_json::Value;

/// The closed set of actions a control-plane command can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    StartSession,
    StopSession,
    HibernateSession,
    WakeSession,
    CreateVncTunnel,
    CloseVncTunnel,
    VncData,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartSession => "start_session",
            Self::StopSession => "stop_session",
            Self::HibernateSession => "hibernate_session",
            Self::WakeSession => "wake_session",
            Self::CreateVncTunnel => "create_vnc_tunnel",
            Self::CloseVncTunnel => "close_vnc_tunnel",
            Self::VncData => "vnc_data",
        }
    }
}

/// A command dispatched to a single agent for a single action.
///
/// `payload` carries action-specific fields (e.g. `template_manifest` for
/// `start_session`, `tunnel_id`/`target_port` for `create_vnc_tunnel`) as an
/// opaque JSON object — this core never deserializes it into a concrete type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command_id: String,
    pub session_id: String,
    pub action: CommandAction,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// Frames sent from the control plane down the agent WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    Command {
        #[serde(flatten)]
        command: CommandPayload,
    },
    Ping {},
    Shutdown {
        reason: String,
    },
    VncData {
        tunnel_id: String,
        /// Base64-encoded chunk, capped at [`constants::VNC_MAX_CHUNK_BYTES`].
        data: String,
    },
}

/// Frames sent from the agent up the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Ack {
        command_id: String,
    },
    Complete {
        command_id: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        result: serde_json::Value,
    },
    Failed {
        command_id: String,
        error: String,
    },
    Status {
        active_sessions: u32,
        capacity: u32,
    },
    Heartbeat {
        active_sessions: u32,
        capacity: u32,
        ts: String,
    },
    Pong {},
    VncReady {
        tunnel_id: String,
    },
    VncData {
        tunnel_id: String,
        data: String,
    },
    VncError {
        tunnel_id: String,
        error: String,
    },
}

/// Registration request body for `POST /api/v1/agents/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub host: String,
    pub capacity: u32,
    /// Tenant this agent belongs to. Every broadcast the control plane fans
    /// out about this agent is scoped to this value.
    pub org_id: String,
    #[serde(default)]
    pub labels: serde_json::Value,
}

/// Response body for a successful agent registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistrationAck {
    pub agent_id: String,
    pub heartbeat_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_action_round_trips_through_json() {
        for action in [
            CommandAction::StartSession,
            CommandAction::StopSession,
            CommandAction::HibernateSession,
            CommandAction::WakeSession,
            CommandAction::CreateVncTunnel,
            CommandAction::CloseVncTunnel,
            CommandAction::VncData,
        ] {
            let json = serde_json::to_string(&action).expect("serialize");
            let back: CommandAction = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(action, back);
        }
    }

    #[test]
    fn hub_frame_tags_command_by_type_field() {
        let frame = HubFrame::Command {
            command: CommandPayload {
                command_id: "cmd-1".into(),
                session_id: "sess-1".into(),
                action: CommandAction::StartSession,
                payload: serde_json::json!({"template_manifest": {"image": "demo"}}),
            },
        };
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value["type"], "command");
        assert_eq!(value["action"], "start_session");
        assert_eq!(value["session_id"], "sess-1");
    }

    #[test]
    fn agent_frame_heartbeat_round_trips() {
        let frame = AgentFrame::Heartbeat { active_sessions: 2, capacity: 10, ts: iso8601_now() };
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: AgentFrame = serde_json::from_str(&json).expect("deserialize");
        match back {
            AgentFrame::Heartbeat { active_sessions, capacity, .. } => {
                assert_eq!(active_sessions, 2);
                assert_eq!(capacity, 10);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn template_manifest_passes_through_as_opaque_json() {
        let manifest: TemplateManifest = serde_json::json!({"nested": {"a": [1, 2, 3]}});
        let payload = CommandPayload {
            command_id: "cmd-2".into(),
            session_id: "sess-2".into(),
            action: CommandAction::StartSession,
            payload: serde_json::json!({ "template_manifest": manifest }),
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        let back: CommandPayload = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.payload["template_manifest"]["nested"]["a"][1], 2);
    }
}
