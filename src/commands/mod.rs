//! Console commands for the interactive harness.
//!
//! Each input line maps to one [`LocalAction`] or a console-only command.

use crate::signaling::{LocalAction, Notice, OrchestratorSnapshot};

pub const HELP: &str = "\
commands:
  call <user> [category]   create a call to <user>
  accept                   accept the incoming call
  reject [reason]          reject the incoming call
  offer                    start negotiation as caller
  end                      hang up
  send <text>              send text on the data channel
  status                   show call and peer state
  help                     show this help
  quit                     end the call and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Action(LocalAction),
    Status,
    Help,
    Quit,
}

/// Parses one console line. Blank lines parse to `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let rest = (!rest.is_empty()).then(|| rest.to_string());

    let command = match word.to_ascii_lowercase().as_str() {
        "call" => {
            let rest = rest.ok_or("usage: call <user> [category]")?;
            let mut parts = rest.split_whitespace();
            let target = parts.next().unwrap_or_default().to_string();
            let category = parts.next().map(str::to_ascii_uppercase);
            if parts.next().is_some() {
                return Err("usage: call <user> [category]".to_string());
            }
            ConsoleCommand::Action(LocalAction::CreateCall { target, category })
        }
        "accept" => ConsoleCommand::Action(LocalAction::Accept),
        "reject" => ConsoleCommand::Action(LocalAction::Reject { reason: rest }),
        "offer" => ConsoleCommand::Action(LocalAction::StartOffer),
        "end" | "hangup" => ConsoleCommand::Action(LocalAction::End),
        "send" => ConsoleCommand::Action(LocalAction::SendText(rest.ok_or("usage: send <text>")?)),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

pub fn format_notice(notice: &Notice) -> String {
    match notice {
        Notice::CallStatus { call_id, status } => format!("[call] {} is {}", call_id, status),
        Notice::PeerState { call_id, state } => format!("[peer] {} negotiation {}", call_id, state),
        Notice::Connection(state) => format!("[peer] connection {}", state),
        Notice::DataChannelOpen { label } => format!("[data] channel '{}' open", label),
        Notice::DataMessage { text } => format!("[data] < {}", text),
        Notice::DataChannelClosed { label } => format!("[data] channel '{}' closed", label),
        Notice::Error { kind, message } => format!("[error] {:?}: {}", kind, message),
        Notice::TransportLost { reason } => format!("[bus] connection lost: {}", reason),
        Notice::TransportRestored => "[bus] reconnected".to_string(),
    }
}

pub fn format_snapshot(snapshot: &OrchestratorSnapshot) -> String {
    let call = match &snapshot.call {
        Some(call) => format!(
            "call {} ({:?}) with {} is {}",
            call.call_id,
            call.role,
            call.peer_id.as_deref().unwrap_or("<unknown>"),
            call.status
        ),
        None => "no call".to_string(),
    };
    let peer = snapshot
        .peer_state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}; peer {}; bus {}; dropped {}",
        call,
        peer,
        if snapshot.transport_up { "up" } else { "down" },
        snapshot.dropped_outbound
    )
}
