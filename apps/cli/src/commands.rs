use shared_proto::signaling::CallType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Call {
        to: String,
        call_type: CallType,
        room_id: Option<String>,
    },
    Accept(CallType),
    Reject,
    End,
    Mute,
    Video,
    Join(String),
    Status,
    Help,
    Quit,
}

pub fn parse(line: &str) -> Result<CliCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Err("empty command".to_string());
    };

    match command {
        "call" => {
            let to = parts
                .next()
                .ok_or_else(|| "usage: call <user> [audio|video] [room-id]".to_string())?
                .to_string();
            let call_type = match parts.next() {
                Some(raw) => parse_call_type(raw)?,
                None => CallType::Audio,
            };
            let room_id = parts.next().map(|r| r.to_string());
            Ok(CliCommand::Call {
                to,
                call_type,
                room_id,
            })
        }
        "accept" => {
            let call_type = match parts.next() {
                Some(raw) => parse_call_type(raw)?,
                None => CallType::Audio,
            };
            Ok(CliCommand::Accept(call_type))
        }
        "reject" => Ok(CliCommand::Reject),
        "end" | "hangup" => Ok(CliCommand::End),
        "mute" => Ok(CliCommand::Mute),
        "video" => Ok(CliCommand::Video),
        "join" => {
            let room_id = parts
                .next()
                .ok_or_else(|| "usage: join <room-id>".to_string())?
                .to_string();
            Ok(CliCommand::Join(room_id))
        }
        "status" => Ok(CliCommand::Status),
        "help" => Ok(CliCommand::Help),
        "quit" | "exit" => Ok(CliCommand::Quit),
        other => Err(format!("unknown command '{other}', try 'help'")),
    }
}

fn parse_call_type(raw: &str) -> Result<CallType, String> {
    match raw {
        "audio" => Ok(CallType::Audio),
        "video" => Ok(CallType::Video),
        other => Err(format!("unknown call type '{other}', use audio|video")),
    }
}

pub const HELP: &str = "\
commands:
  call <user> [audio|video] [room-id]  start a call
  accept [audio|video]                 answer the ringing call
  reject                               decline the ringing call
  end                                  hang up / cancel
  mute                                 toggle microphone
  video                                toggle camera
  join <room-id>                       attach signaling to a room
  status                               show call status
  quit                                 exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_defaults() {
        assert_eq!(
            parse("call bob").unwrap(),
            CliCommand::Call {
                to: "bob".to_string(),
                call_type: CallType::Audio,
                room_id: None,
            }
        );
        assert_eq!(
            parse("call bob video room1").unwrap(),
            CliCommand::Call {
                to: "bob".to_string(),
                call_type: CallType::Video,
                room_id: Some("room1".to_string()),
            }
        );
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse("").is_err());
        assert!(parse("dance").is_err());
        assert!(parse("call").is_err());
        assert!(parse("call bob hologram").is_err());
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse("accept video").unwrap(), CliCommand::Accept(CallType::Video));
        assert_eq!(parse("hangup").unwrap(), CliCommand::End);
        assert_eq!(parse("join room7").unwrap(), CliCommand::Join("room7".to_string()));
        assert_eq!(parse("quit").unwrap(), CliCommand::Quit);
    }
}
