mod commands;

use std::sync::Arc;
use std::time::Duration;

use call_engine::{
    ApiContext, CallCoordinator, CallEvent, Collaborators, CoordinatorConfig, HttpCallLogSink,
    HttpUserDirectory, NotificationAction,
};
use media::{ice_servers_from_env, SystemMediaDevices};
use shared_proto::signaling::{generate_room_id, CallType};
use tokio::io::{AsyncBufReadExt, BufReader};

use commands::CliCommand;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[tokio::main]
async fn main() {
    call_engine::observability::init_tracing();

    let Some(user_id) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("USER_ID").ok())
    else {
        eprintln!("usage: cli <user-id>  (or set USER_ID)");
        std::process::exit(2);
    };

    let server_url = env_or("SERVER_URL", "ws://127.0.0.1:3000/ws");
    let api_url = env_or("API_URL", "http://127.0.0.1:3000/api");
    let ring_timeout = std::env::var("RING_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(call_engine::DEFAULT_RING_TIMEOUT);

    let api = Arc::new(ApiContext::new(api_url));
    if let Ok(token) = std::env::var("AUTH_TOKEN") {
        api.set_token(Some(token)).await;
    }

    let devices =
        SystemMediaDevices::new().with_input_device(std::env::var("AUDIO_INPUT_DEVICE").ok());
    let collaborators = Collaborators {
        devices: Arc::new(devices),
        directory: Arc::new(HttpUserDirectory::new(api.clone())),
        call_log: Arc::new(HttpCallLogSink::new(api)),
    };

    let config = CoordinatorConfig::new(&server_url)
        .with_ring_timeout(ring_timeout)
        .with_ice_servers(ice_servers_from_env());

    let (coordinator, mut events) =
        match CallCoordinator::start(&user_id, config, collaborators).await {
            Ok(started) => started,
            Err(e) => {
                eprintln!("could not reach the signaling relay at {server_url}: {e}");
                std::process::exit(1);
            }
        };
    tracing::info!(
        component = "cli",
        user_id = %user_id,
        server_url = %server_url,
        "signaling connected"
    );
    println!("connected as {user_id} ({server_url})");

    // The notification channel: the OS hands us an "answer" deep link
    // before any signaling arrived.
    if let Ok(room_id) = std::env::var("ANSWER_ROOM") {
        let call_type = match std::env::var("ANSWER_CALL_TYPE").as_deref() {
            Ok("video") => CallType::Video,
            _ => CallType::Audio,
        };
        println!("answering call in room {room_id} from notification...");
        coordinator.notification_action(NotificationAction {
            action: "answer".to_string(),
            room_id,
            call_type,
        });
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match commands::parse(line) {
            Ok(command) => command,
            Err(e) => {
                println!("✖ {e}");
                continue;
            }
        };
        if !dispatch(&coordinator, command).await {
            break;
        }
    }

    coordinator.stop().await;
    println!("bye");
}

/// Returns false when the loop should exit.
async fn dispatch(coordinator: &CallCoordinator, command: CliCommand) -> bool {
    match command {
        CliCommand::Call {
            to,
            call_type,
            room_id,
        } => {
            let room_id = room_id.unwrap_or_else(generate_room_id);
            match coordinator.start_call(&room_id, &to, call_type).await {
                Ok(()) => println!("📞 calling {to} ({call_type}) in room {room_id}..."),
                Err(e) => println!("✖ {e}"),
            }
        }
        CliCommand::Accept(call_type) => match coordinator.accept_call(call_type).await {
            Ok(()) => println!("✅ call accepted"),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::Reject => match coordinator.reject_call().await {
            Ok(()) => println!("❌ call rejected"),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::End => match coordinator.end_call().await {
            Ok(()) => println!("📴 call ended"),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::Mute => match coordinator.toggle_mute().await {
            Ok(muted) => println!("{}", if muted { "🔇 muted" } else { "🔊 unmuted" }),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::Video => match coordinator.toggle_video().await {
            Ok(enabled) => println!("camera {}", if enabled { "on" } else { "off" }),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::Join(room_id) => match coordinator.join_room(&room_id).await {
            Ok(()) => println!("joined room {room_id}"),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::Status => match coordinator.status().await {
            Ok(status) => println!("status: {status}"),
            Err(e) => println!("✖ {e}"),
        },
        CliCommand::Help => println!("{}", commands::HELP),
        CliCommand::Quit => return false,
    }
    true
}

fn print_event(event: CallEvent) {
    match event {
        CallEvent::IncomingCall(call) => println!(
            "📞 incoming {} call from {} in room {} — 'accept' to answer",
            call.call_type, call.display_name, call.room_id
        ),
        CallEvent::StatusChanged { room_id, status } => {
            println!("· {room_id}: {status}");
        }
        CallEvent::CallEnded { room_id, reason } => {
            println!("· {room_id}: ended ({reason:?})");
        }
        CallEvent::PeerJoined { room_id, user_id } => {
            println!("· {user_id} joined {room_id}");
        }
        CallEvent::TransportClosed => {
            println!("⚠ signaling connection lost — restart to reconnect");
        }
    }
}
