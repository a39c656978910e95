//! End-to-end call flows: two coordinators talking through the real relay
//! over real sockets, with media devices mocked out.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use call_engine::{
    CallCoordinator, CallError, CallEvent, CallLogEntry, CallLogSink, CallStatus, Collaborators,
    CoordinatorConfig, EndReason, NotificationAction, UserDirectory,
};
use futures_util::future::BoxFuture;
use media::{
    LocalTrack, MediaConstraints, MediaDevices, MediaError, MediaStream, TrackKind,
};
use shared_proto::signaling::CallType;
use tokio::sync::mpsc;

struct MockDevices;

impl MediaDevices for MockDevices {
    fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(TrackKind::Audio, "mock-mic"));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(TrackKind::Video, "mock-cam"));
        }
        Ok(MediaStream::new(tracks))
    }
}

struct MockDirectory;

impl UserDirectory for MockDirectory {
    fn display_name<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move { Some(format!("{user_id} display")) })
    }
}

struct RecordingSink {
    entries: Arc<Mutex<Vec<CallLogEntry>>>,
}

impl CallLogSink for RecordingSink {
    fn append(&self, entry: CallLogEntry) -> BoxFuture<'_, Result<(), CallError>> {
        self.entries.lock().unwrap().push(entry);
        Box::pin(async { Ok(()) })
    }
}

fn collaborators() -> (Collaborators, Arc<Mutex<Vec<CallLogEntry>>>) {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let collab = Collaborators {
        devices: Arc::new(MockDevices),
        directory: Arc::new(MockDirectory),
        call_log: Arc::new(RecordingSink {
            entries: entries.clone(),
        }),
    };
    (collab, entries)
}

async fn spawn_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(server::run(listener, server::AppState::new()));
    format!("ws://127.0.0.1:{}/ws", addr.port())
}

async fn wait_for_status(coordinator: &CallCoordinator, want: CallStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if coordinator.status().await.unwrap() == want {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("status never reached {want}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_for_event(
    rx: &mut mpsc::UnboundedReceiver<CallEvent>,
    mut predicate: impl FnMut(&CallEvent) -> bool,
) -> CallEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event channel open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

#[tokio::test]
async fn video_call_accept_and_hangup_end_to_end() {
    let relay_url = spawn_relay().await;

    let (collab_a, log_a) = collaborators();
    let (collab_b, log_b) = collaborators();

    let (alice, _events_a) = CallCoordinator::start(
        "alice",
        CoordinatorConfig::new(&relay_url),
        collab_a,
    )
    .await
    .expect("alice connects");
    let (bob, mut events_b) = CallCoordinator::start(
        "bob",
        CoordinatorConfig::new(&relay_url),
        collab_b,
    )
    .await
    .expect("bob connects");

    alice
        .start_call("room1", "bob", CallType::Video)
        .await
        .expect("call starts");
    assert_eq!(alice.status().await.unwrap(), CallStatus::Calling);

    let incoming = wait_for_event(&mut events_b, |e| matches!(e, CallEvent::IncomingCall(_))).await;
    match incoming {
        CallEvent::IncomingCall(call) => {
            assert_eq!(call.from, "alice");
            assert_eq!(call.room_id, "room1");
            assert_eq!(call.call_type, CallType::Video);
            assert_eq!(call.display_name, "alice display");
        }
        _ => unreachable!(),
    }
    assert_eq!(bob.status().await.unwrap(), CallStatus::Ringing);

    bob.accept_call(CallType::Video).await.expect("accept");
    assert_eq!(bob.status().await.unwrap(), CallStatus::Connected);
    wait_for_status(&alice, CallStatus::Connected).await;

    // Keep the call up long enough for a countable duration.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    bob.end_call().await.expect("hangup");
    wait_for_status(&bob, CallStatus::Idle).await;
    wait_for_status(&alice, CallStatus::Idle).await;

    // Caller-side call log: answered, nonzero duration. Callee logs nothing.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let entries = log_a.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].content.starts_with("Chamada atendida"));
    assert!(!entries[0].content.contains("(00:00)"));
    assert_eq!(entries[0].room_id, "room1");
    drop(entries);
    assert!(log_b.lock().unwrap().is_empty());

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn unanswered_call_times_out_as_missed() {
    let relay_url = spawn_relay().await;
    let (collab, log) = collaborators();

    let (alice, mut events) = CallCoordinator::start(
        "alice",
        CoordinatorConfig::new(&relay_url).with_ring_timeout(Duration::from_millis(400)),
        collab,
    )
    .await
    .expect("alice connects");

    alice
        .start_call("room1", "ghost", CallType::Audio)
        .await
        .expect("call starts");

    wait_for_event(&mut events, |e| {
        matches!(
            e,
            CallEvent::CallEnded {
                reason: EndReason::Missed,
                ..
            }
        )
    })
    .await;
    assert_eq!(alice.status().await.unwrap(), CallStatus::Idle);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let entries = log.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "Chamada perdida");
    drop(entries);

    alice.stop().await;
}

#[tokio::test]
async fn rejected_call_reaches_idle_on_both_sides() {
    let relay_url = spawn_relay().await;
    let (collab_a, log_a) = collaborators();
    let (collab_b, log_b) = collaborators();

    let (alice, mut events_a) =
        CallCoordinator::start("alice", CoordinatorConfig::new(&relay_url), collab_a)
            .await
            .expect("alice connects");
    let (bob, mut events_b) =
        CallCoordinator::start("bob", CoordinatorConfig::new(&relay_url), collab_b)
            .await
            .expect("bob connects");

    alice
        .start_call("room1", "bob", CallType::Audio)
        .await
        .expect("call starts");
    wait_for_event(&mut events_b, |e| matches!(e, CallEvent::IncomingCall(_))).await;

    bob.reject_call().await.expect("reject");
    assert_eq!(bob.status().await.unwrap(), CallStatus::Idle);

    wait_for_event(&mut events_a, |e| {
        matches!(
            e,
            CallEvent::CallEnded {
                reason: EndReason::Declined,
                ..
            }
        )
    })
    .await;
    assert_eq!(alice.status().await.unwrap(), CallStatus::Idle);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let entries = log_a.lock().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].content, "Chamada recusada");
    drop(entries);
    assert!(log_b.lock().unwrap().is_empty());

    alice.stop().await;
    bob.stop().await;
}

#[tokio::test]
async fn notification_answer_auto_accepts_the_matching_request() {
    let relay_url = spawn_relay().await;
    let (collab_a, _log_a) = collaborators();
    let (collab_b, _log_b) = collaborators();

    let (alice, _events_a) =
        CallCoordinator::start("alice", CoordinatorConfig::new(&relay_url), collab_a)
            .await
            .expect("alice connects");
    let (bob, mut events_b) =
        CallCoordinator::start("bob", CoordinatorConfig::new(&relay_url), collab_b)
            .await
            .expect("bob connects");

    // Bob tapped "answer" on a push notification before any signaling.
    bob.notification_action(NotificationAction {
        action: "answer".to_string(),
        room_id: "room5".to_string(),
        call_type: CallType::Audio,
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice
        .start_call("room5", "bob", CallType::Audio)
        .await
        .expect("call starts");

    wait_for_status(&bob, CallStatus::Connected).await;
    wait_for_status(&alice, CallStatus::Connected).await;

    // The call connected without ever surfacing a ring.
    while let Ok(event) = events_b.try_recv() {
        assert!(!matches!(event, CallEvent::IncomingCall(_)));
    }

    alice.stop().await;
    bob.stop().await;
}
