use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static TRACK_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// One locally-captured track. The engine only depends on its kind, its
/// enabled flag (mute/video toggling) and its stopped flag (release).
#[derive(Debug)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl LocalTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Arc<Self> {
        let seq = TRACK_SEQ.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id: format!("{}-{}", kind.as_str(), seq),
            kind,
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the enabled flag, returning the new value.
    pub fn toggle(&self) -> bool {
        let was = self.enabled.fetch_xor(true, Ordering::SeqCst);
        !was
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// A bundle of local tracks acquired in one `get_user_media` call.
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<LocalTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn first_track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.first_track(kind).is_some()
    }

    /// Stop every track. Idempotent; the final step of all teardown paths.
    pub fn release(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
