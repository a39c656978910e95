use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use shared_proto::signaling::CallType;
use thiserror::Error;

use crate::track::{LocalTrack, MediaStream, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl From<CallType> for MediaConstraints {
    fn from(call_type: CallType) -> Self {
        match call_type {
            CallType::Audio => Self {
                audio: true,
                video: false,
            },
            CallType::Video => Self {
                audio: true,
                video: true,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no {0} device available")]
    NoDevice(&'static str),

    #[error("media backend failure: {0}")]
    Backend(String),
}

/// Device acquisition seam. The engine never talks to capture hardware
/// directly; it asks for a stream matching the constraints and releases the
/// tracks when the session ends.
pub trait MediaDevices: Send + Sync {
    fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// Camera backends plug in here; the engine only needs a label and an
/// open check, capture itself stays outside this crate.
pub trait VideoSource: Send + Sync {
    fn label(&self) -> String;
    fn open(&self) -> Result<(), MediaError>;
}

/// cpal-backed implementation: microphone presence/selection through the
/// host audio API, camera through an optional [`VideoSource`].
pub struct SystemMediaDevices {
    input_device: Option<String>,
    video_source: Option<Arc<dyn VideoSource>>,
}

impl SystemMediaDevices {
    pub fn new() -> Self {
        Self {
            input_device: None,
            video_source: None,
        }
    }

    pub fn with_input_device(mut self, name: Option<String>) -> Self {
        self.input_device = name;
        self
    }

    pub fn with_video_source(mut self, source: Option<Arc<dyn VideoSource>>) -> Self {
        self.video_source = source;
        self
    }

    fn resolve_input_label(&self) -> Result<String, MediaError> {
        let host = cpal::default_host();
        let device = match &self.input_device {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| MediaError::Backend(e.to_string()))?
                .find(|d| d.name().map(|n| n == *wanted).unwrap_or(false)),
            None => host.default_input_device(),
        };
        let device = device.ok_or(MediaError::NoDevice("microphone"))?;
        device.name().map_err(|e| MediaError::Backend(e.to_string()))
    }
}

impl Default for SystemMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaDevices for SystemMediaDevices {
    fn get_user_media(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        let mut tracks = Vec::new();

        if constraints.audio {
            let label = self.resolve_input_label()?;
            tracing::info!(component = "media.devices", device = %label, "acquired microphone");
            tracks.push(LocalTrack::new(TrackKind::Audio, label));
        }

        if constraints.video {
            let source = self
                .video_source
                .as_ref()
                .ok_or(MediaError::NoDevice("camera"))?;
            source.open()?;
            tracing::info!(component = "media.devices", device = %source.label(), "acquired camera");
            tracks.push(LocalTrack::new(TrackKind::Video, source.label()));
        }

        Ok(MediaStream::new(tracks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_type_maps_to_constraints() {
        let audio = MediaConstraints::from(CallType::Audio);
        assert!(audio.audio && !audio.video);

        let video = MediaConstraints::from(CallType::Video);
        assert!(video.audio && video.video);
    }

    #[test]
    fn video_call_without_camera_source_fails() {
        let devices = SystemMediaDevices::new();
        let result = devices.get_user_media(MediaConstraints {
            audio: false,
            video: true,
        });
        assert!(matches!(result, Err(MediaError::NoDevice("camera"))));
    }
}
