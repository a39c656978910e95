pub mod config;
pub mod devices;
pub mod peer;
pub mod track;

pub use config::{ice_servers_from_env, IceServerConfig};
pub use devices::{MediaConstraints, MediaDevices, MediaError, SystemMediaDevices, VideoSource};
pub use peer::{NegotiationRole, PeerError, PeerLink, PeerState, RemoteTrack};
pub use track::{LocalTrack, MediaStream, TrackKind};
