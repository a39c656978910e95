pub mod api;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod observability;
pub mod session;
pub mod transport;

pub use api::chat::{CallLogEntry, CallLogSink, HttpCallLogSink};
pub use api::users::{HttpUserDirectory, UserDirectory};
pub use api::ApiContext;
pub use coordinator::{CallCoordinator, Collaborators, CoordinatorConfig, DEFAULT_RING_TIMEOUT};
pub use error::CallError;
pub use events::{CallEvent, EndReason, IncomingCall, MediaControls, NotificationAction};
pub use session::{CallRole, CallStatus};
pub use transport::{SignalingSender, SignalingTransport, TransportEvent};
