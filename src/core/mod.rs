pub mod audio;
pub mod pool;
pub mod realtime;
pub mod response;
pub mod router;
pub mod telephony;
pub mod vad;

// Re-export commonly used types for convenience
pub use audio::{AudioHandlerConfig, AudioStreamHandler, BridgeKind, CallRecorder};
pub use pool::{ConnectionPool, PoolConfig, PoolConnector, PoolError};
pub use realtime::{
    ClientEvent, RealtimeConnector, RealtimeError, RealtimeResult, RealtimeSettings, ServerEvent,
    TurnDetectionMode, UpstreamConnection,
};
pub use response::{ResponseLifecycle, UserInput};
pub use router::{BridgeEvent, EventRouter, EventSide, EventType};
pub use telephony::{TelephonyIncomingMessage, TelephonyOutgoingMessage, TelephonyRoute};
pub use vad::{VADConfig, VoiceActivityDetector};
