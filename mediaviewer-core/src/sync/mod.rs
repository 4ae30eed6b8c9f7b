pub mod heartbeat;
pub mod store;

pub use heartbeat::HeartbeatInferrer;
pub use store::{SocketId, SyncStore};
