pub mod actor;
pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;

pub use broadcast::{validate_notification, BroadcastEngine, BroadcastReport, Delivery, NotificationError};
pub use connection::{ChannelConnection, Connection, ConnectionError, ConnectionId, ConnectionSender};
pub use registry::{ConnectOutcome, ConnectionRegistry, DisconnectOutcome};
