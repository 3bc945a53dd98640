// Subscriber registry and result transport for beatwire.

pub mod error;
pub mod publisher;
pub mod registry;
pub mod server;
pub mod subscriber;

pub use error::BroadcastError;
pub use publisher::{Publisher, ResultTap};
pub use registry::{SubscriberId, SubscriberRegistry};
pub use server::BroadcastServer;
pub use subscriber::{Subscriber, WsSubscriber};
