pub mod broker;
pub mod store;

pub use broker::{Broker, BrokerStats, Consumer, Delivery};
pub use store::{DeadLetter, FjallQueue, QueueError};
