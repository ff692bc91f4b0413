//! HTTP surface of the broker: router, handler errors, audit trail, server.

pub mod audit;
mod error;
mod router;
mod server;

pub use error::BrokerError;
pub use router::{AppState, create_router};
pub use server::Broker;
