//! HTTP and WebSocket gateway.
//!
//! The gateway owns the context object shared by every handler and
//! background task, serves the chat/history routes, and pushes issue
//! summaries to subscribed WebSocket clients.

pub mod connection;
pub mod events;
pub mod refresh;
pub mod routes;
pub mod server;
pub mod state;

pub use events::{PushFrame, SummaryHub};
pub use server::{Gateway, GatewayHandle};
pub use state::GatewayState;
