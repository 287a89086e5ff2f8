// # garage-relay
//
// HTTP index and websocket broadcast relay for the garage controller.
//
// - **ClientRegistry**: Live websocket clients keyed by `ClientId`
// - **protocol**: The time snapshot and the `{"cmd": ...}` client commands
// - **server**: axum router for `/`, `/ws` and `/static`
//
// Broadcast never aborts on a dead client. Failures are collected and the
// caller prunes them from the registry.

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;

pub use error::{RelayError, Result};
pub use protocol::{ClientCommand, TimeSnapshot};
pub use registry::{BroadcastFailure, ClientId, ClientRegistry};
pub use server::{RelayState, create_router, serve};
