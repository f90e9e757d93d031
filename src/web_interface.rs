//! JSON over HTTP interface.
//!
//! Unary procedures answer with a JSON body or an `{ "status", "message" }` error payload.
//! Server-streaming procedures answer with server-sent events. Session-scoped routes read the
//! caller's session from the `x-session-id` header.

pub mod routes;
pub mod types;
pub mod web_server;

pub use routes::{api, handle_rejection, Route};
pub use types::{ApiError, SESSION_HEADER};
pub use web_server::WebServer;
