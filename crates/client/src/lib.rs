// fresco-client: real-time collaboration session client.
//
// Maintains an authenticated WebSocket connection to the collaboration
// backend, recovers from transient failures with exponential backoff,
// and fans inbound protocol messages out to registered subscribers.

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod rest;
pub mod session;
pub mod transport;
