//! Shared test servers.

pub mod mock_rest;
pub mod mock_socketio;
