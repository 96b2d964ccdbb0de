//! Route handlers for the HTTP API.

pub mod admin;
pub mod events;
pub mod health;
pub mod media;
pub mod stream;
