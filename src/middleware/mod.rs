//! Request middleware for the admin server.

pub mod auth;

pub use auth::{AdminToken, RequireAdmin};
