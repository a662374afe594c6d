//! SelfiePro Backend Library
//!
//! Receipt-verified credit purchases and AI group selfies. Shared by the
//! API server, the admin CLI and the integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod gemini;
pub mod generations;
pub mod middleware;
pub mod payments;
