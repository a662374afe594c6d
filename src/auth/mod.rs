//! Authentication Module
//!
//! Email/password accounts, JWT sessions and the admin/member role split.

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use user_store::UserStore;
