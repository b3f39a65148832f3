//! HTTP handlers for loyalty-service.

pub mod auth;
pub mod health;
pub mod loyalty;

pub use auth::*;
pub use health::*;
pub use loyalty::*;
