//! catapt server: configuration, application state and the axum router.
//!
//! The binary in `main.rs` is a thin CLI over these pieces; integration
//! tests build [`state::AppState`] with fake collaborators and drive
//! [`http::create_router`] directly.

pub mod config;
pub mod http;
pub mod state;

pub use config::Config;
pub use http::create_router;
pub use state::{AppState, Collaborators};
