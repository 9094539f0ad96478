// insintesi-client - authenticated HTTP client for the insintesi backend

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod session;

pub use client::ApiClient;
pub use config::Config;
pub use error::{ApiError, Result};
pub use session::SessionStore;
