// Authentication: token endpoint calls and refresh coordination

pub mod exchange;
pub mod types;

pub(crate) mod single_flight;

pub use types::TokenResponse;
