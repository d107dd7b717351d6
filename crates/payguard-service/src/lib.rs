//! Payguard HTTP service.
//!
//! Receives signed callbacks from the payment network, authenticates them
//! against the shared webhook secret and dispatches the typed events to an
//! [`payguard_core::EventHandler`]. Also owns startup of the signing key,
//! transport credentials and encryption material used for outbound calls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::{ApiError, StartupError};
pub use routes::create_router;
pub use state::AppState;
