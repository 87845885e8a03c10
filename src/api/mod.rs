mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;
mod validation;

pub use error::ApiError;
pub use server::{router, run, shutdown_signal};
pub use state::AppState;
