pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod utils;

pub use config::Config;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{create_admin_router, create_router, GatewayState};
