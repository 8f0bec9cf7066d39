pub mod config;
pub mod errors;
pub mod events;
pub mod relay;

pub use config::Config;
pub use errors::{RelayError, Result};
pub use relay::serve;
