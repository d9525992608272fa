pub mod analysis;
pub mod assessment;
pub mod config;
pub mod error;
pub mod interpolate;
pub mod message;
pub mod metrics;
pub mod secrets;
pub mod server;
pub mod types;
pub mod weights;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
