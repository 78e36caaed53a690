pub mod btle;
pub mod connection;
pub mod constants;
pub mod mock;
pub mod payload;
pub mod platform;
pub mod relay;
pub mod types;
