pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod pipeline;
pub mod store;
pub mod table;
pub mod transform;
pub mod verify;
