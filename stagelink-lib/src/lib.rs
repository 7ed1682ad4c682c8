pub mod api;
pub mod config;
pub mod device;
pub mod device_info;
pub mod error;
pub mod inputs;
pub mod legacy;
pub mod packet;
mod scheduler;

// Re-export the session types for easy access
pub use device::{StageSession, StageTransport};
