// Shared types and seams between the capture logic and the compositor transport

pub mod error;
pub mod frame;
pub mod output;
pub mod transport;

pub use error::CaptureError;
