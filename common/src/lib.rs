pub mod config;
pub mod encode;
pub mod frame;

pub use frame::{Frame, FrameError};
