pub mod live;
pub mod traits;

pub use live::{run_live_filter, LiveCapture, LiveCaptureFilter, LiveStats};
pub use traits::FrameFilter;
