mod capture;

pub use capture::{VideoError, VideoSource};
