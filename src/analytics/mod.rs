mod annotate;
mod object;
mod pipeline;
mod presence;

pub use object::{Device, PersonDetector};
pub use pipeline::spawn_pipeline;
