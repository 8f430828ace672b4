pub mod attributes;
mod live;
mod parser;
pub mod segment;
mod stream;

pub use live::RefreshOutcome;
pub use parser::*;
pub use segment::{Segment, SegmentHandle};
pub use stream::*;
