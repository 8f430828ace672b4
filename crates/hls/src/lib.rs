//! HLS (draft-pantos-http-live-streaming, protocol version 1 to 3) engine.
//!
//! ```text
//! ┌──────────────────────┐  parse   ┌────────────────────┐
//! │                      ├──────────►  Stream (variant)  │
//! │    PlaylistParser    │          │                    │
//! │                      │  fetch   │  Segment 0         ├───┐
//! │  master ─► variants  ◄──────────┤  Segment 1         │   │download_segment_data
//! │  media  ─► segments  │          │  ...               ◄───┘
//! └──────────────────────┘          └─────────┬──────────┘
//!                                             │ Segment::read
//!                                             ▼
//!                                        demuxer / player
//! ```
pub mod decrypt;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod util;

pub use error::{ErrorKind, HlsError, HlsResult};
pub use fetch::Fetcher;
pub use hls::{is_playlist, PlaylistParser, Segment, SegmentHandle, Stream};
pub use util::http::HttpClient;
