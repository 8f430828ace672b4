mod live;
mod segment;

use crate::common::MemoryFetcher;
use iori_hls::{PlaylistParser, Stream};
use url::Url;

const PLAYLIST: &str = "http://example.com/live/index.m3u8";

/// Parse `body` as the media playlist at [`PLAYLIST`].
async fn media_stream(fetcher: &MemoryFetcher, body: &str) -> anyhow::Result<Stream> {
    let parser = PlaylistParser::new(fetcher);
    let url = Url::parse(PLAYLIST)?;

    let mut streams = Vec::new();
    parser.parse(&url, body.as_bytes(), &mut streams).await?;
    Ok(streams.remove(0))
}

fn segment_url(name: &str) -> String {
    format!("http://example.com/live/{name}")
}
