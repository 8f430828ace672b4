use crate::{
    error::{HlsError, HlsResult},
    fetch::Fetcher,
    hls::{parser::PlaylistParser, stream::Stream},
};

/// What changed in a live stream after [`PlaylistParser::refresh_stream`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Ids of the segments appended to the stream.
    pub appended: Vec<u64>,
    /// Ids still held by the stream that fell out of the playlist window.
    /// They are not removed.
    pub expired: Vec<u64>,
    /// Whether the playlist is now finished.
    pub ended: bool,
}

impl<F> PlaylistParser<F>
where
    F: Fetcher,
{
    /// Re-fetch the media playlist of a live `stream` and merge it.
    ///
    /// Mutable attributes are merged with [`Stream::update_with`] and segments
    /// newer than the last known one are appended. Segments that slid out of
    /// the window are only reported, evicting them is up to the caller.
    pub async fn refresh_stream(&self, stream: &Stream) -> HlsResult<RefreshOutcome> {
        let bytes = self.fetcher().fetch(stream.url()).await?;
        let fresh = self.parse_copy(stream, &bytes)?;

        let old = stream.start_sequence();
        let new = fresh.start_sequence();
        if new < old {
            return Err(HlsError::SequenceRewind { old, new });
        }

        stream.update_with(&fresh);
        let appended = stream.adopt_segments(&fresh, stream.last_segment_id());
        if !fresh.live() {
            stream.set_ended();
        }

        let expired = stream
            .segment_ids()
            .into_iter()
            .filter(|id| *id < new)
            .collect();

        log::debug!(
            "Refreshed {}: {} new segment(s), media sequence {old} -> {new}",
            stream.url(),
            appended.len()
        );

        Ok(RefreshOutcome {
            appended,
            expired,
            ended: !stream.live(),
        })
    }
}
