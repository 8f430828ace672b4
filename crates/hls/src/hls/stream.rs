use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use url::Url;

use crate::{
    decrypt::{Aes128Iv, Aes128Key},
    error::{HlsError, HlsResult},
    fetch::Fetcher,
    hls::segment::{Segment, SegmentHandle},
    util::resolve_url,
};

pub const DEFAULT_VERSION: u8 = 1;
pub const MAX_VERSION: u8 = 3;

#[derive(Debug, Clone)]
struct SegmentEntry {
    id: u64,
    duration: Option<u64>,
    handle: SegmentHandle,
}

#[derive(Debug)]
struct StreamState {
    bitrate: Option<u64>,
    version: u8,
    start_sequence: Option<u64>,
    target_duration: Option<u64>,
    cache_allowed: bool,
    live: bool,

    segments: Vec<SegmentEntry>,
    /// Sum of the known segment durations.
    duration: u64,
    unknown_durations: usize,
    size: Option<u64>,

    key_path: Option<Url>,
    iv: Option<Aes128Iv>,
}

/// One variant of the content, owning the ordered segments of its media
/// playlist.
///
/// The internal lock guards the segment list and the playlist attributes.
/// Segment I/O only takes the lock of the segment involved.
#[derive(Debug)]
pub struct Stream {
    id: u64,
    url: Url,
    state: Mutex<StreamState>,
}

impl Stream {
    pub fn new(id: u64, url: Url, bitrate: Option<u64>) -> Self {
        Self {
            id,
            url,
            state: Mutex::new(StreamState {
                bitrate,
                version: DEFAULT_VERSION,
                start_sequence: None,
                target_duration: None,
                cache_allowed: true,
                live: true,
                segments: Vec::new(),
                duration: 0,
                unknown_durations: 0,
                size: None,
                key_path: None,
                iv: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Program id from the master playlist, 0 for a lone media playlist.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Url of this variant's own media playlist.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Bits per second, if announced or estimated.
    pub fn bitrate(&self) -> Option<u64> {
        self.state().bitrate
    }

    pub fn version(&self) -> u8 {
        self.state().version
    }

    pub fn start_sequence(&self) -> u64 {
        self.state().start_sequence.unwrap_or(0)
    }

    pub fn target_duration(&self) -> Option<u64> {
        self.state().target_duration
    }

    pub fn cache_allowed(&self) -> bool {
        self.state().cache_allowed
    }

    pub fn live(&self) -> bool {
        self.state().live
    }

    pub fn key_path(&self) -> Option<Url> {
        self.state().key_path.clone()
    }

    pub fn num_segments(&self) -> usize {
        self.state().segments.len()
    }

    /// Total duration in seconds, `None` while any segment has an unknown
    /// duration.
    pub fn duration(&self) -> Option<u64> {
        let state = self.state();
        (state.unknown_durations == 0).then_some(state.duration)
    }

    pub fn get_segment(&self, index: usize) -> Option<SegmentHandle> {
        self.state()
            .segments
            .get(index)
            .map(|entry| entry.handle.clone())
    }

    /// Find a segment by its sequence id, returning its index as well.
    pub fn find_segment(&self, id: u64) -> Option<(usize, SegmentHandle)> {
        self.state()
            .segments
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.id == id)
            .map(|(index, entry)| (index, entry.handle.clone()))
    }

    pub fn last_segment_id(&self) -> Option<u64> {
        self.state().segments.last().map(|entry| entry.id)
    }

    pub fn segment_ids(&self) -> Vec<u64> {
        self.state().segments.iter().map(|entry| entry.id).collect()
    }

    pub(crate) fn set_version(&self, version: u8) {
        self.state().version = version;
    }

    /// Returns the previous start sequence, if one was set.
    pub(crate) fn set_start_sequence(&self, sequence: u64) -> Option<u64> {
        self.state().start_sequence.replace(sequence)
    }

    pub(crate) fn set_target_duration(&self, duration: u64) {
        self.state().target_duration = Some(duration);
    }

    pub(crate) fn set_cache_allowed(&self, allowed: bool) {
        self.state().cache_allowed = allowed;
    }

    pub(crate) fn set_ended(&self) {
        self.state().live = false;
    }

    pub(crate) fn set_key(&self, key_path: Option<Url>, iv: Option<Aes128Iv>) {
        let mut state = self.state();
        state.key_path = key_path;
        state.iv = iv;
    }

    /// Append a segment, resolving `uri` against this stream's url. The
    /// segment inherits the key currently in effect and gets the next
    /// sequence id. Returns that id.
    pub fn add_segment(
        &self,
        duration: Option<u64>,
        title: Option<String>,
        uri: &str,
    ) -> HlsResult<u64> {
        let url = resolve_url(&self.url, uri)?;

        let mut state = self.state();
        let id = state.segments.len() as u64 + state.start_sequence.unwrap_or(0);
        let segment = Segment::new(
            id,
            duration,
            title,
            url,
            state.key_path.clone(),
            state.iv,
        );
        push_entry(&mut state, segment);
        Ok(id)
    }

    /// Move the segments of `from` whose id is past `after` to the end of
    /// this stream, keeping their ids and keys. Returns the moved ids.
    pub(crate) fn adopt_segments(&self, from: &Stream, after: Option<u64>) -> Vec<u64> {
        let adopted: Vec<SegmentEntry> = {
            let mut from = from.state();
            let (adopted, kept) = std::mem::take(&mut from.segments)
                .into_iter()
                .partition(|entry| after.map_or(true, |after| entry.id > after));
            from.segments = kept;
            for entry in &adopted {
                match entry.duration {
                    Some(duration) => from.duration -= duration,
                    None => from.unknown_durations -= 1,
                }
            }
            from.size = None;
            adopted
        };

        let mut state = self.state();
        let ids = adopted.iter().map(|entry| entry.id).collect();
        for entry in adopted {
            match entry.duration {
                Some(duration) => state.duration += duration,
                None => state.unknown_durations += 1,
            }
            state.segments.push(entry);
        }
        state.size = None;
        ids
    }

    /// Remove the segment at `index`, freeing its buffer if `delete_data` is
    /// set. The removed handle is returned.
    pub async fn remove_segment(&self, index: usize, delete_data: bool) -> Option<SegmentHandle> {
        let entry = {
            let mut state = self.state();
            if index >= state.segments.len() {
                return None;
            }
            let entry = state.segments.remove(index);
            match entry.duration {
                Some(duration) => state.duration -= duration,
                None => state.unknown_durations -= 1,
            }
            state.size = None;
            entry
        };

        if delete_data {
            entry.handle.lock().await.clear();
        }
        Some(entry.handle)
    }

    /// Size of the stream in bytes. Downloaded segments count with their
    /// real size, the others are estimated from duration and bitrate.
    ///
    /// The value is cached until `force` is set or the segment list changes.
    pub async fn size(&self, force: bool) -> u64 {
        let (entries, bitrate) = {
            let state = self.state();
            if let (false, Some(size)) = (force, state.size) {
                return size;
            }
            (state.segments.clone(), state.bitrate)
        };

        let mut size = 0;
        for entry in entries {
            let segment = entry.handle.lock().await;
            size += if segment.is_downloaded() {
                segment.size() as u64
            } else {
                match (entry.duration, bitrate) {
                    (Some(duration), Some(bitrate)) => duration * bitrate / 8,
                    _ => 0,
                }
            };
        }

        self.state().size = Some(size);
        size
    }

    /// Download, and decrypt if needed, the segment at `index`.
    ///
    /// `bandwidth` holds the caller's current bandwidth estimate in bits per
    /// second and is replaced by the throughput measured for this download.
    /// It is left untouched when the fetch fails.
    pub async fn download_segment_data<F>(
        &self,
        index: usize,
        bandwidth: &mut Option<u64>,
        label: &str,
        fetcher: &F,
    ) -> HlsResult<()>
    where
        F: Fetcher,
    {
        let (entry, previous) = {
            let state = self.state();
            let entry = state
                .segments
                .get(index)
                .cloned()
                .ok_or(HlsError::SegmentOutOfRange(index))?;
            let previous = index
                .checked_sub(1)
                .and_then(|i| state.segments.get(i))
                .map(|entry| entry.handle.clone());
            (entry, previous)
        };

        let mut segment = entry.handle.lock().await;
        if segment.is_downloaded() {
            return Ok(());
        }

        if let (Some(bitrate), Some(current), Some(duration)) =
            (self.bitrate(), *bandwidth, entry.duration)
        {
            if current > 0 {
                let estimated = duration * bitrate / current;
                if estimated > duration {
                    tracing::warn!(
                        "{label}: downloading segment {} will take {estimated}s, longer than its {duration}s duration (bitrate {bitrate}, bandwidth {current})",
                        entry.id
                    );
                }
            }
        }

        let started = Instant::now();
        segment.download(fetcher).await?;
        let elapsed = started.elapsed();
        let downloaded = segment.size() as u64;

        if let Some(duration) = entry.duration.filter(|d| *d > 0) {
            let mut state = self.state();
            if state.bitrate.is_none() {
                let estimated = downloaded * 8 / duration;
                tracing::debug!("{label}: estimated bitrate of stream {}: {estimated}", self.id);
                state.bitrate = Some(estimated);
            }
        }

        if segment.key_path().is_some() {
            if !segment.key_loaded() {
                if let Err(e) = load_key(&mut segment, previous, fetcher).await {
                    tracing::error!(
                        "{label}: failed to load the key of segment {}: {e}",
                        entry.id
                    );
                    // leave the segment empty so the next call fetches again
                    segment.clear();
                    return Ok(());
                }
            }

            let iv = segment.iv();
            if let Err(e) = segment.decode_data(iv) {
                segment.clear();
                return Err(e);
            }
        }
        drop(segment);

        let micros = (elapsed.as_micros() as u64).max(1);
        *bandwidth = Some(downloaded * 8 * 1_000_000 / micros);
        tracing::debug!(
            "{label}: downloaded segment {} from stream {} ({downloaded} bytes in {micros}us)",
            entry.id,
            self.id
        );

        Ok(())
    }

    /// Load the keys of every encrypted segment in order. A segment whose key
    /// path equals the previous segment's reuses its key instead of fetching
    /// it again.
    pub async fn manage_segment_keys<F>(&self, fetcher: &F) -> HlsResult<()>
    where
        F: Fetcher,
    {
        let handles: Vec<_> = self
            .state()
            .segments
            .iter()
            .map(|entry| entry.handle.clone())
            .collect();

        let mut previous: Option<(Url, Aes128Key)> = None;
        for handle in handles {
            let mut segment = handle.lock().await;
            let Some(key_path) = segment.key_path().cloned() else {
                previous = None;
                continue;
            };

            if !segment.key_loaded() {
                match &previous {
                    Some((path, key)) if *path == key_path => segment.set_key(*key),
                    _ => segment.download_key(fetcher).await?,
                }
            }
            previous = segment.key().map(|key| (key_path, *key));
        }

        Ok(())
    }

    /// Merge the mutable attributes of a freshly parsed copy of the same
    /// playlist. The segment list is left alone.
    pub fn update_with(&self, fresh: &Stream) {
        let (target_duration, cache_allowed) = {
            let fresh = fresh.state();
            (fresh.target_duration, fresh.cache_allowed)
        };

        let mut state = self.state();
        if let Some(target_duration) = target_duration {
            state.target_duration = Some(target_duration);
        }
        state.cache_allowed = cache_allowed;
    }

    /// Index of the segment playback should start from.
    ///
    /// Live streams start no closer than three target durations from the
    /// end of the playlist.
    pub fn start_segment(&self) -> usize {
        let state = self.state();
        if !state.live {
            return 0;
        }

        let Some(target) = state.target_duration else {
            return 0;
        };
        let mut duration = 0;
        for (index, entry) in state.segments.iter().enumerate().rev() {
            duration += entry.duration.unwrap_or(0);
            if duration >= 3 * target {
                return index;
            }
        }
        0
    }
}

fn push_entry(state: &mut StreamState, segment: Segment) {
    match segment.duration() {
        Some(duration) => state.duration += duration,
        None => state.unknown_durations += 1,
    }
    state.size = None;
    state.segments.push(SegmentEntry {
        id: segment.id(),
        duration: segment.duration(),
        handle: Arc::new(tokio::sync::Mutex::new(segment)),
    });
}

/// Load the key of `segment`, borrowing it from the previous segment when
/// both point at the same key. A previous segment that is busy is not
/// waited for.
async fn load_key<F>(
    segment: &mut Segment,
    previous: Option<SegmentHandle>,
    fetcher: &F,
) -> HlsResult<()>
where
    F: Fetcher,
{
    let reusable = previous.and_then(|handle| {
        let previous = handle.try_lock().ok()?;
        let key = match (previous.key_path(), previous.key()) {
            (Some(path), Some(key)) if Some(path) == segment.key_path() => Some(*key),
            _ => None,
        };
        key
    });

    match reusable {
        Some(key) => {
            segment.set_key(key);
            Ok(())
        }
        None => segment.download_key(fetcher).await,
    }
}

/// Sort streams by bitrate, highest first. Streams with unknown bitrate go
/// last.
pub fn sort_by_bitrate(streams: &mut [Stream]) {
    streams.sort_by(|a, b| b.bitrate().cmp(&a.bitrate()));
}

/// Pick the best variant of `program_id` for the measured `bandwidth`: the
/// highest bitrate that fits, or the lowest bitrate when none does.
pub fn select_variant(streams: &[Stream], program_id: u64, bandwidth: u64) -> Option<usize> {
    let candidates = streams
        .iter()
        .enumerate()
        .filter(|(_, stream)| stream.id() == program_id)
        .map(|(index, stream)| (index, stream.bitrate().unwrap_or(0)));

    let mut best: Option<(usize, u64)> = None;
    let mut lowest: Option<(usize, u64)> = None;
    for (index, bitrate) in candidates {
        if bitrate <= bandwidth && best.map_or(true, |(_, b)| bitrate > b) {
            best = Some((index, bitrate));
        }
        if lowest.map_or(true, |(_, b)| bitrate < b) {
            lowest = Some((index, bitrate));
        }
    }

    best.or(lowest).map(|(index, _)| index)
}
