use futures::future::join_all;
use url::Url;

use crate::{
    decrypt::{aes128_supported, parse_iv},
    error::{HlsError, HlsResult},
    fetch::Fetcher,
    hls::{
        attributes::AttributeList,
        stream::{Stream, DEFAULT_VERSION, MAX_VERSION},
    },
    util::{http::HttpClient, resolve_url},
};

const EXTM3U: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION";
const MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE";
const KEY: &str = "#EXT-X-KEY";
const PROGRAM_DATE_TIME: &str = "#EXT-X-PROGRAM-DATE-TIME";
const ALLOW_CACHE: &str = "#EXT-X-ALLOW-CACHE";
const STREAM_INF: &str = "#EXT-X-STREAM-INF";
const DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";
const VERSION: &str = "#EXT-X-VERSION";
const ENDLIST: &str = "#EXT-X-ENDLIST";

/// Tags whose presence after `#EXTM3U` marks a buffer as an HLS playlist.
const STRUCTURAL_TAGS: [&str; 8] = [
    TARGET_DURATION,
    MEDIA_SEQUENCE,
    KEY,
    ALLOW_CACHE,
    ENDLIST,
    STREAM_INF,
    DISCONTINUITY,
    VERSION,
];

/// Check whether `buffer` looks like an HLS playlist without parsing it.
pub fn is_playlist(buffer: &[u8]) -> bool {
    let buffer = buffer.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(buffer);
    if !buffer.starts_with(EXTM3U.as_bytes()) {
        return false;
    }

    buffer
        .split(|b| *b == b'\n')
        .skip(1)
        .map(|line| line.trim_ascii_start())
        .any(|line| {
            STRUCTURAL_TAGS
                .iter()
                .any(|tag| line.starts_with(tag.as_bytes()))
        })
}

/// State shared by a master playlist parse and the parses of its variants.
struct ParseContext {
    /// Url relative variant uris are resolved against.
    base: Url,
    is_master: bool,
    crypto_warned: bool,
}

/// Turns playlist bytes into [`Stream`]s, fetching variant playlists of a
/// master playlist through `F`.
pub struct PlaylistParser<F = HttpClient> {
    fetcher: F,
    aes128: bool,
}

impl<F> PlaylistParser<F>
where
    F: Fetcher,
{
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            aes128: aes128_supported(),
        }
    }

    /// Accept or reject AES-128 encrypted playlists.
    pub fn with_aes128(mut self, enabled: bool) -> Self {
        if enabled && !aes128_supported() {
            log::warn!("AES-128 requested but this build has no decryption support.");
        }
        self.aes128 = enabled && aes128_supported();
        self
    }

    pub fn aes128(&self) -> bool {
        self.aes128
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Parse the playlist at `url`, appending the resulting streams.
    ///
    /// A master playlist yields one stream per usable variant. Each variant
    /// playlist is fetched concurrently and parsed before this returns.
    pub async fn parse(&self, url: &Url, buffer: &[u8], streams: &mut Vec<Stream>) -> HlsResult<()> {
        let text = String::from_utf8_lossy(buffer);
        let lines = playlist_lines(&text)?;

        let mut context = ParseContext {
            base: url.clone(),
            is_master: lines.iter().any(|line| line.starts_with(STREAM_INF)),
            crypto_warned: false,
        };

        if context.is_master {
            log::info!("Master playlist input detected.");
            self.parse_master(&mut context, &lines, streams).await
        } else {
            let stream = Stream::new(0, url.clone(), None);
            self.parse_media(&mut context, &lines, &stream);
            streams.push(stream);
            Ok(())
        }
    }

    /// Parse a fresh copy of the media playlist behind `stream` without
    /// touching `stream` itself.
    pub(crate) fn parse_copy(&self, stream: &Stream, buffer: &[u8]) -> HlsResult<Stream> {
        let text = String::from_utf8_lossy(buffer);
        let lines = playlist_lines(&text)?;
        if lines.iter().any(|line| line.starts_with(STREAM_INF)) {
            return Err(HlsError::NestedVariantPlaylist(stream.url().clone()));
        }

        let mut context = ParseContext {
            base: stream.url().clone(),
            is_master: false,
            crypto_warned: false,
        };
        let fresh = Stream::new(stream.id(), stream.url().clone(), stream.bitrate());
        self.parse_media(&mut context, &lines, &fresh);
        Ok(fresh)
    }

    async fn parse_master(
        &self,
        context: &mut ParseContext,
        lines: &[&str],
        streams: &mut Vec<Stream>,
    ) -> HlsResult<()> {
        let mut variants = Vec::new();
        let mut lines = lines.iter().peekable();
        while let Some(line) = lines.next() {
            let Some(attributes) = line.strip_prefix(STREAM_INF) else {
                continue;
            };

            // the uri belongs to this entry only if no other STREAM-INF comes first
            let mut uri = None;
            while let Some(next) = lines.next_if(|line| !line.starts_with(STREAM_INF)) {
                if !next.is_empty() && !next.starts_with('#') {
                    uri = Some(*next);
                    break;
                }
            }
            let Some(uri) = uri else {
                log::warn!("Skipping variant {attributes:?}: {STREAM_INF} is not followed by a uri.");
                continue;
            };

            let attributes = attributes.strip_prefix(':').unwrap_or(attributes);
            match parse_stream_inf(&context.base, attributes, uri) {
                Ok(stream) => variants.push(stream),
                Err(e) => log::warn!("Skipping variant {uri}: {e}"),
            }
        }

        let playlists = join_all(
            variants
                .iter()
                .map(|stream| self.fetcher.fetch(stream.url())),
        )
        .await;

        let mut parsed = 0;
        let mut last_error = None;
        for (stream, playlist) in variants.into_iter().zip(playlists) {
            let result = playlist.and_then(|bytes| {
                let text = String::from_utf8_lossy(&bytes);
                let lines = playlist_lines(&text)?;
                if lines.iter().any(|line| line.starts_with(STREAM_INF)) {
                    return Err(HlsError::NestedVariantPlaylist(stream.url().clone()));
                }
                self.parse_media(context, &lines, &stream);
                Ok(())
            });

            match result {
                Ok(()) => {
                    log::info!(
                        "Variant {url}; Bandwidth: {bandwidth}",
                        url = stream.url(),
                        bandwidth = stream.bitrate().unwrap_or(0)
                    );
                    streams.push(stream);
                    parsed += 1;
                }
                Err(e) => {
                    log::warn!("Failed to load variant {}: {e}", stream.url());
                    last_error = Some(e);
                }
            }
        }

        if parsed == 0 {
            return Err(last_error.unwrap_or(HlsError::NoVariant));
        }
        Ok(())
    }

    /// Fill `stream` from the lines of a media playlist. Tag errors are
    /// logged and the offending tag is skipped.
    fn parse_media(&self, context: &mut ParseContext, lines: &[&str], stream: &Stream) {
        stream.set_version(scan_version(lines));

        // The target duration must be known before the first segment.
        if let Some(value) = lines
            .iter()
            .find_map(|line| line.strip_prefix(TARGET_DURATION))
        {
            if let Err(e) = parse_target_duration(stream, tag_value(value)) {
                log::warn!("{e}");
            }
        }

        let mut pending: Option<(Option<u64>, Option<String>)> = None;
        for line in lines.iter().skip(1) {
            if line.is_empty() {
                continue;
            }

            if line.starts_with('#') {
                if let Err(e) = self.parse_tag(context, stream, line, &mut pending) {
                    log::warn!("{e}");
                }
                continue;
            }

            let (duration, title) = pending.take().unwrap_or((None, None));
            if let Err(e) = stream.add_segment(duration, title, line) {
                log::warn!("Skipping segment {line}: {e}");
            }
        }
    }

    fn parse_tag(
        &self,
        context: &mut ParseContext,
        stream: &Stream,
        line: &str,
        pending: &mut Option<(Option<u64>, Option<String>)>,
    ) -> HlsResult<()> {
        let (tag, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.trim();

        match tag {
            EXTINF => {
                *pending = Some(parse_extinf(value, stream.version())?);
            }
            TARGET_DURATION => parse_target_duration(stream, value)?,
            MEDIA_SEQUENCE => {
                let sequence = value
                    .parse::<u64>()
                    .map_err(|e| HlsError::invalid_tag("EXT-X-MEDIA-SEQUENCE", e.to_string()))?;
                match stream.set_start_sequence(sequence) {
                    Some(old) if sequence < old => {
                        stream.set_start_sequence(old);
                        return Err(HlsError::SequenceRewind { old, new: sequence });
                    }
                    Some(old) if !stream.live() => {
                        log::warn!("{MEDIA_SEQUENCE} already present in playlist (new={sequence}, old={old})");
                    }
                    _ => {}
                }
            }
            KEY => self.parse_key(context, stream, value)?,
            PROGRAM_DATE_TIME => match chrono::DateTime::parse_from_rfc3339(value) {
                Ok(time) => log::debug!("{PROGRAM_DATE_TIME}: {time}"),
                Err(e) => {
                    return Err(HlsError::invalid_tag(
                        "EXT-X-PROGRAM-DATE-TIME",
                        format!("{value}: {e}"),
                    ))
                }
            },
            ALLOW_CACHE => match value {
                "YES" => stream.set_cache_allowed(true),
                "NO" => stream.set_cache_allowed(false),
                _ => {
                    return Err(HlsError::invalid_tag(
                        "EXT-X-ALLOW-CACHE",
                        format!("expected YES or NO, got {value:?}"),
                    ))
                }
            },
            DISCONTINUITY => log::debug!("{DISCONTINUITY} after segment {}", stream.num_segments()),
            VERSION => stream.set_version(parse_version(value)?),
            ENDLIST => {
                stream.set_ended();
                log::debug!("{ENDLIST}: stream {} is not live", stream.id());
            }
            EXTM3U => {}
            _ if tag.starts_with("#EXT") => log::debug!("Ignoring unsupported tag {tag}"),
            _ => {}
        }

        Ok(())
    }

    fn parse_key(&self, context: &mut ParseContext, stream: &Stream, value: &str) -> HlsResult<()> {
        let attributes = AttributeList::parse(value);
        let method = attributes
            .get("METHOD")
            .ok_or(HlsError::MissingAttribute {
                tag: "EXT-X-KEY",
                attribute: "METHOD",
            })?;

        match method {
            "NONE" => {
                if attributes.contains("URI") || attributes.contains("IV") {
                    return Err(HlsError::invalid_tag(
                        "EXT-X-KEY",
                        "METHOD=NONE must not carry URI or IV",
                    ));
                }
                stream.set_key(None, None);
            }
            "AES-128" => {
                if !self.aes128 {
                    if !context.crypto_warned {
                        log::error!("Playlist is encrypted with AES-128 but decryption is disabled.");
                        context.crypto_warned = true;
                    }
                    return Err(HlsError::Aes128Unavailable);
                }

                let uri = attributes.get("URI").ok_or(HlsError::MissingAttribute {
                    tag: "EXT-X-KEY",
                    attribute: "URI",
                })?;
                let key_path = resolve_url(stream.url(), uri)?;
                let iv = attributes.get("IV").map(parse_iv).transpose()?;
                stream.set_key(Some(key_path), iv);
            }
            other => return Err(HlsError::UnsupportedKeyMethod(other.to_string())),
        }

        Ok(())
    }
}

/// Split a playlist into trimmed lines, checking the `#EXTM3U` header.
fn playlist_lines(text: &str) -> HlsResult<Vec<&str>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    match lines.first() {
        Some(first) if first.starts_with(EXTM3U) => Ok(lines),
        _ => Err(HlsError::MissingHeader),
    }
}

fn tag_value(rest: &str) -> &str {
    rest.strip_prefix(':').unwrap_or(rest).trim()
}

/// Protocol version announced anywhere in the playlist. Falls back to
/// version 1 when the tag is missing or unusable.
fn scan_version(lines: &[&str]) -> u8 {
    let Some(value) = lines.iter().find_map(|line| line.strip_prefix(VERSION)) else {
        log::warn!("{VERSION} not found, assuming version {DEFAULT_VERSION}.");
        return DEFAULT_VERSION;
    };

    match parse_version(tag_value(value)) {
        Ok(version) => version,
        Err(e) => {
            log::warn!("{e}, assuming version {DEFAULT_VERSION}.");
            DEFAULT_VERSION
        }
    }
}

fn parse_version(value: &str) -> HlsResult<u8> {
    let version = value
        .parse::<u8>()
        .map_err(|e| HlsError::invalid_tag("EXT-X-VERSION", format!("{value:?}: {e}")))?;
    if !(DEFAULT_VERSION..=MAX_VERSION).contains(&version) {
        return Err(HlsError::invalid_tag(
            "EXT-X-VERSION",
            format!("unsupported version {version}"),
        ));
    }
    Ok(version)
}

fn parse_target_duration(stream: &Stream, value: &str) -> HlsResult<()> {
    let duration = value
        .parse::<u64>()
        .map_err(|e| HlsError::invalid_tag("EXT-X-TARGETDURATION", format!("{value:?}: {e}")))?;
    stream.set_target_duration(duration);
    Ok(())
}

/// Parse `<duration>,<title>`. Before version 3 only the integer part of the
/// duration counts; from version 3 it is rounded to the nearest second. A
/// negative duration means unknown.
fn parse_extinf(value: &str, version: u8) -> HlsResult<(Option<u64>, Option<String>)> {
    let (duration, title) = value
        .split_once(',')
        .ok_or_else(|| HlsError::invalid_tag("EXTINF", format!("missing ',' in {value:?}")))?;
    let duration = duration.trim();

    let duration = if duration.starts_with('-') {
        None
    } else if version < 3 {
        let integer = duration.split('.').next().unwrap_or(duration);
        Some(
            integer
                .parse::<u64>()
                .map_err(|e| HlsError::invalid_tag("EXTINF", format!("{duration:?}: {e}")))?,
        )
    } else {
        let seconds = duration
            .parse::<f64>()
            .map_err(|e| HlsError::invalid_tag("EXTINF", format!("{duration:?}: {e}")))?;
        if !seconds.is_finite() {
            return Err(HlsError::invalid_tag("EXTINF", format!("{duration:?}")));
        }
        Some((seconds + 0.5).floor() as u64)
    };

    let title = title.trim();
    let title = (!title.is_empty()).then(|| title.to_string());
    Ok((duration, title))
}

fn parse_stream_inf(base: &Url, attributes: &str, uri: &str) -> HlsResult<Stream> {
    let attributes = AttributeList::parse(attributes);
    let program_id = attributes
        .get("PROGRAM-ID")
        .ok_or(HlsError::MissingAttribute {
            tag: "EXT-X-STREAM-INF",
            attribute: "PROGRAM-ID",
        })?
        .parse::<u64>()
        .map_err(|e| HlsError::invalid_tag("EXT-X-STREAM-INF", format!("PROGRAM-ID: {e}")))?;
    let bandwidth = attributes
        .get("BANDWIDTH")
        .ok_or(HlsError::MissingAttribute {
            tag: "EXT-X-STREAM-INF",
            attribute: "BANDWIDTH",
        })?
        .parse::<u64>()
        .map_err(|e| HlsError::invalid_tag("EXT-X-STREAM-INF", format!("BANDWIDTH: {e}")))?;
    if bandwidth == 0 {
        return Err(HlsError::ZeroBandwidth);
    }

    Ok(Stream::new(
        program_id,
        resolve_url(base, uri)?,
        Some(bandwidth),
    ))
}
