use thiserror::Error;

#[derive(Error, Debug)]
pub enum HlsError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Playlist does not start with #EXTM3U")]
    MissingHeader,

    #[error("Invalid {tag} tag: {reason}")]
    InvalidTag { tag: &'static str, reason: String },

    #[error("Missing attribute {attribute} in {tag}")]
    MissingAttribute {
        tag: &'static str,
        attribute: &'static str,
    },

    #[error("Variant declares zero bandwidth")]
    ZeroBandwidth,

    #[error("Variant playlist {0} contains EXT-X-STREAM-INF")]
    NestedVariantPlaylist(url::Url),

    #[error("No usable variant found in master playlist")]
    NoVariant,

    #[error("Media sequence went backwards: {old} -> {new}")]
    SequenceRewind { old: u64, new: u64 },

    #[error("Segment index {0} is out of range")]
    SegmentOutOfRange(usize),

    #[error("Unsupported key method: {0}")]
    UnsupportedKeyMethod(String),

    #[error("AES-128 decryption is not available")]
    Aes128Unavailable,

    #[error("Decryption key required")]
    DecryptionKeyRequired,

    #[error("Invalid AES-128 key size: {0} bytes")]
    InvalidKeySize(usize),

    #[error("Invalid IV: {0}")]
    InvalidIv(String),

    #[error("Invalid PKCS#7 padding value: {0}")]
    InvalidPadding(u8),

    #[error("AES-128-CBC decryption failed")]
    DecryptionFailed,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

/// Coarse classification used by callers to decide between retrying,
/// skipping and reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Network,
    Crypto,
    Io,
    Other,
}

impl HlsError {
    pub(crate) fn invalid_tag(tag: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidTag {
            tag,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HlsError::MissingHeader
            | HlsError::InvalidTag { .. }
            | HlsError::MissingAttribute { .. }
            | HlsError::ZeroBandwidth
            | HlsError::NestedVariantPlaylist(_)
            | HlsError::NoVariant
            | HlsError::SequenceRewind { .. }
            | HlsError::UnsupportedKeyMethod(_)
            | HlsError::InvalidIv(_)
            | HlsError::UrlParseError(_)
            | HlsError::HexDecodeError(_) => ErrorKind::Parse,
            HlsError::HttpError(_) | HlsError::RequestError(_) => ErrorKind::Network,
            HlsError::Aes128Unavailable
            | HlsError::DecryptionKeyRequired
            | HlsError::InvalidKeySize(_)
            | HlsError::InvalidPadding(_)
            | HlsError::DecryptionFailed => ErrorKind::Crypto,
            HlsError::IOError(_) => ErrorKind::Io,
            HlsError::SegmentOutOfRange(_) => ErrorKind::Other,
        }
    }
}

pub type HlsResult<T> = Result<T, HlsError>;
