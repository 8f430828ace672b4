pub mod http;

use url::Url;

use crate::error::HlsResult;

/// Resolve a playlist reference against the playlist it appeared in.
///
/// Absolute references are returned as-is, so resolving an already resolved
/// url is a no-op.
pub fn resolve_url(base: &Url, reference: &str) -> HlsResult<Url> {
    Ok(base.join(reference.trim())?)
}
