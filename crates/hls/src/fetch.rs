use std::{future::Future, sync::Arc};

use bytes::Bytes;
use url::Url;

use crate::{
    error::{HlsError, HlsResult},
    util::http::HttpClient,
};

/// A single synchronous GET. No pooling or retry happens at this layer.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send;
}

impl Fetcher for HttpClient {
    fn fetch(&self, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send {
        let request = self.get(url.clone());
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(HlsError::HttpError(status));
            }

            let bytes = response.bytes().await?;
            Ok(bytes)
        }
    }
}

impl<F> Fetcher for &F
where
    F: Fetcher,
{
    fn fetch(&self, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send {
        (**self).fetch(url)
    }
}

impl<F> Fetcher for Arc<F>
where
    F: Fetcher,
{
    fn fetch(&self, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send {
        self.as_ref().fetch(url)
    }
}
