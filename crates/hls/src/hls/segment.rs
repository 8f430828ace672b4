use std::{
    io::{self, Write},
    sync::Arc,
};

use tokio::sync::Mutex;
use url::Url;

use crate::{
    decrypt::{
        aes128_cbc_decrypt, key_from_bytes, pkcs7_unpadded_len, sequence_iv, Aes128Iv, Aes128Key,
    },
    error::{HlsError, HlsResult},
    fetch::Fetcher,
};

/// A segment shared between the owning stream, download workers and the
/// reader. The mutex guards the buffer and the read cursor.
pub type SegmentHandle = Arc<Mutex<Segment>>;

/// One downloadable and independently decryptable media unit.
///
/// An empty buffer means the segment still needs to be downloaded.
#[derive(Debug)]
pub struct Segment {
    id: u64,
    duration: Option<u64>,
    title: Option<String>,
    url: Url,

    data: Vec<u8>,
    played_offset: usize,

    key_path: Option<Url>,
    iv: Option<Aes128Iv>,
    key: Option<Aes128Key>,
}

impl Segment {
    pub(crate) fn new(
        id: u64,
        duration: Option<u64>,
        title: Option<String>,
        url: Url,
        key_path: Option<Url>,
        iv: Option<Aes128Iv>,
    ) -> Self {
        Self {
            id,
            duration,
            title,
            url,
            data: Vec::new(),
            played_offset: 0,
            key_path,
            iv,
            key: None,
        }
    }

    /// Media sequence number of this segment.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Duration in whole seconds, `None` if the playlist did not say.
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn key_path(&self) -> Option<&Url> {
        self.key_path.as_ref()
    }

    /// IV declared by the `EXT-X-KEY` tag in effect for this segment.
    pub fn iv(&self) -> Option<Aes128Iv> {
        self.iv
    }

    pub fn key(&self) -> Option<&Aes128Key> {
        self.key.as_ref()
    }

    pub fn key_loaded(&self) -> bool {
        self.key.is_some()
    }

    pub fn is_downloaded(&self) -> bool {
        !self.data.is_empty()
    }

    /// Number of buffered bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn played_offset(&self) -> usize {
        self.played_offset
    }

    /// Bytes left for the reader.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.played_offset
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn set_key(&mut self, key: Aes128Key) {
        self.key = Some(key);
    }

    /// Drop buffered data so that the next [`Segment::download`] fetches again.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.played_offset = 0;
    }

    /// Fetch the segment body. Does nothing if data is already buffered.
    pub async fn download<F>(&mut self, fetcher: &F) -> HlsResult<()>
    where
        F: Fetcher,
    {
        if self.is_downloaded() {
            return Ok(());
        }

        match fetcher.fetch(&self.url).await {
            Ok(bytes) => {
                self.data = bytes.into();
                self.played_offset = 0;
                Ok(())
            }
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    /// Fetch the AES-128 key referenced by this segment unless it is already
    /// loaded.
    pub async fn download_key<F>(&mut self, fetcher: &F) -> HlsResult<()>
    where
        F: Fetcher,
    {
        if self.key_loaded() {
            return Ok(());
        }
        let key_path = self
            .key_path
            .as_ref()
            .ok_or(HlsError::DecryptionKeyRequired)?;

        let bytes = fetcher.fetch(key_path).await?;
        self.key = Some(key_from_bytes(&bytes)?);
        Ok(())
    }

    /// Decrypt the buffer in place and strip the PKCS#7 padding.
    ///
    /// Without `explicit_iv` the IV is derived from the segment id.
    pub fn decode_data(&mut self, explicit_iv: Option<Aes128Iv>) -> HlsResult<()> {
        let key = self.key.ok_or(HlsError::DecryptionKeyRequired)?;
        let iv = explicit_iv.unwrap_or_else(|| sequence_iv(self.id));

        aes128_cbc_decrypt(&key, &iv, &mut self.data)?;
        let len = pkcs7_unpadded_len(&self.data)?;
        self.data.truncate(len);
        self.played_offset = self.played_offset.min(len);
        Ok(())
    }

    /// Copy up to `dest.len()` unread bytes into `dest`, optionally mirroring
    /// them to `mirror`, and advance the cursor.
    pub fn read(&mut self, dest: &mut [u8], mirror: Option<&mut dyn Write>) -> io::Result<usize> {
        let len = dest.len().min(self.remaining());
        if len == 0 {
            return Ok(0);
        }

        let chunk = &self.data[self.played_offset..self.played_offset + len];
        dest[..len].copy_from_slice(chunk);
        if let Some(mirror) = mirror {
            mirror.write_all(chunk)?;
        }
        self.played_offset += len;
        Ok(len)
    }
}

impl io::Read for Segment {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Segment::read(self, buf, None)
    }
}
