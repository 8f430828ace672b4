use std::io::{Read, Seek, Write};

use crate::{
    common::{init_logger, MemoryFetcher, KEY},
    engine::{media_stream, segment_url},
    AssertWrapper,
};
use iori_hls::{ErrorKind, HlsError};

#[tokio::test]
async fn download_is_fetched_once() -> anyhow::Result<()> {
    init_logger();
    let fetcher = MemoryFetcher::new().with(&segment_url("a.ts"), &b"payload"[..]);
    let stream = media_stream(&fetcher, "#EXTM3U\n#EXTINF:10,\na.ts\n").await?;

    let handle = stream.get_segment(0).assert_success();
    let mut segment = handle.lock().await;
    segment.download(&fetcher).await?;
    segment.download(&fetcher).await?;

    assert_eq!(fetcher.hits(&segment_url("a.ts")), 1);
    assert_eq!(segment.data(), b"payload");
    Ok(())
}

#[tokio::test]
async fn failed_download_can_be_retried() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new();
    let stream = media_stream(&fetcher, "#EXTM3U\n#EXTINF:10,\na.ts\n").await?;

    let handle = stream.get_segment(0).assert_success();
    let mut segment = handle.lock().await;
    let error = segment.download(&fetcher).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Network);
    assert!(!segment.is_downloaded());

    fetcher.insert(&segment_url("a.ts"), &b"payload"[..]);
    segment.download(&fetcher).await.assert_success();
    assert_eq!(segment.size(), 7);
    assert_eq!(fetcher.hits(&segment_url("a.ts")), 2);
    Ok(())
}

#[tokio::test]
async fn read_mirrors_into_file() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new().with(&segment_url("a.ts"), &b"0123456789"[..]);
    let stream = media_stream(&fetcher, "#EXTM3U\n#EXTINF:10,\na.ts\n").await?;

    let handle = stream.get_segment(0).assert_success();
    let mut segment = handle.lock().await;
    segment.download(&fetcher).await?;

    let mut file = tempfile::tempfile()?;
    let mut buf = [0u8; 6];
    assert_eq!(segment.read(&mut buf, Some(&mut file as &mut dyn Write))?, 6);
    assert_eq!(segment.read(&mut buf, Some(&mut file as &mut dyn Write))?, 4);
    assert_eq!(segment.remaining(), 0);

    file.rewind()?;
    let mut mirrored = Vec::new();
    file.read_to_end(&mut mirrored)?;
    assert_eq!(mirrored, b"0123456789");
    Ok(())
}

#[cfg(feature = "aes128")]
#[tokio::test]
async fn download_key_is_idempotent() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new().with(&segment_url("key.bin"), KEY.to_vec());
    let stream = media_stream(
        &fetcher,
        "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:10,\na.ts\n",
    )
    .await?;

    let handle = stream.get_segment(0).assert_success();
    let mut segment = handle.lock().await;
    assert!(!segment.key_loaded());
    segment.download_key(&fetcher).await?;
    segment.download_key(&fetcher).await?;

    assert_eq!(segment.key(), Some(&KEY));
    assert_eq!(fetcher.hits(&segment_url("key.bin")), 1);
    Ok(())
}

#[cfg(feature = "aes128")]
#[tokio::test]
async fn short_key_is_rejected() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new().with(&segment_url("key.bin"), KEY[..15].to_vec());
    let stream = media_stream(
        &fetcher,
        "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:10,\na.ts\n",
    )
    .await?;

    let handle = stream.get_segment(0).assert_success();
    let mut segment = handle.lock().await;
    let error = segment.download_key(&fetcher).await.unwrap_err();
    assert!(matches!(error, HlsError::InvalidKeySize(15)));
    assert_eq!(error.kind(), ErrorKind::Crypto);
    assert!(!segment.key_loaded());
    Ok(())
}

#[tokio::test]
async fn download_key_without_key_path() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new();
    let stream = media_stream(&fetcher, "#EXTM3U\n#EXTINF:10,\na.ts\n").await?;

    let handle = stream.get_segment(0).assert_success();
    let mut segment = handle.lock().await;
    assert!(matches!(
        segment.download_key(&fetcher).await,
        Err(HlsError::DecryptionKeyRequired)
    ));
    Ok(())
}
