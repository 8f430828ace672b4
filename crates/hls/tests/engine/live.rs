use crate::{
    common::{init_logger, MemoryFetcher},
    engine::{media_stream, PLAYLIST},
    AssertWrapper,
};
use iori_hls::{HlsError, PlaylistParser};

fn window(sequence: u64, count: u64, ended: bool) -> String {
    let mut body = format!("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MEDIA-SEQUENCE:{sequence}\n");
    for id in sequence..sequence + count {
        body.push_str(&format!("#EXTINF:4,\nseg{id}.ts\n"));
    }
    if ended {
        body.push_str("#EXT-X-ENDLIST\n");
    }
    body
}

#[tokio::test]
async fn refresh_appends_new_segments() -> anyhow::Result<()> {
    init_logger();
    let fetcher = MemoryFetcher::new();
    let stream = media_stream(&fetcher, &window(100, 3, false)).await?;
    assert_eq!(stream.segment_ids(), vec![100, 101, 102]);
    assert!(stream.live());

    let parser = PlaylistParser::new(&fetcher);
    fetcher.insert(PLAYLIST, window(102, 3, false));
    let outcome = parser.refresh_stream(&stream).await?;

    assert_eq!(outcome.appended, vec![103, 104]);
    assert_eq!(outcome.expired, vec![100, 101]);
    assert!(!outcome.ended);

    // expired segments stay until the caller removes them
    assert_eq!(stream.segment_ids(), vec![100, 101, 102, 103, 104]);
    assert_eq!(stream.start_sequence(), 100);
    assert_eq!(stream.duration(), Some(20));

    let (index, handle) = stream.find_segment(104).assert_success();
    assert_eq!(index, 4);
    assert_eq!(
        handle.lock().await.url().as_str(),
        "http://example.com/live/seg104.ts"
    );

    stream.remove_segment(0, true).await.assert_success();
    stream.remove_segment(0, true).await.assert_success();
    assert_eq!(stream.segment_ids(), vec![102, 103, 104]);
    Ok(())
}

#[tokio::test]
async fn refresh_detects_end_of_stream() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new();
    let stream = media_stream(&fetcher, &window(0, 2, false)).await?;

    let parser = PlaylistParser::new(&fetcher);
    fetcher.insert(PLAYLIST, window(0, 2, true));
    let outcome = parser.refresh_stream(&stream).await?;

    assert!(outcome.appended.is_empty());
    assert!(outcome.expired.is_empty());
    assert!(outcome.ended);
    assert!(!stream.live());
    Ok(())
}

#[tokio::test]
async fn refresh_rejects_rewind() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new();
    let stream = media_stream(&fetcher, &window(50, 2, false)).await?;

    let parser = PlaylistParser::new(&fetcher);
    fetcher.insert(PLAYLIST, window(40, 4, false));
    let error = parser.refresh_stream(&stream).await.unwrap_err();

    assert!(matches!(error, HlsError::SequenceRewind { old: 50, new: 40 }));
    assert_eq!(stream.segment_ids(), vec![50, 51]);
    Ok(())
}

#[tokio::test]
async fn refresh_merges_target_duration() -> anyhow::Result<()> {
    let fetcher = MemoryFetcher::new();
    let stream = media_stream(&fetcher, &window(0, 1, false)).await?;
    assert_eq!(stream.target_duration(), Some(4));

    let parser = PlaylistParser::new(&fetcher);
    fetcher.insert(
        PLAYLIST,
        "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-ALLOW-CACHE:NO\n#EXT-X-MEDIA-SEQUENCE:1\n#EXTINF:6,\nseg1.ts\n",
    );
    let outcome = parser.refresh_stream(&stream).await?;

    assert_eq!(outcome.appended, vec![1]);
    assert_eq!(stream.target_duration(), Some(6));
    assert!(!stream.cache_allowed());
    Ok(())
}
