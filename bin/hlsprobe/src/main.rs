use std::{fs::File, io::Write, path::PathBuf, time::Duration};

use anyhow::{bail, Context};
use clap::Parser;
use iori_hls::{
    hls::{select_variant, sort_by_bitrate},
    is_playlist, Fetcher, HttpClient, PlaylistParser, Stream,
};
use reqwest::{ClientBuilder, Url};

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Inspect an HLS playlist and download the first segments")]
pub struct HlsProbeArgs {
    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Request timeout in seconds
    #[clap(long, default_value = "60")]
    timeout: u64,

    /// Index of the variant to download, variants are sorted by bitrate from
    /// highest to lowest
    #[clap(long, conflicts_with = "bandwidth")]
    variant: Option<usize>,

    /// Pick the best variant that fits this bandwidth (bits per second)
    #[clap(long)]
    bandwidth: Option<u64>,

    /// Program id used with --bandwidth
    #[clap(long, default_value = "1")]
    program: u64,

    /// Number of segments to download
    #[clap(short = 'n', long, default_value = "3")]
    segments: usize,

    /// Write the downloaded (and decrypted) segments to this file
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Keep AES-128 segments encrypted
    #[clap(long)]
    no_decrypt: bool,

    /// m3u8 url
    url: String,
}

impl HlsProbeArgs {
    fn client(&self) -> anyhow::Result<HttpClient> {
        let builder = ClientBuilder::new().timeout(Duration::from_secs(self.timeout));
        Ok(HttpClient::new(builder)?)
    }

    fn choose(&self, streams: &[Stream]) -> anyhow::Result<usize> {
        if let Some(variant) = self.variant {
            if variant >= streams.len() {
                bail!("Variant {variant} does not exist, {} available", streams.len());
            }
            return Ok(variant);
        }

        match self.bandwidth {
            Some(bandwidth) => select_variant(streams, self.program, bandwidth)
                .with_context(|| format!("No variant with program id {}", self.program)),
            None => Ok(0),
        }
    }
}

fn init_logger(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .init();

    // stream and network code reports through tracing
    let level = if verbose {
        tracing_subscriber::filter::LevelFilter::DEBUG
    } else {
        tracing_subscriber::filter::LevelFilter::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = HlsProbeArgs::parse();
    init_logger(args.verbose)?;

    let url = Url::parse(&args.url)?;
    let parser = PlaylistParser::new(args.client()?).with_aes128(!args.no_decrypt);

    let playlist = parser.fetcher().fetch(&url).await?;
    if !is_playlist(&playlist) {
        bail!("{url} is not an HLS playlist");
    }

    let mut streams = Vec::new();
    parser.parse(&url, &playlist, &mut streams).await?;
    sort_by_bitrate(&mut streams);

    for (index, stream) in streams.iter().enumerate() {
        log::info!(
            "[{index}] program {} | bitrate {} | {} segment(s) | {}{}",
            stream.id(),
            stream
                .bitrate()
                .map_or_else(|| "unknown".to_string(), |b| b.to_string()),
            stream.num_segments(),
            stream.url(),
            if stream.live() { " | live" } else { "" },
        );
    }

    let stream = &streams[args.choose(&streams)?];
    log::info!("Downloading from {}", stream.url());

    let mut output = args
        .output
        .as_ref()
        .map(File::create)
        .transpose()
        .context("Failed to create output file")?;

    let mut bandwidth = args.bandwidth;
    let mut index = stream.start_segment();
    let mut downloaded = 0;
    let mut written = 0;
    let mut buf = vec![0u8; 64 * 1024];

    while downloaded < args.segments {
        if index >= stream.num_segments() {
            if !stream.live() {
                break;
            }

            let wait = stream.target_duration().unwrap_or(10);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            let outcome = parser.refresh_stream(stream).await?;
            log::debug!(
                "Playlist refreshed: {} new, {} expired",
                outcome.appended.len(),
                outcome.expired.len()
            );
            continue;
        }

        if let Err(e) = stream
            .download_segment_data(index, &mut bandwidth, "hlsprobe", parser.fetcher())
            .await
        {
            log::error!("Segment at index {index} failed: {e} ({:?})", e.kind());
            index += 1;
            continue;
        }

        let handle = stream
            .get_segment(index)
            .with_context(|| format!("Segment at index {index} disappeared"))?;
        let mut segment = handle.lock().await;
        loop {
            let mirror = output.as_mut().map(|file| file as &mut dyn Write);
            let read = segment.read(&mut buf, mirror)?;
            if read == 0 {
                break;
            }
            written += read;
        }
        log::info!(
            "Segment {} done: {} bytes{}",
            segment.id(),
            segment.size(),
            segment
                .title()
                .map(|title| format!(" ({title})"))
                .unwrap_or_default()
        );
        segment.clear();

        index += 1;
        downloaded += 1;
    }

    if let Some(file) = output.as_mut() {
        file.flush()?;
    }

    log::info!(
        "Read {written} bytes from {downloaded} segment(s), estimated stream size {} bytes, last bandwidth {}",
        stream.size(true).await,
        bandwidth.map_or_else(|| "unknown".to_string(), |b| format!("{b} bps")),
    );

    Ok(())
}
