
use iori_hls::{Fetcher, HttpClient, PlaylistParser, Stream};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

async fn setup_mock_server(body: &str) -> (String, MockServer) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    (format!("{}/playlist.m3u8", mock_server.uri()), mock_server)
}

/// Fetch `uri` over HTTP and parse it.
async fn load(uri: &str) -> anyhow::Result<Vec<Stream>> {
    let parser = PlaylistParser::new(HttpClient::default());
    let url: Url = uri.parse()?;
    let bytes = parser.fetcher().fetch(&url).await?;

    let mut streams = Vec::new();
    parser.parse(&url, &bytes, &mut streams).await?;
    Ok(streams)
}

trait HlsMock {
    async fn mock<S>(&self, mock_path: &str, body: S) -> &Self
    where
        S: AsRef<str>;

    async fn mock_status(&self, mock_path: &str, status: u16) -> &Self;

    async fn mock_playlist(&self, mock_path: &str, url: &str) -> &Self;
}

impl HlsMock for MockServer {
    async fn mock<S>(&self, mock_path: &str, body: S) -> &Self
    where
        S: AsRef<str>,
    {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.as_ref()))
            .mount(self)
            .await;
        self
    }

    async fn mock_status(&self, mock_path: &str, status: u16) -> &Self {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(status).set_body_string("denied"))
            .mount(self)
            .await;
        self
    }

    async fn mock_playlist(&self, mock_path: &str, url: &str) -> &Self {
        self.mock(
            mock_path,
            format!(
                "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-VERSION:3
#EXTINF:9.009,
{url}
#EXT-X-ENDLIST"
            ),
        )
        .await
    }
}
