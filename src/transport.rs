//! Fetching patch resources relative to a server's patch directory.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use tracing::debug;

use crate::error::{Error, Result};
use crate::server::Server;
use crate::util;

/// Header carrying the server's patch token.
pub const TOKEN_HEADER: &str = "TPP-Token";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

pub type Body = Box<dyn Read + Send>;

/// Source of patch resources. The returned body is closed when dropped.
pub trait Transport {
    fn fetch(&self, server: &Server, segments: &[&str]) -> Result<Body>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn fetch(&self, server: &Server, segments: &[&str]) -> Result<Body> {
        (**self).fetch(server, segments)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn fetch(&self, server: &Server, segments: &[&str]) -> Result<Body> {
        (**self).fetch(server, segments)
    }
}

fn path_parts<'a>(server: &'a Server, segments: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
    server
        .boot
        .patch_server_dir
        .split('/')
        .chain(segments.iter().flat_map(|s| s.split('/')))
        .filter(|part| !part.is_empty())
}

/// `protocol://host:port/patchDir/seg1/seg2/...` for `server`.
pub fn patch_url(server: &Server, segments: &[&str]) -> Result<Url> {
    let base = format!(
        "{}://{}:{}/",
        server.patch_protocol, server.boot.patch_server_ip, server.boot.patch_server_port
    );
    let mut url = Url::parse(&base)
        .map_err(|e| Error::Unavailable(format!("invalid patch server address {base:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| Error::Unavailable(format!("patch server address {base:?} cannot hold a path")))?
        .pop_if_empty()
        .extend(path_parts(server, segments));
    Ok(url)
}

/// Map an HTTP status onto the transport contract.
pub fn classify(status: u16) -> Result<()> {
    match status {
        200..=299 => Ok(()),
        401 => Err(Error::Unauthorized),
        _ => Err(Error::Unavailable(format!("patch server answered HTTP {status}"))),
    }
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(format!("patchsync/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|e| Error::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, server: &Server, segments: &[&str]) -> Result<Body> {
        let url = patch_url(server, segments)?;
        debug!(%url, "GET");

        let mut request = self.client.get(url.clone());
        if !server.patch_token.is_empty() {
            request = request.header(TOKEN_HEADER, &server.patch_token);
        }
        let response = request
            .send()
            .map_err(|e| Error::Unavailable(format!("{url}: {e}")))?;
        classify(response.status().as_u16())?;
        Ok(Box::new(response))
    }
}

/// Serves `<root>/<patchDir>/<segments>` from a local mirror of a patch
/// server. Missing files classify as unavailable; a configured token must
/// match the server's.
pub struct DirTransport {
    root: PathBuf,
    token: Option<String>,
}

impl DirTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl Transport for DirTransport {
    fn fetch(&self, server: &Server, segments: &[&str]) -> Result<Body> {
        if let Some(token) = &self.token {
            if *token != server.patch_token {
                return Err(Error::Unauthorized);
            }
        }

        let relative = path_parts(server, segments).collect::<Vec<_>>().join("/");
        let path = self.root.join(util::clean_local(&relative)?);
        debug!(path = %path.display(), "open");

        match std::fs::File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) => Err(Error::Unavailable(format!("{}: {e}", path.display()))),
        }
    }
}
