//! Retrieve delegated stats over HTTP
use std::io::BufRead;
use std::io::BufReader;
use std::time::Duration;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use tracing::{debug, info};


//------------ RegistrySource -----------------------------------------------

/// Something that can hand out a fresh reader over a delegated stats file.
///
/// The reader owns the underlying resource: dropping it, whether the scan
/// consumed everything or stopped early, releases it.
pub trait RegistrySource {
    type Reader: BufRead;

    fn fetch(&self, url: &str) -> Result<Self::Reader, Error>;
}


//------------ HttpSource ---------------------------------------------------

/// Fetches stats files with a blocking HTTP client that is built once and
/// reused for every request.
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(HttpSource { client })
    }
}

impl RegistrySource for HttpSource {
    type Reader = BufReader<Response>;

    fn fetch(&self, url: &str) -> Result<Self::Reader, Error> {
        debug!(%url, "requesting delegated stats");

        let response = self.client.get(url).send()?;
        let status = response.status();
        info!(%url, status = status.as_u16(), "delegated stats response");

        if !status.is_success() {
            return Err(Error::Status(status.as_u16()))
        }

        Ok(BufReader::new(response))
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "HTTP request failed: {}", _0)]
    Transport(reqwest::Error),

    #[display(fmt = "Unexpected HTTP status: {}", _0)]
    Status(u16),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self { Error::Transport(e) }
}

impl std::error::Error for Error {}


//------------ Testing ------------------------------------------------------



//------------ Tests --------------------------------------------------------
