//! Fetch, filter and upload in one go
use std::fmt::Write;
use tracing::{error, info, warn};
use crate::config::Config;
use crate::config::ReadErrorPolicy;
use crate::delegations;
use crate::delegations::ScanError;
use crate::fetch;
use crate::fetch::RegistrySource;
use crate::ip::IpPrefix;
use crate::store;
use crate::store::ObjectStore;


//------------ RunReport ----------------------------------------------------

/// The outcome of one successful invocation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RunReport {
    object_key: String,
    prefixes: usize,
    skipped_lines: usize,
    bytes: usize,
    partial: bool,
}

impl RunReport {
    pub fn object_key(&self) -> &str { &self.object_key }
    pub fn prefixes(&self) -> usize { self.prefixes }
    pub fn skipped_lines(&self) -> usize { self.skipped_lines }
    pub fn bytes(&self) -> usize { self.bytes }
    pub fn partial(&self) -> bool { self.partial }
}


//------------ Invoke -------------------------------------------------------

/// The handler as seen by whoever triggers it.
pub trait Invoke: Send + Sync + 'static {
    fn invoke(&self) -> Result<RunReport, Error>;
}


//------------ Pipeline -----------------------------------------------------

pub struct Pipeline<S, O> {
    config: Config,
    source: S,
    store: O,
}

impl<S: RegistrySource, O: ObjectStore> Pipeline<S, O> {
    pub fn new(config: Config, source: S, store: O) -> Self {
        Pipeline { config, source, store }
    }

    pub fn config(&self) -> &Config { &self.config }

    /// Runs fetch, scan and upload once.
    ///
    /// Malformed lines are logged and skipped. Nothing is uploaded if the
    /// fetch fails, or if reading fails half way and the configuration does
    /// not allow partial uploads. An empty list only replaces the object
    /// when the configuration asks for it; otherwise it is an error.
    pub fn run(&self) -> Result<RunReport, Error> {
        let url = self.config.source_url();
        let selection = self.config.selection();

        let reader = self.source.fetch(url).map_err(|e| {
            error!(%url, error = %e, "cannot fetch delegated stats");
            Error::Fetch(e)
        })?;

        let mut prefixes = Vec::new();
        let mut skipped_lines = 0;
        let mut partial = false;

        for res in delegations::scan(reader, selection) {
            match res {
                Ok(prefix) => prefixes.push(prefix),
                Err(ScanError::Line { number, line, error }) => {
                    warn!(number, %line, %error, "skipping delegation");
                    skipped_lines += 1;
                }
                Err(ScanError::Read(e)) => {
                    match self.config.read_errors() {
                        ReadErrorPolicy::Abort => {
                            error!(error = %e, found = prefixes.len(), "reading delegated stats failed");
                            return Err(Error::Read(e))
                        }
                        ReadErrorPolicy::UploadPartial => {
                            warn!(error = %e, found = prefixes.len(), "reading delegated stats failed, uploading partial result");
                            partial = true;
                        }
                    }
                }
            }
        }

        if prefixes.is_empty() && !self.config.upload_empty() {
            error!(
                registry = %selection.registry(),
                country = selection.country(),
                "no delegations found"
            );
            return Err(Error::NoAllocations)
        }

        let content = render(&prefixes);
        let object_key = self.config.object_key();

        self.store.put(object_key, content.as_bytes()).map_err(|e| {
            error!(key = object_key, error = %e, "upload failed");
            Error::Upload(e)
        })?;

        info!(
            key = object_key,
            prefixes = prefixes.len(),
            skipped_lines,
            "delegations uploaded"
        );

        Ok(RunReport {
            object_key: object_key.to_string(),
            prefixes: prefixes.len(),
            skipped_lines,
            bytes: content.len(),
            partial
        })
    }
}

impl<S, O> Invoke for Pipeline<S, O>
where
    S: RegistrySource + Send + Sync + 'static,
    O: ObjectStore + Send + Sync + 'static
{
    fn invoke(&self) -> Result<RunReport, Error> {
        self.run()
    }
}

/// Renders prefixes one per line, each line terminated by a newline.
pub fn render(prefixes: &[IpPrefix]) -> String {
    let mut content = String::with_capacity(prefixes.len() * 20);
    for prefix in prefixes {
        // writing to a String cannot fail
        let _ = writeln!(content, "{}", prefix);
    }
    content
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    Fetch(fetch::Error),

    #[display(fmt = "Cannot read delegated stats: {}", _0)]
    Read(std::io::Error),

    #[display(fmt = "No delegations found for the selected country")]
    NoAllocations,

    #[display(fmt = "{}", _0)]
    Upload(store::Error),
}

impl From<fetch::Error> for Error {
    fn from(e: fetch::Error) -> Self { Error::Fetch(e) }
}

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Self { Error::Upload(e) }
}

impl std::error::Error for Error {}


//------------ Tests --------------------------------------------------------
