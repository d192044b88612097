extern crate clap;
#[macro_use] extern crate derive_more;
extern crate delegated_prefixes;
extern crate tracing_subscriber;

use std::sync::Arc;
use clap::App;
use clap::Arg;
use clap::SubCommand;
use delegated_prefixes::config;
use delegated_prefixes::config::Config;
use delegated_prefixes::fetch;
use delegated_prefixes::fetch::HttpSource;
use delegated_prefixes::pipeline;
use delegated_prefixes::pipeline::Invoke;
use delegated_prefixes::pipeline::Pipeline;
use delegated_prefixes::server;
use delegated_prefixes::server::ServerOpts;
use delegated_prefixes::server::TriggerApp;
use delegated_prefixes::store;
use delegated_prefixes::store::BucketStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;


fn main() {
    init_logging();

    match Options::create() {
        Err(e) => {
            eprintln!("{}", e);
            ::std::process::exit(1);
        },
        Ok(option) => {
            let res = match option {
                Options::Run => run_once(),
                Options::Serve(opts) => serve(&opts),
            };
            match res {
                Ok(()) => {},
                Err(e) => {
                    error!("{}", e);
                    ::std::process::exit(1);
                }
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Everything that needs setting up once per process.
fn build_pipeline() -> Result<Pipeline<HttpSource, BucketStore>, Error> {
    let config = Config::from_env()?;
    info!(
        url = config.source_url(),
        registry = %config.selection().registry(),
        country = config.selection().country(),
        key = config.object_key(),
        bucket = config.bucket().name(),
        "configured"
    );

    let source = HttpSource::new(config.fetch_timeout())?;
    let store = BucketStore::new(config.bucket())?;
    Ok(Pipeline::new(config, source, store))
}

fn run_once() -> Result<(), Error> {
    let pipeline = build_pipeline()?;
    pipeline.run()?;
    Ok(())
}

fn serve(opts: &ServerOpts) -> Result<(), Error> {
    let pipeline = Arc::new(build_pipeline()?);
    let handler: Arc<dyn Invoke> = pipeline.clone();

    actix_web::rt::System::new().block_on(TriggerApp::run(opts, handler))?;

    // the HTTP client must be dropped outside of the runtime
    drop(pipeline);
    Ok(())
}


//------------ Options ------------------------------------------------------

enum Options {
    Run,
    Serve(ServerOpts)
}

impl Options {
    pub fn create() -> Result<Self, Error> {
        let matches = App::new("delegated_prefixes")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Publishes the IPv4 prefixes delegated to a country")
            .subcommand(SubCommand::with_name("run")
                .about("Run once and exit (default)")
            )
            .subcommand(SubCommand::with_name("serve")
                .about("Run on every HTTP request received")
                .arg(Arg::with_name("bind")
                    .short("b")
                    .long("bind")
                    .value_name("ADDR")
                    .help("Address to listen on, defaults to 0.0.0.0:9000")
                    .required(false))
            )
            .get_matches();

        if let Some(opts) = matches.subcommand_matches("serve") {
            Ok(Options::Serve(ServerOpts::parse(opts)?))
        } else {
            Ok(Options::Run)
        }
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    ConfigError(config::Error),

    #[display(fmt = "{}", _0)]
    FetchError(fetch::Error),

    #[display(fmt = "{}", _0)]
    StoreError(store::Error),

    #[display(fmt = "{}", _0)]
    PipelineError(pipeline::Error),

    #[display(fmt = "{}", _0)]
    ServerError(server::Error),
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self { Error::ConfigError(e) }
}

impl From<fetch::Error> for Error {
    fn from(e: fetch::Error) -> Self { Error::FetchError(e) }
}

impl From<store::Error> for Error {
    fn from(e: store::Error) -> Self { Error::StoreError(e) }
}

impl From<pipeline::Error> for Error {
    fn from(e: pipeline::Error) -> Self { Error::PipelineError(e) }
}

impl From<server::Error> for Error {
    fn from(e: server::Error) -> Self { Error::ServerError(e) }
}
