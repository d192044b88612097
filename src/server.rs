//! Expose the handler over HTTP
//!
//! Function hosts that trigger with an HTTP request (web functions, Knative
//! style runtimes) call into this. `POST /` runs the handler once,
//! `GET /health` reports that the server is up, anything else is refused.
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::App;
use actix_web::HttpResponse;
use actix_web::HttpServer;
use clap::ArgMatches;
use serde::Serialize;
use tracing::{error, info};
use crate::pipeline::Invoke;


pub const DEFAULT_BIND: &str = "0.0.0.0:9000";


//------------ ServerOpts ---------------------------------------------------

pub struct ServerOpts {
    bind: SocketAddr,
}

impl ServerOpts {
    pub fn parse(matches: &ArgMatches) -> Result<Self, Error> {
        let bind_str = matches.value_of("bind").unwrap_or(DEFAULT_BIND);
        let bind = bind_str.parse()
            .map_err(|_| Error::Other(format!("Invalid bind address: {}", bind_str)))?;
        Ok(ServerOpts { bind })
    }

    pub fn bind(&self) -> SocketAddr { self.bind }
}


//------------ TriggerState -------------------------------------------------

/// Shared by all requests: the handler and whether it is running.
pub struct TriggerState {
    handler: Arc<dyn Invoke>,
    running: Arc<AtomicBool>,
}

impl TriggerState {
    pub fn new(handler: Arc<dyn Invoke>) -> Self {
        TriggerState { handler, running: Arc::new(AtomicBool::new(false)) }
    }
}


//------------ RunningGuard -------------------------------------------------

/// Marks an invocation as running for as long as it lives.
pub struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(flag.clone()))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}


//------------ TriggerApp ---------------------------------------------------

pub struct TriggerApp;

impl TriggerApp {
    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.route("/", web::post().to(Self::invoke))
            .route("/health", web::get().to(Self::health))
            .default_service(web::to(Self::not_found));
    }

    /// Runs the server until it is shut down. The handler is only ever
    /// running once at a time.
    pub async fn run(
        opts: &ServerOpts,
        handler: Arc<dyn Invoke>
    ) -> Result<(), Error> {
        let state = web::Data::new(TriggerState::new(handler));

        info!(bind = %opts.bind(), "waiting for invocations");

        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(Self::configure)
        })
        .workers(1)
        .bind(opts.bind())?
        .run()
        .await?;

        Ok(())
    }

    async fn health() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }

    async fn not_found() -> HttpResponse {
        HttpResponse::NotFound().finish()
    }

    async fn invoke(state: web::Data<TriggerState>) -> HttpResponse {
        let guard = match RunningGuard::acquire(&state.running) {
            Some(guard) => guard,
            None => {
                return HttpResponse::build(StatusCode::CONFLICT)
                    .body("An invocation is already running")
            }
        };

        let handler = state.handler.clone();
        let res = web::block(move || {
            let _guard = guard;
            handler.invoke().map_err(|e| e.to_string())
        }).await;

        match res {
            Ok(Ok(report)) => Self::render_json(&report),
            Ok(Err(msg)) => {
                HttpResponse::build(StatusCode::INTERNAL_SERVER_ERROR).body(msg)
            }
            Err(e) => {
                error!(error = %e, "invocation did not complete");
                Self::server_error()
            }
        }
    }

    fn render_json<O: Serialize>(obj: &O) -> HttpResponse {
        match serde_json::to_string(obj) {
            Ok(json) => {
                HttpResponse::Ok()
                    .content_type("application/json")
                    .body(json)
            },
            Err(_) => Self::server_error()
        }
    }

    fn server_error() -> HttpResponse {
        HttpResponse::build(StatusCode::INTERNAL_SERVER_ERROR)
            .body("Invocation failed")
    }
}


//------------ Error --------------------------------------------------------

#[derive(Debug, Display)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    Io(io::Error),

    #[display(fmt = "{}", _0)]
    Other(String)
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self { Error::Io(e) }
}

impl std::error::Error for Error {}


//------------ Tests --------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::call_and_read_body;
    use actix_web::test::call_and_read_body_json;
    use actix_web::test::call_service;
    use actix_web::test::init_service;
    use actix_web::test::TestRequest;
    use crate::pipeline;

    struct FakeHandler {
        fail: bool,
    }

    impl Invoke for FakeHandler {
        fn invoke(&self) -> Result<pipeline::RunReport, pipeline::Error> {
            if self.fail {
                Err(pipeline::Error::NoAllocations)
            } else {
                let config = crate::config::Config::from_vars(|name: &str| match name {
                    "COS_OBJECT_URL" => Some("https://b-1.cos.ap-guangzhou.myqcloud.com".to_string()),
                    "COS_SECRETID" => Some("id".to_string()),
                    "COS_SECRETKEY" => Some("key".to_string()),
                    _ => None
                }).unwrap();
                pipeline::Pipeline::new(
                    config,
                    SampleSource,
                    NullStore
                ).run()
            }
        }
    }

    struct SampleSource;

    impl crate::fetch::RegistrySource for SampleSource {
        type Reader = std::io::Cursor<&'static [u8]>;

        fn fetch(&self, _url: &str) -> Result<Self::Reader, crate::fetch::Error> {
            Ok(std::io::Cursor::new(
                &b"apnic|CN|ipv4|1.0.1.0|256|20110414|allocated\n"[..]
            ))
        }
    }

    struct NullStore;

    impl crate::store::ObjectStore for NullStore {
        fn put(&self, _key: &str, _content: &[u8]) -> Result<(), crate::store::Error> {
            Ok(())
        }
    }

    fn state(fail: bool) -> web::Data<TriggerState> {
        web::Data::new(TriggerState::new(Arc::new(FakeHandler { fail })))
    }

    #[actix_web::test]
    async fn should_answer_health() {
        let app = init_service(
            App::new().app_data(state(false)).configure(TriggerApp::configure)
        ).await;

        let req = TestRequest::get().uri("/health").to_request();
        let body = call_and_read_body(&app, req).await;
        assert_eq!(&body[..], b"ok");
    }

    #[actix_web::test]
    async fn should_invoke_and_report() {
        let app = init_service(
            App::new().app_data(state(false)).configure(TriggerApp::configure)
        ).await;

        let req = TestRequest::post().uri("/").to_request();
        let report: serde_json::Value = call_and_read_body_json(&app, req).await;

        assert_eq!(report["object_key"], "apnic-cn");
        assert_eq!(report["prefixes"], 1);
        assert_eq!(report["skipped_lines"], 0);
        assert_eq!(report["partial"], false);
    }

    #[actix_web::test]
    async fn should_map_failure_to_server_error() {
        let app = init_service(
            App::new().app_data(state(true)).configure(TriggerApp::configure)
        ).await;

        let req = TestRequest::post().uri("/").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, resp.status());
    }

    #[actix_web::test]
    async fn should_only_invoke_on_post() {
        let app = init_service(
            App::new().app_data(state(true)).configure(TriggerApp::configure)
        ).await;

        // a failing handler answers 500, anything else means it was not invoked
        let req = TestRequest::get().uri("/favicon.ico").to_request();
        assert_eq!(StatusCode::NOT_FOUND, call_service(&app, req).await.status());

        let req = TestRequest::post().uri("/invoke").to_request();
        assert_eq!(StatusCode::NOT_FOUND, call_service(&app, req).await.status());

        let req = TestRequest::get().uri("/").to_request();
        assert_eq!(StatusCode::METHOD_NOT_ALLOWED, call_service(&app, req).await.status());
    }

    #[test]
    fn should_allow_one_invocation_at_a_time() {
        let flag = Arc::new(AtomicBool::new(false));

        let first = RunningGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(RunningGuard::acquire(&flag).is_none());

        drop(first);
        assert!(RunningGuard::acquire(&flag).is_some());
    }
}
