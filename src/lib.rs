#[macro_use] extern crate derive_more;
#[macro_use] extern crate serde_derive;
extern crate actix_web;
extern crate clap;
extern crate ipnetwork;
extern crate reqwest;
extern crate s3;
extern crate serde;
extern crate serde_json;
extern crate tracing;

pub mod config;
pub mod delegations;
pub mod fetch;
pub mod ip;
pub mod pipeline;
pub mod server;
pub mod store;
