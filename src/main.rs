#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use anyhow::Result;
use clap::Parser;

mod cli;
mod client;
mod config;
mod constants;
mod errors;
mod flow;
mod github;
mod number;
mod oauth;
mod server;
mod session;
mod source;
mod subcommands;
mod wire;

#[tokio::main]
async fn main() -> Result<()> {
    cli::Cli::parse().run().await
}
