/// Main entry point for the peer-manager tool
use armory_vault::cli::{run, PeerManagerArgs};
use clap::Parser;
use tracing_subscriber::fmt;

fn main() {
    fmt().with_max_level(tracing::Level::INFO).init();

    let args = match PeerManagerArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(-1);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("error: {e:#}");
        std::process::exit(-1);
    }
}
