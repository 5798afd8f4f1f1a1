//! ThinVault CLI
//!
//! Incremental snapshot backups for LVM thin-provisioned volumes.

use clap::Parser;
use thinvault::config::CliArgs;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match thinvault::ops::run(&args.command, args.unattended) {
        Ok(()) => {
            println!("\nDone.");
        }
        Err(e) if e.is_no_work() => {
            println!("{}", e);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
