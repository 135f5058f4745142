//! Run a full diagnostic against an MK3 amplifier and print the snapshot.
//!
//! Usage: cargo run --example diagnose -- <ip> [group_count]

use sonance_mk3::{DiagnosticRunner, Mk3Config};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(host) = args.next() else {
        eprintln!("usage: diagnose <ip> [group_count]");
        std::process::exit(2);
    };
    let mut config = Mk3Config::default();
    if let Some(groups) = args.next() {
        config.group_count = groups.parse().expect("group_count must be a number");
    }

    let runner = DiagnosticRunner::from_config(&config);
    let cancel = CancellationToken::new();

    let status = runner
        .run_full_diagnostic(&host, config.control_port, config.group_count, &cancel)
        .await;

    if !status.is_reachable {
        eprintln!(
            "{host}:{} not reachable: {}",
            config.control_port,
            status.errors.join("; ")
        );
        std::process::exit(1);
    }

    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to render snapshot: {e}"),
    }

    if status.has_any_fault {
        eprintln!("\nFAULTS DETECTED:");
        for fault in &status.fault_summary {
            eprintln!("  {fault}");
        }
        std::process::exit(1);
    }
}
