mod analyze;
mod cli;
mod folders;
mod runtime;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use crate::analyze::{Analyzer, StubAnalyzer};
use crate::cli::Cli;
use crate::folders::WorkFolders;
use crate::runtime::WorkerRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    println!(
        "rollcall-worker {} device=`{}`",
        env!("CARGO_PKG_VERSION"),
        cli.name
    );

    let folders = WorkFolders::prepare(&cli.workdir)?;
    let analyzer: Arc<dyn Analyzer> =
        Arc::new(StubAnalyzer::new(Duration::from_millis(cli.stub_delay_ms)));
    let runtime = WorkerRuntime::new(
        cli.server.clone(),
        cli.name.clone(),
        folders,
        analyzer,
        cli.io_timeout(),
    );

    tokio::select! {
        res = runtime.run() => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; closing the connection.");
            Ok(())
        }
    }
}
