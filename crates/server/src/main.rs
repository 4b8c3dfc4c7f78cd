mod cli;
mod shutdown;

use std::process::ExitCode;

use clap::Parser;

use rollcall_engine::{BatchStatus, DispatchEvent, start_coordinator};

use crate::cli::Cli;
use crate::shutdown::{ShutdownEvent, spawn_ctrl_c_handler};

const INFO: &str = "\x1b[94m[INFO]\x1b[0m";
const WARN: &str = "\x1b[93m[WARN]\x1b[0m";
const ERROR: &str = "\x1b[91m[ERROR]\x1b[0m";

fn print_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::Started { host, port } => {
            println!("{INFO} Coordinator started at `{host}:{port}`");
        }
        DispatchEvent::WorkerConnected { worker_id, name, addr } => {
            println!("{INFO} Worker {worker_id} : connected successfully {addr} - `{name}`");
        }
        DispatchEvent::WorkerInitialized { worker_id } => {
            println!("{INFO} Worker {worker_id} : initialization phase completed.");
        }
        DispatchEvent::RosterFilled { workers } => {
            println!("{INFO} All {workers} workers connected.");
        }
        DispatchEvent::ModeAnnounced { mode } => {
            println!("{INFO} `{mode}` mode selected. Starting load balancing...");
        }
        DispatchEvent::TaskSent { worker_id, timestamp } => {
            println!("{INFO} Worker {worker_id} : frame [{timestamp}] sent.");
        }
        DispatchEvent::ResultRecorded { worker_id, recorded } => {
            println!("{INFO} Worker {worker_id} : result recorded ({recorded} total).");
        }
        DispatchEvent::TasksDropped { count } => {
            println!("{WARN} {count} trailing frame(s) fall outside the even split; dropped.");
        }
        DispatchEvent::WorkerFailed { worker_id, message } => {
            eprintln!("{ERROR} Worker {worker_id} failed: {message}");
        }
        DispatchEvent::Warning { message } => eprintln!("{WARN} {message}"),
        DispatchEvent::Error { message } => eprintln!("{ERROR} {message}"),
        DispatchEvent::StopRequested => {
            eprintln!(
                "{WARN} Stop requested: finishing in-flight frames (press CTRL+C again to exit immediately)."
            );
        }
        DispatchEvent::WorkersReleased => println!("{WARN} All workers released."),
        DispatchEvent::Stopped { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    println!(
        "rollcall-server {} workers={}",
        env!("CARGO_PKG_VERSION"),
        cli.workers
    );

    let handle = start_coordinator(cli.server_config());
    let mut events = handle.subscribe();
    let mut shutdown_rx = spawn_ctrl_c_handler();

    loop {
        tokio::select! {
            ev = shutdown_rx.recv() => match ev {
                Some(ShutdownEvent::Graceful) => handle.request_stop(),
                Some(ShutdownEvent::Immediate) => {
                    eprintln!("{WARN} Stop requested again: exiting immediately.");
                    std::process::exit(130);
                }
                None => {}
            },
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                let stopped = matches!(evt, DispatchEvent::Stopped { .. });
                print_event(&evt);
                if stopped {
                    break;
                }
            }
        }
    }

    match handle.wait().await {
        Ok(report) => {
            let failed = if report.failed_workers.is_empty() {
                String::new()
            } else {
                format!(", lost workers {:?}", report.failed_workers)
            };
            println!(
                "{INFO} Batch {}: {} of {} frames recorded{failed}.",
                report.status, report.recorded, report.frame_count
            );
            Ok(match report.status {
                BatchStatus::Complete => ExitCode::SUCCESS,
                BatchStatus::Partial => ExitCode::from(2),
                BatchStatus::Failed => ExitCode::from(1),
            })
        }
        Err(err) => {
            eprintln!("{ERROR} {err:#}");
            Ok(ExitCode::from(1))
        }
    }
}
