use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use rollcall_engine::ServerConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "rollcall-server", version, about = "rollcall batch coordinator")]
pub struct Cli {
    /// Interface to listen on.
    #[arg(long, env = "ROLLCALL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Listener port; 0 picks an ephemeral port.
    #[arg(long, env = "ROLLCALL_PORT", default_value_t = 12345)]
    pub port: u16,

    /// Number of workers the batch waits for before scheduling.
    #[arg(
        short = 'w',
        long,
        env = "ROLLCALL_WORKERS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u16).range(1..=64)
    )]
    pub workers: u16,

    /// Accept timeout in seconds while the roster fills.
    #[arg(long, env = "ROLLCALL_TIMEOUT", default_value_t = 8)]
    pub timeout: u64,

    /// Per-read/write socket timeout in seconds; 0 waits forever.
    #[arg(long, env = "ROLLCALL_IO_TIMEOUT", default_value_t = 0)]
    pub io_timeout: u64,

    /// Class register pushed to every worker at setup.
    #[arg(long, env = "ROLLCALL_CLASS_REGISTER", default_value = "jsons/class_register.json")]
    pub class_register: PathBuf,

    /// Directory of model blobs pushed to every worker at setup.
    #[arg(long, env = "ROLLCALL_MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Batch descriptor (frame list, timestamps, scheduling mode).
    #[arg(long, env = "ROLLCALL_BATCH", default_value = "jsons/uploaded_data.json")]
    pub descriptor: PathBuf,

    /// Result log, rewritten after every recorded frame.
    #[arg(long, env = "ROLLCALL_RESULT_LOG", default_value = "jsons/attendance_raw.json")]
    pub result_log: PathBuf,
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            workers: self.workers as usize,
            accept_timeout: if self.timeout > 0 {
                Duration::from_secs(self.timeout)
            } else {
                ServerConfig::DEFAULT_ACCEPT_TIMEOUT
            },
            io_timeout: (self.io_timeout > 0).then(|| Duration::from_secs(self.io_timeout)),
            class_register: self.class_register.clone(),
            models_dir: self.models_dir.clone(),
            descriptor: self.descriptor.clone(),
            result_log: self.result_log.clone(),
        }
    }
}
