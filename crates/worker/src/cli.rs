use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

fn default_device_name() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[derive(Debug, Clone, Parser)]
#[command(name = "rollcall-worker", version, about = "rollcall frame-processing worker")]
pub struct Cli {
    /// Coordinator address to connect to.
    #[arg(long, env = "ROLLCALL_SERVER", default_value = "127.0.0.1:12345")]
    pub server: String,

    /// Device name reported during the handshake.
    #[arg(long, env = "ROLLCALL_DEVICE_NAME", default_value_t = default_device_name())]
    pub name: String,

    /// Root for the local `Models/`, `Images/` and `Jsons/` folders
    /// (emptied at startup).
    #[arg(long, env = "ROLLCALL_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Artificial per-frame delay of the built-in analyzer, in
    /// milliseconds. Useful for exercising the dynamic policy with
    /// deliberately uneven workers.
    #[arg(long = "stub-delay", env = "ROLLCALL_STUB_DELAY_MS", default_value_t = 0)]
    pub stub_delay_ms: u64,

    /// Per-read/write socket timeout in seconds; 0 waits forever.
    #[arg(long, env = "ROLLCALL_TIMEOUT", default_value_t = 0)]
    pub timeout: u64,
}

impl Cli {
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_means_wait_forever() {
        let cli = Cli::parse_from(["rollcall-worker", "--timeout", "0"]);
        assert_eq!(cli.io_timeout(), None);

        let cli = Cli::parse_from(["rollcall-worker", "--timeout", "30"]);
        assert_eq!(cli.io_timeout(), Some(Duration::from_secs(30)));
    }
}
