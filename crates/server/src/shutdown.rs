use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    /// First interrupt: finish in-flight frames, then clean up.
    Graceful,
    /// Second interrupt: exit right away.
    Immediate,
}

/// Translate ctrl-c presses into shutdown events: the first requests a
/// graceful stop, the second an immediate exit.
pub fn spawn_ctrl_c_handler() -> mpsc::UnboundedReceiver<ShutdownEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut presses = 0u8;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            presses += 1;
            let event = if presses == 1 {
                ShutdownEvent::Graceful
            } else {
                ShutdownEvent::Immediate
            };
            if tx.send(event).is_err() || presses > 1 {
                return;
            }
        }
    });
    rx
}
