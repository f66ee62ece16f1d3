//! Ctrl-C handling.
//!
//! One handler lives for the whole process. While a turn runs, Ctrl-C
//! cancels that turn; otherwise it ends the process with status 130.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exit status after an interrupt outside a turn.
const INTERRUPTED: i32 = 130;

#[derive(Clone, Default)]
pub struct Interrupts {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupts {
    /// Install the process-wide Ctrl-C handler.
    pub fn listen() -> Self {
        let interrupts = Self::default();
        let handler = interrupts.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !handler.interrupt() {
                    eprintln!();
                    std::process::exit(INTERRUPTED);
                }
            }
        });
        interrupts
    }

    /// Token for a new turn; Ctrl-C cancels it until [`Self::end_turn`].
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.lock() = Some(token.clone());
        token
    }

    pub fn end_turn(&self) {
        self.lock().take();
    }

    /// Cancel the running turn. Returns false when no turn is running.
    fn interrupt(&self) -> bool {
        match self.lock().take() {
            Some(token) => {
                debug!("interrupt: cancelling turn");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
