//! One-shot completion flag used to stop request workers
//!
//! The deployment driver owns the only `CompletionSetter`; workers and the
//! scenario hold cloned `CompletionSignal`s. The flag only ever moves from
//! false to true.

use tokio::sync::watch;
use tracing::{debug, info};

/// Reader side of the completion flag
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    receiver: watch::Receiver<bool>,
}

impl CompletionSignal {
    /// Non-blocking check used at the top of every worker iteration
    pub fn is_done(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until the setter has fired
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        // Err means the sender is gone; CompletionSetter sets the flag before
        // it drops, so the value is already true by then.
        let _ = receiver.wait_for(|done| *done).await;
    }
}

/// Single writer of the completion flag
///
/// Not `Clone`. Dropping it sets the flag, so a driver that bails out
/// early never leaves workers spinning.
#[derive(Debug)]
pub struct CompletionSetter {
    sender: watch::Sender<bool>,
}

impl CompletionSetter {
    /// Mark completion
    ///
    /// Returns true only for the call that performed the transition; later
    /// calls leave the observable state unchanged.
    pub fn set(&self) -> bool {
        let transitioned = self.sender.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
        if transitioned {
            info!("Completion signalled");
        }
        transitioned
    }
}

impl Drop for CompletionSetter {
    fn drop(&mut self) {
        if self.set() {
            debug!("Completion signalled on drop");
        }
    }
}

/// Create a new completion pair (writer, reader)
pub fn completion_channel() -> (CompletionSetter, CompletionSignal) {
    let (sender, receiver) = watch::channel(false);
    (CompletionSetter { sender }, CompletionSignal { receiver })
}
