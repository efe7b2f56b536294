use std::time::Duration;

use tokio::sync::mpsc;

/// Creates a coalescing channel: values pushed into the sender reach
/// [`Debounced::next`] only after `delay` passes without a newer value.
pub fn debounce<T>(delay: Duration) -> (DebounceSender<T>, Debounced<T>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        DebounceSender { sender },
        Debounced {
            receiver,
            delay,
            pending: None,
        },
    )
}

#[derive(Debug)]
pub struct DebounceSender<T> {
    sender: mpsc::UnboundedSender<T>,
}

impl<T> Clone for DebounceSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> DebounceSender<T> {
    /// Returns `false` once the receiving side is gone.
    pub fn send(&self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }
}

#[derive(Debug)]
pub struct Debounced<T> {
    receiver: mpsc::UnboundedReceiver<T>,
    delay: Duration,
    pending: Option<T>,
}

impl<T> Debounced<T> {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits for a value, then keeps replacing it while newer values arrive
    /// within `delay`. Closing every sender flushes the pending value; `None`
    /// once the channel is closed and drained.
    ///
    /// Cancel safe: a value received before the future is dropped stays
    /// pending and the next call restarts its timer.
    pub async fn next(&mut self) -> Option<T> {
        if self.pending.is_none() {
            self.pending = Some(self.receiver.recv().await?);
        }

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(value) => self.pending = Some(value),
                    None => return self.pending.take(),
                },
                _ = tokio::time::sleep(self.delay) => return self.pending.take(),
            }
        }
    }
}
