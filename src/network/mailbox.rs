//! ## Single-slot mailbox transport
//!
//! The peer bricks communicate over links with mailbox semantics: each
//! direction holds at most one pending value, and a new send replaces any
//! unread value. **There is no queueing** — two sends before one read lose
//! the first value silently. This is a real protocol property the peers rely
//! on, so it is preserved deliberately and wrapped behind one abstraction
//! instead of being re-derived at every call site.
//!
//! If a command must be guaranteed observed, the sender either paces its
//! sends (see [crate::network::peer]) or precedes a repeated value with a
//! neutral sentinel so the repeat is detected as a change.

use tokio::sync::watch;

/// The sending half of a single-slot mailbox.
///
/// `send` always succeeds, is non-blocking, and overwrites whatever the
/// receiver has not read yet.
#[derive(Clone, Debug)]
pub struct LatestValueChannel<T> {
    tx: watch::Sender<Option<T>>,
}

/// A consuming view of a mailbox. Each reader tracks the last value it
/// consumed, so `wait_for_change` wakes only on genuinely new values.
#[derive(Debug)]
pub struct MailboxReader<T> {
    rx: watch::Receiver<Option<T>>,
    last_consumed: Option<T>,
}

impl<T: Clone + PartialEq> LatestValueChannel<T> {
    /// Creates an empty mailbox (no value ever arrived yet).
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Writes `v` into the slot, replacing any unread value.
    pub fn send(&self, v: T) {
        // send_replace never fails even with no readers attached
        self.tx.send_replace(Some(v));
    }

    /// Creates a new reader starting with nothing consumed.
    pub fn reader(&self) -> MailboxReader<T> {
        MailboxReader {
            rx: self.tx.subscribe(),
            last_consumed: None,
        }
    }
}

impl<T: Clone + PartialEq> Default for LatestValueChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq> MailboxReader<T> {
    /// Returns the most recent value, or `None` if nothing ever arrived.
    /// Non-destructive: repeated reads return the same value until a new
    /// one is sent.
    pub fn read(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Waits until the slot holds a value different from the last one this
    /// reader consumed, then consumes and returns it.
    ///
    /// Re-sends of the identical value do not wake the caller; that is the
    /// reason senders put a sentinel in between legitimate repeats.
    pub async fn wait_for_change(&mut self) -> T {
        loop {
            {
                let current = self.rx.borrow_and_update().clone();
                if let Some(v) = current {
                    if self.last_consumed.as_ref() != Some(&v) {
                        self.last_consumed = Some(v.clone());
                        return v;
                    }
                }
            }
            if self.rx.changed().await.is_err() {
                // Sender gone: park forever, the process is shutting down.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overwrite_loses_unread_value() {
        let mb = LatestValueChannel::new();
        let reader = mb.reader();
        mb.send(1u32);
        mb.send(2u32);
        assert_eq!(reader.read(), Some(2));
    }

    #[tokio::test]
    async fn read_is_non_destructive() {
        let mb = LatestValueChannel::new();
        let reader = mb.reader();
        assert_eq!(reader.read(), None);
        mb.send(7u32);
        assert_eq!(reader.read(), Some(7));
        assert_eq!(reader.read(), Some(7));
    }

    #[tokio::test]
    async fn wait_for_change_skips_identical_resend() {
        let mb = LatestValueChannel::new();
        let mut reader = mb.reader();
        mb.send(5u32);
        assert_eq!(reader.wait_for_change().await, 5);

        // Identical value again, then a distinct one: the reader must only
        // wake for the distinct value.
        mb.send(5u32);
        mb.send(6u32);
        assert_eq!(reader.wait_for_change().await, 6);
    }

    #[tokio::test]
    async fn each_reader_tracks_its_own_consumption() {
        let mb = LatestValueChannel::new();
        let mut a = mb.reader();
        mb.send(1u32);
        assert_eq!(a.wait_for_change().await, 1);

        let mut b = mb.reader();
        // b never consumed anything, so the current value counts as new.
        assert_eq!(b.wait_for_change().await, 1);
    }
}
