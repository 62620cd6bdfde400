//! Rendezvous: a single-slot handoff box with bounded waits on both sides.
//!
//! A [`Rendezvous`] lets two independently-timed parties exchange one value at
//! a time. The sender parks its value in the slot and waits until a receiver
//! takes it; the receiver waits until a value is parked. Both sides give up
//! after their budget elapses, so neither can block forever when the peer
//! disappears.
//!
//! # Delivery
//!
//! ```text
//! send(v, budget)                     recv(budget)
//!   1. wait for an empty slot           1. take the parked offer
//!   2. park Offer { ticket, v }         2. acknowledge the ticket
//!   3. wait for the acknowledgement     3. return v
//!   4. on timeout, retract the offer
//! ```
//!
//! Retraction happens under the slot lock, so a value is either taken by
//! exactly one receiver (and the sender reports success) or retracted (and the
//! sender reports a timeout). A value is never delivered after its sender gave
//! up. Dropping a pending `send` future retracts its offer as well.
//!
//! The same box carries values in both directions: the burst dispatcher sends a
//! task payload through a per-task rendezvous and later receives the result
//! through it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, oneshot};
use tokio::time::{Instant, timeout_at};

/// Errors from a bounded rendezvous wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RendezvousError {
    /// No receiver took the value before the budget elapsed.
    #[error("no receiver took the value within {0:?}")]
    SendTimeout(Duration),

    /// No value was offered before the budget elapsed.
    #[error("no value arrived within {0:?}")]
    RecvTimeout(Duration),
}

struct Offer<T> {
    ticket: u64,
    value: T,
    taken: oneshot::Sender<()>,
}

struct Inner<T> {
    slot: Mutex<Option<Offer<T>>>,
    next_ticket: AtomicU64,
    offered: Notify,
    vacated: Notify,
}

impl<T> Inner<T> {
    fn slot(&self) -> MutexGuard<'_, Option<Offer<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the offer with `ticket` if it is still parked.
    ///
    /// Returns `true` if the offer was retracted, `false` if a receiver had
    /// already taken it.
    fn retract(&self, ticket: u64) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().map(|offer| offer.ticket) == Some(ticket) {
            *slot = None;
            drop(slot);
            self.vacated.notify_one();
            true
        } else {
            false
        }
    }
}

/// Retracts a parked offer if the owning `send` future is dropped early.
struct OfferGuard<'a, T> {
    inner: &'a Inner<T>,
    ticket: u64,
    armed: bool,
}

impl<T> Drop for OfferGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.retract(self.ticket);
        }
    }
}

/// Single-slot exchange box with timeout-aware send and receive.
///
/// Cloning yields another handle to the same slot.
///
/// # Example
///
/// ```rust,ignore
/// let channel = Rendezvous::new();
/// let worker = channel.clone();
/// tokio::spawn(async move { worker.recv(Duration::from_secs(1)).await });
/// channel.send("task".to_string(), Duration::from_secs(1)).await?;
/// ```
pub struct Rendezvous<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Rendezvous<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Rendezvous<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rendezvous")
            .field("occupied", &self.inner.slot().is_some())
            .finish()
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Rendezvous<T> {
    /// Create an empty rendezvous.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                next_ticket: AtomicU64::new(0),
                offered: Notify::new(),
                vacated: Notify::new(),
            }),
        }
    }

    /// Hand `value` to a receiver, waiting at most `budget` in total.
    ///
    /// Returns `Ok(())` only if a receiver took the value.
    pub async fn send(&self, value: T, budget: Duration) -> Result<(), RendezvousError> {
        let deadline = Instant::now() + budget;
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (taken_tx, taken_rx) = oneshot::channel();
        let mut offer = Some(Offer {
            ticket,
            value,
            taken: taken_tx,
        });

        loop {
            {
                let mut slot = self.inner.slot();
                if slot.is_none() {
                    *slot = offer.take();
                    break;
                }
            }
            if timeout_at(deadline, self.inner.vacated.notified())
                .await
                .is_err()
            {
                return Err(RendezvousError::SendTimeout(budget));
            }
        }

        let mut guard = OfferGuard {
            inner: &self.inner,
            ticket,
            armed: true,
        };
        self.inner.offered.notify_one();

        let acknowledged = matches!(timeout_at(deadline, taken_rx).await, Ok(Ok(())));
        guard.armed = false;
        if acknowledged || !self.inner.retract(ticket) {
            Ok(())
        } else {
            Err(RendezvousError::SendTimeout(budget))
        }
    }

    /// Take the next offered value, waiting at most `budget`.
    pub async fn recv(&self, budget: Duration) -> Result<T, RendezvousError> {
        let deadline = Instant::now() + budget;
        loop {
            let offer = self.inner.slot().take();
            if let Some(offer) = offer {
                // The sender may already be retracting; it finds the slot empty
                // and counts the value as delivered.
                let _ = offer.taken.send(());
                self.inner.vacated.notify_one();
                return Ok(offer.value);
            }
            if timeout_at(deadline, self.inner.offered.notified())
                .await
                .is_err()
            {
                return Err(RendezvousError::RecvTimeout(budget));
            }
        }
    }

    /// Whether a value is currently parked in the slot.
    pub fn is_occupied(&self) -> bool {
        self.inner.slot().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_millis(200);

    #[tokio::test(start_paused = true)]
    async fn test_send_then_recv() {
        let channel = Rendezvous::new();
        let receiver = channel.clone();
        let handle = tokio::spawn(async move { receiver.recv(BUDGET).await });

        channel.send(7u32, BUDGET).await.unwrap();
        assert_eq!(handle.await.unwrap(), Ok(7));
        assert!(!channel.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_before_send() {
        let channel = Rendezvous::new();
        let sender = channel.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender.send("late".to_string(), BUDGET).await
        });

        assert_eq!(channel.recv(BUDGET).await.unwrap(), "late");
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_without_receiver() {
        let channel = Rendezvous::new();
        let err = channel.send(1u8, BUDGET).await.unwrap_err();
        assert_eq!(err, RendezvousError::SendTimeout(BUDGET));
        assert!(!channel.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_times_out_without_sender() {
        let channel: Rendezvous<u8> = Rendezvous::new();
        let err = channel.recv(BUDGET).await.unwrap_err();
        assert_eq!(err, RendezvousError::RecvTimeout(BUDGET));
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_not_delivered_after_sender_gave_up() {
        let channel = Rendezvous::new();
        assert!(channel.send(1u8, BUDGET).await.is_err());
        assert!(channel.recv(BUDGET).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_send_retracts_offer() {
        let channel = Rendezvous::new();
        let sender = channel.clone();
        let handle = tokio::spawn(async move { sender.send(5u8, Duration::from_secs(60)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(channel.is_occupied());

        handle.abort();
        let _ = handle.await;
        assert!(!channel.is_occupied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_value_reaches_one_of_two_receivers() {
        let channel = Rendezvous::new();
        let a = channel.clone();
        let b = channel.clone();
        let first = tokio::spawn(async move { a.recv(BUDGET).await });
        let second = tokio::spawn(async move { b.recv(BUDGET).await });
        tokio::task::yield_now().await;

        channel.send(42u32, BUDGET).await.unwrap();
        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.contains(&Ok(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_senders_share_the_slot() {
        let channel = Rendezvous::new();
        let s1 = channel.clone();
        let s2 = channel.clone();
        let h1 = tokio::spawn(async move { s1.send(1u8, BUDGET).await });
        let h2 = tokio::spawn(async move { s2.send(2u8, BUDGET).await });
        tokio::task::yield_now().await;

        let mut got = vec![
            channel.recv(BUDGET).await.unwrap(),
            channel.recv(BUDGET).await.unwrap(),
        ];
        got.sort();
        assert_eq!(got, vec![1, 2]);
        assert!(h1.await.unwrap().is_ok());
        assert!(h2.await.unwrap().is_ok());
    }
}
