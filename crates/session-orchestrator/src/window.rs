//! The response-window countdown primitive.
//!
//! One [`ResponseWindow`] backs both the instant-session response window and
//! a call attempt's ring/grace timeouts. The deadline is fixed the instant
//! the window is armed; `remaining()` is recomputed from it on demand, never
//! decremented, so a delayed wake-up still expires at the right moment.
//!
//! Expiry is delivered as a message into the owning actor's mailbox rather
//! than as a callback, which serializes it against every other event the
//! actor handles. Each arm bumps a generation counter and the expiry message
//! carries its generation: after `cancel()` (which also bumps the
//! generation), a racing expiry message fails [`ResponseWindow::matches`]
//! and is discarded, so no expiry is observable after cancellation returns.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A single countdown with start/cancel/expire semantics.
///
/// Owned by exactly one actor; never shared across two concurrently armed
/// windows for the same entity.
pub struct ResponseWindow {
    /// Parent token; armed windows run on a child so actor cancellation
    /// tears them down too.
    parent: CancellationToken,
    /// Bumped on every arm and every cancel.
    generation: u64,
    armed: Option<ArmedWindow>,
}

struct ArmedWindow {
    armed_at: Instant,
    deadline: Instant,
    cancel: CancellationToken,
}

impl ResponseWindow {
    /// Create an idle window under the given parent token.
    #[must_use]
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            generation: 0,
            armed: None,
        }
    }

    /// Arm the window for `duration`, delivering `make_msg(generation)` into
    /// `sender` when the deadline passes.
    ///
    /// Arming an already-armed window is absorbed as a no-op (the existing
    /// deadline stands) so duplicate trigger events cannot extend a window.
    /// Returns the generation of the armed window.
    pub fn arm<M, F>(&mut self, duration: Duration, sender: mpsc::Sender<M>, make_msg: F) -> u64
    where
        M: Send + 'static,
        F: FnOnce(u64) -> M + Send + 'static,
    {
        if self.armed.is_some() {
            warn!(
                target: "orchestrator.window",
                "arm requested while already armed; keeping the existing deadline"
            );
            return self.generation;
        }

        self.generation += 1;
        let generation = self.generation;
        let armed_at = Instant::now();
        let deadline = armed_at + duration;
        let cancel = self.parent.child_token();

        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    // Receiver gone means the owning actor already stopped.
                    let _ = sender.send(make_msg(generation)).await;
                }
            }
        });

        self.armed = Some(ArmedWindow {
            armed_at,
            deadline,
            cancel,
        });
        generation
    }

    /// Cancel the window. Synchronous: once this returns, any in-flight
    /// expiry message fails the generation check.
    pub fn cancel(&mut self) {
        if let Some(window) = self.armed.take() {
            window.cancel.cancel();
            self.generation += 1;
        }
    }

    /// Whether an expiry message with this generation belongs to the
    /// currently armed window.
    #[must_use]
    pub fn matches(&self, generation: u64) -> bool {
        self.armed.is_some() && generation == self.generation
    }

    /// Time left until the deadline; zero when idle or past due.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.armed
            .as_ref()
            .map(|w| w.deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Time since the window was armed; zero when idle.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.armed
            .as_ref()
            .map(|w| w.armed_at.elapsed())
            .unwrap_or_default()
    }

    /// Whether the window is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Expired(u64);

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_at_the_deadline() {
        let mut window = ResponseWindow::new(CancellationToken::new());
        let (tx, mut rx) = mpsc::channel(4);

        let generation = window.arm(Duration::from_secs(90), tx, Expired);
        assert!(window.is_armed());
        assert_eq!(window.remaining(), Duration::from_secs(90));

        tokio::time::advance(Duration::from_secs(89)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(window.remaining(), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(rx.try_recv().unwrap(), Expired(generation));
        assert!(window.matches(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_expiry() {
        let mut window = ResponseWindow::new(CancellationToken::new());
        let (tx, mut rx) = mpsc::channel::<Expired>(4);

        window.arm(Duration::from_secs(10), tx, Expired);
        window.cancel();
        assert!(!window.is_armed());
        assert_eq!(window.remaining(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_rejected_after_cancel_and_rearm() {
        let mut window = ResponseWindow::new(CancellationToken::new());
        let (tx, _rx) = mpsc::channel::<Expired>(4);

        let first = window.arm(Duration::from_secs(10), tx.clone(), Expired);
        window.cancel();
        let second = window.arm(Duration::from_secs(10), tx, Expired);

        assert_ne!(first, second);
        assert!(!window.matches(first));
        assert!(window.matches(second));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_while_armed_keeps_the_original_deadline() {
        let mut window = ResponseWindow::new(CancellationToken::new());
        let (tx, mut rx) = mpsc::channel(4);

        tokio::time::advance(Duration::from_secs(1)).await;
        let generation = window.arm(Duration::from_secs(10), tx.clone(), Expired);

        tokio::time::advance(Duration::from_secs(5)).await;
        // A duplicate trigger must not push the deadline out.
        let same = window.arm(Duration::from_secs(10), tx, Expired);
        assert_eq!(same, generation);
        assert_eq!(window.remaining(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(rx.try_recv().unwrap(), Expired(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_tears_down_armed_windows() {
        let parent = CancellationToken::new();
        let mut window = ResponseWindow::new(parent.clone());
        let (tx, mut rx) = mpsc::channel::<Expired>(4);

        window.arm(Duration::from_secs(10), tx, Expired);
        parent.cancel();

        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
