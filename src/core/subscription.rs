//! Cancellable event streams handed out by the `watch_*` and
//! `on_auth_state_change` operations.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use futures::FutureExt;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// A live listener registration.
///
/// Events are read with [`Subscription::next`] or through the [`Stream`]
/// impl. [`Subscription::cancel`] releases the registration; dropping the
/// handle does the same. Once the source ends or fails, the subscription is
/// closed and yields no further events.
pub struct Subscription<T> {
    events: BoxStream<'static, T>,
    task: Option<AbortHandle>,
    active: bool,
}

impl<T: Send + 'static> Subscription<T> {
    pub fn from_stream(events: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            events: events.boxed(),
            task: None,
            active: true,
        }
    }

    /// Wraps a channel fed by a background task. The task is aborted when the
    /// subscription is cancelled or dropped.
    pub fn from_task(receiver: mpsc::UnboundedReceiver<T>, task: AbortHandle) -> Self {
        let mut subscription = Self::from_receiver(receiver);
        subscription.task = Some(task);
        subscription
    }

    pub fn from_receiver(receiver: mpsc::UnboundedReceiver<T>) -> Self {
        Self::from_stream(stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }

    /// A subscription that never delivers. Used when registration failed.
    pub fn closed() -> Self {
        Self {
            events: stream::empty().boxed(),
            task: None,
            active: false,
        }
    }

    /// Waits for the next event. Returns `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<T> {
        if !self.active {
            return None;
        }
        let event = self.events.next().await;
        if event.is_none() {
            self.release();
        }
        event
    }

    /// Returns an event if one is ready without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        if !self.active {
            return None;
        }
        match self.events.next().now_or_never() {
            Some(Some(event)) => Some(event),
            Some(None) => {
                self.release();
                None
            }
            None => None,
        }
    }

    pub fn map<U, F>(mut self, f: F) -> Subscription<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        let events = std::mem::replace(&mut self.events, stream::empty().boxed());
        Subscription {
            events: events.map(f).boxed(),
            task: self.task.take(),
            active: self.active,
        }
    }
}

impl<T> Subscription<T> {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stops the registration. No event is observable afterwards.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.active = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if !self.active {
            return Poll::Ready(None);
        }
        let polled = self.events.poll_next_unpin(cx);
        if let Poll::Ready(None) = polled {
            self.release();
        }
        polled
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.active)
            .field("background_task", &self.task.is_some())
            .finish()
    }
}
