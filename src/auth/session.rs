use super::models::{Session, UserRecord};
use crate::core::subscription::Subscription;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct Inner {
    session: Option<Session>,
    observers: Vec<mpsc::UnboundedSender<Option<UserRecord>>>,
}

impl Inner {
    fn user(&self) -> Option<UserRecord> {
        self.session.as_ref().map(|s| s.user.clone())
    }

    /// Sends the current user to every observer and forgets the ones that
    /// went away.
    fn publish(&mut self) {
        let user = self.user();
        self.observers.retain(|tx| tx.send(user.clone()).is_ok());
    }
}

/// Holds the current session and notifies observers when it changes.
///
/// Clones share the same state; the Firestore client reads the ID token from
/// the same store the authentication service writes to.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<Inner>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No code panics while holding the lock.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.lock().user()
    }

    pub fn id_token(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.id_token.clone())
    }

    /// Installs a new session (or clears it) and notifies every observer.
    pub fn replace(&self, session: Option<Session>) {
        let mut inner = self.lock();
        inner.session = session;
        inner.publish();
    }

    /// Installs `session` only while the stored session still carries
    /// `refresh_token`. A sign-out or sign-in that raced a token refresh
    /// wins over the refreshed tokens.
    pub fn replace_refreshed(&self, refresh_token: &str, session: Session) -> bool {
        let mut inner = self.lock();
        let current = inner
            .session
            .as_ref()
            .is_some_and(|s| s.refresh_token == refresh_token);
        if current {
            inner.session = Some(session);
            inner.publish();
        }
        current
    }

    /// Yields the user at the time of the call, then the user after every
    /// change, in order. Slow readers miss nothing.
    pub fn observe(&self) -> Subscription<Option<UserRecord>> {
        let mut inner = self.lock();
        let (sender, receiver) = mpsc::unbounded_channel();
        // The receiver is alive, so the first send cannot fail.
        let _ = sender.send(inner.user());
        inner.observers.push(sender);
        Subscription::from_receiver(receiver)
    }

    /// Number of observers whose subscriptions are still alive.
    pub fn observer_count(&self) -> usize {
        let mut inner = self.lock();
        inner.observers.retain(|tx| !tx.is_closed());
        inner.observers.len()
    }
}
