use std::sync::Arc;
use tokio::sync::watch;

/// Holder of the bearer credential handed over by the auth collaborator.
///
/// The ingestion supervisor watches it: a new token restarts the session
/// from scratch, an absent token tears everything down and clears the store.
#[derive(Clone)]
pub struct Session {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Session {
    pub fn new(initial: Option<String>) -> Self {
        let (tx, _rx) = watch::channel(initial.filter(|t| !t.is_empty()));
        Self { tx: Arc::new(tx) }
    }

    /// Install a credential. Returns false if it was already current.
    pub fn login(&self, token: impl Into<String>) -> bool {
        let token = token.into();
        if token.is_empty() {
            return self.logout();
        }
        self.tx.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                return false;
            }
            *current = Some(token);
            true
        })
    }

    /// Drop the credential. Returns false if there was none.
    pub fn logout(&self) -> bool {
        self.tx.send_if_modified(|current| current.take().is_some())
    }

    pub fn token(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}
