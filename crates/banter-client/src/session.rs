use reqwest::header::HeaderMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::client::SESSION_HEADER;

/// Persistence seam for the session token. The default store is in-memory:
/// the token lives for the process (the "tab"), so a cold start always
/// begins clean. Anything longer-lived would violate that invariant.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str);
    fn clear(&self);
}

#[derive(Default)]
pub struct MemorySessionStore {
    token: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<String> {
        self.token.lock().expect("session store poisoned").clone()
    }

    fn save(&self, token: &str) {
        *self.token.lock().expect("session store poisoned") = Some(token.to_string());
    }

    fn clear(&self) {
        *self.token.lock().expect("session store poisoned") = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Response carried no token, or the same one we already hold.
    Unchanged,
    /// First token of the conversation.
    Adopted(String),
    /// Server replaced the token mid-conversation; in-flight state keyed by
    /// the old one is now invalid.
    Replaced { old: String, new: String },
}

/// Owner of the opaque session token.
///
/// Every call site goes through `get`/`update_from_response`/`reset`; nothing
/// reads a raw variable. Absence of a token never blocks a request — it means
/// the server will allocate one and return it on the response.
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    tx: watch::Sender<Option<String>>,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let (tx, _) = watch::channel(store.load());
        Self { store, tx }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    pub fn get(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Dependents observe token changes without polling.
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    /// Adopt the token carried on a response, if any. Only a *different*
    /// token changes state; an echo of the current one is a no-op.
    pub fn update_from_response(&self, headers: &HeaderMap) -> SessionUpdate {
        let Some(token) = headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|token| !token.is_empty())
        else {
            return SessionUpdate::Unchanged;
        };

        let current = self.get();
        match current {
            Some(current) if current == token => SessionUpdate::Unchanged,
            Some(current) => {
                tracing::info!("session token replaced by server");
                self.store.save(token);
                self.tx.send_replace(Some(token.to_string()));
                SessionUpdate::Replaced {
                    old: current,
                    new: token.to_string(),
                }
            }
            None => {
                tracing::debug!("session token adopted");
                self.store.save(token);
                self.tx.send_replace(Some(token.to_string()));
                SessionUpdate::Adopted(token.to_string())
            }
        }
    }

    /// Explicit conversation-clear: forget the token and its persisted copy.
    pub fn reset(&self) {
        self.store.clear();
        self.tx.send_replace(None);
    }
}
