//! Session state store
//!
//! The store is owned by the session actor and is the only place session
//! state is mutated. Every mutation republishes a complete
//! [`SessionSnapshot`] through a `watch` channel, so readers always see a
//! status, status text and message log taken from the same moment.

use crate::config::StatusLanguage;
use crate::protocol::ChatMessage;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Connection status of a chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    ConnectionLost,
    ConnectionError,
}

impl SessionStatus {
    /// Human-readable label shown to the user
    pub fn label(&self, language: StatusLanguage) -> &'static str {
        match language {
            StatusLanguage::English => match self {
                SessionStatus::Disconnected => "Disconnected",
                SessionStatus::Connecting => "Connecting...",
                SessionStatus::Connected => "Connected",
                SessionStatus::ConnectionLost => "Connection lost",
                SessionStatus::ConnectionError => "Connection error",
            },
            StatusLanguage::Spanish => match self {
                SessionStatus::Disconnected => "Desconectado",
                SessionStatus::Connecting => "Conectando...",
                SessionStatus::Connected => "Conectado",
                SessionStatus::ConnectionLost => "Conexión perdida",
                SessionStatus::ConnectionError => "Error de conexión",
            },
        }
    }

    /// Connecting or Connected; identity is frozen and connect is ignored
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(StatusLanguage::English))
    }
}

/// Consistent, immutable view of session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub status_text: String,
    pub messages: Arc<Vec<ChatMessage>>,
    pub identity: String,
    /// Sanitized cause of the latest connect failure or connection loss
    pub last_error: Option<String>,
}

/// Single-writer store for session state
///
/// The message log lives only in the published snapshot, so an append
/// copies the log only while some reader still holds an older snapshot.
pub struct SessionStore {
    language: StatusLanguage,
    status: SessionStatus,
    identity: String,
    last_error: Option<String>,
    tx: watch::Sender<SessionSnapshot>,
}

impl SessionStore {
    pub fn new(identity: impl Into<String>, language: StatusLanguage) -> Self {
        let identity = identity.into();
        let status = SessionStatus::Disconnected;
        let (tx, _) = watch::channel(SessionSnapshot {
            status,
            status_text: status.label(language).to_string(),
            messages: Arc::new(Vec::new()),
            identity: identity.clone(),
            last_error: None,
        });

        Self {
            language,
            status,
            identity,
            last_error: None,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn messages(&self) -> Arc<Vec<ChatMessage>> {
        Arc::clone(&self.tx.borrow().messages)
    }

    /// Move to `status`, clearing any recorded error
    pub fn set_status(&mut self, status: SessionStatus) {
        if self.status == status && self.last_error.is_none() {
            return;
        }
        self.status = status;
        self.last_error = None;
        self.publish();
    }

    /// Move to a failure status and record its cause
    pub fn fail(&mut self, status: SessionStatus, cause: impl Into<String>) {
        self.status = status;
        self.last_error = Some(cause.into());
        self.publish();
    }

    /// Replace the identity. A different name starts a fresh message log.
    /// Returns whether anything changed.
    pub fn set_identity(&mut self, identity: impl Into<String>) -> bool {
        let identity = identity.into();
        if identity == self.identity {
            return false;
        }
        self.identity = identity;
        self.tx.send_modify(|snapshot| {
            snapshot.messages = Arc::new(Vec::new());
            self.fill(snapshot);
        });
        true
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.tx
            .send_modify(|snapshot| Arc::make_mut(&mut snapshot.messages).push(message));
    }

    fn publish(&self) {
        self.tx.send_modify(|snapshot| self.fill(snapshot));
    }

    fn fill(&self, snapshot: &mut SessionSnapshot) {
        snapshot.status = self.status;
        snapshot.status_text = self.status.label(self.language).to_string();
        snapshot.identity.clone_from(&self.identity);
        snapshot.last_error.clone_from(&self.last_error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, sender: &str) -> ChatMessage {
        ChatMessage::new(id, sender, "hello", 1_700_000_000_000)
    }

    #[test]
    fn test_initial_snapshot() {
        let store = SessionStore::new("Alice", StatusLanguage::English);
        let snapshot = store.subscribe().borrow().clone();
        assert_eq!(snapshot.status, SessionStatus::Disconnected);
        assert_eq!(snapshot.status_text, "Disconnected");
        assert_eq!(snapshot.identity, "Alice");
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn test_labels() {
        assert_eq!(
            SessionStatus::Connecting.label(StatusLanguage::English),
            "Connecting..."
        );
        assert_eq!(
            SessionStatus::ConnectionLost.label(StatusLanguage::Spanish),
            "Conexión perdida"
        );
        assert_eq!(
            SessionStatus::ConnectionError.label(StatusLanguage::Spanish),
            "Error de conexión"
        );
        assert_eq!(SessionStatus::Connected.to_string(), "Connected");
    }

    #[test]
    fn test_status_text_follows_language() {
        let mut store = SessionStore::new("Ana", StatusLanguage::Spanish);
        let rx = store.subscribe();
        store.set_status(SessionStatus::Connected);
        assert_eq!(rx.borrow().status_text, "Conectado");
    }

    #[test]
    fn test_append_publishes_consistent_snapshot() {
        let mut store = SessionStore::new("Alice", StatusLanguage::English);
        let mut rx = store.subscribe();
        store.set_status(SessionStatus::Connected);
        store.append(message("1", "Bob"));

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.status, SessionStatus::Connected);
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(store.messages()[0].id(), "1");
    }

    #[test]
    fn test_old_snapshots_are_not_mutated() {
        let mut store = SessionStore::new("Alice", StatusLanguage::English);
        let rx = store.subscribe();
        store.append(message("1", "Bob"));
        let before = rx.borrow().clone();
        store.append(message("2", "Bob"));

        assert_eq!(before.messages.len(), 1);
        assert_eq!(rx.borrow().messages.len(), 2);
    }

    #[test]
    fn test_append_reuses_log_when_no_reader_holds_it() {
        let mut store = SessionStore::new("Alice", StatusLanguage::English);
        let _rx = store.subscribe();
        store.append(message("1", "Bob"));
        let first = Arc::as_ptr(&store.messages());
        store.append(message("2", "Bob"));

        assert_eq!(Arc::as_ptr(&store.messages()), first);
        assert_eq!(store.messages().len(), 2);
    }

    #[test]
    fn test_identity_change_clears_log() {
        let mut store = SessionStore::new("Alice", StatusLanguage::English);
        store.append(message("1", "Bob"));

        assert!(!store.set_identity("Alice"));
        assert_eq!(store.messages().len(), 1);

        assert!(store.set_identity("Carol"));
        assert!(store.messages().is_empty());
        assert_eq!(store.identity(), "Carol");
    }

    #[test]
    fn test_fail_records_cause_until_next_status() {
        let mut store = SessionStore::new("Alice", StatusLanguage::English);
        let rx = store.subscribe();

        store.fail(SessionStatus::ConnectionError, "refused");
        assert_eq!(rx.borrow().last_error.as_deref(), Some("refused"));
        assert_eq!(rx.borrow().status_text, "Connection error");

        store.set_status(SessionStatus::Connecting);
        assert!(rx.borrow().last_error.is_none());
    }

    #[test]
    fn test_is_active() {
        assert!(SessionStatus::Connecting.is_active());
        assert!(SessionStatus::Connected.is_active());
        assert!(!SessionStatus::Disconnected.is_active());
        assert!(!SessionStatus::ConnectionLost.is_active());
        assert!(!SessionStatus::ConnectionError.is_active());
    }
}
