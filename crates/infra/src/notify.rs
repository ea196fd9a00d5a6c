//! Outbound account notifications (activation, password recovery).
//!
//! Delivery is fire-and-forget: callers log failures and carry on.

use std::sync::Mutex;

use tracing::info;

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_user_registered_message(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> anyhow::Result<()>;

    async fn send_password_recovery_message(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> anyhow::Result<()>;
}

/// Notifier that only writes a log line. Tokens are never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    async fn send_user_registered_message(
        &self,
        email: &str,
        username: &str,
        _token: &str,
    ) -> anyhow::Result<()> {
        info!(email, username, "activation message queued");
        Ok(())
    }

    async fn send_password_recovery_message(
        &self,
        email: &str,
        username: &str,
        _token: &str,
    ) -> anyhow::Result<()> {
        info!(email, username, "password recovery message queued");
        Ok(())
    }
}

/// Message captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub kind: MessageKind,
    pub email: String,
    pub username: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    UserRegistered,
    PasswordRecovery,
}

/// Keeps every message in memory. Useful for tests and local development,
/// where the token has to be read back to finish a flow.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Token of the most recent message of `kind` sent to `username`.
    pub fn last_token(&self, kind: MessageKind, username: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.kind == kind && m.username == username)
            .map(|m| m.token)
    }

    fn record(&self, kind: MessageKind, email: &str, username: &str, token: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("delivery disabled");
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notifier lock poisoned"))?;
        sent.push(SentMessage {
            kind,
            email: email.to_string(),
            username: username.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send_user_registered_message(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> anyhow::Result<()> {
        self.record(MessageKind::UserRegistered, email, username, token)
    }

    async fn send_password_recovery_message(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> anyhow::Result<()> {
        self.record(MessageKind::PasswordRecovery, email, username, token)
    }
}
