//! Session manager
//!
//! Resume-or-recreate:
//! 1. A persisted id is tried first with `--resume`
//! 2. On failure the stale record is discarded
//! 3. A fresh v4 id is created; failure here is fatal
//!
//! The persisted record only ever holds an id whose last initialization
//! succeeded, and is rewritten (single trimmed line) on every success.

use crate::agent::{AgentOutcome, AgentRunner, SessionDirective};
use keeper_foundation::{Error, Result, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Ceiling for the initialization invocation
pub const SESSION_INIT_TIMEOUT: Duration = Duration::from_secs(180);

pub struct SessionManager {
    agent: Arc<dyn AgentRunner>,
    store: SessionStore,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(agent: Arc<dyn AgentRunner>, store: SessionStore) -> Self {
        Self {
            agent,
            store,
            timeout: SESSION_INIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Produce a usable session id, resuming when possible.
    pub async fn initialize(&self, init_prompt: &str) -> Result<String> {
        if let Some(previous) = self.load_previous() {
            info!(session_id = %previous, "Resuming previous session");

            let directive = SessionDirective::Resume(previous.clone());
            let outcome = self.agent.invoke(&directive, init_prompt, self.timeout).await;
            match outcome {
                AgentOutcome::Success => {
                    self.persist(&previous)?;
                    info!(session_id = %previous, "Session resumed");
                    return Ok(previous);
                }
                // Shutdown is not evidence against the record; keep it
                AgentOutcome::Cancelled => {
                    return Err(Error::Interrupted("session resume".to_string()));
                }
                _ => {}
            }

            warn!(
                session_id = %previous,
                outcome = %outcome,
                "Resume failed, creating new session"
            );
            if let Err(e) = self.store.remove() {
                warn!(error = %e, "Failed to discard stale session record");
            }
        }

        let session_id = Uuid::new_v4().to_string();
        info!(session_id = %session_id, "Creating new session");

        let directive = SessionDirective::Create(session_id.clone());
        match self.agent.invoke(&directive, init_prompt, self.timeout).await {
            AgentOutcome::Success => {}
            outcome => {
                return Err(Error::SessionInit(format!(
                    "new session {} failed: {}",
                    session_id, outcome
                )));
            }
        }

        self.persist(&session_id)?;
        info!(session_id = %session_id, file = %self.store.path().display(), "Session created");

        Ok(session_id)
    }

    fn persist(&self, session_id: &str) -> Result<()> {
        self.store.save(session_id).map_err(|e| {
            Error::SessionInit(format!("could not persist session {}: {}", session_id, e))
        })
    }

    fn load_previous(&self) -> Option<String> {
        match self.store.load() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Unreadable session record, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedAgent;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, agent: &Arc<ScriptedAgent>) -> SessionManager {
        SessionManager::new(
            agent.clone(),
            SessionStore::new(dir.path().join(".bot-session-id")),
        )
    }

    #[tokio::test]
    async fn test_resume_success_keeps_id() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new());
        let sessions = manager(&dir, &agent);
        sessions.store().save("abc-123").unwrap();

        let id = sessions.initialize("init").await.unwrap();

        assert_eq!(id, "abc-123");
        assert_eq!(sessions.store().load().unwrap().as_deref(), Some("abc-123"));
        let calls = agent.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].directive, SessionDirective::Resume("abc-123".into()));
        assert_eq!(calls[0].timeout, SESSION_INIT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_resume_success_rewrites_record() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new());
        let sessions = manager(&dir, &agent);
        std::fs::write(sessions.store().path(), "  abc-123 \n\n\n").unwrap();

        let id = sessions.initialize("init").await.unwrap();

        assert_eq!(id, "abc-123");
        assert_eq!(
            std::fs::read_to_string(sessions.store().path()).unwrap(),
            "abc-123\n"
        );
    }

    #[tokio::test]
    async fn test_resume_failure_recreates() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new().then(AgentOutcome::Failed(Some(1))));
        let sessions = manager(&dir, &agent);
        sessions.store().save("abc-123").unwrap();

        let id = sessions.initialize("init").await.unwrap();

        assert_ne!(id, "abc-123");
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(sessions.store().load().unwrap(), Some(id.clone()));

        let calls = agent.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].directive, SessionDirective::Create(id));
    }

    #[tokio::test]
    async fn test_fresh_start_creates() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new());
        let sessions = manager(&dir, &agent);

        let id = sessions.initialize("init").await.unwrap();

        assert_eq!(Uuid::parse_str(&id).unwrap().get_version_num(), 4);
        assert_eq!(agent.calls().len(), 1);
        assert!(sessions.store().exists());
    }

    #[tokio::test]
    async fn test_create_failure_is_fatal_and_leaves_no_record() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(
            ScriptedAgent::new()
                .then(AgentOutcome::Failed(Some(1)))
                .then(AgentOutcome::TimedOut),
        );
        let sessions = manager(&dir, &agent);
        sessions.store().save("stale").unwrap();

        let err = sessions.initialize("init").await.unwrap_err();

        assert!(matches!(err, Error::SessionInit(_)));
        assert!(err.is_fatal());
        assert!(!sessions.store().exists());
    }

    #[tokio::test]
    async fn test_cancelled_resume_keeps_record() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new().then(AgentOutcome::Cancelled));
        let sessions = manager(&dir, &agent);
        sessions.store().save("abc-123").unwrap();

        let err = sessions.initialize("init").await.unwrap_err();
        assert!(matches!(err, Error::Interrupted(_)));
        assert!(!err.is_fatal());
        assert_eq!(sessions.store().load().unwrap().as_deref(), Some("abc-123"));
        assert_eq!(agent.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_record_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let agent = Arc::new(ScriptedAgent::new());
        let sessions = manager(&dir, &agent);
        std::fs::write(sessions.store().path(), "  \n").unwrap();

        sessions.initialize("init").await.unwrap();

        let calls = agent.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0].directive, SessionDirective::Create(_)));
    }
}
