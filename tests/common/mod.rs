//! Test helpers for integration tests.
//!
//! Provides TestBot, a script host over an in-memory transport with a
//! temporary attachments directory and an optional in-memory database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Handle;

use botbridge::dispatch::MessageDispatcher;
use botbridge::script::HttpClient;
use botbridge::transport::{Message, TransportCall};
use botbridge::{
    CacheStore, Database, Event, HookOutcome, HostServices, LuaRuntime, MemoryTransport,
    ScriptHost,
};

/// Default timeout for waiting on asynchronous effects.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A compiled bot script wired to a recording transport.
pub struct TestBot {
    pub host: Arc<ScriptHost>,
    pub transport: Arc<MemoryTransport>,
    pub db: Option<Database>,
    pub attachments: TempDir,
}

impl TestBot {
    /// Compile `source` without a database.
    pub async fn new(source: &str) -> Self {
        Self::build(source, None).await
    }

    /// Compile `source` with an in-memory SQLite database prepared by `setup`.
    pub async fn with_db(source: &str, setup: &[&str]) -> Self {
        let db = memory_db().await;
        for sql in setup {
            db.try_exec(sql, &[]).await.unwrap();
        }
        Self::build(source, Some(db)).await
    }

    async fn build(source: &str, db: Option<Database>) -> Self {
        let attachments = tempfile::tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let services = Arc::new(HostServices {
            cache: Arc::new(CacheStore::default()),
            db: db.clone(),
            dispatcher: MessageDispatcher::new(transport.clone(), attachments.path()),
            http: HttpClient::new().unwrap(),
            handle: Handle::current(),
        });

        let source = source.to_string();
        let host = tokio::task::spawn_blocking(move || {
            ScriptHost::new(LuaRuntime::new(), &source, services)
        })
        .await
        .unwrap()
        .unwrap();

        Self {
            host: Arc::new(host),
            transport,
            db,
            attachments,
        }
    }

    /// Dispatch an event and wait for its hook to finish.
    pub async fn dispatch(&self, event: Event) -> HookOutcome {
        Arc::clone(&self.host).dispatch(event).await
    }

    /// Dispatch a text message from `chat_id`.
    pub async fn message(&self, chat_id: i64, text: &str) -> HookOutcome {
        self.dispatch(Event::Message(Message::with_text(chat_id, text)))
            .await
    }

    /// Texts of every plain message sent to `chat_id`.
    pub fn texts_to(&self, chat_id: &str) -> Vec<String> {
        self.transport
            .calls_to(chat_id)
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::SendText { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Number of files left in the attachments directory.
    pub fn attachment_count(&self) -> usize {
        std::fs::read_dir(self.attachments.path()).unwrap().count()
    }
}

/// Single-connection in-memory SQLite database.
pub async fn memory_db() -> Database {
    Database::connect_url("sqlite::memory:", 1).await.unwrap()
}

/// Poll `check` until it holds or the default timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + DEFAULT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
