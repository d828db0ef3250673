//! Application module.
//!
//! Wires configuration, services and the script host together and runs the
//! event loop: `onInit` once, then the timer, the cache sweeper and the
//! update poller until shutdown.

mod tasks;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::info;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::db::Database;
use crate::dispatch::MessageDispatcher;
use crate::error::{BridgeError, Result};
use crate::script::{Event, HostServices, HttpClient, LuaRuntime, ScriptHost};
use crate::transport::{ChatTransport, TelegramClient, UpdateSource};

/// Main application.
pub struct Application {
    host: Arc<ScriptHost>,
    updates: Arc<dyn UpdateSource>,
    cache: Arc<CacheStore>,
    timer: Option<Duration>,
}

impl Application {
    /// Build the application against the Telegram Bot API.
    pub async fn build(config: &Config) -> Result<Self> {
        let client = Arc::new(TelegramClient::new(&config.telegram)?);
        Self::with_transport(config, client).await
    }

    /// Build the application over any transport that also yields updates.
    ///
    /// Fails when the scripts cannot be loaded or compiled, or when a
    /// configured database is unreachable.
    pub async fn with_transport<T>(config: &Config, transport: Arc<T>) -> Result<Self>
    where
        T: ChatTransport + UpdateSource + 'static,
    {
        tokio::fs::create_dir_all(&config.attachments_dir).await?;

        let db = match &config.database {
            Some(db_config) => {
                info!(driver = ?db_config.driver, "Connecting to database");
                Some(Database::connect(db_config).await?)
            }
            None => {
                info!("No database configured, database capabilities are disabled");
                None
            }
        };

        let cache = Arc::new(CacheStore::new(config.cache_ttl));
        let chat: Arc<dyn ChatTransport> = transport.clone();
        let services = Arc::new(HostServices {
            cache: Arc::clone(&cache),
            db,
            dispatcher: MessageDispatcher::new(chat, config.attachments_dir.clone()),
            http: HttpClient::new()?,
            handle: Handle::current(),
        });

        let scripts = config.scripts.clone();
        let host = tokio::task::spawn_blocking(move || {
            ScriptHost::from_files(LuaRuntime::new(), &scripts, services)
        })
        .await
        .map_err(|e| BridgeError::Script(format!("script compilation aborted: {}", e)))??;
        info!(scripts = config.scripts.len(), "Scripts compiled");

        Ok(Self {
            host: Arc::new(host),
            updates: transport,
            cache,
            timer: config.timer,
        })
    }

    pub fn host(&self) -> &Arc<ScriptHost> {
        &self.host
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Application {
            host,
            updates,
            cache,
            timer,
        } = self;

        Arc::clone(&host).dispatch(Event::Init).await;

        let mut background = Vec::new();
        match timer {
            Some(period) => background.push(tasks::start_timer(Arc::clone(&host), period)),
            None => info!("No timer configured"),
        }
        background.push(tasks::start_cache_sweeper(cache));

        tokio::select! {
            _ = tasks::poll_updates(host, updates) => {}
            _ = shutdown => info!("Shutdown requested"),
        }

        for task in background {
            task.abort();
        }
        info!("Application stopped");
        Ok(())
    }
}
