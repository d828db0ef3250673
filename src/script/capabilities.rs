//! Host capabilities bound into script contexts.
//!
//! A [`CapabilitySet`] is built per event for the acting user and is
//! immutable afterwards. Its methods are synchronous: they run on the blocking
//! thread executing the script and drive async services through the runtime
//! handle. Failures are logged and turned into empty results.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{error, warn};

use super::http::{HttpClient, HttpMethod, HttpRequest, DEFAULT_TIMEOUT_SECS};
use crate::cache::CacheStore;
use crate::db::{Database, ExecResult, OrderedRow, SqlArg};
use crate::dispatch::{InlineRow, MessageDispatcher, MessageId, Options, OutboundMessage};
use crate::report;

/// Shared services every capability set draws on.
pub struct HostServices {
    pub cache: Arc<CacheStore>,
    pub db: Option<Database>,
    pub dispatcher: MessageDispatcher,
    pub http: HttpClient,
    pub handle: Handle,
}

/// Capabilities scoped to one acting user. `""` is the system identity.
#[derive(Clone)]
pub struct CapabilitySet {
    user: String,
    services: Arc<HostServices>,
}

impl CapabilitySet {
    pub fn new(user: impl Into<String>, services: Arc<HostServices>) -> Self {
        Self {
            user: user.into(),
            services,
        }
    }

    /// Acting user identity.
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.services.handle.block_on(future)
    }

    fn target_or_self(&self, target: Option<String>) -> String {
        target.unwrap_or_else(|| self.user.clone())
    }

    /// Send a message, to the acting user unless `target` is given.
    pub fn send(
        &self,
        text: &str,
        options: Options,
        attachment: &str,
        target: Option<String>,
    ) -> MessageId {
        let message = OutboundMessage::text(self.target_or_self(target), text.trim())
            .with_options(options)
            .with_attachment(attachment.trim());
        self.block_on(self.services.dispatcher.send(&message))
    }

    /// Send a message that forces a reply.
    pub fn prompt(&self, text: &str, attachment: &str, target: Option<String>) -> MessageId {
        let message = OutboundMessage::text(self.target_or_self(target), text.trim())
            .with_attachment(attachment.trim());
        self.block_on(self.services.dispatcher.prompt(&message))
    }

    pub fn cache_set(&self, key: &str, value: Value) {
        self.services.cache.set(&self.user, key, value);
    }

    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.services.cache.get(&self.user, key)
    }

    pub fn cache_del(&self, key: &str) {
        self.services.cache.del(&self.user, key);
    }

    fn database(&self) -> Option<&Database> {
        if self.services.db.is_none() {
            warn!("Database capability used but no database is configured");
        }
        self.services.db.as_ref()
    }

    pub fn db_query(&self, sql: &str, args: &[SqlArg]) -> Vec<OrderedRow> {
        match self.database() {
            Some(db) => self.block_on(db.query(sql, args)),
            None => Vec::new(),
        }
    }

    pub fn db_exec(&self, sql: &str, args: &[SqlArg]) -> Option<ExecResult> {
        self.block_on(self.database()?.exec(sql, args))
    }

    /// Export a query as CSV and send it. Returns the message id or `0`.
    pub fn db_report(
        &self,
        name: &str,
        caption: &str,
        target: Option<String>,
        sql: &str,
        args: &[SqlArg],
    ) -> MessageId {
        let Some(db) = self.database() else {
            return 0;
        };
        let target = self.target_or_self(target);
        self.block_on(report::run_report(
            &self.services.dispatcher,
            db,
            &target,
            name,
            caption,
            sql,
            args,
        ))
    }

    /// Perform an HTTP request. Returns the body, or `""` on any failure.
    pub fn http(&self, request: HttpRequest) -> String {
        match self.block_on(self.services.http.fetch(&request)) {
            Ok(body) => body,
            Err(e) => {
                error!(url = %request.url, method = ?request.method, error = %e, "Script HTTP request failed");
                String::new()
            }
        }
    }

    pub fn http_get(
        &self,
        url: &str,
        params: Vec<(String, String)>,
        headers: Vec<(String, String)>,
        timeout_secs: Option<i64>,
    ) -> String {
        self.http(build_request(HttpMethod::Get, url, params, headers, timeout_secs))
    }

    pub fn http_post(
        &self,
        url: &str,
        params: Vec<(String, String)>,
        headers: Vec<(String, String)>,
        timeout_secs: Option<i64>,
    ) -> String {
        self.http(build_request(HttpMethod::Post, url, params, headers, timeout_secs))
    }

    pub fn file_link(&self, file_id: &str) -> String {
        self.block_on(self.services.dispatcher.file_link(file_id))
    }

    pub fn replace_options(&self, chat_id: &str, message_id: MessageId, rows: &[InlineRow]) -> MessageId {
        self.block_on(
            self.services
                .dispatcher
                .replace_options(chat_id, message_id, rows),
        )
    }

    pub fn edit_message(&self, chat_id: &str, message_id: MessageId, text: &str, rows: &[InlineRow]) {
        self.block_on(
            self.services
                .dispatcher
                .edit_message(chat_id, message_id, text, rows),
        );
    }

    pub fn delete_message(&self, chat_id: &str, message_id: MessageId) {
        self.block_on(self.services.dispatcher.delete_message(chat_id, message_id));
    }

    /// Block the calling script for `millis` milliseconds.
    pub fn sleep(&self, millis: i64) {
        if millis > 0 {
            std::thread::sleep(Duration::from_millis(millis as u64));
        }
    }

    /// Process environment variable, or `""`.
    pub fn env(&self, name: &str) -> String {
        read_env(name)
    }
}

pub(crate) fn read_env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn build_request(
    method: HttpMethod,
    url: &str,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    timeout_secs: Option<i64>,
) -> HttpRequest {
    let timeout = match timeout_secs {
        Some(secs) if secs > 0 => secs as u64,
        _ => DEFAULT_TIMEOUT_SECS,
    };
    HttpRequest {
        params,
        headers,
        timeout: Duration::from_secs(timeout),
        ..HttpRequest::new(method, url)
    }
}
