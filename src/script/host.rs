//! Script host: one compiled template, one fresh context per event.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error};

use super::capabilities::{CapabilitySet, HostServices};
use super::engine::{Hook, HookOutcome, LuaRuntime, ScriptRuntime};
use super::event::Event;
use crate::{BridgeError, Result};

/// Runs script hooks for events.
pub struct ScriptHost<R: ScriptRuntime = LuaRuntime> {
    runtime: R,
    template: R::Template,
    services: Arc<HostServices>,
}

impl<R: ScriptRuntime> ScriptHost<R> {
    /// Compile `source` once. Top-level code runs with system capabilities.
    ///
    /// Must not be called from inside an async context: capability calls made
    /// by top-level script code block on the runtime.
    pub fn new(runtime: R, source: &str, services: Arc<HostServices>) -> Result<Self> {
        let startup = CapabilitySet::new("", Arc::clone(&services));
        let template = runtime.compile(source, &startup)?;
        Ok(Self {
            runtime,
            template,
            services,
        })
    }

    /// Read and concatenate script files in order, then compile them.
    pub fn from_files(runtime: R, paths: &[PathBuf], services: Arc<HostServices>) -> Result<Self> {
        if paths.is_empty() {
            return Err(BridgeError::Config("no scripts are configured".to_string()));
        }

        let mut source = String::new();
        for path in paths {
            let script = std::fs::read_to_string(path).map_err(|e| {
                BridgeError::Config(format!("failed to read script {}: {}", path.display(), e))
            })?;
            source.push_str(&script);
            source.push('\n');
        }
        Self::new(runtime, &source, services)
    }

    pub fn services(&self) -> &Arc<HostServices> {
        &self.services
    }

    /// Run `hook` for `user` in a fresh context. Never fails; errors are logged.
    pub fn run_hook(
        &self,
        user: &str,
        hook: Hook,
        payload: Option<&serde_json::Value>,
    ) -> HookOutcome {
        let caps = CapabilitySet::new(user, Arc::clone(&self.services));
        let result = self
            .runtime
            .instantiate(&self.template, caps)
            .and_then(|context| self.runtime.invoke(&context, hook, payload));

        match result {
            Ok(outcome) => {
                debug!(hook = hook.name(), user, ?outcome, "Hook finished");
                outcome
            }
            Err(e) => {
                error!(hook = hook.name(), user, error = %e, "Error in hook");
                HookOutcome::Failed(e.to_string())
            }
        }
    }

    /// Handle one event synchronously on the current thread.
    ///
    /// Callback queries are acknowledged before the hook runs.
    pub fn handle(&self, event: &Event) -> HookOutcome {
        if let Event::Callback(callback) = event {
            self.services
                .handle
                .block_on(self.services.dispatcher.answer_callback(&callback.id));
        }
        let payload = event.payload();
        self.run_hook(&event.acting_user(), event.hook(), payload.as_ref())
    }

    /// Handle one event on the blocking pool.
    ///
    /// A panic inside the script task is logged and reported as a failure.
    pub async fn dispatch(self: Arc<Self>, event: Event) -> HookOutcome {
        let hook = event.hook();
        match tokio::task::spawn_blocking(move || self.handle(&event)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(hook = hook.name(), error = %e, "Script task aborted");
                HookOutcome::Failed(e.to_string())
            }
        }
    }
}
