//! Script runtime abstraction and the sandboxed Lua implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{HookTriggers, Lua, LuaSerdeExt, SerializeOptions, Table, Value, VmState};
use tracing::info;

use super::bindings;
use super::capabilities::CapabilitySet;
use super::convert::value_to_string;
use crate::{BridgeError, Result};

/// Name of the global table every script must define.
pub const BOT_OBJECT: &str = "bot";

/// Instructions between two limit checks.
const INSTRUCTION_CHECK_INTERVAL: u32 = 10_000;

/// Script entry points, one per event class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Init,
    Message,
    Callback,
    Timer,
}

impl Hook {
    /// Function name looked up on the `bot` table.
    pub fn name(&self) -> &'static str {
        match self {
            Hook::Init => "onInit",
            Hook::Message => "onMessage",
            Hook::Callback => "onCallback",
            Hook::Timer => "onTimer",
        }
    }
}

/// Result of running one hook for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Completed,
    /// The script does not define the hook.
    Missing,
    /// The hook, or preparing its context, raised an error.
    Failed(String),
}

/// An embeddable interpreter able to host the bot script.
///
/// A template is compiled once and never mutated; every event gets its own
/// context instantiated from it with a capability set bound in.
pub trait ScriptRuntime: Send + Sync + 'static {
    type Template: Send + Sync + 'static;
    type Context;

    /// Validate `source` and produce a reusable template.
    fn compile(&self, source: &str, startup: &CapabilitySet) -> Result<Self::Template>;

    /// Create a fresh context from the template with `caps` bound.
    fn instantiate(&self, template: &Self::Template, caps: CapabilitySet) -> Result<Self::Context>;

    /// Call `hook` with an optional event payload.
    fn invoke(
        &self,
        context: &Self::Context,
        hook: Hook,
        payload: Option<&serde_json::Value>,
    ) -> Result<HookOutcome>;
}

/// Resource limits applied to each Lua state.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum number of instructions per chunk or hook call (0 = unlimited).
    pub max_instructions: u64,
    /// Maximum memory in bytes (0 = unlimited).
    pub max_memory: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_instructions: 0,
            max_memory: 64 * 1024 * 1024, // 64MB
        }
    }
}

/// Validated Lua source shared by every context.
#[derive(Debug, Clone)]
pub struct LuaTemplate {
    source: Arc<str>,
}

impl LuaTemplate {
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// One event's Lua state.
pub struct LuaContext {
    lua: Lua,
    bot: Table,
    instruction_count: Arc<AtomicU64>,
}

impl LuaContext {
    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

/// Lua 5.4 runtime.
#[derive(Debug, Clone, Default)]
pub struct LuaRuntime {
    limits: ResourceLimits,
}

impl LuaRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Create a sandboxed state, register the capability globals and execute
    /// `source`. Capability calls made by top-level code only take effect when
    /// `caps` is given.
    fn load(&self, source: &str, caps: Option<CapabilitySet>) -> Result<LuaContext> {
        let lua = Lua::new();
        apply_sandbox(&lua)?;

        if self.limits.max_memory > 0 {
            lua.set_memory_limit(self.limits.max_memory)
                .map_err(|e| BridgeError::Script(format!("Failed to set memory limit: {}", e)))?;
        }

        let instruction_count = Arc::new(AtomicU64::new(0));
        if self.limits.max_instructions > 0 {
            let count = Arc::clone(&instruction_count);
            let limit = self.limits.max_instructions;
            let step = u64::from(INSTRUCTION_CHECK_INTERVAL);
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(INSTRUCTION_CHECK_INTERVAL),
                move |_lua, _debug| {
                    let current = count.fetch_add(step, Ordering::SeqCst) + step;
                    if current > limit {
                        Err(mlua::Error::RuntimeError(
                            "Script exceeded instruction limit".to_string(),
                        ))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        bindings::register(&lua)
            .map_err(|e| BridgeError::Script(format!("Failed to bind capabilities: {}", e)))?;
        if let Some(caps) = caps {
            bindings::bind(&lua, caps);
        }

        lua.load(source)
            .set_name("=bot")
            .exec()
            .map_err(|e| BridgeError::Script(format!("Script error: {}", e)))?;

        let bot = match lua.globals().get::<Value>(BOT_OBJECT)? {
            Value::Table(bot) => bot,
            _ => {
                return Err(BridgeError::Script(format!(
                    "scripts must define a global `{}` table",
                    BOT_OBJECT
                )))
            }
        };

        Ok(LuaContext {
            lua,
            bot,
            instruction_count,
        })
    }
}

impl ScriptRuntime for LuaRuntime {
    type Template = LuaTemplate;
    type Context = LuaContext;

    fn compile(&self, source: &str, startup: &CapabilitySet) -> Result<LuaTemplate> {
        self.load(source, Some(startup.clone()))?;
        Ok(LuaTemplate {
            source: Arc::from(source),
        })
    }

    /// Replay the template with nothing bound, then bind `caps`, so top-level
    /// code has no capability side effects past compilation.
    fn instantiate(&self, template: &LuaTemplate, caps: CapabilitySet) -> Result<LuaContext> {
        let context = self.load(template.source(), None)?;
        bindings::bind(&context.lua, caps);
        Ok(context)
    }

    fn invoke(
        &self,
        context: &LuaContext,
        hook: Hook,
        payload: Option<&serde_json::Value>,
    ) -> Result<HookOutcome> {
        let function = match context.bot.get::<Value>(hook.name())? {
            Value::Function(function) => function,
            _ => return Ok(HookOutcome::Missing),
        };

        context.instruction_count.store(0, Ordering::SeqCst);
        match payload {
            Some(payload) => {
                let arg = context.lua.to_value_with(payload, serialize_options())?;
                function.call::<()>((context.bot.clone(), arg))?;
            }
            None => function.call::<()>(context.bot.clone())?,
        }
        Ok(HookOutcome::Completed)
    }
}

/// JSON null maps to Lua nil.
pub(crate) fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

/// Strip everything that reaches the filesystem, loads code or inspects the VM.
fn apply_sandbox(lua: &Lua) -> Result<()> {
    let globals = lua.globals();

    for name in [
        "io",
        "loadfile",
        "dofile",
        "load",
        "require",
        "package",
        "debug",
        "collectgarbage",
    ] {
        globals
            .set(name, Value::Nil)
            .map_err(|e| BridgeError::Script(format!("Failed to disable {}: {}", name, e)))?;
    }

    // os keeps only the clock functions
    let restricted_os = lua.create_table()?;
    if let Value::Table(os) = globals.get::<Value>("os")? {
        for name in ["time", "date", "clock"] {
            restricted_os.set(name, os.get::<Value>(name)?)?;
        }
    }
    globals.set("os", restricted_os)?;

    let print = lua.create_function(|_, args: mlua::Variadic<Value>| {
        let line = args
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join("\t");
        info!(target: "script", "{}", line);
        Ok(())
    })?;
    globals.set("print", print)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::capabilities::tests::test_capabilities;

    fn load(source: &str) -> Result<LuaContext> {
        let (caps, _transport, _rt) = test_capabilities("");
        LuaRuntime::new().load(source, Some(caps))
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(Hook::Init.name(), "onInit");
        assert_eq!(Hook::Message.name(), "onMessage");
        assert_eq!(Hook::Callback.name(), "onCallback");
        assert_eq!(Hook::Timer.name(), "onTimer");
    }

    #[test]
    fn test_compile_requires_bot_table() {
        let (caps, _transport, _rt) = test_capabilities("");
        let runtime = LuaRuntime::new();

        assert!(runtime.compile("bot = {}", &caps).is_ok());
        assert!(matches!(
            runtime.compile("x = 1", &caps),
            Err(BridgeError::Script(_))
        ));
        assert!(runtime.compile("bot = 5", &caps).is_err());
        assert!(runtime.compile("bot = {", &caps).is_err());
    }

    #[test]
    fn test_sandbox_removes_dangerous_globals() {
        let ctx = load(
            r#"
            bot = {}
            has_io = io ~= nil
            has_load = load ~= nil
            has_require = require ~= nil
            has_debug = debug ~= nil
            has_execute = os.execute ~= nil
            has_time = os.time ~= nil
            "#,
        )
        .unwrap();
        let globals = ctx.lua().globals();
        assert!(!globals.get::<bool>("has_io").unwrap());
        assert!(!globals.get::<bool>("has_load").unwrap());
        assert!(!globals.get::<bool>("has_require").unwrap());
        assert!(!globals.get::<bool>("has_debug").unwrap());
        assert!(!globals.get::<bool>("has_execute").unwrap());
        assert!(globals.get::<bool>("has_time").unwrap());
    }

    #[test]
    fn test_standard_library_available() {
        let ctx = load(
            r#"
            bot = {}
            upper = string.upper("hello")
            floor = math.floor(3.7)
            t = {3, 1, 2}
            table.sort(t)
            first = t[1]
            "#,
        )
        .unwrap();
        let globals = ctx.lua().globals();
        assert_eq!(globals.get::<String>("upper").unwrap(), "HELLO");
        assert_eq!(globals.get::<i64>("floor").unwrap(), 3);
        assert_eq!(globals.get::<i64>("first").unwrap(), 1);
    }

    #[test]
    fn test_invoke_missing_hook() {
        let runtime = LuaRuntime::new();
        let ctx = load("bot = {}").unwrap();
        assert_eq!(
            runtime.invoke(&ctx, Hook::Timer, None).unwrap(),
            HookOutcome::Missing
        );
    }

    #[test]
    fn test_invoke_passes_self_and_payload() {
        let runtime = LuaRuntime::new();
        let ctx = load(
            r#"
            bot = { greeting = "hi" }
            function bot:onMessage(msg)
                seen = self.greeting .. " " .. msg.text .. " " .. msg.chat.id
                has_caption = msg.caption ~= nil
            end
            "#,
        )
        .unwrap();

        let payload = serde_json::json!({"text": "there", "chat": {"id": 5}, "caption": null});
        assert_eq!(
            runtime.invoke(&ctx, Hook::Message, Some(&payload)).unwrap(),
            HookOutcome::Completed
        );
        let globals = ctx.lua().globals();
        assert_eq!(globals.get::<String>("seen").unwrap(), "hi there 5");
        assert!(!globals.get::<bool>("has_caption").unwrap());
    }

    #[test]
    fn test_invoke_error_is_returned() {
        let runtime = LuaRuntime::new();
        let ctx = load("bot = {} function bot:onTimer() error('boom') end").unwrap();
        let err = runtime.invoke(&ctx, Hook::Timer, None).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_instruction_limit() {
        let (caps, _transport, _rt) = test_capabilities("");
        let runtime = LuaRuntime::with_limits(ResourceLimits {
            max_instructions: 50_000,
            max_memory: 0,
        });
        let ctx = runtime
            .load("bot = {} function bot:onTimer() while true do end end", Some(caps))
            .unwrap();
        let err = runtime.invoke(&ctx, Hook::Timer, None).unwrap_err();
        assert!(err.to_string().contains("instruction limit"));
    }

    #[test]
    fn test_contexts_do_not_share_globals() {
        let (caps, _transport, _rt) = test_capabilities("");
        let runtime = LuaRuntime::new();
        let template = runtime
            .compile(
                "bot = {} counter = 0 function bot:onTimer() counter = counter + 1 end",
                &caps,
            )
            .unwrap();

        let first = runtime.instantiate(&template, caps.clone()).unwrap();
        runtime.invoke(&first, Hook::Timer, None).unwrap();
        runtime.invoke(&first, Hook::Timer, None).unwrap();
        let second = runtime.instantiate(&template, caps).unwrap();

        assert_eq!(first.lua().globals().get::<i64>("counter").unwrap(), 2);
        assert_eq!(second.lua().globals().get::<i64>("counter").unwrap(), 0);
    }

    #[test]
    fn test_top_level_effects_run_only_at_compile() {
        let (caps, transport, _rt) = test_capabilities("");
        let runtime = LuaRuntime::new();
        let template = runtime
            .compile(
                r#"
                bot = {}
                boot_id = send("booted", nil, nil, "99")
                function bot:onTimer() send("tick", nil, nil, "99") end
                "#,
                &caps,
            )
            .unwrap();
        assert_eq!(transport.calls_to("99").len(), 1);

        for _ in 0..2 {
            let ctx = runtime.instantiate(&template, caps.clone()).unwrap();
            assert_eq!(ctx.lua().globals().get::<i64>("boot_id").unwrap(), 0);
            runtime.invoke(&ctx, Hook::Timer, None).unwrap();
        }

        // one boot message plus one tick per context
        assert_eq!(transport.calls_to("99").len(), 3);
    }
}
