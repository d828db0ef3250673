//! Script hosting.
//!
//! The bot's behaviour lives in Lua. Sources are compiled once at startup into
//! an immutable template; every event runs its hook in a fresh sandboxed
//! context with a capability set scoped to the event's acting user.

mod bindings;
pub mod capabilities;
pub mod convert;
pub mod engine;
pub mod event;
pub mod host;
pub mod http;

pub use capabilities::{CapabilitySet, HostServices};
pub use engine::{Hook, HookOutcome, LuaRuntime, LuaTemplate, ResourceLimits, ScriptRuntime};
pub use event::Event;
pub use host::ScriptHost;
pub use http::{HttpClient, HttpMethod, HttpRequest};
