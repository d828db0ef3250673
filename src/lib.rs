//! botbridge - drive a chat bot from sandboxed Lua scripts.
//!
//! The host compiles the configured scripts once, then runs the script's
//! hooks (`onInit`, `onMessage`, `onCallback`, `onTimer`) for every inbound
//! event with a set of host capabilities: messaging, a per-user cache, SQL
//! access, CSV reports and outbound HTTP.

pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod duration;
pub mod error;
pub mod logging;
pub mod report;
pub mod script;
pub mod transport;

pub use app::Application;
pub use cache::CacheStore;
pub use config::Config;
pub use db::{CellValue, Database, OrderedRow, SqlArg};
pub use dispatch::{MessageDispatcher, OutboundMessage};
pub use error::{BridgeError, Result};
pub use script::{CapabilitySet, Event, Hook, HookOutcome, HostServices, LuaRuntime, ScriptHost};
pub use transport::{ChatTransport, MemoryTransport, TelegramClient, UpdateSource};
