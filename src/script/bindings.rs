//! Lua globals exposing a [`CapabilitySet`] to scripts.
//!
//! The globals are registered once per state and look up the capability set
//! bound to that state on every call. While nothing is bound, as when a
//! context replays the template, calls are ignored and return the empty
//! result. Every function takes raw `Value`s and coerces them itself, so a
//! malformed call degrades to a no-op or an empty result instead of raising.

use mlua::{Lua, Result as LuaResult, Value, Variadic};
use tracing::debug;

use super::capabilities::{read_env, CapabilitySet};
use super::convert::{
    as_integer, as_string, as_strict_string, as_target, from_json, parse_inline_rows,
    parse_options, string_pairs, to_json, to_sql_arg,
};
use crate::db::SqlArg;

/// Register every capability global plus the `json` helper table.
pub fn register(lua: &Lua) -> LuaResult<()> {
    register_messaging(lua)?;
    register_storage(lua)?;
    register_database(lua)?;
    register_http(lua)?;
    register_message_edits(lua)?;
    register_utilities(lua)?;
    register_json(lua)?;
    Ok(())
}

/// Bind `caps` to the state, replacing any previous set.
pub fn bind(lua: &Lua, caps: CapabilitySet) {
    lua.set_app_data(caps);
}

/// Capability set bound to the state, if any.
fn bound(lua: &Lua, capability: &str) -> Option<CapabilitySet> {
    let caps = lua.app_data_ref::<CapabilitySet>().map(|caps| caps.clone());
    if caps.is_none() {
        debug!(capability, "No capability set bound, call ignored");
    }
    caps
}

fn sql_args(lua: &Lua, args: &[Value]) -> Vec<SqlArg> {
    args.iter().map(|arg| to_sql_arg(lua, arg)).collect()
}

fn text_or_empty(value: &Value) -> String {
    as_strict_string(value).unwrap_or_default()
}

/// send, prompt
fn register_messaging(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    // send(text, options, attachment, targetUser)
    let send_fn = lua.create_function(
        |lua, (text, options, attachment, target): (Value, Value, Value, Value)| {
            let Some(caps) = bound(lua, "send") else {
                return Ok(0);
            };
            Ok(caps.send(
                &text_or_empty(&text),
                parse_options(&options),
                &text_or_empty(&attachment),
                as_target(&target),
            ))
        },
    )?;
    globals.set("send", send_fn)?;

    // prompt(text, attachment, targetUser)
    let prompt_fn =
        lua.create_function(|lua, (text, attachment, target): (Value, Value, Value)| {
            let Some(caps) = bound(lua, "prompt") else {
                return Ok(0);
            };
            Ok(caps.prompt(
                &text_or_empty(&text),
                &text_or_empty(&attachment),
                as_target(&target),
            ))
        })?;
    globals.set("prompt", prompt_fn)?;

    Ok(())
}

/// set, get, del
fn register_storage(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let set_fn = lua.create_function(|lua, (key, value): (Value, Value)| {
        if let (Some(caps), Some(key)) = (bound(lua, "set"), as_strict_string(&key)) {
            if !value.is_nil() {
                if let Some(json) = to_json(lua, &value) {
                    caps.cache_set(&key, json);
                }
            }
        }
        Ok(())
    })?;
    globals.set("set", set_fn)?;

    let get_fn = lua.create_function(|lua, key: Value| {
        let Some(caps) = bound(lua, "get") else {
            return Ok(Value::Nil);
        };
        match as_strict_string(&key).and_then(|key| caps.cache_get(&key)) {
            Some(json) => from_json(lua, &json),
            None => Ok(Value::Nil),
        }
    })?;
    globals.set("get", get_fn)?;

    let del_fn = lua.create_function(|lua, key: Value| {
        if let (Some(caps), Some(key)) = (bound(lua, "del"), as_strict_string(&key)) {
            caps.cache_del(&key);
        }
        Ok(())
    })?;
    globals.set("del", del_fn)?;

    Ok(())
}

/// dbQuery, dbExec, dbReport
fn register_database(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    // dbQuery(sql, ...) -> JSON array text
    let query_fn = lua.create_function(|lua, args: Variadic<Value>| {
        let Some(caps) = bound(lua, "dbQuery") else {
            return Ok(None);
        };
        let Some(sql) = args.first().and_then(as_string) else {
            return Ok(None);
        };
        let rows = caps.db_query(&sql, &sql_args(lua, &args[1..]));
        Ok(Some(
            serde_json::to_string(&rows).unwrap_or_else(|_| "[]".to_string()),
        ))
    })?;
    globals.set("dbQuery", query_fn)?;

    // dbExec(sql, ...) -> JSON object text or nil
    let exec_fn = lua.create_function(|lua, args: Variadic<Value>| {
        let Some(caps) = bound(lua, "dbExec") else {
            return Ok(None);
        };
        let Some(sql) = args.first().and_then(as_string) else {
            return Ok(None);
        };
        Ok(caps
            .db_exec(&sql, &sql_args(lua, &args[1..]))
            .and_then(|result| serde_json::to_string(&result).ok()))
    })?;
    globals.set("dbExec", exec_fn)?;

    // dbReport(name, caption, targetUser, sql, ...) -> message id
    let report_fn = lua.create_function(|lua, args: Variadic<Value>| {
        let Some(caps) = bound(lua, "dbReport") else {
            return Ok(None);
        };
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Nil);
        let Some(sql) = as_string(&arg(3)) else {
            return Ok(None);
        };
        let name = as_string(&arg(0)).unwrap_or_else(|| crate::report::DEFAULT_REPORT_NAME.to_string());
        let caption = as_string(&arg(1)).unwrap_or_default();
        let extra = args.get(4..).unwrap_or(&[]);
        Ok(Some(caps.db_report(
            &name,
            &caption,
            as_target(&arg(2)),
            &sql,
            &sql_args(lua, extra),
        )))
    })?;
    globals.set("dbReport", report_fn)?;

    Ok(())
}

/// doGet, doPost
fn register_http(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let get_fn = lua.create_function(
        |lua, (url, params, headers, timeout): (Value, Value, Value, Value)| {
            let (Some(caps), Some(url)) = (bound(lua, "doGet"), as_string(&url)) else {
                return Ok(String::new());
            };
            Ok(caps.http_get(
                &url,
                string_pairs(&params),
                string_pairs(&headers),
                timeout_arg(&timeout),
            ))
        },
    )?;
    globals.set("doGet", get_fn)?;

    let post_fn = lua.create_function(
        |lua, (url, params, headers, timeout): (Value, Value, Value, Value)| {
            let (Some(caps), Some(url)) = (bound(lua, "doPost"), as_string(&url)) else {
                return Ok(String::new());
            };
            Ok(caps.http_post(
                &url,
                string_pairs(&params),
                string_pairs(&headers),
                timeout_arg(&timeout),
            ))
        },
    )?;
    globals.set("doPost", post_fn)?;

    Ok(())
}

/// Timeout only counts when given as a number.
fn timeout_arg(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(_) | Value::Number(_) => as_integer(value),
        _ => None,
    }
}

/// getFileLink, replaceOptions, deleteMessage, editMessage
fn register_message_edits(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let link_fn = lua.create_function(|lua, file_id: Value| {
        let (Some(caps), Some(id)) = (bound(lua, "getFileLink"), as_strict_string(&file_id)) else {
            return Ok(String::new());
        };
        Ok(caps.file_link(&id))
    })?;
    globals.set("getFileLink", link_fn)?;

    // replaceOptions(chatID, messageID, inlineOptions) -> message id
    let replace_fn = lua.create_function(
        |lua, (chat, message, options): (Value, Value, Value)| {
            let Some(caps) = bound(lua, "replaceOptions") else {
                return Ok(None);
            };
            let (Some(chat), Some(message), Some(rows)) = (
                as_string(&chat),
                as_integer(&message),
                parse_inline_rows(&options),
            ) else {
                return Ok(None);
            };
            Ok(Some(caps.replace_options(&chat, message, &rows)))
        },
    )?;
    globals.set("replaceOptions", replace_fn)?;

    let delete_fn = lua.create_function(|lua, (chat, message): (Value, Value)| {
        if let (Some(caps), Some(chat), Some(message)) = (
            bound(lua, "deleteMessage"),
            as_string(&chat),
            as_integer(&message),
        ) {
            caps.delete_message(&chat, message);
        }
        Ok(())
    })?;
    globals.set("deleteMessage", delete_fn)?;

    // editMessage(chatID, messageID, text, inlineOptions)
    let edit_fn = lua.create_function(
        |lua, (chat, message, text, options): (Value, Value, Value, Value)| {
            let Some(caps) = bound(lua, "editMessage") else {
                return Ok(());
            };
            if let (Some(chat), Some(message), Some(text), Some(rows)) = (
                as_string(&chat),
                as_integer(&message),
                as_string(&text),
                parse_inline_rows(&options),
            ) {
                caps.edit_message(&chat, message, &text, &rows);
            }
            Ok(())
        },
    )?;
    globals.set("editMessage", edit_fn)?;

    Ok(())
}

/// sleep, env
fn register_utilities(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let sleep_fn = lua.create_function(|lua, millis: Value| {
        if let (Some(caps), Some(millis)) = (bound(lua, "sleep"), as_integer(&millis)) {
            caps.sleep(millis);
        }
        Ok(())
    })?;
    globals.set("sleep", sleep_fn)?;

    // env has no side effects and works without a bound set
    let env_fn = lua.create_function(|_, name: Value| Ok(as_string(&name).map(|name| read_env(&name))))?;
    globals.set("env", env_fn)?;

    Ok(())
}

/// json.encode, json.decode
fn register_json(lua: &Lua) -> LuaResult<()> {
    let json = lua.create_table()?;

    let encode_fn = lua.create_function(|lua, value: Value| {
        Ok(to_json(lua, &value).map(|json| json.to_string()))
    })?;
    json.set("encode", encode_fn)?;

    let decode_fn = lua.create_function(|lua, text: Value| {
        let parsed = as_strict_string(&text)
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok());
        match parsed {
            Some(parsed) => from_json(lua, &parsed),
            None => Ok(Value::Nil),
        }
    })?;
    json.set("decode", decode_fn)?;

    lua.globals().set("json", json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Markup;
    use crate::script::capabilities::tests::test_capabilities;
    use crate::transport::TransportCall;

    use crate::transport::MemoryTransport;
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    fn lua_with(user: &str) -> (Lua, Arc<MemoryTransport>, Runtime) {
        let (caps, transport, rt) = test_capabilities(user);
        let lua = Lua::new();
        register(&lua).unwrap();
        bind(&lua, caps);
        (lua, transport, rt)
    }

    #[test]
    fn test_send_from_script() {
        let (lua, transport, _rt) = lua_with("10");
        let id: i64 = lua
            .load(r#"return send("hi", {{"A", "B"}})"#)
            .eval()
            .unwrap();
        assert_ne!(id, 0);
        match &transport.calls()[0] {
            TransportCall::SendText { chat_id, markup, .. } => {
                assert_eq!(chat_id, "10");
                assert!(matches!(markup, Markup::Reply(_)));
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[test]
    fn test_send_with_inline_options_and_target() {
        let (lua, transport, _rt) = lua_with("10");
        lua.load(r#"send("pick", {{Yes = "y", No = "n"}}, nil, 77)"#)
            .exec()
            .unwrap();
        match &transport.calls_to("77")[0] {
            TransportCall::SendText { markup, .. } => {
                let Markup::Inline(keyboard) = markup else {
                    panic!("expected inline markup");
                };
                let labels: Vec<&str> = keyboard.inline_keyboard[0]
                    .iter()
                    .map(|b| b.text.as_str())
                    .collect();
                assert_eq!(labels, vec!["No", "Yes"]);
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_arguments_do_not_raise() {
        let (lua, transport, _rt) = lua_with("10");
        lua.load(
            r#"
            send()
            send({}, 5, {}, {})
            prompt(nil)
            set(1, {})
            get({})
            del(nil)
            dbQuery()
            dbExec({})
            dbReport()
            doGet()
            doPost(5)
            getFileLink(12)
            replaceOptions()
            deleteMessage("x")
            editMessage(1, 2)
            sleep("soon")
            env()
            json.decode(5)
            "#,
        )
        .exec()
        .unwrap();
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_storage_roundtrip() {
        let (lua, _transport, _rt) = lua_with("10");
        let (name, count, missing): (String, i64, bool) = lua
            .load(
                r#"
                set("profile", {name = "ann", count = 2})
                local p = get("profile")
                set("gone", {x = 1})
                del("gone")
                return p.name, p.count, get("gone") == nil
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(name, "ann");
        assert_eq!(count, 2);
        assert!(missing);
    }

    #[test]
    fn test_json_helpers() {
        let (lua, _transport, _rt) = lua_with("");
        let (encoded, decoded): (String, i64) = lua
            .load(
                r#"
                local text = json.encode({a = 1})
                local value = json.decode('{"b": [1, 2, 3]}')
                return text, value.b[3]
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(encoded, r#"{"a":1}"#);
        assert_eq!(decoded, 3);
    }

    #[test]
    fn test_db_without_database_returns_empty() {
        let (lua, _transport, _rt) = lua_with("1");
        let (rows, exec, report): (String, Value, i64) = lua
            .load(r#"return dbQuery("SELECT 1"), dbExec("DELETE FROM t"), dbReport("r", "c", nil, "SELECT 1")"#)
            .eval()
            .unwrap();
        assert_eq!(rows, "[]");
        assert!(exec.is_nil());
        assert_eq!(report, 0);
    }

    #[test]
    fn test_message_edit_functions() {
        let (lua, transport, _rt) = lua_with("1");
        let id: i64 = lua
            .load(
                r#"
                local id = replaceOptions("5", 9, {{Go = "go"}})
                editMessage("5", 9, "done", {})
                deleteMessage("5", 9)
                return id
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(id, 9);
        assert_eq!(transport.calls_to("5").len(), 3);
    }

    #[test]
    fn test_file_link_degrades_to_empty_string() {
        let (lua, transport, _rt) = lua_with("1");
        let (bad, good): (String, String) = lua
            .load(r#"return getFileLink(12), getFileLink("abc")"#)
            .eval()
            .unwrap();
        assert_eq!(bad, "");
        assert_eq!(good, "memory://files/abc");
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_unbound_state_ignores_calls() {
        let lua = Lua::new();
        register(&lua).unwrap();
        let (id, link, body, cached): (i64, String, String, Value) = lua
            .load(
                r#"
                set("k", {x = 1})
                return send("hi", nil, nil, "5"), getFileLink("f"), doGet("http://example.com"), get("k")
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(link, "");
        assert_eq!(body, "");
        assert!(cached.is_nil());
        assert_eq!(lua.load("return json.encode({1})").eval::<String>().unwrap(), "[1]");
    }

    #[test]
    fn test_rebinding_switches_acting_user() {
        let (lua, transport, _rt) = lua_with("1");
        let (other, _other_transport, _other_rt) = test_capabilities("2");
        lua.load(r#"send("first")"#).exec().unwrap();
        bind(&lua, other);
        lua.load(r#"send("second")"#).exec().unwrap();
        assert_eq!(transport.calls_to("1").len(), 1);
        assert!(transport.calls_to("2").is_empty());
    }
}
