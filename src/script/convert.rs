//! Coercion of script values into host types.
//!
//! Script arguments are loosely typed. Every helper here degrades to `None`
//! or an empty value instead of raising into the script.

use mlua::{Lua, LuaSerdeExt, Table, Value};

use super::engine::serialize_options;
use crate::db::SqlArg;
use crate::dispatch::{InlineOption, InlineRow, Options};

/// Convert a Lua value to a string for output.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
        Value::Table(_) => "[table]".to_string(),
        Value::Function(_) => "[function]".to_string(),
        Value::Thread(_) => "[thread]".to_string(),
        Value::UserData(_) => "[userdata]".to_string(),
        Value::LightUserData(_) => "[lightuserdata]".to_string(),
        Value::Error(e) => format!("[error: {}]", e),
        _ => "[unknown]".to_string(),
    }
}

/// Strings and numbers as text.
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.to_str().ok().map(|s| s.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(format_number(*n)),
        _ => None,
    }
}

/// Only genuine strings.
pub fn as_strict_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.to_str().ok().map(|s| s.to_string()),
        _ => None,
    }
}

/// Integers, truncated floats and numeric strings.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Number(n) if n.is_finite() => Some(n.trunc() as i64),
        Value::String(s) => s.to_str().ok()?.trim().parse().ok(),
        _ => None,
    }
}

/// Optional target override: absent or nil keeps the default.
pub fn as_target(value: &Value) -> Option<String> {
    match value {
        Value::Nil => None,
        other => as_string(other),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Keyboard options passed to `send`.
///
/// An array of arrays of labels is a reply keyboard; an array of
/// label-to-token tables is an inline keyboard. Anything else is no options.
pub fn parse_options(value: &Value) -> Options {
    let Value::Table(rows) = value else {
        return Options::None;
    };

    match rows.raw_get::<Value>(1) {
        Ok(Value::Table(first)) if first.raw_len() > 0 => {
            Options::Reply(parse_reply_rows(rows)).normalized()
        }
        Ok(Value::Table(_)) => match parse_inline_rows(value) {
            Some(rows) if rows.iter().any(|row| !row.is_empty()) => Options::Inline(rows),
            _ => Options::None,
        },
        _ => Options::None,
    }
}

fn parse_reply_rows(rows: &Table) -> Vec<Vec<String>> {
    rows.clone()
        .sequence_values::<Value>()
        .filter_map(|row| match row {
            Ok(Value::Table(row)) => Some(
                row.sequence_values::<Value>()
                    .filter_map(|label| label.ok().as_ref().and_then(as_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

/// An array of label-to-token tables. Returns `None` unless `value` is a table.
pub fn parse_inline_rows(value: &Value) -> Option<Vec<InlineRow>> {
    let Value::Table(rows) = value else {
        return None;
    };

    let parsed = rows
        .clone()
        .sequence_values::<Value>()
        .filter_map(|row| match row {
            Ok(Value::Table(row)) => Some(
                row.pairs::<Value, Value>()
                    .filter_map(|pair| {
                        let (label, token) = pair.ok()?;
                        Some(InlineOption::new(as_strict_string(&label)?, as_string(&token)?))
                    })
                    .collect(),
            ),
            _ => None,
        })
        .collect();
    Some(parsed)
}

/// String-keyed table flattened into name/value pairs.
pub fn string_pairs(value: &Value) -> Vec<(String, String)> {
    let Value::Table(table) = value else {
        return Vec::new();
    };

    let mut pairs: Vec<(String, String)> = table
        .clone()
        .pairs::<Value, Value>()
        .filter_map(|pair| {
            let (name, value) = pair.ok()?;
            let value = match value {
                Value::Boolean(b) => b.to_string(),
                other => as_string(&other)?,
            };
            Some((as_strict_string(&name)?, value))
        })
        .collect();
    pairs.sort();
    pairs
}

/// Lua value to JSON. Values with no JSON form yield `None`.
pub fn to_json(lua: &Lua, value: &Value) -> Option<serde_json::Value> {
    lua.from_value::<serde_json::Value>(value.clone()).ok()
}

/// JSON to Lua value, with JSON null as nil.
pub fn from_json(lua: &Lua, value: &serde_json::Value) -> mlua::Result<Value> {
    lua.to_value_with(value, serialize_options())
}

/// Bind a Lua value as a statement argument. Tables bind as JSON text.
pub fn to_sql_arg(lua: &Lua, value: &Value) -> SqlArg {
    match value {
        Value::Nil => SqlArg::Null,
        Value::Boolean(b) => SqlArg::Bool(*b),
        Value::Integer(i) => SqlArg::Int(*i),
        Value::Number(n) => SqlArg::Float(*n),
        Value::String(s) => SqlArg::Text(s.to_str().map(|s| s.to_string()).unwrap_or_default()),
        Value::Table(_) => to_json(lua, value)
            .map(|json| SqlArg::Text(json.to_string()))
            .unwrap_or(SqlArg::Null),
        _ => SqlArg::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(lua: &Lua, source: &str) -> Value {
        lua.load(source).eval::<Value>().unwrap()
    }

    #[test]
    fn test_value_to_string() {
        let lua = Lua::new();
        assert_eq!(value_to_string(&Value::Nil), "nil");
        assert_eq!(value_to_string(&Value::Boolean(true)), "true");
        assert_eq!(value_to_string(&Value::Integer(42)), "42");
        assert_eq!(value_to_string(&eval(&lua, "'hi'")), "hi");
        assert_eq!(value_to_string(&eval(&lua, "{}")), "[table]");
    }

    #[test]
    fn test_scalar_coercion() {
        let lua = Lua::new();
        assert_eq!(as_string(&Value::Integer(7)), Some("7".to_string()));
        assert_eq!(as_string(&Value::Number(7.0)), Some("7".to_string()));
        assert_eq!(as_string(&Value::Number(1.5)), Some("1.5".to_string()));
        assert_eq!(as_string(&Value::Boolean(true)), None);
        assert_eq!(as_strict_string(&Value::Integer(7)), None);

        assert_eq!(as_integer(&Value::Number(3.9)), Some(3));
        assert_eq!(as_integer(&eval(&lua, "' 12 '")), Some(12));
        assert_eq!(as_integer(&eval(&lua, "'abc'")), None);
        assert_eq!(as_integer(&Value::Nil), None);

        assert_eq!(as_target(&Value::Nil), None);
        assert_eq!(as_target(&Value::Integer(99)), Some("99".to_string()));
    }

    #[test]
    fn test_parse_reply_options() {
        let lua = Lua::new();
        let options = parse_options(&eval(&lua, "{{'Yes', 'No'}, {'Cancel'}}"));
        assert_eq!(
            options,
            Options::Reply(vec![
                vec!["Yes".to_string(), "No".to_string()],
                vec!["Cancel".to_string()],
            ])
        );
    }

    #[test]
    fn test_parse_inline_options() {
        let lua = Lua::new();
        let options = parse_options(&eval(&lua, "{{Yes = '1', No = 'http://example.com'}}"));
        let Options::Inline(rows) = options else {
            panic!("expected inline options");
        };
        assert_eq!(rows.len(), 1);
        let mut row = rows[0].clone();
        row.sort_by(|a, b| a.token.cmp(&b.token));
        assert_eq!(
            row,
            vec![
                InlineOption::new("Yes", "1"),
                InlineOption::new("No", "http://example.com"),
            ]
        );
    }

    #[test]
    fn test_parse_options_degrades() {
        let lua = Lua::new();
        assert_eq!(parse_options(&Value::Nil), Options::None);
        assert_eq!(parse_options(&eval(&lua, "'text'")), Options::None);
        assert_eq!(parse_options(&eval(&lua, "{}")), Options::None);
        assert_eq!(parse_options(&eval(&lua, "{1, 2}")), Options::None);
        assert_eq!(parse_options(&eval(&lua, "{{}}")), Options::None);
    }

    #[test]
    fn test_parse_inline_rows_numeric_tokens() {
        let lua = Lua::new();
        let rows = parse_inline_rows(&eval(&lua, "{{A = 1}, {B = 2}}")).unwrap();
        assert_eq!(rows[0], vec![InlineOption::new("A", "1")]);
        assert_eq!(rows[1], vec![InlineOption::new("B", "2")]);
        assert!(parse_inline_rows(&Value::Nil).is_none());
    }

    #[test]
    fn test_string_pairs() {
        let lua = Lua::new();
        let pairs = string_pairs(&eval(&lua, "{q = 'rust', page = 2, f = function() end}"));
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "rust".to_string()),
            ]
        );
        assert!(string_pairs(&Value::Nil).is_empty());
    }

    #[test]
    fn test_json_conversion() {
        let lua = Lua::new();
        let json = to_json(&lua, &eval(&lua, "{name = 'x', tags = {'a', 'b'}, n = 3}")).unwrap();
        assert_eq!(json["name"], "x");
        assert_eq!(json["tags"][1], "b");
        assert_eq!(json["n"], 3);

        let value = from_json(&lua, &serde_json::json!({"a": null, "b": 1})).unwrap();
        let Value::Table(table) = value else {
            panic!("expected table");
        };
        assert_eq!(table.get::<Value>("a").unwrap(), Value::Nil);
        assert_eq!(table.get::<i64>("b").unwrap(), 1);
    }

    #[test]
    fn test_sql_args() {
        let lua = Lua::new();
        assert_eq!(to_sql_arg(&lua, &Value::Nil), SqlArg::Null);
        assert_eq!(to_sql_arg(&lua, &Value::Boolean(true)), SqlArg::Bool(true));
        assert_eq!(to_sql_arg(&lua, &Value::Integer(5)), SqlArg::Int(5));
        assert_eq!(to_sql_arg(&lua, &Value::Number(2.5)), SqlArg::Float(2.5));
        assert_eq!(
            to_sql_arg(&lua, &eval(&lua, "'abc'")),
            SqlArg::Text("abc".to_string())
        );
        assert_eq!(
            to_sql_arg(&lua, &eval(&lua, "{a = 1}")),
            SqlArg::Text(r#"{"a":1}"#.to_string())
        );
    }
}
