//! `http`: blocking outbound HTTP for scripts.
//!
//! Every call builds its own client with the deployment-wide timeout.
//! Responses come back as `{ status = 200, body = "...", headers = {...} }`.

use mlua::{Lua, Table, Value as LuaValue};
use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::lua_pair;
use crate::sandbox::translate::to_lua;

struct Request {
    method: String,
    url: String,
    body: Option<String>,
    headers: Vec<(String, String)>,
}

pub(super) fn module(lua: &Lua, timeout: Duration) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    table.set(
        "get",
        lua.create_function(move |lua, (url, headers): (String, Option<Table>)| {
            let request = Request {
                method: "GET".to_string(),
                url,
                body: None,
                headers: header_pairs(headers)?,
            };
            respond(lua, send(&request, timeout))
        })?,
    )?;

    table.set(
        "post",
        lua.create_function(
            move |lua, (url, body, headers): (String, Option<String>, Option<Table>)| {
                let request = Request {
                    method: "POST".to_string(),
                    url,
                    body,
                    headers: header_pairs(headers)?,
                };
                respond(lua, send(&request, timeout))
            },
        )?,
    )?;

    table.set(
        "request",
        lua.create_function(move |lua, spec: Table| {
            let request = Request {
                method: spec
                    .get::<Option<String>>("method")?
                    .unwrap_or_else(|| "GET".to_string()),
                url: spec.get("url")?,
                body: spec.get("body")?,
                headers: header_pairs(spec.get("headers")?)?,
            };
            respond(lua, send(&request, timeout))
        })?,
    )?;

    Ok(table)
}

fn header_pairs(headers: Option<Table>) -> mlua::Result<Vec<(String, String)>> {
    match headers {
        Some(table) => table.pairs::<String, String>().collect(),
        None => Ok(Vec::new()),
    }
}

fn send(request: &Request, timeout: Duration) -> Result<Value, String> {
    let method = Method::from_bytes(request.method.to_uppercase().as_bytes())
        .map_err(|_| format!("invalid HTTP method '{}'", request.method))?;
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }

    let response = builder.send().map_err(|e| e.to_string())?;
    let status = response.status().as_u16();
    let mut headers = Map::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }
    let body = response.text().map_err(|e| e.to_string())?;

    tracing::debug!(method = %request.method, url = %request.url, status, "Script HTTP request");
    Ok(json!({ "status": status, "body": body, "headers": headers }))
}

fn respond(lua: &Lua, result: Result<Value, String>) -> mlua::Result<(LuaValue, LuaValue)> {
    match result {
        Ok(response) => lua_pair(lua, Ok(to_lua(lua, &response)?)),
        Err(e) => lua_pair::<LuaValue>(lua, Err(e)),
    }
}
