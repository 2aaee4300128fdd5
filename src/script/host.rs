//! Native side of the script bridge
//!
//! Every capability a script has is one of the functions installed here; the
//! prelude wraps them into the `pm` and `console` objects.

use rquickjs::{Ctx, Function, Object};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::context::{ExecutionContext, ResponseView};
use crate::errors::ScriptError;
use crate::models::{Header, HttpMethod, RequestBody, VariableMap};

/// Snapshot of the execution context a script may observe or change
#[derive(Clone, Debug)]
pub struct SandboxState {
    pub method: String,
    pub url: String,
    pub body: Value,
    pub headers: Vec<Header>,
    pub response: Option<ResponseView>,
    pub variables: VariableMap,
    pub tests: BTreeMap<String, bool>,
    pub logs: Vec<String>,
}

impl SandboxState {
    pub fn capture(ctx: &ExecutionContext) -> Self {
        SandboxState {
            method: ctx.request.method.as_str().to_string(),
            url: ctx.request.url.clone(),
            body: ctx.request.body.as_ref().map(RequestBody::to_value).unwrap_or(Value::Null),
            headers: ctx.request.headers.clone(),
            response: ctx.response.clone(),
            variables: ctx.variables.clone(),
            tests: ctx.tests.clone(),
            logs: ctx.logs.clone(),
        }
    }

    /// Copy script effects back; the response is never written back
    pub fn write_back(self, ctx: &mut ExecutionContext) -> Result<(), ScriptError> {
        ctx.variables = self.variables;
        ctx.tests = self.tests;
        ctx.logs = self.logs;
        ctx.request.url = self.url;
        ctx.request.body = RequestBody::from_value(self.body);
        ctx.request.method = self
            .method
            .parse::<HttpMethod>()
            .map_err(|_| ScriptError::InvalidMethod(self.method.clone()))?;
        Ok(())
    }
}

/// Build the bridge object handed to the prelude
pub fn install<'js>(ctx: &Ctx<'js>, state: &Rc<RefCell<SandboxState>>) -> rquickjs::Result<Object<'js>> {
    let host = Object::new(ctx.clone())?;

    let s = state.clone();
    host.set(
        "getRequest",
        Function::new(ctx.clone(), move |field: String| -> Option<String> {
            let state = s.borrow();
            match field.as_str() {
                "method" => Some(state.method.clone()),
                "url" => Some(state.url.clone()),
                _ => None,
            }
        })?,
    )?;

    let s = state.clone();
    host.set(
        "setRequest",
        Function::new(ctx.clone(), move |field: String, value: String| {
            let mut state = s.borrow_mut();
            match field.as_str() {
                "method" => state.method = value,
                "url" => state.url = value,
                _ => {}
            }
        })?,
    )?;

    let s = state.clone();
    host.set(
        "getRequestBody",
        Function::new(ctx.clone(), move || -> String { s.borrow().body.to_string() })?,
    )?;

    let s = state.clone();
    host.set(
        "setRequestBody",
        Function::new(ctx.clone(), move |json: String| {
            let value = serde_json::from_str(&json).unwrap_or(Value::String(json));
            s.borrow_mut().body = value;
        })?,
    )?;

    let s = state.clone();
    host.set(
        "requestHeader",
        Function::new(ctx.clone(), move |key: String| -> Option<String> {
            s.borrow()
                .headers
                .iter()
                .find(|h| h.key.eq_ignore_ascii_case(&key))
                .map(|h| h.value.clone())
        })?,
    )?;

    let s = state.clone();
    host.set(
        "hasResponse",
        Function::new(ctx.clone(), move || -> bool { s.borrow().response.is_some() })?,
    )?;

    let s = state.clone();
    host.set(
        "responseStatus",
        Function::new(ctx.clone(), move || -> i32 {
            s.borrow().response.as_ref().map(|r| i32::from(r.status)).unwrap_or(0)
        })?,
    )?;

    let s = state.clone();
    host.set(
        "responseHeader",
        Function::new(ctx.clone(), move |key: String| -> Option<String> {
            s.borrow()
                .response
                .as_ref()
                .and_then(|r| r.header(&key))
                .map(str::to_string)
        })?,
    )?;

    let s = state.clone();
    host.set(
        "responseBody",
        Function::new(ctx.clone(), move || -> String {
            s.borrow()
                .response
                .as_ref()
                .map(|r| r.body.to_string())
                .unwrap_or_else(|| "null".to_string())
        })?,
    )?;

    let s = state.clone();
    host.set(
        "getVariable",
        Function::new(ctx.clone(), move |key: String| -> Option<String> {
            s.borrow().variables.get(&key).map(str::to_string)
        })?,
    )?;

    let s = state.clone();
    host.set(
        "setVariable",
        Function::new(ctx.clone(), move |key: String, value: String| {
            s.borrow_mut().variables.set(key, value);
        })?,
    )?;

    let s = state.clone();
    host.set(
        "recordTest",
        Function::new(ctx.clone(), move |name: String, passed: bool| {
            s.borrow_mut().tests.insert(name, passed);
        })?,
    )?;

    let s = state.clone();
    host.set(
        "log",
        Function::new(ctx.clone(), move |line: String| {
            s.borrow_mut().logs.push(line);
        })?,
    )?;

    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestSpec;

    #[test]
    fn test_write_back_rejects_unknown_method() {
        let mut ctx = ExecutionContext::new(RequestSpec::new(HttpMethod::GET, "http://x"), VariableMap::new());
        let mut state = SandboxState::capture(&ctx);
        state.method = "FETCH".into();
        state.url = "http://y".into();

        let err = state.write_back(&mut ctx).unwrap_err();
        assert_eq!(err, ScriptError::InvalidMethod("FETCH".into()));
        assert_eq!(ctx.request.url, "http://y");
    }

    #[test]
    fn test_body_round_trips_through_state() {
        let request = RequestSpec::new(HttpMethod::POST, "http://x").with_body(RequestBody::Text("raw".into()));
        let mut ctx = ExecutionContext::new(request, VariableMap::new());
        let state = SandboxState::capture(&ctx);
        assert_eq!(state.body, Value::String("raw".into()));

        state.write_back(&mut ctx).unwrap();
        assert_eq!(ctx.request.body, Some(RequestBody::Text("raw".into())));
    }
}
