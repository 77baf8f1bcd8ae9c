use super::{InjectionError, InjectionHost, InjectionState};
use crate::canonical::CanonicalRequest;
use async_trait::async_trait;
use boa_engine::{
    js_string, native_function::NativeFunction, object::builtins::JsArray, property::PropertyKey,
    Context, JsError, JsObject, JsResult, JsValue, Source,
};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const LOOP_ITERATION_LIMIT: u64 = 1_000_000;
const RECURSION_LIMIT: usize = 512;
const MAX_JSON_DEPTH: usize = 64;

/// Timer queue, completion callback and virtual clock installed before user
/// code runs. Timers fire in due-time order without real sleeping.
const PRELUDE: &str = r#"
var __decoy = (function () {
    var timers = [];
    var sequence = 0;
    var runtime = { done: false, result: undefined, now: 0 };
    runtime.callback = function (response) {
        if (!runtime.done) {
            runtime.done = true;
            runtime.result = response;
        }
    };
    runtime.schedule = function (fn, delay, args) {
        sequence += 1;
        timers.push({ id: sequence, at: runtime.now + (delay > 0 ? delay : 0), fn: fn, args: args });
        return sequence;
    };
    runtime.cancel = function (id) {
        timers = timers.filter(function (t) { return t.id !== id; });
    };
    runtime.runNextTimer = function (limit) {
        if (timers.length === 0) { return -1; }
        timers.sort(function (a, b) { return (a.at - b.at) || (a.id - b.id); });
        if (timers[0].at > limit) { return -2; }
        var timer = timers.shift();
        runtime.now = timer.at;
        timer.fn.apply(undefined, timer.args);
        return runtime.now;
    };
    return runtime;
})();
function setTimeout(fn, delay) {
    return __decoy.schedule(fn, Number(delay) || 0, Array.prototype.slice.call(arguments, 2));
}
function setImmediate(fn) {
    return __decoy.schedule(fn, 0, Array.prototype.slice.call(arguments, 1));
}
function clearTimeout(id) { __decoy.cancel(id); }
var clearImmediate = clearTimeout;
"#;

// Description of the request being served, for injected log lines
thread_local! {
    static INJECTION_SCOPE: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_injection_scope(scope: String) {
    INJECTION_SCOPE.with(|s| {
        *s.borrow_mut() = Some(scope);
    });
}

fn clear_injection_scope() {
    INJECTION_SCOPE.with(|s| {
        *s.borrow_mut() = None;
    });
}

fn current_injection_scope() -> String {
    INJECTION_SCOPE.with(|s| s.borrow().clone().unwrap_or_default())
}

/// JavaScript injection host backed by the Boa engine.
///
/// Every call gets a fresh `Context` on the blocking pool, so injected code
/// cannot leak globals between requests. The only thing that persists is the
/// imposter's [`InjectionState`], round-tripped through JSON.
///
/// Injected response functions are called as
/// `fn(request, state, logger[, callback])`. A function declaring four or more
/// parameters completes through `callback(response)`; fewer parameters means
/// the return value is the response.
///
/// A job that outlives its timeout is abandoned, not stopped: Boa has no
/// interrupt, so it keeps its blocking thread until a runtime limit ends it.
/// It works on a copy of the state, so its writes are never applied.
#[derive(Debug, Clone)]
pub struct JsSandbox {
    timeout: Duration,
}

impl JsSandbox {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn budget_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn run_blocking<T, F>(&self, job: F) -> Result<T, InjectionError>
    where
        T: Send + 'static,
        F: FnOnce(Instant) -> Result<T, InjectionError> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let handle = tokio::task::spawn_blocking(move || job(deadline));
        match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => Err(InjectionError::Timeout(self.budget_ms())),
            Ok(Err(join_error)) => Err(InjectionError::Aborted(join_error.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

impl Default for JsSandbox {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl InjectionHost for JsSandbox {
    async fn evaluate_predicate(
        &self,
        source: &str,
        request: &CanonicalRequest,
    ) -> Result<bool, InjectionError> {
        let source = source.to_string();
        let view = request.view();
        self.run_blocking(move |_| run_predicate(&source, &view))
            .await
    }

    async fn compute_response(
        &self,
        source: &str,
        request: &CanonicalRequest,
        state: &InjectionState,
    ) -> Result<Value, InjectionError> {
        // held until the job finishes or times out, so stateful calls never interleave
        let mut guard = tokio::time::timeout(self.timeout, Arc::clone(state).lock_owned())
            .await
            .map_err(|_| InjectionError::Timeout(self.budget_ms()))?;
        let mut working = guard.clone();
        let source = source.to_string();
        let view = request.view();
        let budget_ms = self.budget_ms();
        let (updated, result) = self
            .run_blocking(move |deadline| {
                let result = execute_response(&source, &view, &mut working, deadline, budget_ms);
                Ok((working, result))
            })
            .await?;
        *guard = updated;
        result
    }

    async fn validate_predicate(
        &self,
        source: &str,
        sample: &CanonicalRequest,
    ) -> Result<(), InjectionError> {
        self.evaluate_predicate(source, sample).await.map(|_| ())
    }

    async fn validate_response(
        &self,
        source: &str,
        sample: &CanonicalRequest,
    ) -> Result<(), InjectionError> {
        let source = source.to_string();
        let view = sample.view();
        self.run_blocking(move |_| dry_run_response(&source, &view))
            .await
    }
}

// =============================================================================
// Blocking execution
// =============================================================================

/// Wrap user source so it evaluates as a function expression. A trailing line
/// comment or semicolon in the source must not break the wrapper.
fn function_expression(source: &str) -> String {
    let trimmed = source.trim().trim_end_matches(';');
    format!("(\n{trimmed}\n)")
}

fn script_error(e: JsError) -> InjectionError {
    InjectionError::Script(e.to_string())
}

fn new_context() -> Result<Context, InjectionError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    context
        .runtime_limits_mut()
        .set_recursion_limit(RECURSION_LIMIT);
    context
        .eval(Source::from_bytes(PRELUDE))
        .map_err(script_error)?;
    install_logger(&mut context).map_err(script_error)?;
    Ok(context)
}

fn set_global(context: &mut Context, name: &str, value: &Value) -> Result<(), InjectionError> {
    let js_value = json_to_js(context, value).map_err(script_error)?;
    context
        .global_object()
        .set(js_string!(name), js_value, false, context)
        .map(|_| ())
        .map_err(script_error)
}

fn get_global(context: &mut Context, name: &str) -> Result<JsValue, InjectionError> {
    context
        .global_object()
        .get(js_string!(name), context)
        .map_err(script_error)
}

fn eval(context: &mut Context, code: &str) -> Result<JsValue, InjectionError> {
    context
        .eval(Source::from_bytes(code.as_bytes()))
        .map_err(script_error)
}

/// Run an injected predicate against the request view.
pub(crate) fn run_predicate(source: &str, request: &Value) -> Result<bool, InjectionError> {
    let mut context = new_context()?;
    set_global(&mut context, "__request", request)?;
    let script = format!(
        "var __decoyFn = {};\n__decoyFn(__request);",
        function_expression(source)
    );

    set_injection_scope(describe(request));
    let result = eval(&mut context, &script);
    clear_injection_scope();

    let result = result?;
    result
        .as_boolean()
        .ok_or_else(|| InjectionError::NotBoolean(result.display().to_string()))
}

#[derive(Debug, PartialEq, Eq)]
enum Completion {
    Returned,
    Callback,
    Ambiguous,
}

/// Load the function, call it once and report how it intends to complete.
fn start_response(
    context: &mut Context,
    source: &str,
    request: &Value,
    state: &Map<String, Value>,
) -> Result<Completion, InjectionError> {
    set_global(context, "__request", request)?;
    set_global(context, "__state", &Value::Object(state.clone()))?;
    let script = format!(
        r#"
        var __decoyFn = {};
        var __decoyCallbackStyle = __decoyFn.length >= 4;
        var __decoyReturned = __decoyCallbackStyle
            ? __decoyFn(__request, __state, logger, __decoy.callback)
            : __decoyFn(__request, __state, logger);
        __decoyCallbackStyle
            ? (__decoyReturned === undefined ? "callback" : "ambiguous")
            : "returned";
        "#,
        function_expression(source)
    );

    let outcome = eval(context, &script)?;
    match outcome.as_string().map(|s| s.to_std_string_escaped()).as_deref() {
        Some("returned") => Ok(Completion::Returned),
        Some("callback") => Ok(Completion::Callback),
        _ => Ok(Completion::Ambiguous),
    }
}

/// Drain promise jobs and virtual timers until the callback fires.
fn await_callback(
    context: &mut Context,
    deadline: Instant,
    budget_ms: u64,
) -> Result<JsValue, InjectionError> {
    let poll = format!("__decoy.runNextTimer({budget_ms})");
    loop {
        let _ = context.run_jobs();
        if eval(context, "__decoy.done")?.as_boolean().unwrap_or(false) {
            return eval(context, "__decoy.result");
        }
        if Instant::now() >= deadline {
            return Err(InjectionError::Timeout(budget_ms));
        }
        let next = eval(context, &poll)?.as_number().unwrap_or(-1.0);
        if next < 0.0 {
            // nothing left that could call back, or the next timer is past the budget
            return Err(InjectionError::Timeout(budget_ms));
        }
    }
}

fn sync_state(context: &mut Context, state: &mut Map<String, Value>) {
    let Ok(value) = get_global(context, "__state") else {
        return;
    };
    if let Ok(Value::Object(updated)) = js_to_json(context, &value, 0) {
        *state = updated;
    }
}

/// Run an injected response function to completion. State mutations are kept
/// even when the function fails part-way.
pub(crate) fn execute_response(
    source: &str,
    request: &Value,
    state: &mut Map<String, Value>,
    deadline: Instant,
    budget_ms: u64,
) -> Result<Value, InjectionError> {
    let mut context = new_context()?;
    set_injection_scope(describe(request));
    let result = run_to_completion(&mut context, source, request, state, deadline, budget_ms);
    clear_injection_scope();
    sync_state(&mut context, state);

    let value = result?;
    match js_to_json(&mut context, &value, 0).map_err(script_error)? {
        Value::Object(obj) => Ok(Value::Object(obj)),
        other => Err(InjectionError::InvalidResponse(describe_json(&other))),
    }
}

fn run_to_completion(
    context: &mut Context,
    source: &str,
    request: &Value,
    state: &Map<String, Value>,
    deadline: Instant,
    budget_ms: u64,
) -> Result<JsValue, InjectionError> {
    match start_response(context, source, request, state)? {
        Completion::Returned => get_global(context, "__decoyReturned"),
        Completion::Callback => await_callback(context, deadline, budget_ms),
        Completion::Ambiguous => Err(InjectionError::AmbiguousCompletion),
    }
}

/// Call the function once against throwaway state without waiting for a
/// callback.
pub(crate) fn dry_run_response(source: &str, request: &Value) -> Result<(), InjectionError> {
    let mut context = new_context()?;
    set_injection_scope(describe(request));
    let result = start_response(&mut context, source, request, &Map::new());
    clear_injection_scope();
    match result? {
        Completion::Ambiguous => Err(InjectionError::AmbiguousCompletion),
        Completion::Returned | Completion::Callback => Ok(()),
    }
}

fn describe(request: &Value) -> String {
    format!(
        "{} {}",
        request["method"].as_str().unwrap_or_default(),
        request["path"].as_str().unwrap_or_default()
    )
}

fn describe_json(value: &Value) -> String {
    match value {
        Value::Null => "undefined".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(_) => "a number".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

// =============================================================================
// logger
// =============================================================================

fn log_line(args: &[JsValue]) -> String {
    args.iter()
        .map(|arg| match arg.as_string() {
            Some(s) => s.to_std_string_escaped(),
            None => arg.display().to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn logger_debug(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    debug!(request = %current_injection_scope(), "{}", log_line(args));
    Ok(JsValue::undefined())
}

fn logger_info(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    info!(request = %current_injection_scope(), "{}", log_line(args));
    Ok(JsValue::undefined())
}

fn logger_warn(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    warn!(request = %current_injection_scope(), "{}", log_line(args));
    Ok(JsValue::undefined())
}

fn logger_error(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    error!(request = %current_injection_scope(), "{}", log_line(args));
    Ok(JsValue::undefined())
}

fn register_method(
    obj: &JsObject,
    name: &str,
    func: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>,
    context: &mut Context,
) -> JsResult<()> {
    obj.set(
        PropertyKey::from(js_string!(name)),
        NativeFunction::from_fn_ptr(func).to_js_function(context.realm()),
        false,
        context,
    )
    .map(|_| ())
}

/// Install `logger` (and `console`) routing to tracing.
fn install_logger(context: &mut Context) -> JsResult<()> {
    let logger = JsObject::with_object_proto(context.intrinsics());
    register_method(&logger, "debug", logger_debug, context)?;
    register_method(&logger, "info", logger_info, context)?;
    register_method(&logger, "log", logger_info, context)?;
    register_method(&logger, "warn", logger_warn, context)?;
    register_method(&logger, "error", logger_error, context)?;

    let global = context.global_object();
    global.set(js_string!("logger"), logger.clone(), false, context)?;
    global.set(js_string!("console"), logger, false, context)?;
    Ok(())
}

// =============================================================================
// JSON <-> JS conversion
// =============================================================================

fn json_to_js(context: &mut Context, value: &Value) -> JsResult<JsValue> {
    match value {
        Value::Null => Ok(JsValue::null()),
        Value::Bool(b) => Ok(JsValue::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsValue::from(i))
            } else if let Some(f) = n.as_f64() {
                Ok(JsValue::from(f))
            } else {
                Ok(JsValue::null())
            }
        }
        Value::String(s) => Ok(JsValue::from(js_string!(s.clone()))),
        Value::Array(arr) => {
            let js_arr = JsArray::new(context);
            for (i, v) in arr.iter().enumerate() {
                let js_val = json_to_js(context, v)?;
                js_arr.set(i as u32, js_val, false, context)?;
            }
            Ok(js_arr.into())
        }
        Value::Object(obj) => {
            let js_obj = JsObject::with_object_proto(context.intrinsics());
            for (k, v) in obj {
                let js_val = json_to_js(context, v)?;
                js_obj.set(js_string!(k.clone()), js_val, false, context)?;
            }
            Ok(js_obj.into())
        }
    }
}

/// Convert with `JSON.stringify`-like rules: functions and `undefined`
/// properties are dropped, and integral numbers stay integers.
fn js_to_json(context: &mut Context, value: &JsValue, depth: usize) -> JsResult<Value> {
    if depth > MAX_JSON_DEPTH || value.is_null() || value.is_undefined() {
        return Ok(Value::Null);
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Value::Bool(b));
    }

    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() < 9.0e15 {
            return Ok(Value::Number(serde_json::Number::from(n as i64)));
        }
        return Ok(serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }

    if let Some(s) = value.as_string() {
        return Ok(Value::String(s.to_std_string_escaped()));
    }

    if let Some(obj) = value.as_object() {
        if obj.is_array() {
            let len = obj
                .get(js_string!("length"), context)?
                .as_number()
                .unwrap_or(0.0) as u32;
            let mut arr = Vec::with_capacity(len as usize);
            for i in 0..len {
                let item = obj.get(i, context)?;
                arr.push(js_to_json(context, &item, depth + 1)?);
            }
            return Ok(Value::Array(arr));
        }

        let mut map = Map::new();
        for key in obj.own_property_keys(context)? {
            let key_str = match &key {
                PropertyKey::String(s) => s.to_std_string_escaped(),
                PropertyKey::Index(i) => i.get().to_string(),
                PropertyKey::Symbol(_) => continue,
            };
            let val = obj.get(key.clone(), context)?;
            if val.is_undefined() || val.is_callable() {
                continue;
            }
            map.insert(key_str, js_to_json(context, &val, depth + 1)?);
        }
        return Ok(Value::Object(map));
    }

    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_test::traced_test;

    fn view(method: &str, path: &str) -> Value {
        CanonicalRequest::new(method, path).view()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn run(source: &str, request: &Value, state: &mut Map<String, Value>) -> Result<Value, InjectionError> {
        execute_response(source, request, state, far_deadline(), 5000)
    }

    #[test]
    fn test_predicate_sees_request() {
        let source = "function (request) { return request.path === '/test'; }";
        assert_eq!(run_predicate(source, &view("GET", "/test")), Ok(true));
        assert_eq!(run_predicate(source, &view("GET", "/other")), Ok(false));
    }

    #[test]
    fn test_predicate_body_that_is_not_a_function_fails() {
        let result = run_predicate("return true;", &view("GET", "/"));
        assert!(matches!(result, Err(InjectionError::Script(_))), "{result:?}");
    }

    #[test]
    fn test_predicate_must_return_boolean() {
        let result = run_predicate("function () { return 'yes'; }", &view("GET", "/"));
        assert!(matches!(result, Err(InjectionError::NotBoolean(_))), "{result:?}");
    }

    #[test]
    fn test_predicate_source_with_trailing_semicolon_and_comment() {
        let source = "function (request) { return true; } // always;\n;";
        assert_eq!(run_predicate(source, &view("GET", "/")), Ok(true));
    }

    #[test]
    fn test_synchronous_response() {
        let mut state = Map::new();
        let response = run(
            "function (request) { return { body: request.method + ' INJECTED' }; }",
            &view("GET", "/"),
            &mut state,
        )
        .unwrap();
        assert_eq!(response, json!({"body": "GET INJECTED"}));
    }

    #[test]
    fn test_state_persists_between_calls() {
        let source = "function (request, state) {\n\
                      if (!state.calls) { state.calls = 0; }\n\
                      state.calls += 1;\n\
                      return { body: state.calls.toString() };\n\
                      }";
        let mut state = Map::new();
        let first = run(source, &view("GET", "/"), &mut state).unwrap();
        let second = run(source, &view("GET", "/"), &mut state).unwrap();
        assert_eq!(first["body"], "1");
        assert_eq!(second["body"], "2");
        assert_eq!(state.get("calls"), Some(&json!(2)));
    }

    #[test]
    fn test_thrown_error_is_reported() {
        let mut state = Map::new();
        let result = run("function () { throw('BOOM'); }", &view("GET", "/"), &mut state);
        match result {
            Err(InjectionError::Script(message)) => assert!(message.contains("BOOM"), "{message}"),
            other => panic!("expected script error, got {other:?}"),
        }
    }

    #[test]
    fn test_state_kept_when_function_throws() {
        let mut state = Map::new();
        let _ = run(
            "function (request, state) { state.touched = true; throw new Error('late'); }",
            &view("GET", "/"),
            &mut state,
        );
        assert_eq!(state.get("touched"), Some(&json!(true)));
    }

    #[test]
    fn test_callback_after_timer() {
        let source = "function (request, state, logger, callback) {\n\
                      setTimeout(function () {\n\
                          callback({ statusCode: 302, headers: { Location: 'http://example.com/' }, body: '' });\n\
                      }, 50);\n\
                      }";
        let mut state = Map::new();
        let response = run(source, &view("GET", "/"), &mut state).unwrap();
        assert_eq!(response["statusCode"], json!(302));
        assert_eq!(response["headers"]["Location"], "http://example.com/");
    }

    #[test]
    fn test_callback_from_promise() {
        let source = "function (request, state, logger, callback) {\n\
                      Promise.resolve('async').then(function (v) { callback({ body: v }); });\n\
                      }";
        let mut state = Map::new();
        let response = run(source, &view("GET", "/"), &mut state).unwrap();
        assert_eq!(response["body"], "async");
    }

    #[test]
    fn test_callback_never_called_times_out() {
        let mut state = Map::new();
        let result = run(
            "function (request, state, logger, callback) { }",
            &view("GET", "/"),
            &mut state,
        );
        assert_eq!(result, Err(InjectionError::Timeout(5000)));
    }

    #[test]
    fn test_timer_past_budget_times_out() {
        let source = "function (request, state, logger, callback) {\n\
                      setTimeout(function () { callback({ body: 'late' }); }, 60000);\n\
                      }";
        let mut state = Map::new();
        let result = run(source, &view("GET", "/"), &mut state);
        assert_eq!(result, Err(InjectionError::Timeout(5000)));
    }

    #[test]
    fn test_callback_style_returning_value_is_ambiguous() {
        let source = "function (request, state, logger, callback) { return { body: 'x' }; }";
        assert_eq!(
            dry_run_response(source, &view("GET", "/")),
            Err(InjectionError::AmbiguousCompletion)
        );
    }

    #[test]
    fn test_dry_run_does_not_wait_for_callback() {
        let source = "function (request, state, logger, callback) {\n\
                      setTimeout(function () { callback({ body: 'x' }); }, 10);\n\
                      }";
        assert_eq!(dry_run_response(source, &view("GET", "/")), Ok(()));
    }

    #[test]
    fn test_non_object_response_is_rejected() {
        let mut state = Map::new();
        let result = run("function () { return 42; }", &view("GET", "/"), &mut state);
        assert!(matches!(result, Err(InjectionError::InvalidResponse(_))), "{result:?}");
    }

    #[test]
    fn test_query_keeps_insertion_order() {
        let request = CanonicalRequest::new("GET", "/")
            .with_query_string("zeta=1&alpha=2")
            .view();
        let mut state = Map::new();
        let response = run(
            "function (request) { return { body: JSON.stringify(request.query) }; }",
            &request,
            &mut state,
        )
        .unwrap();
        assert_eq!(response["body"], r#"{"zeta":"1","alpha":"2"}"#);
    }

    #[test]
    #[traced_test]
    fn test_logger_routes_to_tracing() {
        let mut state = Map::new();
        let _ = run(
            "function (request, state, logger) { logger.info('hello from', request.path); return {}; }",
            &view("GET", "/logged"),
            &mut state,
        );
        assert!(logs_contain("hello from /logged"));
    }

    #[tokio::test]
    async fn test_sandbox_host_shares_state() {
        let sandbox = JsSandbox::new(Duration::from_secs(5));
        let state = crate::scripting::new_injection_state();
        let request = CanonicalRequest::new("GET", "/");
        let source = "function (request, state) { state.n = (state.n || 0) + 1; return { body: String(state.n) }; }";
        sandbox.compute_response(source, &request, &state).await.unwrap();
        let second = sandbox.compute_response(source, &request, &state).await.unwrap();
        assert_eq!(second["body"], "2");
        assert_eq!(state.lock().await.get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_runaway_injection_releases_state() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let sandbox = JsSandbox::new(Duration::from_millis(300));
            let state = crate::scripting::new_injection_state();
            let source = "function (request, state) {\n\
                if (request.path === '/spin') { for (;;) { for (var i = 0; i < 1000; i++) {} } }\n\
                state.n = (state.n || 0) + 1;\n\
                return { body: String(state.n) };\n\
            }";

            let spin = CanonicalRequest::new("GET", "/spin");
            let err = sandbox.compute_response(source, &spin, &state).await.unwrap_err();
            assert!(matches!(
                err,
                InjectionError::Timeout(300) | InjectionError::Script(_)
            ));

            let ok = CanonicalRequest::new("GET", "/ok");
            let response = tokio::time::timeout(
                Duration::from_secs(2),
                sandbox.compute_response(source, &ok, &state),
            )
            .await
            .expect("state lock released after timeout")
            .unwrap();
            assert_eq!(response["body"], "1");
        });
        // the abandoned job never finishes; do not wait for it
        runtime.shutdown_background();
    }

    #[tokio::test]
    async fn test_sandbox_validation() {
        let sandbox = JsSandbox::default();
        let sample = CanonicalRequest::sample();
        assert!(sandbox
            .validate_predicate("function (r) { return r.method === 'GET'; }", &sample)
            .await
            .is_ok());
        assert!(sandbox.validate_predicate("return true;", &sample).await.is_err());
        assert!(sandbox
            .validate_response("function () { throw('BOOM'); }", &sample)
            .await
            .is_err());
    }
}
