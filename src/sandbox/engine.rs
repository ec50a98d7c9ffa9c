//! The boa_engine-backed worker: runs on a dedicated blocking thread since
//! `boa_engine::Context` is not `Send`. Host capability surface is a single
//! `mcp.<server>.<tool>(args)` tree generated from the tool definitions
//! passed in at spawn time, backed by one native function that round-trips
//! through std channels to the async parent.

use std::cell::Cell;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

use boa_engine::{js_string, Context, JsArgs, JsError, JsValue, NativeFunction, Source};
use uuid::Uuid;

use super::protocol::{ExecutionOutcome, ParentToWorker, ToolDefinition, WorkerToParent};

pub struct WorkerInput {
    pub code: String,
    pub args: serde_json::Value,
    pub context: serde_json::Value,
    pub tool_definitions: Vec<ToolDefinition>,
    pub rpc_timeout: Duration,
    pub trace_id: Uuid,
}

const STRINGIFY_HELPER: &str = "globalThis.__pml_stringify = function(value) {\n\
\tvar seen = new WeakSet();\n\
\tfunction replacer(key, val) {\n\
\t\tif (val === undefined) { return key === '' ? val : '[Undefined]'; }\n\
\t\tif (typeof val === 'function') { return '[Function]'; }\n\
\t\tif (typeof val === 'symbol') { return val.toString(); }\n\
\t\tif (typeof val === 'bigint') { return val.toString() + 'n'; }\n\
\t\tif (val !== null && typeof val === 'object') {\n\
\t\t\tif (seen.has(val)) { return '[Circular]'; }\n\
\t\t\tseen.add(val);\n\
\t\t}\n\
\t\treturn val;\n\
\t}\n\
\tvar result = JSON.stringify(value, replacer);\n\
\treturn result === undefined ? 'null' : result;\n\
};\n";

/// Runs synchronously on a blocking thread; returns only once the script
/// has produced a result, thrown, or the per-RPC-call timeout tripped.
pub fn run(
    input: WorkerInput,
    tx_out: Sender<WorkerToParent>,
    rx_in: Receiver<ParentToWorker>,
) -> ExecutionOutcome {
    let mut context = Context::default();

    if let Err(e) = install_rpc_bridge(&mut context, tx_out, rx_in, input.rpc_timeout, input.trace_id) {
        return ExecutionOutcome::err("EXECUTION_ERROR", format!("host setup failed: {e}"));
    }

    let prelude = format!("{STRINGIFY_HELPER}{}", generate_mcp_surface(&input.tool_definitions));
    if let Err(e) = context.eval(Source::from_bytes(&prelude)) {
        return ExecutionOutcome::err("EXECUTION_ERROR", format!("host surface init failed: {e}"));
    }

    let args_json = input.args.to_string();
    let context_json = input.context.to_string();
    // Wrapped as an immediately-invoked *async* body so `await mcp.*` calls
    // are valid syntax. Settlement is captured onto a global slot instead of
    // unwrapped through boa's own Promise bindings: every RPC call the body
    // can await is actually synchronous under the hood (the native bridge
    // blocks on `recv_timeout`), so draining the job queue once with
    // `run_jobs` is all that's needed to resolve it.
    let wrapped = format!(
        "globalThis.__pml_settled = undefined;\n\
         (async function(args, context) {{\n{code}\n}})(JSON.parse({args_json:?}), JSON.parse({context_json:?}))\n\
         \t.then(function(v) {{ globalThis.__pml_settled = {{ ok: true, value: v }}; }})\n\
         \t.catch(function(e) {{ globalThis.__pml_settled = {{ ok: false, value: e }}; }});",
        code = input.code,
    );

    if let Err(e) = context.eval(Source::from_bytes(&wrapped)) {
        return classify_error(e);
    }
    context.run_jobs();

    let settled = match context
        .global_object()
        .get(js_string!("__pml_settled"), &mut context)
    {
        Ok(v) => v,
        Err(e) => return ExecutionOutcome::err("EXECUTION_ERROR", e.to_string()),
    };

    let Some(settled_obj) = settled.as_object() else {
        return ExecutionOutcome::err(
            "EXECUTION_ERROR",
            "async capability body never settled".to_string(),
        );
    };

    let ok = settled_obj
        .get(js_string!("ok"), &mut context)
        .map(|v| v.as_boolean().unwrap_or(false))
        .unwrap_or(false);
    let value = match settled_obj.get(js_string!("value"), &mut context) {
        Ok(v) => v,
        Err(e) => return ExecutionOutcome::err("EXECUTION_ERROR", e.to_string()),
    };

    if !ok {
        let message = display_string(&mut context, &value);
        return classify_rejection(&message);
    }

    match stringify(&mut context, &value) {
        Ok(json_text) => match serde_json::from_str(&json_text) {
            Ok(value) => ExecutionOutcome::ok(value),
            Err(e) => ExecutionOutcome::err("PARSE_ERROR", e.to_string()),
        },
        Err(e) => ExecutionOutcome::err("EXECUTION_ERROR", e.to_string()),
    }
}

fn classify_error(e: JsError) -> ExecutionOutcome {
    classify_rejection(&e.to_string())
}

/// `String(value)` as a JS engine would coerce it for display — an `Error`
/// rejection renders as `"Error: boom"` rather than the empty `"{}"`
/// `JSON.stringify` would give it (its `message` isn't enumerable).
fn display_string(context: &mut Context, value: &JsValue) -> String {
    let Ok(string_ctor) = context.global_object().get(js_string!("String"), context) else {
        return "rejected with an unprintable value".to_string();
    };
    let Some(callable) = string_ctor.as_callable() else {
        return "rejected with an unprintable value".to_string();
    };
    callable
        .call(&JsValue::undefined(), &[value.clone()], context)
        .ok()
        .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()))
        .unwrap_or_else(|| "rejected with an unprintable value".to_string())
}

fn classify_rejection(message: &str) -> ExecutionOutcome {
    if message.contains("RPC_TIMEOUT") {
        ExecutionOutcome::err("RPC_TIMEOUT", message)
    } else if message.contains("SyntaxError") {
        ExecutionOutcome::err("PARSE_ERROR", message)
    } else {
        ExecutionOutcome::err("EXECUTION_ERROR", message)
    }
}

/// Cycle-safe `JSON.stringify`: delegates to the in-engine `__pml_stringify`
/// helper (a `WeakSet`-tracked replacer) rather than calling `JSON.stringify`
/// directly, so a capability that returns a circular structure comes back as
/// a tagged placeholder instead of throwing.
fn stringify(context: &mut Context, value: &JsValue) -> Result<String, JsError> {
    let stringify_fn = context
        .global_object()
        .get(js_string!("__pml_stringify"), context)?;
    let result = stringify_fn
        .as_callable()
        .ok_or_else(|| JsError::from_opaque(JsValue::from(js_string!("__pml_stringify missing"))))?
        .call(&JsValue::undefined(), &[value.clone()], context)?;
    Ok(result
        .as_string()
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|| "null".to_string()))
}

/// Builds `globalThis.mcp.<server>.<tool> = fn(args) -> value` for each
/// known tool, plus error unwrapping so a failed RPC call throws instead of
/// returning a sentinel object.
fn generate_mcp_surface(tools: &[ToolDefinition]) -> String {
    let mut src = String::from(
        "globalThis.mcp = {};\n\
         globalThis.__pml_wrap = function(server, tool) {\n\
         \treturn function(args) {\n\
         \t\tvar raw = __pml_rpc_call(server, tool, JSON.stringify(args === undefined ? null : args));\n\
         \t\tvar parsed = JSON.parse(raw);\n\
         \t\tif (parsed && parsed.__pml_error !== undefined) {\n\
         \t\t\tthrow new Error(typeof parsed.__pml_error === 'string' ? parsed.__pml_error : JSON.stringify(parsed.__pml_error));\n\
         \t\t}\n\
         \t\treturn parsed.value;\n\
         \t};\n\
         };\n",
    );
    for t in tools {
        src.push_str(&format!(
            "globalThis.mcp[{server:?}] = globalThis.mcp[{server:?}] || {{}};\n\
             globalThis.mcp[{server:?}][{tool:?}] = globalThis.__pml_wrap({server:?}, {tool:?});\n",
            server = t.server,
            tool = t.tool,
        ));
    }
    src
}

/// Registers the single native function user code never calls directly;
/// only the generated `mcp.<server>.<tool>` wrappers call it. Brackets every
/// round trip with `ToolStart`/`ToolEnd` events on `tx_out` so the bridge
/// can observe sub-tool calls as they happen, not just once `tool_invocations`
/// is assembled after the fact.
fn install_rpc_bridge(
    context: &mut Context,
    tx_out: Sender<WorkerToParent>,
    rx_in: Receiver<ParentToWorker>,
    rpc_timeout: Duration,
    trace_id: Uuid,
) -> Result<(), JsError> {
    let next_call_id = Cell::new(0u64);
    let native = NativeFunction::from_closure(move |_this, args, ctx| {
        let server = args
            .get_or_undefined(0)
            .to_string(ctx)?
            .to_std_string_escaped();
        let tool = args
            .get_or_undefined(1)
            .to_string(ctx)?
            .to_std_string_escaped();
        let payload = args
            .get_or_undefined(2)
            .to_string(ctx)?
            .to_std_string_escaped();
        let parsed: serde_json::Value =
            serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);

        let id = next_call_id.get() + 1;
        next_call_id.set(id);
        let full_name = format!("{server}.{tool}");

        let _ = tx_out.send(WorkerToParent::ToolStart {
            tool: full_name.clone(),
            trace_id,
            ts: chrono::Utc::now(),
        });

        if tx_out
            .send(WorkerToParent::RpcCall {
                call_id: id,
                server,
                tool,
                args: parsed,
            })
            .is_err()
        {
            return Err(JsError::from_opaque(JsValue::from(js_string!(
                "WORKER_TERMINATED"
            ))));
        }

        let started = Instant::now();
        let outcome = rx_in.recv_timeout(rpc_timeout);
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(ParentToWorker::RpcResult {
                success,
                value,
                error,
                ..
            }) => {
                let _ = tx_out.send(WorkerToParent::ToolEnd {
                    tool: full_name,
                    trace_id,
                    ts: chrono::Utc::now(),
                    success,
                    duration_ms,
                    error: error.as_ref().map(|e| e.to_string()),
                });
                let body = if success {
                    serde_json::json!({ "value": value.unwrap_or(serde_json::Value::Null) })
                } else {
                    serde_json::json!({ "__pml_error": error.unwrap_or(serde_json::Value::Null) })
                };
                Ok(JsValue::from(js_string!(body.to_string())))
            }
            Err(_) => {
                let _ = tx_out.send(WorkerToParent::ToolEnd {
                    tool: full_name,
                    trace_id,
                    ts: chrono::Utc::now(),
                    success: false,
                    duration_ms,
                    error: Some("RPC_TIMEOUT".to_string()),
                });
                Err(JsError::from_opaque(JsValue::from(js_string!(
                    "RPC_TIMEOUT"
                ))))
            }
        }
    });

    context.register_global_callable(js_string!("__pml_rpc_call"), 3, native)?;
    Ok(())
}
