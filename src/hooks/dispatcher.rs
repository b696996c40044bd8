use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::circuit_breaker::{CircuitBreaker, ExecuteError};
use crate::sandbox::SandboxExecutor;

use super::types::{HookDefinition, HookError, HookEvent, HookResult, OutputFormat, SingleHookResult};

/// Case-insensitive substring patterns whose matching data-map keys never
/// reach a hook's child environment.
const SENSITIVE_PATTERNS: &[&str] = &["password", "secret", "token", "key", "auth", "credential"];

/// Maps incoming events to matching hook commands, wraps each call in the
/// circuit breaker, shapes a scrubbed environment, and aggregates results.
pub struct HookDispatcher {
    breaker: Arc<CircuitBreaker>,
    executor: Arc<SandboxExecutor>,
    hooks: RwLock<Option<HashMap<String, Vec<HookDefinition>>>>,
    regex_cache: DashMap<String, Arc<Regex>>,
}

impl HookDispatcher {
    /// Construct an uninitialized dispatcher; call [`Self::init`] before
    /// [`Self::execute_hook`].
    pub fn new(breaker: Arc<CircuitBreaker>, executor: Arc<SandboxExecutor>) -> Self {
        Self {
            breaker,
            executor,
            hooks: RwLock::new(None),
            regex_cache: DashMap::new(),
        }
    }

    /// Load (or replace) the hook configuration.
    pub async fn init(&self, hooks: HashMap<String, Vec<HookDefinition>>) {
        *self.hooks.write().await = Some(hooks);
    }

    /// Find matching hooks for `event`, run each through the circuit
    /// breaker and sandbox, and aggregate the results. Returns `None` when
    /// no hook is registered for `event.event_type` or none of them match.
    pub async fn execute_hook(&self, event: &HookEvent) -> Result<Option<HookResult>, HookError> {
        let guard = self.hooks.read().await;
        let all_hooks = guard.as_ref().ok_or(HookError::NotInitialized)?;

        let Some(candidates) = all_hooks.get(&event.event_type) else {
            return Ok(None);
        };

        let matching: Vec<HookDefinition> = candidates
            .iter()
            .filter(|hook| self.matches(hook, event))
            .cloned()
            .collect();
        drop(guard);

        if matching.is_empty() {
            return Ok(None);
        }

        let mut results = Vec::with_capacity(matching.len());
        for hook in &matching {
            results.push(self.run_hook(hook, event).await);
        }

        if results.len() == 1 {
            Ok(Some(HookResult::Single(results.into_iter().next().unwrap())))
        } else {
            Ok(Some(HookResult::Aggregate { results }))
        }
    }

    fn matches(&self, hook: &HookDefinition, event: &HookEvent) -> bool {
        let Some(tool) = &event.tool else {
            return true;
        };
        let regex = match self.regex_cache.get(&hook.matcher) {
            Some(cached) => Arc::clone(&cached),
            None => match Regex::new(&hook.matcher) {
                Ok(compiled) => {
                    let compiled = Arc::new(compiled);
                    self.regex_cache
                        .insert(hook.matcher.clone(), Arc::clone(&compiled));
                    compiled
                }
                Err(e) => {
                    warn!(matcher = %hook.matcher, error = %e, "hook matcher failed to compile, treating as non-matching");
                    return false;
                }
            },
        };
        regex.is_match(tool)
    }

    async fn run_hook(&self, hook: &HookDefinition, event: &HookEvent) -> SingleHookResult {
        let hook_id = hook.hook_id(&event.event_type);
        let env = build_hook_env(event);
        let command = hook.command.clone();
        let output_format = hook.output_format;
        let executor = Arc::clone(&self.executor);

        let outcome: Result<SingleHookResult, ExecuteError<SingleHookResult>> = self
            .breaker
            .execute(&hook_id, move || async move {
                match executor.execute(&command, &env).await {
                    Ok(exec) => {
                        let (parsed, parse_error) =
                            maybe_parse_json(output_format, &exec.stdout);
                        if exec.exit_code != 0 {
                            Err(SingleHookResult::failure(
                                exec.stdout,
                                exec.stderr,
                                exec.exit_code,
                                parsed,
                                parse_error,
                            ))
                        } else {
                            Ok(SingleHookResult::success(
                                exec.stdout,
                                exec.stderr,
                                parsed,
                                parse_error,
                            ))
                        }
                    }
                    Err(e) => Err(SingleHookResult::error_only(e.to_string())),
                }
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(ExecuteError::Open(_)) => SingleHookResult::skipped_circuit_open(),
            Err(ExecuteError::Op(result)) => result,
        }
    }
}

fn maybe_parse_json(output_format: Option<OutputFormat>, stdout: &str) -> (Option<Value>, Option<String>) {
    if output_format != Some(OutputFormat::Json) {
        return (None, None);
    }
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return (None, None);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Always sets `HOOK_TYPE`/`TIMESTAMP`, optionally `TOOL_NAME`, and one
/// `TOOL_INPUT_<key>` per non-sensitive `event.data` entry.
fn build_hook_env(event: &HookEvent) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("HOOK_TYPE".to_string(), event.event_type.clone());
    env.insert("TIMESTAMP".to_string(), event.timestamp.to_rfc3339());
    if let Some(tool) = &event.tool {
        env.insert("TOOL_NAME".to_string(), tool.clone());
    }
    for (key, value) in &event.data {
        if is_sensitive(key) {
            continue;
        }
        env.insert(format!("TOOL_INPUT_{key}"), stringify(value));
    }
    env
}
