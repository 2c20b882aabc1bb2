// Copyright (c) 2026 Isprava Engineering
//! Prometheus counters for the agent runtime (`SPEC_FULL.md` SS6: the
//! `/metrics` endpoint counts "LLM calls, tool invocations, cache
//! hit/miss, circuit breaker trips, rate-limit rejections").
//!
//! Grounded on the teacher's own metrics wiring — `metrics`/
//! `metrics-exporter-prometheus` are teacher dependencies — generalized
//! from the broader pack's `metrics::{counter, histogram}` helper-module
//! idiom (closest direct precedent: `ConaryLabs-Mira`'s
//! `backend/src/metrics/mod.rs`, which also wraps bare macro calls behind
//! named `record_*` functions).
//!
//! Lives beside `config` rather than under `infrastructure` so the
//! otherwise-pure `domain::circuit_breaker` can record a trip without
//! depending on the infrastructure layer.

use metrics::counter;

pub fn record_llm_call(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("agentrelay_llm_calls_total", "status" => status).increment(1);
}

pub fn record_tool_invocation(tool_name: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("agentrelay_tool_invocations_total", "tool" => tool_name.to_string(), "status" => status)
        .increment(1);
}

pub fn record_cache_result(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("agentrelay_cache_results_total", "result" => result).increment(1);
}

pub fn record_circuit_trip(name: &str) {
    counter!("agentrelay_circuit_breaker_trips_total", "name" => name.to_string()).increment(1);
}

pub fn record_rate_limit_rejection(limiter: &str) {
    counter!("agentrelay_rate_limit_rejections_total", "limiter" => limiter.to_string()).increment(1);
}
