//! In-process request metrics.
//!
//! Simple atomic counters exposed via the `/metrics` endpoint. We avoid a
//! metrics client dependency and render a minimal Prometheus-compatible
//! text format from the application itself.

use std::sync::atomic::{AtomicU64, Ordering};

static OBSERVATION_REQUESTS: AtomicU64 = AtomicU64::new(0);
static RESOLVE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static NODE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static NODE_SEARCH_REQUESTS: AtomicU64 = AtomicU64::new(0);
static RECOGNIZE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static FAN_OUT_TASKS: AtomicU64 = AtomicU64::new(0);
static REMOTE_MIXER_CALLS: AtomicU64 = AtomicU64::new(0);
static REMOTE_MIXER_FAILURES: AtomicU64 = AtomicU64::new(0);
static CALC_FILLED_CELLS: AtomicU64 = AtomicU64::new(0);

/// Record one handled request by operation name.
pub fn record_request(operation: &str) {
	match operation {
		"observation" => OBSERVATION_REQUESTS.fetch_add(1, Ordering::Relaxed),
		"resolve" => RESOLVE_REQUESTS.fetch_add(1, Ordering::Relaxed),
		"node" => NODE_REQUESTS.fetch_add(1, Ordering::Relaxed),
		"node_search" => NODE_SEARCH_REQUESTS.fetch_add(1, Ordering::Relaxed),
		"recognize_places" => RECOGNIZE_REQUESTS.fetch_add(1, Ordering::Relaxed),
		_ => 0,
	};
}

pub fn record_fan_out(tasks: u64) {
	FAN_OUT_TASKS.fetch_add(tasks, Ordering::Relaxed);
}

pub fn record_remote_call() {
	REMOTE_MIXER_CALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_remote_failure() {
	REMOTE_MIXER_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_calc_fill(cells: u64) {
	CALC_FILLED_CELLS.fetch_add(cells, Ordering::Relaxed);
}

/// Render all counters as Prometheus-compatible text.
pub fn metrics_text() -> String {
	let counters: [(&str, &str, &AtomicU64); 9] = [
		(
			"bifrost_observation_requests_total",
			"Observation requests handled",
			&OBSERVATION_REQUESTS,
		),
		(
			"bifrost_resolve_requests_total",
			"Resolve requests handled",
			&RESOLVE_REQUESTS,
		),
		(
			"bifrost_node_requests_total",
			"Node requests handled",
			&NODE_REQUESTS,
		),
		(
			"bifrost_node_search_requests_total",
			"Node search requests handled",
			&NODE_SEARCH_REQUESTS,
		),
		(
			"bifrost_recognize_requests_total",
			"Place recognition requests handled",
			&RECOGNIZE_REQUESTS,
		),
		(
			"bifrost_fan_out_tasks_total",
			"Data source tasks spawned by the dispatcher",
			&FAN_OUT_TASKS,
		),
		(
			"bifrost_remote_mixer_calls_total",
			"Requests sent to the remote mixer",
			&REMOTE_MIXER_CALLS,
		),
		(
			"bifrost_remote_mixer_failures_total",
			"Failed remote mixer requests",
			&REMOTE_MIXER_FAILURES,
		),
		(
			"bifrost_calc_filled_cells_total",
			"Observation cells filled by the calculator",
			&CALC_FILLED_CELLS,
		),
	];

	let mut out = String::new();
	for (name, help, counter) in counters {
		out.push_str(&format!("# HELP {} {}\n", name, help));
		out.push_str(&format!("# TYPE {} counter\n", name));
		out.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counters_render_and_accumulate() {
		record_request("observation");
		record_fan_out(3);
		record_calc_fill(2);

		let text = metrics_text();
		assert!(text.contains("# TYPE bifrost_observation_requests_total counter"));
		assert!(text.contains("bifrost_fan_out_tasks_total"));
		assert!(text.contains("bifrost_calc_filled_cells_total"));
	}

	#[test]
	fn unknown_operation_is_ignored() {
		record_request("no_such_operation");
		assert!(metrics_text().contains("bifrost_observation_requests_total"));
	}
}
