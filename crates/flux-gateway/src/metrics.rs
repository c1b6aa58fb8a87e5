use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Hand-rolled Prometheus text exporter. One mutex-guarded struct rather
/// than a crate like `metrics`/`prometheus`, since a handful of process
/// counters don't need a registry and exporter stack of their own.
pub struct Metrics {
    start: Instant,
    counters: Mutex<Counters>,
}

#[derive(Default)]
struct Counters {
    requests_total: HashMap<(String, String), u64>,
    errors_total: HashMap<String, u64>,
    chat_turns_total: u64,
    tool_invocations_total: u64,
    webhook_deliveries_total: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_request(&self, method: &str, path: &str) {
        let mut c = self.counters.lock().unwrap();
        *c.requests_total
            .entry((method.to_string(), path.to_string()))
            .or_insert(0) += 1;
    }

    pub fn record_error(&self, code: &str) {
        let mut c = self.counters.lock().unwrap();
        *c.errors_total.entry(code.to_string()).or_insert(0) += 1;
    }

    pub fn record_chat_turn(&self) {
        self.counters.lock().unwrap().chat_turns_total += 1;
    }

    pub fn record_tool_invocation(&self) {
        self.counters.lock().unwrap().tool_invocations_total += 1;
    }

    pub fn record_webhook_delivery(&self) {
        self.counters.lock().unwrap().webhook_deliveries_total += 1;
    }

    /// Renders the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let c = self.counters.lock().unwrap();
        let mut out = String::new();

        out.push_str("# HELP flux_uptime_seconds Time since the gateway process started.\n");
        out.push_str("# TYPE flux_uptime_seconds counter\n");
        out.push_str(&format!("flux_uptime_seconds {}\n", self.start.elapsed().as_secs()));

        out.push_str("# HELP flux_http_requests_total HTTP requests by method and path.\n");
        out.push_str("# TYPE flux_http_requests_total counter\n");
        for ((method, path), count) in c.requests_total.iter() {
            out.push_str(&format!(
                "flux_http_requests_total{{method=\"{method}\",path=\"{path}\"}} {count}\n"
            ));
        }

        out.push_str("# HELP flux_errors_total Errors by machine-readable code.\n");
        out.push_str("# TYPE flux_errors_total counter\n");
        for (code, count) in c.errors_total.iter() {
            out.push_str(&format!("flux_errors_total{{code=\"{code}\"}} {count}\n"));
        }

        out.push_str("# HELP flux_chat_turns_total Conversation turns completed.\n");
        out.push_str("# TYPE flux_chat_turns_total counter\n");
        out.push_str(&format!("flux_chat_turns_total {}\n", c.chat_turns_total));

        out.push_str("# HELP flux_tool_invocations_total Tool invocations dispatched by the engine.\n");
        out.push_str("# TYPE flux_tool_invocations_total counter\n");
        out.push_str(&format!("flux_tool_invocations_total {}\n", c.tool_invocations_total));

        out.push_str("# HELP flux_webhook_deliveries_total Outbound webhook delivery attempts.\n");
        out.push_str("# TYPE flux_webhook_deliveries_total counter\n");
        out.push_str(&format!("flux_webhook_deliveries_total {}\n", c.webhook_deliveries_total));

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_recorded_counters() {
        let metrics = Metrics::new();
        metrics.record_request("POST", "/api/v1/chat");
        metrics.record_request("POST", "/api/v1/chat");
        metrics.record_error("unauthorized");
        metrics.record_chat_turn();
        metrics.record_tool_invocation();
        metrics.record_webhook_delivery();

        let rendered = metrics.render();
        assert!(rendered.contains("flux_http_requests_total{method=\"POST\",path=\"/api/v1/chat\"} 2"));
        assert!(rendered.contains("flux_errors_total{code=\"unauthorized\"} 1"));
        assert!(rendered.contains("flux_chat_turns_total 1"));
        assert!(rendered.contains("flux_tool_invocations_total 1"));
        assert!(rendered.contains("flux_webhook_deliveries_total 1"));
    }

    #[test]
    fn fresh_metrics_render_zeroed_counters() {
        let rendered = Metrics::new().render();
        assert!(rendered.contains("flux_chat_turns_total 0"));
        assert!(rendered.contains("flux_uptime_seconds"));
    }
}
