// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reduction policy of every metric the agent knows about.
//!
//! The table below is the source of truth for how a metric's running sum is
//! turned into the value that gets reported. Metrics whose names embed a
//! variable part (slab slot sizes) are classified by pattern, and only when
//! the table has no exact entry for them. A metric that matches neither is
//! not reported.

use std::sync::OnceLock;

use regex::Regex;
use tracing::error;

/// How the running statistics of one metric collapse into a single value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    /// The running sum, unchanged.
    Sum,
    /// Mean of the contributions, or the running sum when nothing was counted.
    Avg,
    /// 1.0 when strictly more than half of the contributions were set, else 0.0.
    Boolean,
}

impl Reducer {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(self, running_sum: f64, count: u64) -> f64 {
        match self {
            Reducer::Sum => running_sum,
            Reducer::Avg => {
                if count > 0 {
                    running_sum / count as f64
                } else {
                    running_sum
                }
            }
            Reducer::Boolean => {
                if count == 0 {
                    return running_sum;
                }
                if running_sum / count as f64 > 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

const PATTERN_RULES: [(&str, Reducer); 4] = [
    (r"slab\.slots\..*\.fails$", Reducer::Sum),
    (r"slab\.slots\..*\.free$", Reducer::Avg),
    (r"slab\.slots\..*\.reqs$", Reducer::Sum),
    (r"slab\.slots\..*\.used$", Reducer::Avg),
];

fn pattern_rules() -> &'static [(Regex, Reducer)] {
    static RULES: OnceLock<Vec<(Regex, Reducer)>> = OnceLock::new();
    RULES.get_or_init(|| {
        PATTERN_RULES
            .iter()
            .filter_map(|(pattern, reducer)| match Regex::new(pattern) {
                Ok(regex) => Some((regex, *reducer)),
                Err(e) => {
                    error!("Invalid metric pattern {pattern}: {e}");
                    None
                }
            })
            .collect()
    })
}

/// Resolves the reducer for `name`: exact table entry first, then the first
/// matching pattern rule.
#[must_use]
pub fn reducer_for(name: &str) -> Option<Reducer> {
    exact_reducer(name).or_else(|| {
        pattern_rules()
            .iter()
            .find(|(regex, _)| regex.is_match(name))
            .map(|(_, reducer)| *reducer)
    })
}

#[allow(clippy::too_many_lines)]
fn exact_reducer(name: &str) -> Option<Reducer> {
    use Reducer::{Avg, Boolean, Sum};

    let reducer = match name {
        "system.cpu.idle" => Avg,
        "system.cpu.iowait" => Avg,
        "system.cpu.stolen" => Avg,
        "system.cpu.system" => Avg,
        "system.cpu.user" => Avg,
        "system.disk.free" => Avg,
        "system.disk.in_use" => Avg,
        "system.disk.total" => Avg,
        "system.disk.used" => Avg,
        "system.io.iops_r" => Sum,
        "system.io.iops_w" => Sum,
        "system.io.kbs_r" => Sum,
        "system.io.kbs_w" => Sum,
        "system.io.wait_r" => Sum,
        "system.io.wait_w" => Sum,
        "system.mem.available" => Avg,
        "system.mem.buffered" => Avg,
        "system.mem.cached" => Avg,
        "system.mem.free" => Avg,
        "system.mem.pct_used" => Avg,
        "system.mem.shared" => Avg,
        "system.mem.total" => Avg,
        "system.mem.used" => Avg,
        "system.mem.used.all" => Avg,
        "system.load.1" => Avg,
        "system.load.15" => Avg,
        "system.load.5" => Avg,
        "system.swap.free" => Avg,
        "system.swap.pct_free" => Avg,
        "system.swap.total" => Avg,
        "system.swap.used" => Avg,
        "system.net.bytes_rcvd" => Sum,
        "system.net.bytes_sent" => Sum,
        "system.net.drops_in.count" => Sum,
        "system.net.drops_out.count" => Sum,
        "system.net.listen_overflows" => Sum,
        "system.net.packets_in.count" => Sum,
        "system.net.packets_in.error" => Sum,
        "system.net.packets_out.count" => Sum,
        "system.net.packets_out.error" => Sum,
        "nginx.status" => Boolean,
        "nginx.config.generation" => Sum,
        "nginx.http.gzip.ratio" => Avg,
        "nginx.http.status.1xx" => Sum,
        "nginx.http.status.2xx" => Sum,
        "nginx.http.status.3xx" => Sum,
        "nginx.http.status.4xx" => Sum,
        "nginx.http.status.5xx" => Sum,
        "nginx.http.status.403" => Sum,
        "nginx.http.status.404" => Sum,
        "nginx.http.status.500" => Sum,
        "nginx.http.status.502" => Sum,
        "nginx.http.status.503" => Sum,
        "nginx.http.status.504" => Sum,
        "nginx.http.status.discarded" => Sum,
        "nginx.http.method.delete" => Sum,
        "nginx.http.method.get" => Sum,
        "nginx.http.method.head" => Sum,
        "nginx.http.method.options" => Sum,
        "nginx.http.method.post" => Sum,
        "nginx.http.method.put" => Sum,
        "nginx.http.method.others" => Sum,
        "nginx.http.request.bytes_sent" => Sum,
        "nginx.http.request.body_bytes_sent" => Sum,
        "nginx.http.request.length" => Avg,
        "nginx.http.request.malformed" => Sum,
        "nginx.http.request.time" => Avg,
        "nginx.http.request.time.count" => Sum,
        "nginx.http.request.time.max" => Avg,
        "nginx.http.request.time.median" => Avg,
        "nginx.http.request.time.pctl95" => Avg,
        "nginx.http.request.count" => Sum,
        "nginx.http.request.current" => Avg,
        "nginx.http.request.buffered" => Sum,
        "nginx.http.v0_9" => Sum,
        "nginx.http.v1_0" => Sum,
        "nginx.http.v1_1" => Sum,
        "nginx.http.v2" => Sum,
        "nginx.http.conn.handled" => Sum,
        "nginx.http.conn.reading" => Avg,
        "nginx.http.conn.writing" => Avg,
        "nginx.http.conn.accepted" => Sum,
        "nginx.http.conn.active" => Avg,
        "nginx.http.conn.current" => Avg,
        "nginx.http.conn.dropped" => Sum,
        "nginx.http.conn.idle" => Avg,
        "nginx.upstream.response.buffered" => Sum,
        "nginx.upstream.request.failed" => Sum,
        "nginx.upstream.response.failed" => Sum,
        "nginx.workers.count" => Avg,
        "nginx.workers.rlimit_nofile" => Avg,
        "nginx.workers.cpu.user" => Sum,
        "nginx.workers.cpu.system" => Sum,
        "nginx.workers.cpu.total" => Sum,
        "nginx.workers.fds_count" => Avg,
        "nginx.workers.mem.vms" => Sum,
        "nginx.workers.mem.rss" => Sum,
        "nginx.workers.mem.rss_pct" => Avg,
        "nginx.workers.io.kbs_r" => Sum,
        "nginx.workers.io.kbs_w" => Sum,
        "plus.http.limit_conns.passed" => Sum,
        "plus.http.limit_conns.rejected" => Sum,
        "plus.http.limit_conns.rejected_dry_run" => Sum,
        "plus.http.limit_reqs.passed" => Sum,
        "plus.http.limit_reqs.delayed" => Sum,
        "plus.http.limit_reqs.rejected" => Sum,
        "plus.http.limit_reqs.delayed_dry_run" => Sum,
        "plus.http.limit_reqs.rejected_dry_run" => Sum,
        "plus.cache.bypass.responses" => Sum,
        "plus.cache.bypass.bytes" => Sum,
        "plus.cache.expired.responses" => Sum,
        "plus.cache.expired.bytes" => Sum,
        "plus.cache.hit.responses" => Sum,
        "plus.cache.hit.bytes" => Sum,
        "plus.cache.miss.responses" => Sum,
        "plus.cache.miss.bytes" => Sum,
        "plus.cache.revalidated.responses" => Sum,
        "plus.cache.revalidated.bytes" => Sum,
        "plus.cache.size" => Avg,
        "plus.cache.max_size" => Avg,
        "plus.cache.stale.responses" => Sum,
        "plus.cache.stale.bytes" => Sum,
        "plus.cache.updating.responses" => Sum,
        "plus.cache.updating.bytes" => Sum,
        "plus.http.request.bytes_rcvd" => Sum,
        "plus.http.request.bytes_sent" => Sum,
        "plus.http.request.count" => Sum,
        "plus.http.response.count" => Sum,
        "plus.ssl.failed" => Sum,
        "plus.ssl.handshakes" => Sum,
        "plus.ssl.reuses" => Sum,
        "plus.http.status.1xx" => Sum,
        "plus.http.status.2xx" => Sum,
        "plus.http.status.3xx" => Sum,
        "plus.http.status.4xx" => Sum,
        "plus.http.status.5xx" => Sum,
        "plus.http.status.discarded" => Sum,
        "plus.http.status.processing" => Avg,
        "plus.stream.bytes_rcvd" => Sum,
        "plus.stream.bytes_sent" => Sum,
        "plus.stream.connections" => Sum,
        "plus.stream.processing" => Avg,
        "plus.stream.discarded" => Sum,
        "plus.stream.status.2xx" => Sum,
        "plus.stream.status.4xx" => Sum,
        "plus.stream.status.5xx" => Sum,
        "plus.stream.status.total" => Sum,
        "plus.http.upstream.zombies" => Avg,
        "plus.http.upstream.keepalives" => Avg,
        "plus.http.upstream.queue.maxsize" => Avg,
        "plus.http.upstream.queue.overflows" => Sum,
        "plus.http.upstream.queue.size" => Avg,
        "plus.http.upstream.peers.conn.active" => Avg,
        "plus.http.upstream.peers.header_time" => Avg,
        "plus.http.upstream.peers.response.time" => Avg,
        "plus.http.upstream.peers.request.count" => Sum,
        "plus.http.upstream.peers.response.count" => Sum,
        "plus.http.upstream.peers.status.1xx" => Sum,
        "plus.http.upstream.peers.status.2xx" => Sum,
        "plus.http.upstream.peers.status.3xx" => Sum,
        "plus.http.upstream.peers.status.4xx" => Sum,
        "plus.http.upstream.peers.status.5xx" => Sum,
        "plus.http.upstream.peers.bytes_sent" => Sum,
        "plus.http.upstream.peers.bytes_rcvd" => Sum,
        "plus.http.upstream.peers.fails" => Sum,
        "plus.http.upstream.peers.unavail" => Sum,
        "plus.http.upstream.peers.health_checks.fails" => Sum,
        "plus.http.upstream.peers.health_checks.unhealthy" => Sum,
        "plus.http.upstream.peers.health_checks.checks" => Sum,
        "plus.http.upstream.peers.state.up" => Avg,
        "plus.http.upstream.peers.state.draining" => Avg,
        "plus.http.upstream.peers.state.down" => Avg,
        "plus.http.upstream.peers.state.unavail" => Avg,
        "plus.http.upstream.peers.state.checking" => Avg,
        "plus.http.upstream.peers.state.unhealthy" => Avg,
        "plus.http.upstream.peers.total.up" => Avg,
        "plus.http.upstream.peers.total.draining" => Avg,
        "plus.http.upstream.peers.total.down" => Avg,
        "plus.http.upstream.peers.total.unavail" => Avg,
        "plus.http.upstream.peers.total.checking" => Avg,
        "plus.http.upstream.peers.total.unhealthy" => Avg,
        "plus.stream.upstream.zombies" => Avg,
        "plus.stream.upstream.peers.conn.active" => Avg,
        "plus.stream.upstream.peers.conn.count" => Sum,
        "plus.stream.upstream.peers.connect_time" => Avg,
        "plus.stream.upstream.peers.ttfb" => Avg,
        "plus.stream.upstream.peers.response.time" => Avg,
        "plus.stream.upstream.peers.bytes_sent" => Sum,
        "plus.stream.upstream.peers.bytes_rcvd" => Sum,
        "plus.stream.upstream.peers.fails" => Sum,
        "plus.stream.upstream.peers.unavail" => Sum,
        "plus.stream.upstream.peers.health_checks.fails" => Sum,
        "plus.stream.upstream.peers.health_checks.unhealthy" => Sum,
        "plus.stream.upstream.peers.health_checks.checks" => Sum,
        "plus.stream.upstream.peers.state.up" => Avg,
        "plus.stream.upstream.peers.state.draining" => Avg,
        "plus.stream.upstream.peers.state.down" => Avg,
        "plus.stream.upstream.peers.state.unavail" => Avg,
        "plus.stream.upstream.peers.state.checking" => Avg,
        "plus.stream.upstream.peers.state.unhealthy" => Avg,
        "plus.stream.upstream.peers.total.up" => Avg,
        "plus.stream.upstream.peers.total.draining" => Avg,
        "plus.stream.upstream.peers.total.down" => Avg,
        "plus.stream.upstream.peers.total.unavail" => Avg,
        "plus.stream.upstream.peers.total.checking" => Avg,
        "plus.stream.upstream.peers.total.unhealthy" => Avg,
        "plus.slab.pages.used" => Avg,
        "plus.slab.pages.free" => Avg,
        "plus.slab.pages.total" => Avg,
        "plus.slab.pages.pct_used" => Avg,
        "plus.instance.count" => Avg,
        "container.cpu.cores" => Avg,
        "container.cpu.period" => Avg,
        "container.cpu.quota" => Avg,
        "container.cpu.shares" => Avg,
        "container.cpu.set.cores" => Avg,
        "container.cpu.throttling.time" => Avg,
        "container.cpu.throttling.throttled" => Avg,
        "container.cpu.throttling.periods" => Avg,
        "container.cpu.throttling.percent" => Avg,
        "container.mem.oom" => Avg,
        "container.mem.oom.kill" => Avg,
        _ => return None,
    };
    Some(reducer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_returns_running_sum() {
        assert_eq!(Reducer::Sum.apply(42.0, 3), 42.0);
        assert_eq!(Reducer::Sum.apply(42.0, 0), 42.0);
    }

    #[test]
    fn test_avg_divides_by_count() {
        assert_eq!(Reducer::Avg.apply(21.0, 3), 7.0);
    }

    #[test]
    fn test_avg_without_contributions_keeps_running_sum() {
        assert_eq!(Reducer::Avg.apply(5.0, 0), 5.0);
    }

    #[test]
    fn test_boolean_majority_vote() {
        assert_eq!(Reducer::Boolean.apply(2.0, 3), 1.0);
        assert_eq!(Reducer::Boolean.apply(1.0, 3), 0.0);
        assert_eq!(Reducer::Boolean.apply(3.0, 3), 1.0);
        assert_eq!(Reducer::Boolean.apply(0.0, 3), 0.0);
    }

    #[test]
    fn test_boolean_exactly_half_is_zero() {
        assert_eq!(Reducer::Boolean.apply(2.0, 4), 0.0);
    }

    #[test]
    fn test_boolean_without_contributions_keeps_running_sum() {
        assert_eq!(Reducer::Boolean.apply(1.0, 0), 1.0);
    }

    #[test]
    fn test_table_entries() {
        assert_eq!(reducer_for("nginx.status"), Some(Reducer::Boolean));
        assert_eq!(reducer_for("nginx.http.conn.active"), Some(Reducer::Avg));
        assert_eq!(reducer_for("nginx.http.request.count"), Some(Reducer::Sum));
        assert_eq!(reducer_for("system.load.1"), Some(Reducer::Avg));
        assert_eq!(reducer_for("container.mem.oom.kill"), Some(Reducer::Avg));
    }

    #[test]
    fn test_slab_slot_patterns() {
        assert_eq!(reducer_for("plus.slab.slots.64.fails"), Some(Reducer::Sum));
        assert_eq!(reducer_for("plus.slab.slots.128.free"), Some(Reducer::Avg));
        assert_eq!(reducer_for("plus.slab.slots.8.reqs"), Some(Reducer::Sum));
        assert_eq!(reducer_for("plus.slab.slots.2048.used"), Some(Reducer::Avg));
    }

    #[test]
    fn test_slab_page_metrics_come_from_table() {
        assert_eq!(reducer_for("plus.slab.pages.free"), Some(Reducer::Avg));
        assert_eq!(reducer_for("plus.slab.pages.used"), Some(Reducer::Avg));
    }

    #[test]
    fn test_unknown_metric_has_no_reducer() {
        assert_eq!(reducer_for("nginx.made.up"), None);
        assert_eq!(reducer_for(""), None);
        assert_eq!(reducer_for("plus.slab.slots.64.size"), None);
    }
}
