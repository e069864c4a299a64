use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonically increasing counter.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Value that can go up or down.
#[derive(Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn set(&self, val: i64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters and gauges of the authorization resolver, rendered in Prometheus
/// text exposition format.
#[derive(Default)]
pub struct ResolverMetrics {
    pub authorize_allowed: Counter,
    pub authorize_denied: Counter,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_evictions: Counter,
    pub cache_invalidations: Counter,
    /// Inserts dropped because the index moved on while they were computed.
    pub cache_stale_inserts: Counter,
    pub events_applied: Counter,
    pub events_stale: Counter,
    pub relists: Counter,
    pub relist_failures: Counter,
    pub roles: Gauge,
    pub bindings: Gauge,
    pub dangling_bindings: Gauge,
}

impl ResolverMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_verdict(&self, allowed: bool) {
        if allowed {
            self.authorize_allowed.inc();
        } else {
            self.authorize_denied.inc();
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        write_header(
            &mut output,
            "fsauthz_authorize_total",
            "Authorization decisions by verdict",
            "counter",
        );
        let _ = writeln!(
            output,
            "fsauthz_authorize_total{{verdict=\"allow\"}} {}",
            self.authorize_allowed.get()
        );
        let _ = writeln!(
            output,
            "fsauthz_authorize_total{{verdict=\"deny\"}} {}",
            self.authorize_denied.get()
        );

        let counters: [(&str, &str, &Counter); 9] = [
            ("fsauthz_decision_cache_hits_total", "Decision cache hits", &self.cache_hits),
            ("fsauthz_decision_cache_misses_total", "Decision cache misses", &self.cache_misses),
            (
                "fsauthz_decision_cache_evictions_total",
                "Decisions evicted by LRU or TTL",
                &self.cache_evictions,
            ),
            (
                "fsauthz_decision_cache_invalidations_total",
                "Decisions dropped by grant deltas",
                &self.cache_invalidations,
            ),
            (
                "fsauthz_decision_cache_stale_inserts_total",
                "Decisions discarded because the index changed before insertion",
                &self.cache_stale_inserts,
            ),
            (
                "fsauthz_watch_events_applied_total",
                "Watch events applied to the index",
                &self.events_applied,
            ),
            (
                "fsauthz_watch_events_stale_total",
                "Watch events discarded as stale",
                &self.events_stale,
            ),
            ("fsauthz_relists_total", "Completed full re-lists", &self.relists),
            (
                "fsauthz_relist_failures_total",
                "Failed re-list attempts",
                &self.relist_failures,
            ),
        ];
        for (name, help, counter) in counters {
            write_header(&mut output, name, help, "counter");
            let _ = writeln!(output, "{} {}", name, counter.get());
        }

        let gauges: [(&str, &str, &Gauge); 3] = [
            ("fsauthz_index_roles", "Roles held in the index", &self.roles),
            ("fsauthz_index_bindings", "Bindings held in the index", &self.bindings),
            (
                "fsauthz_index_dangling_bindings",
                "Bindings whose role is not known",
                &self.dangling_bindings,
            ),
        ];
        for (name, help, gauge) in gauges {
            write_header(&mut output, name, help, "gauge");
            let _ = writeln!(output, "{} {}", name, gauge.get());
        }

        output
    }
}

fn write_header(output: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
}
