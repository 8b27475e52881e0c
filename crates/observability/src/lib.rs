use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compass_core::Resolution;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct GovernanceMetrics {
    requests_total: AtomicU64,
    chat_bypass_total: AtomicU64,
    organize_bypass_total: AtomicU64,
    generated_total: AtomicU64,
    fallback_total: AtomicU64,
    lexicon_rejections_total: AtomicU64,
    generation_failures_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub chat_bypass_total: u64,
    pub organize_bypass_total: u64,
    pub generated_total: u64,
    pub fallback_total: u64,
    pub lexicon_rejections_total: u64,
    pub generation_failures_total: u64,
    pub avg_latency_millis: f64,
}

impl GovernanceMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lexicon_rejection(&self) {
        self.lexicon_rejections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_generation_failure(&self) {
        self.generation_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Counts the request under the path that produced its final content.
    pub fn record_resolution(&self, resolution: Resolution) {
        let counter = match resolution {
            Resolution::ChatBypass => &self.chat_bypass_total,
            Resolution::OrganizeBypass => &self.organize_bypass_total,
            Resolution::Governed => &self.generated_total,
            Resolution::Fallback(_) => &self.fallback_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: requests,
            chat_bypass_total: self.chat_bypass_total.load(Ordering::Relaxed),
            organize_bypass_total: self.organize_bypass_total.load(Ordering::Relaxed),
            generated_total: self.generated_total.load(Ordering::Relaxed),
            fallback_total: self.fallback_total.load(Ordering::Relaxed),
            lexicon_rejections_total: self.lexicon_rejections_total.load(Ordering::Relaxed),
            generation_failures_total: self.generation_failures_total.load(Ordering::Relaxed),
            avg_latency_millis: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,compass_agents=info,compass_api=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
