use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for the message pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Message metrics
    messages_total: Counter,
    messages_skipped: CounterVec,
    links_rewritten: CounterVec,
    links_disabled: CounterVec,

    // Platform metrics
    platform_errors: CounterVec,
    send_wait: Histogram,

    // Store metrics
    store_retries: Counter,
    store_write_errors: Counter,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let messages_total = Counter::new(
            "fixembed_messages_total",
            "Total number of inbound messages handed to the processor",
        )?;

        let messages_skipped = CounterVec::new(
            Opts::new(
                "fixembed_messages_skipped_total",
                "Messages that ended without a rewrite, by reason",
            ),
            &["reason"],
        )?;

        let links_rewritten = CounterVec::new(
            Opts::new(
                "fixembed_links_rewritten_total",
                "Number of links rewritten and delivered",
            ),
            &["service"],
        )?;

        let links_disabled = CounterVec::new(
            Opts::new(
                "fixembed_links_disabled_total",
                "Links skipped because the service is disabled for the guild",
            ),
            &["service"],
        )?;

        let platform_errors = CounterVec::new(
            Opts::new(
                "fixembed_platform_errors_total",
                "Failed platform calls by operation",
            ),
            &["operation"],
        )?;

        let send_wait = Histogram::with_opts(HistogramOpts::new(
            "fixembed_send_wait_seconds",
            "Time spent waiting for outbound send capacity",
        ))?;

        let store_retries = Counter::new(
            "fixembed_store_retries_total",
            "Durable writes retried because the store was busy",
        )?;

        let store_write_errors = Counter::new(
            "fixembed_store_write_errors_total",
            "Durable writes that were abandoned",
        )?;

        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(messages_skipped.clone()))?;
        registry.register(Box::new(links_rewritten.clone()))?;
        registry.register(Box::new(links_disabled.clone()))?;
        registry.register(Box::new(platform_errors.clone()))?;
        registry.register(Box::new(send_wait.clone()))?;
        registry.register(Box::new(store_retries.clone()))?;
        registry.register(Box::new(store_write_errors.clone()))?;

        Ok(Self {
            registry,
            messages_total,
            messages_skipped,
            links_rewritten,
            links_disabled,
            platform_errors,
            send_wait,
            store_retries,
            store_write_errors,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_message(&self) {
        self.messages_total.inc();
    }

    /// Record a message that ended without a rewrite
    pub fn record_skipped(&self, reason: &str) {
        self.messages_skipped.with_label_values(&[reason]).inc();
    }

    pub fn record_link_rewritten(&self, service: &str) {
        self.links_rewritten.with_label_values(&[service]).inc();
    }

    pub fn record_link_disabled(&self, service: &str) {
        self.links_disabled.with_label_values(&[service]).inc();
    }

    /// Record a failed send/delete/edit
    pub fn record_platform_error(&self, operation: &str) {
        self.platform_errors.with_label_values(&[operation]).inc();
    }

    pub fn record_send_wait(&self, seconds: f64) {
        self.send_wait.observe(seconds);
    }

    pub fn record_store_retry(&self) {
        self.store_retries.inc();
    }

    pub fn record_store_write_error(&self) {
        self.store_write_errors.inc();
    }
}
