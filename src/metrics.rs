//! Prometheus metrics and tracing spans.
//!
//! With the `metrics` feature, [`METRICS`] holds OpenTelemetry instruments
//! exported through `opentelemetry-prometheus` into a private `prometheus`
//! registry; [`BrewpassMetrics::render`] returns the text exposition format
//! for a scrape endpoint.
//!
//! With the `tracing` feature, [`tracing_helpers`] builds the spans wrapped
//! around statements, transactions and redemptions.

#[cfg(feature = "metrics")]
pub use recorder::{BrewpassMetrics, METRICS};

#[cfg(feature = "metrics")]
mod recorder {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider as _};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<BrewpassMetrics> = Lazy::new(BrewpassMetrics::init);

    pub struct BrewpassMetrics {
        registry: Registry,
        // keeps the reader registered for the lifetime of the process
        _provider: Option<SdkMeterProvider>,
        pub statements_total: Counter<u64>,
        pub statement_errors_total: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub redemptions_total: Counter<u64>,
        pub redemption_conflicts_total: Counter<u64>,
        pub rollbacks_total: Counter<u64>,
        pub pool_wait_duration: Histogram<f64>,
        pub connect_duration: Histogram<f64>,
    }

    impl BrewpassMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => Some(SdkMeterProvider::builder().with_reader(exporter).build()),
                Err(e) => {
                    log::warn!("Prometheus exporter unavailable, metrics will not be exported: {e}");
                    None
                }
            };
            let meter: Meter = match &provider {
                Some(provider) => provider.meter("brewpass"),
                None => opentelemetry::global::meter("brewpass"),
            };

            Self {
                statements_total: meter
                    .u64_counter("brewpass_statements_total")
                    .with_description("Statements executed, by statement name")
                    .build(),
                statement_errors_total: meter
                    .u64_counter("brewpass_statement_errors_total")
                    .with_description("Statements that failed, by statement name")
                    .build(),
                statement_duration: meter
                    .f64_histogram("brewpass_statement_duration_seconds")
                    .with_description("Statement execution time")
                    .build(),
                redemptions_total: meter
                    .u64_counter("brewpass_redemptions_total")
                    .with_description("Redemptions by outcome")
                    .build(),
                redemption_conflicts_total: meter
                    .u64_counter("brewpass_redemption_conflicts_total")
                    .with_description("Redemption attempts retried after a conflict")
                    .build(),
                rollbacks_total: meter
                    .u64_counter("brewpass_rollbacks_total")
                    .with_description("Transactions rolled back")
                    .build(),
                pool_wait_duration: meter
                    .f64_histogram("brewpass_pool_wait_seconds")
                    .with_description("Time spent waiting for a pooled connection")
                    .build(),
                connect_duration: meter
                    .f64_histogram("brewpass_connect_seconds")
                    .with_description("Time to open a connection")
                    .build(),
                registry,
                _provider: provider,
            }
        }

        pub fn record_statement(&self, name: &'static str, elapsed: Duration) {
            let attrs = [KeyValue::new("statement", name)];
            self.statements_total.add(1, &attrs);
            self.statement_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_statement_error(&self, name: &'static str) {
            self.statement_errors_total
                .add(1, &[KeyValue::new("statement", name)]);
        }

        /// `outcome` is an error code, or `"ok"`.
        pub fn record_redemption(&self, outcome: &'static str) {
            self.redemptions_total
                .add(1, &[KeyValue::new("outcome", outcome)]);
        }

        pub fn record_redemption_conflict(&self) {
            self.redemption_conflicts_total.add(1, &[]);
        }

        pub fn record_rollback(&self) {
            self.rollbacks_total.add(1, &[]);
        }

        pub fn record_pool_wait(&self, waited: Duration) {
            self.pool_wait_duration.record(waited.as_secs_f64(), &[]);
        }

        pub fn record_connect(&self, elapsed: Duration) {
            self.connect_duration.record(elapsed.as_secs_f64(), &[]);
        }

        /// Current values in the Prometheus text format.
        pub fn render(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("Failed to encode metrics: {e}");
                return String::new();
            }
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }

}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn execute_statement_span(name: &'static str) -> Span {
        info_span!("brewpass.statement", statement = name)
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("brewpass.acquire_connection")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("brewpass.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("brewpass.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("brewpass.transaction.rollback")
    }

    pub fn redemption_span(subscription_id: i64, quantity: i32) -> Span {
        info_span!("brewpass.redeem", subscription_id, quantity)
    }
}
