use std::sync::OnceLock;

use prometheus::{HistogramVec, IntCounterVec};

static MESSAGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HANDLE_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Messages seen per subject, labeled with their disposition
/// (`ack`, `nak`, `failed`).
#[allow(clippy::expect_used)]
pub fn messages_total() -> &'static IntCounterVec {
    MESSAGES_TOTAL.get_or_init(|| {
        prometheus::register_int_counter_vec!(
            "pipeline_messages_total",
            "Messages processed by disposition",
            &["subject", "outcome"]
        )
        .expect("register pipeline_messages_total")
    })
}

/// Wall-clock seconds spent inside `Handler::handle` per subject.
#[allow(clippy::expect_used)]
pub fn handle_seconds() -> &'static HistogramVec {
    HANDLE_SECONDS.get_or_init(|| {
        prometheus::register_histogram_vec!(
            "pipeline_handle_duration_seconds",
            "Handler execution time",
            &["subject"]
        )
        .expect("register pipeline_handle_duration_seconds")
    })
}

/// Render the default registry in the Prometheus text exposition format.
pub fn render() -> String {
    let encoder = prometheus::TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_text_format() {
        messages_total()
            .with_label_values(&["task.scrape", "ack"])
            .inc();
        handle_seconds()
            .with_label_values(&["task.scrape"])
            .observe(0.05);

        let body = render();
        assert!(body.contains("pipeline_messages_total"));
        assert!(body.contains("pipeline_handle_duration_seconds"));
    }
}
