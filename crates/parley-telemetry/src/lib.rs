mod alerts;

pub use alerts::{AlertRecord, SqliteAlertSink, TracingAlertSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive ("info", "parley_engine=debug,info", ...). RUST_LOG wins.
    pub log_level: String,
    /// Per-module overrides appended to the filter.
    pub module_levels: Vec<(String, String)>,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Where persisted alerts go. `None` keeps alerts in the log stream only.
    pub alert_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            module_levels: Vec::new(),
            json: false,
            alert_db_path: None,
        }
    }
}

impl TelemetryConfig {
    fn filter_directive(&self) -> String {
        let mut filter = self.log_level.to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_lowercase()));
        }
        filter
    }
}

/// Holds what telemetry initialization produced.
pub struct TelemetryGuard {
    alert_sink: Option<Arc<SqliteAlertSink>>,
}

impl TelemetryGuard {
    pub fn alerts(&self) -> Option<Arc<SqliteAlertSink>> {
        self.alert_sink.clone()
    }
}

/// Initialize logging and the alert sink. Call once at startup; later calls
/// leave the first subscriber in place.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter_str = config.filter_directive();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&filter_str))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let pretty_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
    {
        eprintln!("parley-telemetry: subscriber already set: {e}");
    }

    let alert_sink = config.alert_db_path.as_ref().and_then(|path| match SqliteAlertSink::open(path) {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to open alert DB, alerts go to logs only");
            None
        }
    });

    TelemetryGuard { alert_sink }
}
