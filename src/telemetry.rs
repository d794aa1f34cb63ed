use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Where JSON trace lines land: `VOICEGATE_TRACE_LOG` if set, otherwise a
/// file in the system temp dir.
pub fn tracing_log_path() -> PathBuf {
    env::var("VOICEGATE_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voicegate_trace.jsonl"))
}

/// Install the global JSON tracing subscriber once. Off unless the
/// `VOICEGATE_LOGS` env var is set; embedding applications that install
/// their own subscriber can simply never call this.
pub fn init_tracing() {
    if env::var_os("VOICEGATE_LOGS").is_none() {
        return;
    }

    let _ = TRACING_INIT.get_or_init(|| {
        let path = tracing_log_path();
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => file,
            Err(_) => return,
        };
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
