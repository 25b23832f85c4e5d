use std::io::Write;

use env_logger::{Builder, Env};

use crate::config::{LogConfig, LogFormat};

/// Installs the global logger. `RUST_LOG` wins over the configured level.
/// Calling it again after a logger is installed is a no-op.
pub fn init(config: &LogConfig) {
    let mut builder = builder(config);
    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
}

pub fn builder(config: &LogConfig) -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.level.as_str()));

    if config.format == LogFormat::Json {
        builder.format(|buf, record| {
            let line = serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        });
    }

    builder
}
