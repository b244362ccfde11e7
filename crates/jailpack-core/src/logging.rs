//! Logging bootstrapper for the jailpack binaries.

use env_logger::Env;
use log::Record;
use serde_json::{json, Value};
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "JAILPACK_LOG_FORMAT";
const LEVEL_ENV: &str = "JAILPACK_LOG_LEVEL";

/// Crates whose records pass at the requested level; everything else stays at `warn`.
const JAILPACK_TARGETS: [&str; 3] = ["jailpack_core", "jailpack_zfs", "jailpack_cli"];

/// Initialize the global logger.
///
/// The first caller wins; later calls are no-ops. When `RUST_LOG` is unset the
/// jailpack crates log at `JAILPACK_LOG_LEVEL`, then `default_level`, while
/// dependencies are held at `warn`. Output is one JSON object per line unless
/// `JAILPACK_LOG_FORMAT=plain`.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

/// `env_logger` filter directive scoping `level` to the jailpack crates.
pub fn default_filter(level: &str) -> String {
    let mut filter = String::from("warn");
    for target in JAILPACK_TARGETS {
        filter.push_str(&format!(",{target}={level}"));
    }
    filter
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let env = Env::default().default_filter_or(default_filter(&level));

    let format = env::var(FORMAT_ENV)
        .unwrap_or_else(|_| String::from("json"))
        .to_lowercase();

    let mut builder = env_logger::Builder::from_env(env);
    if format == "json" {
        builder.format(|buf, record| {
            let ts = buf.timestamp().to_string();
            writeln!(buf, "{}", json_line(&ts, record))
        });
    } else {
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} - {}",
                buf.timestamp(),
                record.level().to_string().to_lowercase(),
                record.target(),
                record.args()
            )
        });
    }

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {}", err);
    }
}

fn json_line(ts: &str, record: &Record<'_>) -> Value {
    json!({
        "timestamp": ts,
        "app": "jailpack",
        "pid": std::process::id(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "message": record.args().to_string(),
    })
}
