use log::LevelFilter;
use std::{io::Write, sync::Once};

/// Init log with the given level. Set log format.
///
/// `RUST_LOG` still wins over `level` when it is set.
pub fn init_log_with_level(level: LevelFilter) {
    let mut builder = env_logger::builder();

    builder.filter_level(level);

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}:{} - {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();
}

/// Init log. Set log format.
pub fn init_log() {
    init_log_with_level(LevelFilter::Info);
}

static INIT_LOG: Once = Once::new();

/// Setup.
pub fn setup_log() {
    INIT_LOG.call_once(|| {
        init_log();
    });
}

#[macro_export]
macro_rules! error_bail {
    ($msg:literal $(,)?) => {
        log::error!($msg);
        anyhow::bail!($msg)
    };
    ($err:expr $(,)?) => {
        log::error!("{}", $err);
        anyhow::bail!($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        log::error!($fmt, $($arg)*);
        anyhow::bail!($fmt, $($arg)*)
    };
}

/// Parse a log level name such as `info` or `DEBUG`.
pub fn parse_log_level(s: &str) -> anyhow::Result<LevelFilter> {
    s.trim()
        .parse::<LevelFilter>()
        .map_err(|_| anyhow::anyhow!("invalid log level: {}", s))
}
