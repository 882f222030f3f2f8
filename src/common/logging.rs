use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Initialize the logging system with timestamp, level, and message formatting.
///
/// Format: `[YYYY-MM-DD HH:MM:SS] [LEVEL] [module] message`. `RUST_LOG`, when
/// set, overrides `level`.
pub fn init_logger(level: LevelFilter) {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        })
        .filter_level(level)
        .parse_env("RUST_LOG")
        .init();
}
