use colored::Colorize;
use env_logger::Builder;
use std::io::Write;

/// Initializes the global logger. Filters at `Info` by default;
/// raise to `Debug`/`Trace` via `RUST_LOG`. Must run before any other
/// initialization routine so backend-connection and cache-rebuild
/// diagnostics are captured from the first line.
pub async fn setup_logging() {
    Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let level = match record.level() {
                log::Level::Error => record.level().to_string().red(),
                log::Level::Warn => record.level().to_string().yellow(),
                log::Level::Info => record.level().to_string().green(),
                log::Level::Debug | log::Level::Trace => record.level().to_string().blue(),
            };
            writeln!(buf, "{}: {}", level, record.args())
        })
        .init();

    log::info!("{}", "logger initialized".green());
}
