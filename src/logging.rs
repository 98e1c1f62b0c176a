use crate::settings::LogSettings;
use env_logger::Env;

/// Installs `env_logger` as the `log` backend.
///
/// `RUST_LOG` wins over the configured level. Safe to call more than once; later calls
/// leave the first logger in place.
pub fn init_logging(settings: &LogSettings) {
    let env = Env::default().default_filter_or(settings.level.as_str());
    if env_logger::Builder::from_env(env).try_init().is_err() {
        log::debug!("Logger already initialized, keeping the existing one");
    }
}
