use log::LevelFilter;

/// Rectangular linear sum assignment
pub mod linear_sum_assignment;

/// Dense N-dimensional cost tensors used by the n-partite matcher
pub mod cost_tensor;

/// Installs `env_logger` with the given default level.
///
/// `RUST_LOG` still overrides the level. Repeated calls are harmless: only the first
/// installed logger stays active.
///
pub fn configure_logging(level: LevelFilter) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use crate::utils::configure_logging;
    use log::LevelFilter;

    #[test]
    fn logging_can_be_configured_twice() {
        configure_logging(LevelFilter::Debug);
        configure_logging(LevelFilter::Info);
        log::info!("logging configured");
    }
}
