use log::LevelFilter;

/// Initialize logging using env_logger.
/// `level` is the default filter; the RUST_LOG environment variable still wins,
/// e.g. `RUST_LOG=datalayer_core=debug datalayer shell`.
pub fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
