pub mod logging;
pub mod metrics;

pub use logging::init_logging;

/// Initialize all observability components.
pub fn init_observability(log_level: &str) -> anyhow::Result<()> {
	init_logging(log_level)?;
	log::info!("observability initialized: logging and request metrics enabled");
	Ok(())
}
