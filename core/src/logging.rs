use gh_utils::error::FileIOError;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, HubConfig};

/// Installs the global subscriber: stdout plus a daily rolling file under the logs dir.
///
/// The returned guard flushes the file writer on drop, keep it alive for the process lifetime.
pub fn init_logging(config: &HubConfig) -> Result<WorkerGuard, Error> {
	let logs_dir = config.logs_dir();
	std::fs::create_dir_all(&logs_dir)
		.map_err(|e| FileIOError::from_std_io_err_with_msg(&logs_dir, e, "creating logs dir"))?;

	let (file_writer, guard) =
		tracing_appender::non_blocking(rolling::daily(&logs_dir, "genehub.log"));

	tracing_subscriber::registry()
		.with(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
		)
		.with(fmt::layer().with_target(true))
		.with(
			fmt::layer()
				.with_ansi(false)
				.with_target(true)
				.with_writer(file_writer),
		)
		.try_init()
		.map_err(|e| Error::Logging(e.to_string()))?;

	Ok(guard)
}
