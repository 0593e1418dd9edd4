use std::{
	io::{Read, Write},
	path::Path,
};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use gh_core_backend::{CohortTimestamp, DocumentBackend};
use gh_utils::error::FileIOError;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::{Error, SyncEngine};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
	pub restamped: usize,
	/// Backed up keys no longer on the live collection.
	pub missing: usize,
}

impl SyncEngine {
	/// `<live>_tsbk_<YYYYMMDD>.txt`, with a `.gz` suffix when compressed.
	#[must_use]
	pub fn backup_file_name(&self, compress: bool) -> String {
		format!(
			"{}_tsbk_{}.txt{}",
			self.live.name(),
			CohortTimestamp::today(),
			if compress { ".gz" } else { "" }
		)
	}

	/// Writes one `<id>\t<YYYYMMDD>` line per stamped live document, returning the line count.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
	pub async fn backup_timestamps(
		&self,
		path: impl AsRef<Path> + Send,
		compress: bool,
	) -> Result<usize, Error> {
		let path = path.as_ref();

		let mut lines = String::new();
		let mut count = 0;
		let mut unstamped = 0;

		self.for_each_doc(|doc| match doc.timestamp() {
			Some(timestamp) => {
				lines.push_str(&format!("{}\t{timestamp}\n", doc.id));
				count += 1;
			}
			None => unstamped += 1,
		})
		.await?;

		if unstamped > 0 {
			warn!(unstamped, "Documents without timestamp left out of the backup");
		}

		let bytes = if compress {
			let compress_err =
				|e| FileIOError::from_std_io_err_with_msg(path, e, "compressing backup");

			let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
			encoder.write_all(lines.as_bytes()).map_err(compress_err)?;
			encoder.finish().map_err(compress_err)?
		} else {
			lines.into_bytes()
		};

		fs::write(path, bytes)
			.await
			.map_err(|e| FileIOError::from_std_io_err(path, e))?;

		info!(count, compress, "Timestamps backed up");

		Ok(count)
	}

	/// Re-stamps live documents from a backup written by
	/// [`backup_timestamps`](Self::backup_timestamps), compressed or not.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
	pub async fn restore_timestamps(
		&self,
		path: impl AsRef<Path> + Send,
	) -> Result<RestoreStats, Error> {
		let path = path.as_ref();

		let bytes = fs::read(path)
			.await
			.map_err(|e| FileIOError::from_std_io_err(path, e))?;

		let content = if bytes.starts_with(&GZIP_MAGIC) {
			let mut content = String::new();
			GzDecoder::new(bytes.as_slice())
				.read_to_string(&mut content)
				.map_err(|e| FileIOError::from_std_io_err_with_msg(path, e, "decompressing backup"))?;
			content
		} else {
			String::from_utf8(bytes).map_err(|e| Error::InvalidBackupLine {
				path: path.into(),
				line: 0,
				content: e.to_string(),
			})?
		};

		let mut stats = RestoreStats::default();

		for (line, content) in content.lines().enumerate().filter(|(_, l)| !l.is_empty()) {
			let Some((id, timestamp)) = content
				.split_once('\t')
				.and_then(|(id, date)| date.parse::<CohortTimestamp>().ok().map(|ts| (id, ts)))
			else {
				return Err(Error::InvalidBackupLine {
					path: path.into(),
					line: line + 1,
					content: content.to_string(),
				});
			};

			if self.live.partial_update(id, Self::stamp(timestamp)).await? {
				stats.restamped += 1;
			} else {
				stats.missing += 1;
			}
		}

		self.live.finalize().await?;

		info!(?stats, "Timestamps restored");

		Ok(stats)
	}
}
