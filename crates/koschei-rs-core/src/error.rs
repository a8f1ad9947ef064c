//! Library error type.

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("reqwest error: {0}")]
	Reqwest(#[from] reqwest::Error),
	#[error("IO error: {0}")]
	IO(#[from] std::io::Error),
	#[error("JSON error: {0}")]
	SerdeJSON(#[from] serde_json::Error),
	#[error("bincode error: {0}")]
	Bincode(#[from] bincode::Error),
	#[error("database error: {0}")]
	Sqlite(#[from] rusqlite::Error),
	#[error("parsing error: {0}")]
	Parse(String),
	#[error("validation error: {0}")]
	Validation(String),
	#[error("configuration error: {0}")]
	Config(String),
	/// Every item in the bank is pinned by a consumer so the request can never be admitted.
	///
	/// This is a sizing problem, the bank capacity is smaller than the number of concurrent consumers.
	#[error("cache bank {bank} exhausted, all {capacity} items are acquired")]
	CacheExhausted { bank: usize, capacity: usize },
	/// A cache factory failed to prepare an item with a fault other than "not available".
	#[error("failed to prepare cache item {key}: {reason}")]
	CachePreparation { key: String, reason: String },
	/// The row was deleted or modified by a concurrent process.
	#[error("stale row: {0}")]
	StaleRow(String),
	#[error("remote error: {0}")]
	Remote(String),
}

impl Error {
	/// Transient conditions are retried on the next cycle rather than aborting the whole pass.
	pub fn is_transient(&self) -> bool {
		match self {
			Error::StaleRow(_) | Error::Remote(_) | Error::CachePreparation { .. } => true,
			Error::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
				matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
			},
			_ => false,
		}
	}
}
