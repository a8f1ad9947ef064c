//! Conversions between model types and SQL values.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Serialize, Deserialize};

use super::models::{BuildState, SkipReason};

macro_rules! default_blob_sql_impl(
	($t:ty) => (
		impl ToSql for $t {
			fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
				let bin = bincode::serialize(self).map_err(|e| rusqlite::Error::ToSqlConversionFailure(e))?;
				Ok(ToSqlOutput::Owned(rusqlite::types::Value::Blob(bin)))
			}
		}

		impl FromSql for $t {
			fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
				let t: $t = bincode::deserialize(value.as_blob()?).map_err(|e| FromSqlError::Other(e))?;
				FromSqlResult::Ok(t)
			}
		}
	)
);

/// Ids of the dependencies installed for a build, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyKeys(pub Vec<i64>);

default_blob_sql_impl!(DependencyKeys);

impl ToSql for BuildState {
	fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
		Ok(ToSqlOutput::from(match self {
			BuildState::Running => 2i64,
			BuildState::Complete => 3,
			BuildState::Canceled => 4,
			BuildState::Failed => 5,
		}))
	}
}

impl FromSql for BuildState {
	fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
		match value.as_i64()? {
			2 => Ok(BuildState::Running),
			3 => Ok(BuildState::Complete),
			4 => Ok(BuildState::Canceled),
			5 => Ok(BuildState::Failed),
			v => Err(FromSqlError::OutOfRange(v)),
		}
	}
}

impl ToSql for SkipReason {
	fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
		Ok(ToSqlOutput::from(match self {
			SkipReason::NoSource => 1i64,
			SkipReason::NoArches => 2,
		}))
	}
}

impl FromSql for SkipReason {
	fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
		match value.as_i64()? {
			1 => Ok(SkipReason::NoSource),
			2 => Ok(SkipReason::NoArches),
			v => Err(FromSqlError::OutOfRange(v)),
		}
	}
}
