mod artifact;
mod content;
mod repository;

pub(crate) use self::artifact::{
    ArtifactRow, ContentArtifactRow, LinkedArtifactRow, RemoteArtifactRow, RemoteRow, timeout_ms,
};
pub(crate) use self::content::ContentRow;
pub(crate) use self::repository::{RepositoryRow, VersionRow};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

pub(crate) fn timestamp(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn unsigned(value: i64, field: &'static str) -> Result<u64> {
    u64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn signed(value: u64, field: &'static str) -> Result<i64> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData(field))
}
