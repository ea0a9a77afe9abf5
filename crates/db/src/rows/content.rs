use crate::content::NaturalKey;
use crate::error::{Error, ErrorKind};
use crate::models::{ContentId, ContentRecord};
use exn::ResultExt;

#[derive(sqlx::FromRow)]
pub(crate) struct ContentRow {
    pub id: ContentId,
    pub content_type: String,
    pub natural_key: String,
    pub attributes: String,
    pub created_at: i64,
}
impl TryFrom<ContentRow> for ContentRecord {
    type Error = Error;
    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            content_type: row.content_type,
            natural_key: NaturalKey::from_json(&row.natural_key)?,
            attributes: serde_json::from_str(&row.attributes).or_raise(|| ErrorKind::InvalidData("attributes"))?,
            created_at: super::timestamp(row.created_at, "content creation date")?,
        })
    }
}
