use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One chat session as returned by the CRM listing endpoint. Every field may
/// be absent or `null` on the wire.
///
/// Fields are decoded leniently so one odd record never fails its page: a
/// numeric `id` is stringified and any other non-string scalar is kept as its
/// JSON text, which the lead projection then rejects per record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub last_message_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub preview_url: Option<String>,
}

impl SessionRecord {
    /// The identifier, ignoring blank strings.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<SessionRecord>,
}

/// `null` or missing `items` is an empty page. An entry that is not an object
/// becomes an empty record and is skipped downstream.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<SessionRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(items
        .into_iter()
        .map(|item| serde_json::from_value::<SessionRecord>(item).unwrap_or_default())
        .collect())
}
