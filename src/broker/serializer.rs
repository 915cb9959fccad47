use crate::{record::Street, Result};

/// Wire codec for queue messages: one UTF-8 JSON object per message.
pub struct JsonSerializer;

impl JsonSerializer {
    pub const CONTENT_TYPE: &'static str = "application/json";

    pub fn serialize(street: &Street) -> Result<Vec<u8>> {
        serde_json::to_vec(street).map_err(Into::into)
    }

    pub fn deserialize(payload: &[u8]) -> Result<Street> {
        serde_json::from_slice(payload).map_err(Into::into)
    }
}
