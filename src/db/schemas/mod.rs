//! Record schemas for every entity family
//!
//! Each family defines its document struct, key builders, and constants.
//! Keys follow one layout: partition `"{scope}#{family}"`, sort = natural
//! key, so every read and write is scope-qualified by construction.

pub mod account;
pub mod comment;
pub mod engagement;
pub mod idea;
pub mod metadata;
pub mod user;

pub use metadata::Metadata;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::Item;
use crate::types::{EngineError, Result, ScopeId};

/// Build the partition name for a family within a scope.
pub fn partition(scope: &ScopeId, family: &str) -> String {
    format!("{}#{}", scope.as_str(), family)
}

/// Serialize a document into a record-store item.
pub fn to_item<T: Serialize>(doc: &T) -> Result<Item> {
    match serde_json::to_value(doc) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(EngineError::Internal("document did not serialize to an object".into())),
        Err(e) => Err(EngineError::Internal(format!("document serialization failed: {e}"))),
    }
}

/// Deserialize a record-store item into a document.
pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(item))
        .map_err(|e| EngineError::Storage(format!("stored item corrupt: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::idea::IdeaDoc;

    #[test]
    fn test_partition_is_scope_qualified() {
        assert_eq!(partition(&ScopeId::new("proj-1"), "idea"), "proj-1#idea");
    }

    #[test]
    fn test_item_roundtrip() {
        let doc = IdeaDoc::new("idea-1", "user-1", "Solar roofs", "Panels on every roof", vec!["energy".into()]);
        let item = to_item(&doc).unwrap();
        let back: IdeaDoc = from_item(item).unwrap();
        assert_eq!(back.id, "idea-1");
        assert_eq!(back.title, "Solar roofs");
    }
}
