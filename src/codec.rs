use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Ordered collection of named session values.
///
/// Values are opaque to the store; they are carried as-is and round-trip
/// through [`encode`](Self::encode)/[`decode`](Self::decode) unchanged.
/// Insertion order is preserved across round-trips, which is why this is a
/// sequence of pairs rather than a map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionItems(Vec<(String, Value)>);

impl SessionItems {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Set a named value, replacing in place so the original position is
    /// kept for existing names.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Encode into the storable blob. The empty collection encodes to the
    /// empty string, the stable sentinel a brand-new record carries.
    pub fn encode(&self) -> Result<String> {
        if self.0.is_empty() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a previously encoded blob. An empty blob is the empty
    /// collection; anything else that fails to parse is corrupt and
    /// surfaced as-is, with no partial recovery.
    pub fn decode(blob: &str) -> Result<Self> {
        if blob.is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_json::from_str(blob)?)
    }
}

impl FromIterator<(String, Value)> for SessionItems {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(pairs: I) -> Self {
        let mut items = Self::new();
        for (name, value) in pairs {
            items.set(name, value);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn empty_collection_uses_empty_sentinel() {
        let items = SessionItems::new();
        let blob = items.encode().unwrap();

        assert_eq!(blob, "");
        assert_eq!(SessionItems::decode(&blob).unwrap(), items);
    }

    #[test]
    fn insertion_order_survives_round_trip() {
        let mut items = SessionItems::new();
        items.set("zulu", json!({"nested": [1, 2, 3]}));
        items.set("alpha", json!("a"));
        items.set("mike", json!(null));

        let decoded = SessionItems::decode(&items.encode().unwrap()).unwrap();
        let names: Vec<_> = decoded.iter().map(|(name, _)| name.to_owned()).collect();

        assert_eq!(names, ["zulu", "alpha", "mike"]);
        assert_eq!(decoded, items);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut items = SessionItems::new();
        items.set("name", json!("a"));
        items.set("count", json!(1));
        items.set("name", json!("b"));

        assert_eq!(items.len(), 2);
        assert_eq!(items.get("name"), Some(&json!("b")));
        assert_eq!(items.iter().next().map(|(name, _)| name), Some("name"));
    }

    #[test]
    fn garbage_blob_is_corrupt() {
        let result = SessionItems::decode("not json at all");
        assert!(matches!(result, Err(Error::CorruptPayload(_))));
    }

    fn leaf_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    proptest! {
        #[test]
        fn round_trips_any_item_set(
            pairs in prop::collection::vec(("[a-z]{1,8}", leaf_value()), 0..6)
        ) {
            let items: SessionItems = pairs.into_iter().collect();
            let blob = items.encode().unwrap();
            prop_assert_eq!(SessionItems::decode(&blob).unwrap(), items);
        }
    }
}
