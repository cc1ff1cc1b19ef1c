//! Default preference values and the provider match cache.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::backend::{KeyValueStore, StoreResult};

/// Store key holding the watch history blob.
pub const HISTORY_KEY: &str = "history";
/// Store key bumped on every history mutation.
pub const HISTORY_LAST_UPDATED_KEY: &str = "history_last_updated";
/// Store key recording when history was last cleared.
pub const HISTORY_CLEARED_AT_KEY: &str = "history_cleared_at";
/// Store key that globally enables or disables the response cache.
pub const ENABLE_CACHING_KEY: &str = "enable_caching";
/// Store key holding provider search matches.
pub const PROVIDER_MATCH_CACHE_KEY: &str = "provider_match_cache";

/// Preference defaults written on first launch.
pub fn default_preferences() -> Vec<(&'static str, Value)> {
    vec![
        ("update_progress", json!(true)),
        ("autoplay_next", json!(true)),
        ("dubbed", json!(false)),
        ("source_flag", json!("YUKI")),
        ("subtitle_language", json!("English")),
        ("intro_skip_time", json!(85)),
        ("key_press_skip", json!(5)),
        ("show_duration", json!(true)),
        ("trailer_volume_on", json!(false)),
        ("volume", json!(1)),
        ("episodes_per_page", json!(30)),
        (HISTORY_KEY, json!({ "entries": {} })),
        (PROVIDER_MATCH_CACHE_KEY, json!({})),
        ("adult_content", json!(true)),
        ("light_mode", json!(false)),
        (ENABLE_CACHING_KEY, json!(true)),
    ]
}

/// Write every default whose key is not already present.
///
/// Returns the number of keys written. Existing values are never touched.
pub fn apply_default_preferences(store: &dyn KeyValueStore) -> StoreResult<usize> {
    let mut written = 0;
    for (key, value) in default_preferences() {
        if store.has(key)? {
            continue;
        }
        store.set(key, &value)?;
        written += 1;
    }
    if written > 0 {
        tracing::debug!("Wrote {} default preference values", written);
    }
    Ok(written)
}

/// A remembered provider search result for one title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMatch {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

fn provider_match_key(media_id: i64, provider: &str, dubbed: bool) -> String {
    format!("{}-{}-{}", media_id, provider, dubbed)
}

fn load_match_cache(store: &dyn KeyValueStore) -> StoreResult<Map<String, Value>> {
    match store.get(PROVIDER_MATCH_CACHE_KEY)? {
        Some(Value::Object(map)) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Look up the remembered provider match for a title.
pub fn get_provider_match(
    store: &dyn KeyValueStore,
    media_id: i64,
    provider: &str,
    dubbed: bool,
) -> StoreResult<Option<ProviderMatch>> {
    let cache = load_match_cache(store)?;
    let key = provider_match_key(media_id, provider, dubbed);
    match cache.get(&key) {
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(found) => Ok(Some(found)),
            Err(e) => {
                tracing::warn!("Ignoring malformed provider match '{}': {}", key, e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Remember a provider match, merging over any fields already stored.
pub fn set_provider_match(
    store: &dyn KeyValueStore,
    media_id: i64,
    provider: &str,
    dubbed: bool,
    choice: &ProviderMatch,
) -> StoreResult<()> {
    let mut cache = load_match_cache(store)?;
    let key = provider_match_key(media_id, provider, dubbed);

    let mut merged = match cache.remove(&key) {
        Some(Value::Object(existing)) => existing,
        _ => Map::new(),
    };
    if let Value::Object(fields) = serde_json::to_value(choice)? {
        for (field, value) in fields {
            merged.insert(field, value);
        }
    }
    cache.insert(key, Value::Object(merged));

    store.set(PROVIDER_MATCH_CACHE_KEY, &Value::Object(cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_defaults_do_not_overwrite() {
        let store = InMemoryStore::new();
        store.set("volume", &json!(0.4)).unwrap();

        let written = apply_default_preferences(&store).unwrap();
        assert_eq!(written, default_preferences().len() - 1);
        assert_eq!(store.get("volume").unwrap(), Some(json!(0.4)));
        assert_eq!(store.get(ENABLE_CACHING_KEY).unwrap(), Some(json!(true)));
        assert_eq!(
            store.get(HISTORY_KEY).unwrap(),
            Some(json!({ "entries": {} }))
        );

        assert_eq!(apply_default_preferences(&store).unwrap(), 0);
    }

    #[test]
    fn test_provider_match_keyed_by_dub() {
        let store = InMemoryStore::new();
        let sub = ProviderMatch {
            id: "frieren-sub".into(),
            title: Some("Frieren".into()),
            image: None,
        };
        set_provider_match(&store, 154587, "YUKI", false, &sub).unwrap();

        assert_eq!(
            get_provider_match(&store, 154587, "YUKI", false).unwrap(),
            Some(sub)
        );
        assert_eq!(get_provider_match(&store, 154587, "YUKI", true).unwrap(), None);

        let raw = store.get(PROVIDER_MATCH_CACHE_KEY).unwrap().unwrap();
        assert!(raw.get("154587-YUKI-false").is_some());
    }

    #[test]
    fn test_provider_match_merges_extra_fields() {
        let store = InMemoryStore::new();
        store
            .set(
                PROVIDER_MATCH_CACHE_KEY,
                &json!({ "1-PAHE-false": { "id": "old", "episodes": 12 } }),
            )
            .unwrap();

        let choice = ProviderMatch {
            id: "new".into(),
            title: None,
            image: Some("cover.jpg".into()),
        };
        set_provider_match(&store, 1, "PAHE", false, &choice).unwrap();

        let raw = store.get(PROVIDER_MATCH_CACHE_KEY).unwrap().unwrap();
        let entry = &raw["1-PAHE-false"];
        assert_eq!(entry["id"], json!("new"));
        assert_eq!(entry["episodes"], json!(12));
        assert_eq!(entry["image"], json!("cover.jpg"));
    }
}
