//! Semantic tags for metadata API operations.

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;

/// What a metadata request asks for. Drives queue priority and throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// The authenticated user's identity.
    Viewer,
    /// A user profile lookup by id.
    UserProfile,
    /// A user's full media list collection.
    ListCollection,
    /// Currently watching / in-progress entries.
    CurrentList,
    Trending,
    Popular,
    Other,
}

impl OperationKind {
    /// Queue priority, lower is served first.
    pub fn priority(self) -> u8 {
        match self {
            OperationKind::Viewer | OperationKind::UserProfile => 1,
            OperationKind::ListCollection | OperationKind::CurrentList => 2,
            OperationKind::Trending | OperationKind::Popular => 3,
            OperationKind::Other => 4,
        }
    }

    /// Critical operations pay a small fixed delay to avoid burst contention.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            OperationKind::Viewer | OperationKind::UserProfile | OperationKind::ListCollection
        )
    }

    /// Infer the operation from a request payload.
    ///
    /// Substring matching on the serialized payload; used only when the
    /// caller did not tag the request.
    pub fn classify(payload: &Value) -> Self {
        let text = payload_text(payload);

        if text.contains("Viewer") {
            OperationKind::Viewer
        } else if text.contains("User(id:") {
            OperationKind::UserProfile
        } else if text.contains("MediaListCollection") {
            OperationKind::ListCollection
        } else if text.contains("CURRENT") {
            OperationKind::CurrentList
        } else if text.contains("TRENDING_DESC") {
            OperationKind::Trending
        } else if text.contains("POPULARITY_DESC") {
            OperationKind::Popular
        } else {
            OperationKind::Other
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Viewer => "viewer",
            OperationKind::UserProfile => "user-profile",
            OperationKind::ListCollection => "list-collection",
            OperationKind::CurrentList => "current-list",
            OperationKind::Trending => "trending",
            OperationKind::Popular => "popular",
            OperationKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Pre-serialized string payloads are matched as-is.
fn payload_text(payload: &Value) -> Cow<'_, str> {
    match payload {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(q: &str) -> Value {
        json!({ "query": q, "variables": {} })
    }

    #[test]
    fn test_classify_priorities() {
        let cases = [
            ("query { Viewer { id name } }", 1),
            ("query { User(id: 5) { name } }", 1),
            ("query { MediaListCollection(userId: 1) { lists { name } } }", 2),
            ("query { Page { mediaList(status: CURRENT) { id } } }", 2),
            ("query { Page { media(sort: TRENDING_DESC) { id } } }", 3),
            ("query { Page { media(sort: POPULARITY_DESC) { id } } }", 3),
            ("query { Page { media(search: \"frieren\") { id } } }", 4),
        ];
        for (q, expected) in cases {
            assert_eq!(OperationKind::classify(&query(q)).priority(), expected, "{}", q);
        }
    }

    #[test]
    fn test_classify_string_payload() {
        let body = Value::String(r#"{"query":"{ Viewer { id } }"}"#.to_string());
        assert_eq!(OperationKind::classify(&body), OperationKind::Viewer);
    }

    #[test]
    fn test_critical_set() {
        assert!(OperationKind::Viewer.is_critical());
        assert!(OperationKind::UserProfile.is_critical());
        assert!(OperationKind::ListCollection.is_critical());
        assert!(!OperationKind::CurrentList.is_critical());
        assert!(!OperationKind::Trending.is_critical());
        assert!(!OperationKind::Other.is_critical());
    }
}
