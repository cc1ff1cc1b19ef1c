//! Persisted watch history types.
//!
//! The JSON shape matches what the desktop UI writes:
//! `{entries: {<id>: {data, history: {<episode>: {time, duration, ...}}}}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Progress fraction above which an episode counts as watched.
pub const COMPLETION_THRESHOLD: f64 = 0.95;

/// The whole history blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub entries: BTreeMap<i64, HistoryEntry>,
}

/// One tracked title.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Media snapshot taken when the title was last saved. May be stale.
    #[serde(default)]
    pub data: Option<MediaSnapshot>,
    #[serde(default)]
    pub history: BTreeMap<u32, EpisodeHistoryEntry>,
}

impl HistoryEntry {
    pub fn new(data: MediaSnapshot) -> Self {
        Self {
            data: Some(data),
            history: BTreeMap::new(),
        }
    }

    /// Title id from the attached media, if any.
    pub fn media_id(&self) -> Option<i64> {
        self.data.as_ref().and_then(MediaSnapshot::media_id)
    }

    /// Episode with the most recent timestamp. Earlier episodes win ties.
    pub fn last_watched(&self) -> Option<(u32, &EpisodeHistoryEntry)> {
        self.history
            .iter()
            .fold(None, |latest, (number, current)| match latest {
                Some((_, best)) if current.timestamp <= best.timestamp => latest,
                _ => Some((*number, current)),
            })
    }

    /// True once the snapshot's next episode should have aired.
    pub fn is_snapshot_stale(&self, now_secs: i64) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.media.as_ref())
            .map(|m| m.is_airing_data_stale(now_secs))
            .unwrap_or(false)
    }
}

/// List entry wrapper around a media record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSnapshot {
    /// List entry id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MediaSnapshot {
    pub fn from_media(media: Media) -> Self {
        Self {
            id: None,
            media: Some(media),
            extra: Map::new(),
        }
    }

    /// Media id, falling back to the user's list entry id.
    pub fn media_id(&self) -> Option<i64> {
        let media = self.media.as_ref()?;
        media.id.filter(|id| *id != 0).or_else(|| {
            media
                .media_list_entry
                .as_ref()
                .and_then(|e| e.id)
                .filter(|id| *id != 0)
        })
    }

    /// Display title, empty if unknown.
    pub fn title(&self) -> String {
        self.media
            .as_ref()
            .map(Media::display_title)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<MediaTitle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<CoverImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episodes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_airing_episode: Option<NextAiring>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_list_entry: Option<MediaListEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Media {
    /// English title, else romaji, else empty.
    pub fn display_title(&self) -> String {
        self.title
            .as_ref()
            .and_then(|t| t.english.clone().or_else(|| t.romaji.clone()))
            .unwrap_or_default()
    }

    fn is_airing_data_stale(&self, now_secs: i64) -> bool {
        match &self.next_airing_episode {
            Some(next) => match next.airing_at {
                Some(airing_at) => airing_at < now_secs,
                None => true,
            },
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTitle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub romaji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub english: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_large: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextAiring {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airing_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_until_airing: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaListEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Playback state of one episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeHistoryEntry {
    /// Last known position, seconds.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub time: f64,
    /// Episode length, seconds.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub duration: f64,
    /// Unix millis of the last update.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub data: Option<EpisodeData>,
}

impl EpisodeHistoryEntry {
    /// Build a checkpoint, computing `completed` from the position.
    pub fn checkpoint(time: f64, duration: f64, timestamp: i64, data: EpisodeData) -> Self {
        Self {
            time,
            duration,
            timestamp,
            completed: is_complete(time, duration),
            data: Some(data),
        }
    }

    /// Watched fraction in `[0, 1]`, zero when the duration is unknown.
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Whether a position counts as a finished episode.
pub fn is_complete(time: f64, duration: f64) -> bool {
    duration > 0.0 && time / duration > COMPLETION_THRESHOLD
}

/// Minimal episode metadata kept for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<EpisodeTitle>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EpisodeData {
    pub fn numbered(episode: u32) -> Self {
        Self {
            episode_number: Some(episode),
            title: Some(EpisodeTitle::english(format!("Episode {}", episode))),
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTitle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EpisodeTitle {
    pub fn english(title: impl Into<String>) -> Self {
        Self {
            en: Some(title.into()),
            extra: Map::new(),
        }
    }
}

/// Which titles `continue_watching` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchFilter {
    #[default]
    All,
    /// Last watched episode not finished.
    InProgress,
    /// Last watched episode finished.
    Completed,
}

/// A title to offer in a "continue watching" list.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinueWatching {
    pub media_id: i64,
    pub media: MediaSnapshot,
    pub episode: u32,
    pub last_watched: EpisodeHistoryEntry,
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ui_history_blob() {
        let raw = json!({
            "entries": {
                "21": {
                    "data": {
                        "id": 99,
                        "progress": 3,
                        "media": {
                            "id": 21,
                            "title": { "romaji": "One Piece", "english": null },
                            "nextAiringEpisode": { "episode": 1100, "airingAt": 1700000000 },
                            "genres": ["Action"]
                        }
                    },
                    "history": {
                        "3": { "time": 600.5, "duration": null, "timestamp": 1, "data": { "episodeNumber": 3 } }
                    }
                }
            }
        });

        let history: History = serde_json::from_value(raw).unwrap();
        let entry = &history.entries[&21];
        assert_eq!(entry.media_id(), Some(21));
        assert_eq!(entry.data.as_ref().unwrap().title(), "One Piece");
        assert_eq!(entry.history[&3].duration, 0.0);
        assert!(!entry.history[&3].completed);

        // Unknown fields survive a round trip.
        let back = serde_json::to_value(&history).unwrap();
        assert_eq!(back["entries"]["21"]["data"]["progress"], json!(3));
        assert_eq!(back["entries"]["21"]["data"]["media"]["genres"], json!(["Action"]));
    }

    #[test]
    fn test_media_id_falls_back_to_list_entry() {
        let snapshot = MediaSnapshot::from_media(Media {
            media_list_entry: Some(MediaListEntry {
                id: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(snapshot.media_id(), Some(7));
        assert_eq!(MediaSnapshot::default().media_id(), None);
    }

    #[test]
    fn test_zero_media_id_falls_back_to_list_entry() {
        let mut media = Media {
            id: Some(0),
            media_list_entry: Some(MediaListEntry {
                id: Some(7),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(MediaSnapshot::from_media(media.clone()).media_id(), Some(7));

        media.media_list_entry = None;
        assert_eq!(MediaSnapshot::from_media(media).media_id(), None);
    }

    #[test]
    fn test_completion_threshold() {
        assert!(is_complete(96.0, 100.0));
        assert!(!is_complete(95.0, 100.0));
        assert!(!is_complete(10.0, 0.0));
    }

    #[test]
    fn test_snapshot_staleness() {
        let mut media = Media {
            next_airing_episode: Some(NextAiring {
                episode: Some(5),
                airing_at: Some(1_000),
                time_until_airing: None,
            }),
            ..Default::default()
        };
        let entry = HistoryEntry::new(MediaSnapshot::from_media(media.clone()));
        assert!(!entry.is_snapshot_stale(999));
        assert!(entry.is_snapshot_stale(1_001));

        media.next_airing_episode = None;
        let finished = HistoryEntry::new(MediaSnapshot::from_media(media));
        assert!(!finished.is_snapshot_stale(i64::MAX));
    }
}
