//! Local watch history.
//!
//! [`HistoryStore`] owns the in-memory mirror of the persisted history blob.
//! Every mutation writes through to the key/value store before the mirror
//! changes, then publishes a new "last updated" timestamp both to the store
//! (for pollers) and to a `watch` channel (for subscribers).

mod models;

pub use models::{
    is_complete, ContinueWatching, CoverImage, EpisodeData, EpisodeHistoryEntry, EpisodeTitle,
    History, HistoryEntry, Media, MediaListEntry, MediaSnapshot, MediaTitle, NextAiring,
    WatchFilter, COMPLETION_THRESHOLD,
};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::store::preferences::{HISTORY_CLEARED_AT_KEY, HISTORY_KEY, HISTORY_LAST_UPDATED_KEY};
use crate::store::{get_or, set_typed, KeyValueStore};

/// Keyed per-title, per-episode playback state.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    history: RwLock<History>,
    /// Set when the stored blob could not be read. Per-title edits are
    /// refused until the whole history is replaced or cleared.
    unreadable: AtomicBool,
    updates: watch::Sender<i64>,
}

impl HistoryStore {
    /// Load the persisted history. A missing blob starts empty.
    ///
    /// An unreadable blob also starts empty, but is left as-is in the store:
    /// only [`set_history`](Self::set_history) and
    /// [`clear_all_history`](Self::clear_all_history) may overwrite it.
    pub fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let (history, unreadable) = match store.get(HISTORY_KEY) {
            Ok(None) => (History::default(), false),
            Ok(Some(raw)) => match serde_json::from_value::<History>(raw) {
                Ok(history) => (history, false),
                Err(e) => {
                    error!("Stored watch history is unreadable, leaving it untouched: {}", e);
                    (History::default(), true)
                }
            },
            Err(e) => {
                error!("Failed to read watch history: {}", e);
                (History::default(), true)
            }
        };
        let last_updated: i64 = get_or(store.as_ref(), HISTORY_LAST_UPDATED_KEY, 0);
        debug!("Loaded watch history with {} titles", history.entries.len());

        let (updates, _) = watch::channel(last_updated);
        Self {
            store,
            clock,
            history: RwLock::new(history),
            unreadable: AtomicBool::new(unreadable),
            updates,
        }
    }

    /// Whether the stored history could not be read at load time and has
    /// not been replaced since.
    pub fn is_unreadable(&self) -> bool {
        self.unreadable.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, History> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist an edit of the current history and, only if that succeeds,
    /// make it the mirror.
    fn commit(&self, next: History) -> bool {
        if self.is_unreadable() {
            error!("Refusing to overwrite unreadable watch history");
            return false;
        }
        self.replace(next)
    }

    /// Persist a whole new history, unreadable blob or not.
    fn replace(&self, next: History) -> bool {
        if let Err(e) = set_typed(self.store.as_ref(), HISTORY_KEY, &next) {
            error!("Failed to save watch history: {}", e);
            return false;
        }
        *self.history.write().unwrap_or_else(PoisonError::into_inner) = next;
        self.unreadable.store(false, Ordering::SeqCst);
        true
    }

    pub fn get_anime_history(&self, media_id: i64) -> Option<HistoryEntry> {
        self.read().entries.get(&media_id).cloned()
    }

    pub fn get_history_entries(&self) -> BTreeMap<i64, HistoryEntry> {
        self.read().entries.clone()
    }

    pub fn get_history(&self) -> History {
        self.read().clone()
    }

    pub fn get_episode_history(&self, media_id: i64, episode: u32) -> Option<EpisodeHistoryEntry> {
        self.read()
            .entries
            .get(&media_id)
            .and_then(|entry| entry.history.get(&episode))
            .cloned()
    }

    /// Replace the whole history.
    pub fn set_history(&self, history: History) -> bool {
        if !self.replace(history) {
            return false;
        }
        self.update_history_timestamp();
        true
    }

    /// Insert or replace one title's entry.
    ///
    /// Entries without media data or a usable id are rejected with a
    /// warning. Episodes missing display data get defaults filled in.
    pub fn set_anime_history(&self, mut entry: HistoryEntry) -> bool {
        let Some(snapshot) = entry.data.as_ref().filter(|d| d.media.is_some()) else {
            warn!("Ignoring history entry without media information");
            return false;
        };
        let Some(media_id) = snapshot.media_id() else {
            warn!("Ignoring history entry without a media id");
            return false;
        };

        let title = snapshot.title();
        for (number, episode) in entry.history.iter_mut() {
            fill_episode_defaults(*number, episode, &title);
        }

        let mut next = self.get_history();
        next.entries.insert(media_id, entry);
        if !self.commit(next) {
            return false;
        }
        self.update_history_timestamp();
        true
    }

    /// Most recently updated episode of a title.
    pub fn get_last_watched_episode(&self, media_id: i64) -> Option<EpisodeHistoryEntry> {
        let history = self.read();
        let entry = history.entries.get(&media_id)?;
        entry.last_watched().map(|(_, episode)| episode.clone())
    }

    /// Returns `false` if the title was not tracked or could not be saved.
    pub fn remove_anime_from_history(&self, media_id: i64) -> bool {
        let mut next = self.get_history();
        if next.entries.remove(&media_id).is_none() {
            return false;
        }
        if !self.commit(next) {
            return false;
        }
        self.update_history_timestamp();
        true
    }

    /// Drop every entry. Leaves the mirror untouched if the write fails.
    pub fn clear_all_history(&self) -> bool {
        if !self.replace(History::default()) {
            return false;
        }
        let now = self.clock.now_millis();
        if let Err(e) = self.store.set(HISTORY_CLEARED_AT_KEY, &json!(now)) {
            error!("Failed to record history clear time: {}", e);
        }
        self.update_history_timestamp();
        true
    }

    /// Publish a change notification. Returns the new timestamp.
    pub fn update_history_timestamp(&self) -> i64 {
        let now = self.clock.now_millis();
        if let Err(e) = self.store.set(HISTORY_LAST_UPDATED_KEY, &json!(now)) {
            error!("Failed to save history update time: {}", e);
        }
        self.updates.send_replace(now);
        now
    }

    /// Timestamp of the last published change (0 if never changed).
    pub fn last_updated(&self) -> i64 {
        *self.updates.borrow()
    }

    /// Receive the last-updated timestamp on every mutation.
    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.updates.subscribe()
    }

    /// Save a playback checkpoint for one episode.
    ///
    /// `completed` is recomputed from `time / duration` on every call.
    /// Episode 0 and media without an id are ignored.
    pub fn record_progress(
        &self,
        media: &MediaSnapshot,
        episode: u32,
        episode_data: Option<EpisodeData>,
        time: f64,
        duration: f64,
    ) -> bool {
        if episode == 0 {
            return false;
        }
        let Some(media_id) = media.media_id() else {
            return false;
        };

        let mut entry = self
            .get_anime_history(media_id)
            .unwrap_or_else(|| HistoryEntry::new(media.clone()));
        let data = episode_data.unwrap_or_else(|| EpisodeData::numbered(episode));
        entry.history.insert(
            episode,
            EpisodeHistoryEntry::checkpoint(time, duration, self.clock.now_millis(), data),
        );
        self.set_anime_history(entry)
    }

    /// Mark an episode as watched to the end.
    pub fn mark_episode_finished(
        &self,
        media: &MediaSnapshot,
        episode: u32,
        episode_data: Option<EpisodeData>,
        duration: f64,
    ) -> bool {
        let Some(media_id) = media.media_id() else {
            return false;
        };

        let mut entry = self
            .get_anime_history(media_id)
            .unwrap_or_else(|| HistoryEntry::new(media.clone()));
        let data = episode_data.unwrap_or_else(|| EpisodeData::numbered(episode));
        entry.history.insert(
            episode,
            EpisodeHistoryEntry {
                time: duration,
                duration,
                timestamp: self.clock.now_millis(),
                completed: true,
                data: Some(data),
            },
        );
        self.set_anime_history(entry)
    }

    /// Saved position to resume from, unless the episode is (nearly) done.
    pub fn resume_position(&self, media_id: i64, episode: u32) -> Option<f64> {
        let saved = self.get_episode_history(media_id, episode)?;
        if saved.duration <= 0.0 || saved.completed {
            return None;
        }
        (saved.progress() < COMPLETION_THRESHOLD).then_some(saved.time)
    }

    /// Titles with their last watched episode, most recent first.
    ///
    /// With [`WatchFilter::All`] unfinished titles come before finished ones.
    pub fn continue_watching(&self, filter: WatchFilter) -> Vec<ContinueWatching> {
        let history = self.read();
        let mut items: Vec<ContinueWatching> = history
            .entries
            .iter()
            .filter_map(|(media_id, entry)| {
                let media = entry.data.clone()?;
                let (episode, last) = entry.last_watched()?;
                Some(ContinueWatching {
                    media_id: *media_id,
                    media,
                    episode,
                    last_watched: last.clone(),
                })
            })
            .filter(|item| match filter {
                WatchFilter::All => true,
                WatchFilter::InProgress => !item.last_watched.completed,
                WatchFilter::Completed => item.last_watched.completed,
            })
            .collect();

        items.sort_by(|a, b| {
            let by_completion = if filter == WatchFilter::All {
                a.last_watched.completed.cmp(&b.last_watched.completed)
            } else {
                std::cmp::Ordering::Equal
            };
            by_completion.then(b.last_watched.timestamp.cmp(&a.last_watched.timestamp))
        });
        items
    }

    /// Ids of titles whose media snapshot is past its next airing time.
    pub fn stale_entries(&self) -> Vec<i64> {
        let now_secs = self.clock.now_millis() / 1000;
        self.read()
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_snapshot_stale(now_secs))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Replace a tracked title's media snapshot, keeping its episodes.
    pub fn refresh_media(&self, media_id: i64, media: MediaSnapshot) -> bool {
        let Some(mut entry) = self.get_anime_history(media_id) else {
            return false;
        };
        entry.data = Some(media);
        self.set_anime_history(entry)
    }
}

fn fill_episode_defaults(number: u32, episode: &mut EpisodeHistoryEntry, media_title: &str) {
    let key_number = (number != 0).then_some(number);
    let special = || EpisodeTitle::english(format!("{} Special", media_title));

    let data = episode.data.get_or_insert_with(|| EpisodeData {
        episode_number: key_number,
        title: Some(special()),
        extra: Default::default(),
    });
    if data.episode_number.is_none() {
        data.episode_number = key_number;
    }
    if data.title.is_none() {
        data.title = Some(match data.episode_number {
            Some(n) => EpisodeTitle::english(format!("Episode {}", n)),
            None => special(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn media(id: i64, title: &str) -> MediaSnapshot {
        MediaSnapshot::from_media(Media {
            id: Some(id),
            title: Some(MediaTitle {
                english: Some(title.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, HistoryStore) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let history = HistoryStore::load(store.clone(), clock.clone());
        (store, clock, history)
    }

    #[test]
    fn test_rejects_entry_without_media() {
        let (store, _clock, history) = setup();
        assert!(!history.set_anime_history(HistoryEntry::default()));
        assert!(!history.set_anime_history(HistoryEntry::new(MediaSnapshot::default())));
        assert!(history.get_history_entries().is_empty());
        assert_eq!(store.get(HISTORY_KEY).unwrap(), None);
    }

    #[test]
    fn test_backfills_episode_data() {
        let (_store, _clock, history) = setup();
        let mut entry = HistoryEntry::new(media(5, "Mushishi"));
        entry.history.insert(0, EpisodeHistoryEntry::default());
        entry.history.insert(
            3,
            EpisodeHistoryEntry {
                data: Some(EpisodeData::default()),
                ..Default::default()
            },
        );
        assert!(history.set_anime_history(entry));

        let special = history.get_episode_history(5, 0).unwrap().data.unwrap();
        assert_eq!(special.episode_number, None);
        assert_eq!(special.title.unwrap().en.as_deref(), Some("Mushishi Special"));

        let third = history.get_episode_history(5, 3).unwrap().data.unwrap();
        assert_eq!(third.episode_number, Some(3));
        assert_eq!(third.title.unwrap().en.as_deref(), Some("Episode 3"));
    }

    #[test]
    fn test_write_failure_keeps_mirror() {
        let (store, _clock, history) = setup();
        assert!(history.record_progress(&media(1, "A"), 1, None, 10.0, 100.0));

        store.set_fail_writes(true);
        assert!(!history.record_progress(&media(2, "B"), 1, None, 10.0, 100.0));
        assert!(!history.clear_all_history());
        assert!(!history.remove_anime_from_history(1));

        assert!(history.get_anime_history(1).is_some());
        assert!(history.get_anime_history(2).is_none());
    }

    #[test]
    fn test_remove_missing_title() {
        let (_store, _clock, history) = setup();
        assert!(!history.remove_anime_from_history(42));
    }

    #[test]
    fn test_resume_position() {
        let (_store, clock, history) = setup();
        let show = media(9, "Show");
        history.record_progress(&show, 1, None, 300.0, 1_400.0);
        history.record_progress(&show, 2, None, 1_350.0, 1_400.0);
        history.record_progress(&show, 3, None, 20.0, 0.0);
        clock.advance(Duration::from_secs(1));
        history.mark_episode_finished(&show, 4, None, 1_400.0);

        assert_eq!(history.resume_position(9, 1), Some(300.0));
        assert_eq!(history.resume_position(9, 2), None);
        assert_eq!(history.resume_position(9, 3), None);
        assert_eq!(history.resume_position(9, 4), None);
        assert_eq!(history.resume_position(9, 5), None);
    }

    #[test]
    fn test_record_progress_ignores_episode_zero() {
        let (_store, _clock, history) = setup();
        assert!(!history.record_progress(&media(1, "A"), 0, None, 1.0, 2.0));
        assert!(history.get_anime_history(1).is_none());
    }

    #[test]
    fn test_continue_watching_order() {
        let (_store, clock, history) = setup();

        history.mark_episode_finished(&media(1, "Done"), 12, None, 1_400.0);
        clock.advance(Duration::from_secs(10));
        history.record_progress(&media(2, "Older"), 3, None, 100.0, 1_400.0);
        clock.advance(Duration::from_secs(10));
        history.record_progress(&media(3, "Newer"), 7, None, 100.0, 1_400.0);
        clock.advance(Duration::from_secs(10));
        history.mark_episode_finished(&media(4, "Done recently"), 1, None, 1_400.0);

        let ids = |filter| -> Vec<i64> {
            history
                .continue_watching(filter)
                .into_iter()
                .map(|item| item.media_id)
                .collect()
        };
        assert_eq!(ids(WatchFilter::All), vec![3, 2, 4, 1]);
        assert_eq!(ids(WatchFilter::InProgress), vec![3, 2]);
        assert_eq!(ids(WatchFilter::Completed), vec![4, 1]);

        let first = &history.continue_watching(WatchFilter::All)[0];
        assert_eq!(first.episode, 7);
    }

    #[test]
    fn test_refresh_media_keeps_episodes() {
        let (_store, _clock, history) = setup();
        history.record_progress(&media(8, "Old title"), 2, None, 10.0, 100.0);

        assert!(history.refresh_media(8, media(8, "New title")));
        let entry = history.get_anime_history(8).unwrap();
        assert_eq!(entry.data.unwrap().title(), "New title");
        assert!(entry.history.contains_key(&2));

        assert!(!history.refresh_media(99, media(99, "Untracked")));
    }

    #[test]
    fn test_stale_entries() {
        let (_store, clock, history) = setup();
        let mut airing = media(11, "Airing");
        if let Some(m) = airing.media.as_mut() {
            m.next_airing_episode = Some(NextAiring {
                episode: Some(4),
                airing_at: Some(clock.now_millis() / 1000 + 60),
                time_until_airing: None,
            });
        }
        history.record_progress(&airing, 3, None, 10.0, 100.0);
        history.record_progress(&media(12, "Finished"), 1, None, 10.0, 100.0);

        assert!(history.stale_entries().is_empty());
        clock.advance(Duration::from_secs(61));
        assert_eq!(history.stale_entries(), vec![11]);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let (store, clock, history) = setup();
        let mut rx = history.subscribe();
        assert_eq!(history.last_updated(), 0);

        clock.advance(Duration::from_secs(5));
        history.record_progress(&media(1, "A"), 1, None, 1.0, 100.0);

        rx.changed().await.unwrap();
        let seen = *rx.borrow_and_update();
        assert_eq!(seen, clock.now_millis());
        assert_eq!(store.get(HISTORY_LAST_UPDATED_KEY).unwrap(), Some(json!(seen)));
    }

    #[test]
    fn test_reload_from_store() {
        let (store, clock, history) = setup();
        history.record_progress(&media(1, "A"), 2, None, 50.0, 100.0);

        let reloaded = HistoryStore::load(store, clock);
        assert_eq!(reloaded.get_episode_history(1, 2).unwrap().time, 50.0);
        assert_eq!(reloaded.last_updated(), history.last_updated());
        assert!(!reloaded.is_unreadable());
    }

    #[test]
    fn test_unreadable_blob_is_not_overwritten() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let foreign = json!({ "entries": { "1": { "history": { "special": {} } } } });
        store.set(HISTORY_KEY, &foreign).unwrap();

        let history = HistoryStore::load(store.clone(), clock);
        assert!(history.is_unreadable());
        assert!(history.get_history_entries().is_empty());

        assert!(!history.record_progress(&media(2, "B"), 1, None, 10.0, 100.0));
        assert!(!history.remove_anime_from_history(1));
        assert_eq!(store.get(HISTORY_KEY).unwrap(), Some(foreign));

        // Clearing is an explicit overwrite and unlocks edits.
        assert!(history.clear_all_history());
        assert!(!history.is_unreadable());
        assert!(history.record_progress(&media(2, "B"), 1, None, 10.0, 100.0));
    }
}
