//! View model reconciliation.
//!
//! `Reconciler` owns the authoritative view model: the current reading of
//! every registered temple, the selected temple, the push connectivity
//! indicator and the history window of the selection. It performs no I/O;
//! callers feed it fetch results and push updates one at a time and execute
//! the `HistoryRequest`s it hands back.
//!
//! Merge rule for `apply_reading`:
//! 1. Unknown temple: dropped with a warning, nothing changes.
//! 2. Otherwise the stored reading is overwritten (last writer wins unless
//!    `MergePolicy::NewerOnly` is configured).
//! 3. A reading for the selected temple is also prepended to the history,
//!    unless it repeats the current history head (snapshot resyncs).

use crate::error::{FeedError, FeedResult};
use crate::history::{HistoryBuffer, DEFAULT_HISTORY_CAPACITY};
use crowd_core::{ConnectivityState, EntityKey, Reading};
use crowd_registry::{EntityMetadata, EntityRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// How concurrent sources are ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Every accepted reading overwrites the stored one.
    #[default]
    LastWriterWins,
    /// Skip readings whose timestamp is strictly older than the stored one.
    /// Readings with unparseable timestamps are always applied.
    NewerOnly,
}

/// Result of merging one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Stored reading overwritten.
    Applied,
    /// Stored reading overwritten and prepended to the selection history.
    AppliedToHistory,
    /// Temple not in the registry; dropped.
    UnknownKey,
    /// Older than the stored reading under `MergePolicy::NewerOnly`; dropped.
    Stale,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied | Self::AppliedToHistory)
    }
}

/// Result of applying a history response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// History replaced with this many readings.
    Replaced(usize),
    /// Response was for a temple that is no longer selected.
    WrongEntity,
    /// A newer request for the same temple has been issued since.
    Superseded,
}

/// Counts from applying a bulk snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub applied: usize,
    pub unknown: usize,
    pub stale: usize,
}

/// History fetch the caller must execute.
///
/// The tag comes back with the response so late answers for an old
/// selection, or for an older request, can be recognized and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub entity: EntityKey,
    pub request_id: u64,
    pub limit: usize,
}

/// One temple as seen by presentation consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityView {
    pub metadata: EntityMetadata,
    pub reading: Reading,
}

/// Read-only copy of the view model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    /// Every registered temple, in registry order.
    pub entities: Vec<EntityView>,
    pub selected: Option<EntityKey>,
    pub connectivity: ConnectivityState,
    /// Newest-first history of the selection.
    pub history: Vec<Reading>,
    /// Temple the view should display.
    pub displayed: EntityView,
}

/// Owner of the view model.
pub struct Reconciler {
    registry: EntityRegistry,
    readings: HashMap<EntityKey, Reading>,
    selected: Option<EntityKey>,
    connectivity: ConnectivityState,
    history: HistoryBuffer,
    /// Last history request issued.
    pending_history: Option<HistoryRequest>,
    next_request_id: u64,
    merge_policy: MergePolicy,
}

impl Reconciler {
    /// Create a reconciler with every registered temple set to the loading
    /// placeholder.
    pub fn new(registry: EntityRegistry, merge_policy: MergePolicy) -> Self {
        Self::with_history_capacity(registry, merge_policy, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(
        registry: EntityRegistry,
        merge_policy: MergePolicy,
        history_capacity: usize,
    ) -> Self {
        let readings = registry
            .keys()
            .map(|key| (key.clone(), Reading::placeholder(key.clone())))
            .collect();

        Self {
            registry,
            readings,
            selected: None,
            connectivity: ConnectivityState::Disconnected,
            history: HistoryBuffer::new(history_capacity),
            pending_history: None,
            next_request_id: 1,
            merge_policy,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn selected(&self) -> Option<&EntityKey> {
        self.selected.as_ref()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Current reading of a registered temple.
    pub fn reading(&self, key: &EntityKey) -> Option<&Reading> {
        self.readings.get(key)
    }

    /// Merge one reading from any source.
    pub fn apply_reading(&mut self, reading: Reading) -> ApplyOutcome {
        let Some(current) = self.readings.get_mut(&reading.entity) else {
            warn!(entity = %reading.entity, "Dropping reading for unknown temple");
            return ApplyOutcome::UnknownKey;
        };

        if self.merge_policy == MergePolicy::NewerOnly {
            if let (Some(stored), Some(incoming)) =
                (current.last_updated_at(), reading.last_updated_at())
            {
                if incoming < stored {
                    debug!(
                        entity = %reading.entity,
                        stored = %current.last_updated,
                        incoming = %reading.last_updated,
                        "Skipping older reading"
                    );
                    return ApplyOutcome::Stale;
                }
            }
        }

        current.people_count = reading.people_count;
        current.last_updated.clone_from(&reading.last_updated);
        current.next_hour = reading.next_hour;
        current.crowd_level = reading.crowd_level;

        debug!(
            entity = %reading.entity,
            people_count = reading.people_count,
            crowd_level = %reading.crowd_level,
            "Reading applied"
        );

        if self.selected.as_ref() != Some(&reading.entity) {
            return ApplyOutcome::Applied;
        }
        if self.history.head() == Some(&reading) {
            debug!(entity = %reading.entity, "Reading already at history head");
            return ApplyOutcome::Applied;
        }
        self.history.push_front(reading);
        ApplyOutcome::AppliedToHistory
    }

    /// Merge every reading of a bulk snapshot.
    pub fn apply_snapshot(&mut self, readings: Vec<Reading>) -> SnapshotSummary {
        let mut summary = SnapshotSummary::default();
        for reading in readings {
            match self.apply_reading(reading) {
                ApplyOutcome::Applied | ApplyOutcome::AppliedToHistory => summary.applied += 1,
                ApplyOutcome::UnknownKey => summary.unknown += 1,
                ApplyOutcome::Stale => summary.stale += 1,
            }
        }
        info!(
            applied = summary.applied,
            unknown = summary.unknown,
            stale = summary.stale,
            "Snapshot applied"
        );
        summary
    }

    /// Replace the history with a fetched window, unless the response is
    /// for an old selection or an outdated request.
    pub fn apply_history(&mut self, request: &HistoryRequest, readings: Vec<Reading>) -> HistoryOutcome {
        if self.selected.as_ref() != Some(&request.entity) {
            debug!(
                entity = %request.entity,
                request_id = request.request_id,
                "Discarding history for unselected temple"
            );
            return HistoryOutcome::WrongEntity;
        }

        if let Some(latest) = &self.pending_history {
            if latest.entity == request.entity && request.request_id < latest.request_id {
                debug!(
                    entity = %request.entity,
                    request_id = request.request_id,
                    latest_id = latest.request_id,
                    "Discarding superseded history"
                );
                return HistoryOutcome::Superseded;
            }
        }

        let limit = request.limit.min(self.history.capacity());
        let readings: Vec<Reading> = readings.into_iter().take(limit).collect();
        let count = readings.len();
        self.history.replace(request.entity.clone(), readings);

        debug!(entity = %request.entity, count, "History replaced");
        HistoryOutcome::Replaced(count)
    }

    /// Select a temple and return the history fetch to run for it.
    ///
    /// Other temples' readings are untouched. Re-selecting the current
    /// temple keeps its history and issues a fresh request.
    pub fn select_entity(&mut self, key: &EntityKey) -> FeedResult<HistoryRequest> {
        if !self.registry.contains(key) {
            warn!(entity = %key, "Rejecting selection of unknown temple");
            return Err(FeedError::UnknownEntity(key.to_string()));
        }

        if self.selected.as_ref() != Some(key) {
            info!(
                from = ?self.selected.as_ref().map(EntityKey::as_str),
                to = %key,
                "Selection changed"
            );
            self.selected = Some(key.clone());
            self.history.rescope(key.clone());
        }

        Ok(self.issue_history_request(key.clone()))
    }

    /// History request for a periodic refresh of the current selection.
    pub fn refresh_history_request(&mut self) -> Option<HistoryRequest> {
        let key = self.selected.clone()?;
        Some(self.issue_history_request(key))
    }

    fn issue_history_request(&mut self, entity: EntityKey) -> HistoryRequest {
        let request = HistoryRequest {
            entity,
            request_id: self.next_request_id,
            limit: self.history.capacity(),
        };
        self.next_request_id += 1;
        self.pending_history = Some(request.clone());
        request
    }

    /// Update the connectivity indicator. Returns whether it changed.
    pub fn set_connection_state(&mut self, state: ConnectivityState) -> bool {
        if self.connectivity == state {
            return false;
        }
        info!(from = %self.connectivity, to = %state, "Connectivity changed");
        self.connectivity = state;
        true
    }

    /// Metadata of the displayed temple: the selection, or the first
    /// registry entry when nothing valid is selected.
    pub fn displayed_entity(&self) -> &EntityMetadata {
        self.selected
            .as_ref()
            .and_then(|key| self.registry.resolve(key).ok())
            .unwrap_or_else(|| self.registry.first())
    }

    /// Reading the view should display.
    pub fn displayed_reading(&self) -> &Reading {
        let key = &self.displayed_entity().key;
        // Every registry key is populated at construction.
        &self.readings[key]
    }

    /// Owned copy of the view model.
    pub fn snapshot(&self) -> ViewSnapshot {
        let entities = self
            .registry
            .iter()
            .map(|metadata| EntityView {
                metadata: metadata.clone(),
                reading: self.readings[&metadata.key].clone(),
            })
            .collect();

        ViewSnapshot {
            entities,
            selected: self.selected.clone(),
            connectivity: self.connectivity,
            history: self.history.to_vec(),
            displayed: EntityView {
                metadata: self.displayed_entity().clone(),
                reading: self.displayed_reading().clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_core::CrowdLevel;
    use crowd_registry::EntityDefinition;

    fn key(name: &str) -> EntityKey {
        EntityKey::from(name)
    }

    fn reading(temple: &str, count: u32) -> Reading {
        Reading::new(
            key(temple),
            count,
            "2024-03-01 10:00:00",
            CrowdLevel::Low,
            CrowdLevel::categorize(count),
        )
    }

    fn reading_at(temple: &str, count: u32, at: &str) -> Reading {
        Reading::new(key(temple), count, at, CrowdLevel::Unknown, CrowdLevel::categorize(count))
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(EntityRegistry::default(), MergePolicy::LastWriterWins)
    }

    #[test]
    fn test_startup_placeholders() {
        let rec = reconciler();
        for k in ["KashiVishwanath", "TempleB", "TempleC"] {
            let r = rec.reading(&key(k)).unwrap();
            assert!(r.is_placeholder());
            assert_eq!(r.people_count, 0);
            assert_eq!(r.crowd_level, CrowdLevel::Unknown);
            assert_eq!(r.next_hour, CrowdLevel::Unknown);
        }
        assert_eq!(rec.connectivity(), ConnectivityState::Disconnected);
        assert!(rec.selected().is_none());
    }

    #[test]
    fn test_apply_reading_overwrites_all_fields() {
        let mut rec = reconciler();
        let incoming = Reading::new(
            key("TempleC"),
            33,
            "2024-03-01 11:22:33",
            CrowdLevel::High,
            CrowdLevel::Medium,
        );

        assert_eq!(rec.apply_reading(incoming.clone()), ApplyOutcome::Applied);
        assert_eq!(rec.reading(&key("TempleC")), Some(&incoming));
    }

    #[test]
    fn test_unknown_key_is_noop() {
        let mut rec = reconciler();
        let before = rec.snapshot();

        assert_eq!(
            rec.apply_reading(reading("TempleX", 5)),
            ApplyOutcome::UnknownKey
        );
        assert_eq!(rec.snapshot(), before);
        assert!(rec.reading(&key("TempleX")).is_none());
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let mut rec = reconciler();
        assert_eq!(
            rec.apply_reading(reading("templeb", 5)),
            ApplyOutcome::UnknownKey
        );
    }

    #[test]
    fn test_snapshot_scenario() {
        let mut rec = reconciler();
        let summary = rec.apply_snapshot(vec![
            Reading::new(
                key("KashiVishwanath"),
                42,
                "2024-03-01 10:00:00",
                CrowdLevel::Unknown,
                CrowdLevel::Medium,
            ),
            reading("TempleX", 1),
        ]);

        assert_eq!(
            summary,
            SnapshotSummary {
                applied: 1,
                unknown: 1,
                stale: 0
            }
        );
        let kv = rec.reading(&key("KashiVishwanath")).unwrap();
        assert_eq!(kv.people_count, 42);
        assert_eq!(kv.crowd_level, CrowdLevel::Medium);
        assert!(rec.reading(&key("TempleB")).unwrap().is_placeholder());
    }

    #[test]
    fn test_selected_updates_prepend_history() {
        let mut rec = reconciler();
        rec.select_entity(&key("TempleB")).unwrap();

        assert_eq!(
            rec.apply_reading(reading("TempleB", 1)),
            ApplyOutcome::AppliedToHistory
        );
        assert_eq!(rec.apply_reading(reading("TempleC", 9)), ApplyOutcome::Applied);
        assert_eq!(
            rec.apply_reading(reading("TempleB", 2)),
            ApplyOutcome::AppliedToHistory
        );

        assert_eq!(rec.history().len(), 2);
        assert_eq!(rec.history().head().map(|r| r.people_count), Some(2));
    }

    #[test]
    fn test_eleven_updates_keep_ten_most_recent() {
        let mut rec = reconciler();
        rec.select_entity(&key("TempleB")).unwrap();

        for count in 1..=11 {
            rec.apply_reading(reading("TempleB", count));
        }

        let counts: Vec<u32> = rec.history().iter().map(|r| r.people_count).collect();
        assert_eq!(counts, (2..=11).rev().collect::<Vec<_>>());
        assert_eq!(rec.reading(&key("TempleB")).unwrap().people_count, 11);
    }

    #[test]
    fn test_resync_does_not_duplicate_history_head() {
        let mut rec = reconciler();
        let request = rec.select_entity(&key("TempleB")).unwrap();
        let latest = reading_at("TempleB", 12, "2024-03-01 10:00:00");
        let older = reading_at("TempleB", 9, "2024-03-01 09:59:00");
        rec.apply_history(&request, vec![latest.clone(), older]);

        for _ in 0..3 {
            let summary = rec.apply_snapshot(vec![latest.clone()]);
            assert_eq!(summary.applied, 1);
        }

        let counts: Vec<u32> = rec.history().iter().map(|r| r.people_count).collect();
        assert_eq!(counts, [12, 9]);
        assert_eq!(rec.reading(&key("TempleB")), Some(&latest));

        // A changed reading still lands in the history.
        assert_eq!(
            rec.apply_reading(reading_at("TempleB", 13, "2024-03-01 10:01:00")),
            ApplyOutcome::AppliedToHistory
        );
        assert_eq!(rec.history().len(), 3);
    }

    #[test]
    fn test_selection_change_leaves_other_readings() {
        let mut rec = reconciler();
        rec.apply_reading(reading("KashiVishwanath", 17));
        rec.select_entity(&key("KashiVishwanath")).unwrap();
        let before = rec.reading(&key("KashiVishwanath")).cloned();

        rec.select_entity(&key("TempleB")).unwrap();

        assert_eq!(rec.reading(&key("KashiVishwanath")).cloned(), before);
        assert_eq!(rec.selected(), Some(&key("TempleB")));
        assert!(rec.history().is_empty());
        assert_eq!(rec.history().entity(), Some(&key("TempleB")));
    }

    #[test]
    fn test_select_unknown_rejected() {
        let mut rec = reconciler();
        rec.select_entity(&key("TempleB")).unwrap();

        let result = rec.select_entity(&key("TempleX"));
        assert!(matches!(result, Err(FeedError::UnknownEntity(k)) if k == "TempleX"));
        assert_eq!(rec.selected(), Some(&key("TempleB")));
    }

    #[test]
    fn test_history_request_ids_increase() {
        let mut rec = reconciler();
        let first = rec.select_entity(&key("TempleB")).unwrap();
        let again = rec.select_entity(&key("TempleB")).unwrap();
        let periodic = rec.refresh_history_request().unwrap();

        assert_eq!(first.entity, key("TempleB"));
        assert_eq!(first.limit, DEFAULT_HISTORY_CAPACITY);
        assert!(first.request_id < again.request_id);
        assert!(again.request_id < periodic.request_id);
    }

    #[test]
    fn test_refresh_without_selection() {
        let mut rec = reconciler();
        assert!(rec.refresh_history_request().is_none());
    }

    #[test]
    fn test_history_replaces_buffer() {
        let mut rec = reconciler();
        let request = rec.select_entity(&key("TempleB")).unwrap();
        rec.apply_reading(reading("TempleB", 99));

        let fetched: Vec<Reading> = (0..12).rev().map(|c| reading("TempleB", c)).collect();
        assert_eq!(rec.apply_history(&request, fetched), HistoryOutcome::Replaced(10));

        assert_eq!(rec.history().len(), 10);
        assert_eq!(rec.history().head().map(|r| r.people_count), Some(11));
        // History bypasses the merge rule.
        assert_eq!(rec.reading(&key("TempleB")).unwrap().people_count, 99);
    }

    #[test]
    fn test_history_for_old_selection_discarded() {
        let mut rec = reconciler();
        let request_a = rec.select_entity(&key("KashiVishwanath")).unwrap();
        rec.select_entity(&key("TempleB")).unwrap();
        rec.apply_reading(reading("TempleB", 3));
        let before = rec.history().to_vec();

        let outcome = rec.apply_history(&request_a, vec![reading("KashiVishwanath", 1)]);

        assert_eq!(outcome, HistoryOutcome::WrongEntity);
        assert_eq!(rec.history().to_vec(), before);
    }

    #[test]
    fn test_superseded_history_discarded() {
        let mut rec = reconciler();
        let older = rec.select_entity(&key("TempleB")).unwrap();
        let newer = rec.refresh_history_request().unwrap();

        assert_eq!(
            rec.apply_history(&newer, vec![reading("TempleB", 2)]),
            HistoryOutcome::Replaced(1)
        );
        assert_eq!(
            rec.apply_history(&older, vec![reading("TempleB", 1), reading("TempleB", 0)]),
            HistoryOutcome::Superseded
        );
        assert_eq!(rec.history().len(), 1);
    }

    #[test]
    fn test_connectivity_transitions() {
        let mut rec = reconciler();
        rec.apply_reading(reading("TempleC", 8));

        assert!(rec.set_connection_state(ConnectivityState::Connected));
        assert!(!rec.set_connection_state(ConnectivityState::Connected));
        assert!(rec.set_connection_state(ConnectivityState::Disconnected));
        assert!(rec.set_connection_state(ConnectivityState::Connected));

        assert_eq!(rec.reading(&key("TempleC")).unwrap().people_count, 8);
    }

    #[test]
    fn test_displayed_reading_fallback() {
        let mut rec = reconciler();
        rec.apply_reading(reading("KashiVishwanath", 4));
        assert_eq!(rec.displayed_entity().key, key("KashiVishwanath"));
        assert_eq!(rec.displayed_reading().people_count, 4);

        rec.select_entity(&key("TempleC")).unwrap();
        assert_eq!(rec.displayed_entity().key, key("TempleC"));
        assert!(rec.displayed_reading().is_placeholder());
    }

    #[test]
    fn test_newer_only_policy() {
        let mut rec = Reconciler::new(EntityRegistry::default(), MergePolicy::NewerOnly);
        assert_eq!(rec.merge_policy(), MergePolicy::NewerOnly);

        assert_eq!(
            rec.apply_reading(reading_at("TempleB", 10, "2024-03-01 10:05:00")),
            ApplyOutcome::Applied
        );
        assert_eq!(
            rec.apply_reading(reading_at("TempleB", 7, "2024-03-01 10:04:59")),
            ApplyOutcome::Stale
        );
        assert_eq!(
            rec.apply_reading(reading_at("TempleB", 12, "2024-03-01 10:05:00")),
            ApplyOutcome::Applied
        );
        assert_eq!(
            rec.apply_reading(reading_at("TempleB", 1, "yesterday")),
            ApplyOutcome::Applied
        );
        assert_eq!(rec.reading(&key("TempleB")).unwrap().people_count, 1);
    }

    #[test]
    fn test_last_writer_wins_ignores_timestamps() {
        let mut rec = reconciler();
        rec.apply_reading(reading_at("TempleB", 10, "2024-03-01 10:05:00"));
        assert_eq!(
            rec.apply_reading(reading_at("TempleB", 7, "2024-03-01 09:00:00")),
            ApplyOutcome::Applied
        );
        assert_eq!(rec.reading(&key("TempleB")).unwrap().people_count, 7);
    }

    #[test]
    fn test_snapshot_registry_order_and_custom_registry() {
        let registry = EntityRegistry::new(&[
            EntityDefinition::new("TempleC", "c.jpg"),
            EntityDefinition::new("TempleB", "b.jpg"),
        ])
        .unwrap();
        let mut rec = Reconciler::with_history_capacity(registry, MergePolicy::default(), 3);
        rec.select_entity(&key("TempleB")).unwrap();
        for count in 0..5 {
            rec.apply_reading(reading("TempleB", count));
        }

        let view = rec.snapshot();
        let order: Vec<&str> = view.entities.iter().map(|e| e.metadata.key.as_str()).collect();
        assert_eq!(order, ["TempleC", "TempleB"]);
        assert_eq!(view.history.len(), 3);
        assert_eq!(view.displayed.metadata.image, "b.jpg");
        assert_eq!(view.displayed.reading.people_count, 4);
    }

    #[test]
    fn test_merge_policy_serde() {
        let policy: MergePolicy = serde_json::from_str("\"newer_only\"").unwrap();
        assert_eq!(policy, MergePolicy::NewerOnly);
        assert_eq!(MergePolicy::default(), MergePolicy::LastWriterWins);
    }
}
