//! Keeps one collection live against the remote store and its change-feed.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{apply_optimistic, reconcile, ChangeEvent, Collection, FilterContext, Mutation, Record, Selection};
use crate::errors::AppError;
use crate::models::wire;
use crate::notify;
use crate::remote::{ChangeFeed, ChangeKind, ChangePayload, FeedChannel, Notifier, RemoteStore, Table};

/// Serializable state of one view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot<R> {
    pub records: Vec<R>,
    pub selection: Option<Selection>,
    pub loading: bool,
    pub error: Option<String>,
    /// Ids with an optimistic change not yet confirmed by the server.
    pub pending: Vec<String>,
}

/// A merge made while a load is in flight, replayed onto the loaded rows.
enum Journaled<R: Record> {
    Event(ChangeEvent<R>),
    Optimistic(Mutation<R>, DateTime<Utc>),
}

struct ViewState<R: Record> {
    context: Option<FilterContext>,
    collection: Collection<R>,
    /// Bumped on every `start`; feed tasks of older epochs are ignored.
    epoch: u64,
    /// Bumped on every load and selection change; only the latest load lands.
    load_seq: u64,
    loading: bool,
    error: Option<String>,
    pending: BTreeSet<String>,
    /// Merges since the latest load started; `None` while no load is in flight.
    journal: Option<Vec<Journaled<R>>>,
}

impl<R: Record> ViewState<R> {
    fn merge(&mut self, event: &ChangeEvent<R>) -> bool {
        let Some(context) = self.context.as_ref() else {
            return false;
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.push(Journaled::Event(event.clone()));
        }
        let before = self.collection.contains(event.id());
        self.collection = reconcile(&self.collection, event, |r| r.matches(context));
        self.pending.remove(event.id());
        !before && self.collection.contains(event.id())
    }

    /// Apply `mutation`; the id is pending only if the collection changed.
    fn optimistic(&mut self, mutation: &Mutation<R>, at: DateTime<Utc>) {
        let Some(context) = self.context.as_ref() else {
            return;
        };
        let id = mutation.id();
        let before = self.collection.get(id).cloned();
        self.collection = apply_optimistic(&self.collection, mutation, |r| r.matches(context), at);
        if self.collection.get(id) == before.as_ref() {
            return;
        }
        self.pending.insert(id.to_string());
        if let Some(journal) = self.journal.as_mut() {
            journal.push(Journaled::Optimistic(mutation.clone(), at));
        }
    }

    /// Land a load: the loaded rows with every merge made during the query replayed on top.
    fn land(&mut self, records: Collection<R>, context: &FilterContext) {
        let mut collection = records;
        let mut pending = BTreeSet::new();
        for entry in self.journal.take().unwrap_or_default() {
            match entry {
                Journaled::Event(event) => {
                    collection = reconcile(&collection, &event, |r| r.matches(context));
                    pending.remove(event.id());
                }
                Journaled::Optimistic(mutation, at) => {
                    collection = apply_optimistic(&collection, &mutation, |r| r.matches(context), at);
                    pending.insert(mutation.id().to_string());
                }
            }
        }
        self.collection = collection;
        self.pending = pending;
    }
}

/// Synchronizer for one record kind.
pub struct Synchronizer<R: Record> {
    store: Arc<dyn RemoteStore>,
    feed: Arc<dyn ChangeFeed>,
    notifier: Option<Arc<dyn Notifier>>,
    view: Arc<Mutex<ViewState<R>>>,
}

impl<R: Record> Clone for Synchronizer<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            feed: self.feed.clone(),
            notifier: self.notifier.clone(),
            view: self.view.clone(),
        }
    }
}

impl<R: Record> Synchronizer<R> {
    pub fn new(store: Arc<dyn RemoteStore>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            store,
            feed,
            notifier: None,
            view: Arc::new(Mutex::new(ViewState {
                context: None,
                collection: Collection::new(),
                epoch: 0,
                load_seq: 0,
                loading: false,
                error: None,
                pending: BTreeSet::new(),
                journal: None,
            })),
        }
    }

    /// Raise a local notification for records that newly arrive through the feed.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Subscribe to the change-feed for `context` and load the collection.
    ///
    /// A context with a different identity than the current one clears the
    /// collection first. The caller stops any previous handle.
    pub async fn start(&self, context: FilterContext) -> Result<SubscriptionHandle, AppError> {
        let channel = self
            .feed
            .subscribe(R::TABLE, R::feed_filter(&context))
            .await?;

        let epoch = {
            let mut view = self.view.lock().await;
            let same_identity = view
                .context
                .as_ref()
                .is_some_and(|current| current.same_identity(&context));
            if !same_identity {
                view.collection = Collection::new();
                view.pending.clear();
            }
            view.context = Some(context);
            view.error = None;
            view.epoch += 1;
            view.epoch
        };

        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(self.clone().run_feed(channel, epoch, active.clone()));
        tracing::debug!(table = %R::TABLE, epoch, "Change feed subscribed");

        self.load_all().await;
        Ok(SubscriptionHandle {
            table: R::TABLE,
            active,
            task: Some(task),
        })
    }

    /// Replace the whole collection with a fresh remote query.
    ///
    /// Failures keep the current records and are reported through the view's
    /// error state. A load overtaken by a newer load or selection change is discarded.
    pub async fn load_all(&self) -> Collection<R> {
        let (context, seq) = {
            let mut view = self.view.lock().await;
            let Some(context) = view.context.clone() else {
                return view.collection.clone();
            };
            view.load_seq += 1;
            view.loading = true;
            view.journal = Some(Vec::new());
            (context, view.load_seq)
        };

        let result = self.store.select(&R::query(&context)).await;

        let mut view = self.view.lock().await;
        if view.load_seq != seq {
            tracing::debug!(table = %R::TABLE, "Discarding superseded load");
            return view.collection.clone();
        }
        view.loading = false;
        match result {
            Ok(rows) => {
                let records = rows
                    .iter()
                    .map(R::from_row)
                    .filter(|record| !record.id().is_empty() && record.matches(&context));
                view.land(Collection::from_records(records), &context);
                view.error = None;
                tracing::debug!(table = %R::TABLE, count = view.collection.len(), "Collection loaded");
            }
            Err(err) => {
                tracing::warn!(table = %R::TABLE, "Failed to load collection: {}", err);
                view.journal = None;
                view.error = Some(err.message());
            }
        }
        view.collection.clone()
    }

    /// Switch the display filter, evict what no longer matches, then reload.
    pub async fn set_selection(&self, selection: Selection) -> Result<(), AppError> {
        {
            let mut view = self.view.lock().await;
            let Some(context) = view.context.as_mut() else {
                return Err(AppError::Unauthorized("No active session".to_string()));
            };
            context.selection = selection;
            let context = context.clone();
            view.collection.retain(|record| record.matches(&context));
            view.load_seq += 1;
        }
        self.load_all().await;
        Ok(())
    }

    /// Apply a local mutation immediately and mark the id as pending.
    pub async fn apply_optimistic(&self, mutation: &Mutation<R>) {
        self.view.lock().await.optimistic(mutation, Utc::now());
    }

    /// Apply `mutation` optimistically, then run the remote call.
    ///
    /// The row returned by the remote call is merged as the authoritative
    /// value. On failure the error is recorded on the view and the row is
    /// re-fetched to correct the optimistic value.
    pub async fn mutate<F>(&self, mutation: Mutation<R>, remote: F) -> Result<Option<R>, AppError>
    where
        F: Future<Output = Result<Option<Value>, AppError>>,
    {
        let id = mutation.id().to_string();
        self.apply_optimistic(&mutation).await;

        match remote.await {
            Ok(Some(row)) => {
                let record = R::from_row(&row);
                let mut view = self.view.lock().await;
                view.merge(&ChangeEvent::Update {
                    old: None,
                    new: record.clone(),
                });
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!(table = %R::TABLE, id = %id, "Mutation failed: {}", err);
                self.view.lock().await.error = Some(err.message());
                self.correct(&id).await;
                Err(err)
            }
        }
    }

    /// Re-fetch one row and merge the server's value.
    pub async fn correct(&self, id: &str) {
        let event = match self.store.fetch(R::TABLE, id).await {
            Ok(Some(row)) => ChangeEvent::Update {
                old: None,
                new: R::from_row(&row),
            },
            Ok(None) => ChangeEvent::Delete { id: id.to_string() },
            Err(err) => {
                tracing::warn!(table = %R::TABLE, id, "Correction fetch failed: {}", err);
                return;
            }
        };
        self.view.lock().await.merge(&event);
    }

    pub async fn snapshot(&self) -> ViewSnapshot<R> {
        let view = self.view.lock().await;
        ViewSnapshot {
            records: view.collection.records().to_vec(),
            selection: view.context.as_ref().map(|c| c.selection),
            loading: view.loading,
            error: view.error.clone(),
            pending: view.pending.iter().cloned().collect(),
        }
    }

    async fn run_feed(self, mut channel: FeedChannel, epoch: u64, active: Arc<AtomicBool>) {
        while let Some(payload) = channel.recv().await {
            let event = match self.resolve(payload).await {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(table = %R::TABLE, "Dropping change event: {}", err);
                    continue;
                }
            };

            let mut view = self.view.lock().await;
            if !active.load(Ordering::SeqCst) || view.epoch != epoch {
                break;
            }
            let arrived = view.merge(&event);
            drop(view);

            if arrived {
                if let ChangeEvent::Insert(record) | ChangeEvent::Update { new: record, .. } = &event {
                    self.raise_alert(record);
                }
            }
        }
        tracing::debug!(table = %R::TABLE, epoch, "Change feed consumer finished");
    }

    /// Turn a feed payload into a typed event, re-fetching rows the payload
    /// does not describe completely.
    async fn resolve(&self, payload: ChangePayload) -> Result<Option<ChangeEvent<R>>, AppError> {
        let Some(id) = payload.row_id() else {
            tracing::warn!(table = %R::TABLE, "Change event without row id");
            return Ok(None);
        };

        if payload.event_type == ChangeKind::Delete {
            return Ok(Some(ChangeEvent::Delete { id }));
        }

        let complete = payload
            .new
            .as_ref()
            .filter(|row| wire::has_columns(row, R::REQUIRED_COLUMNS));
        let record = match complete {
            Some(row) => R::from_row(row),
            None => match self.store.fetch(R::TABLE, &id).await? {
                Some(row) => R::from_row(&row),
                None => return Ok(Some(ChangeEvent::Delete { id })),
            },
        };

        Ok(Some(match payload.event_type {
            ChangeKind::Insert => ChangeEvent::Insert(record),
            _ => ChangeEvent::Update {
                old: payload.old.as_ref().map(R::from_row),
                new: record,
            },
        }))
    }

    fn raise_alert(&self, record: &R) {
        let (Some(notifier), Some((title, body))) = (self.notifier.as_ref(), record.alert()) else {
            return;
        };
        notify::dispatch_local(notifier.clone(), title, body);
    }
}

/// Live subscription of a synchronizer.
///
/// `stop` is idempotent, and dropping the handle stops it.
pub struct SubscriptionHandle {
    table: Table,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);
        task.abort();
        tracing::debug!(table = %self.table, "Change feed unsubscribed");
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobAction, JobStatus, Notification};
    use crate::notify::tests::RecordingNotifier;
    use crate::remote::{FeedFilter, Query};
    use crate::sync::Role;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Store whose rows and failures are scripted by the test, with a feed the
    /// test pushes payloads into.
    #[derive(Default)]
    struct ScriptedBackend {
        rows: std::sync::Mutex<HashMap<String, Value>>,
        fail_select: AtomicBool,
        feeds: std::sync::Mutex<Vec<mpsc::Sender<ChangePayload>>>,
        fetches: std::sync::atomic::AtomicUsize,
        /// When set, `select` reads its rows and then waits for `release_select`.
        hold_select: AtomicBool,
        select_entered: tokio::sync::Notify,
        release_select: tokio::sync::Notify,
    }

    impl ScriptedBackend {
        fn put(&self, row: Value) {
            let id = row["id"].as_str().unwrap().to_string();
            self.rows.lock().unwrap().insert(id, row);
        }

        fn remove(&self, id: &str) {
            self.rows.lock().unwrap().remove(id);
        }

        async fn push(&self, event_type: ChangeKind, new: Option<Value>, old: Option<Value>) {
            let senders = self.feeds.lock().unwrap().clone();
            for sender in senders {
                let _ = sender
                    .send(ChangePayload {
                        table: Table::Jobs,
                        event_type,
                        new: new.clone(),
                        old: old.clone(),
                        commit_timestamp: Utc::now(),
                    })
                    .await;
            }
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedBackend {
        async fn select(&self, _query: &Query) -> Result<Vec<Value>, AppError> {
            if self.fail_select.load(Ordering::SeqCst) {
                return Err(AppError::Database("connection refused".to_string()));
            }
            let rows: Vec<Value> = self.rows.lock().unwrap().values().cloned().collect();
            if self.hold_select.load(Ordering::SeqCst) {
                self.select_entered.notify_one();
                self.release_select.notified().await;
            }
            Ok(rows)
        }

        async fn fetch(&self, _table: Table, id: &str) -> Result<Option<Value>, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().get(id).cloned())
        }

        async fn insert(&self, _table: Table, row: Value) -> Result<Value, AppError> {
            self.put(row.clone());
            Ok(row)
        }

        async fn update(&self, _table: Table, _id: &str, _patch: Value) -> Result<Value, AppError> {
            Err(AppError::Internal("not scripted".to_string()))
        }

        async fn delete(&self, _table: Table, id: &str) -> Result<(), AppError> {
            self.remove(id);
            Ok(())
        }

        async fn rpc(&self, _name: &str, _params: Value) -> Result<Value, AppError> {
            Err(AppError::Internal("not scripted".to_string()))
        }
    }

    #[async_trait]
    impl ChangeFeed for ScriptedBackend {
        async fn subscribe(&self, _table: Table, _filter: FeedFilter) -> Result<FeedChannel, AppError> {
            let (sender, receiver) = mpsc::channel(16);
            self.feeds.lock().unwrap().push(sender);
            Ok(FeedChannel::new(receiver, None))
        }
    }

    fn job_row(id: &str, status: &str, driver: Option<&str>) -> Value {
        json!({
            "id": id,
            "status": status,
            "admin_id": "A1",
            "driver_id": driver,
            "scheduled_date": "2024-05-01",
            "admin_name": "Alice"
        })
    }

    fn driver_open_tab() -> FilterContext {
        FilterContext::new("D1", Role::Driver).with_selection(Selection::Job(JobStatus::Open))
    }

    fn synchronizer(backend: &Arc<ScriptedBackend>) -> Synchronizer<Job> {
        Synchronizer::new(backend.clone(), backend.clone())
    }

    async fn eventually<F>(sync: &Synchronizer<Job>, check: F) -> ViewSnapshot<Job>
    where
        F: Fn(&ViewSnapshot<Job>) -> bool,
    {
        for _ in 0..100 {
            let snapshot = sync.snapshot().await;
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", sync.snapshot().await);
    }

    fn ids(snapshot: &ViewSnapshot<Job>) -> Vec<&str> {
        snapshot.records.iter().map(|j| j.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_start_loads_matching_records() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        backend.put(job_row("J2", "assigned", Some("D2")));

        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();

        let snapshot = sync.snapshot().await;
        assert_eq!(ids(&snapshot), vec!["J1"]);
        assert!(!snapshot.loading);
        assert_eq!(snapshot.selection, Some(Selection::Job(JobStatus::Open)));
    }

    #[tokio::test]
    async fn test_feed_insert_and_update_are_reconciled() {
        let backend = Arc::new(ScriptedBackend::default());
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();

        backend
            .push(ChangeKind::Insert, Some(job_row("J1", "open", None)), None)
            .await;
        eventually(&sync, |s| ids(s) == vec!["J1"]).await;

        backend
            .push(
                ChangeKind::Update,
                Some(job_row("J1", "assigned", Some("D1"))),
                Some(json!({ "id": "J1" })),
            )
            .await;
        eventually(&sync, |s| s.records.is_empty()).await;
    }

    #[tokio::test]
    async fn test_partial_update_payload_is_refetched() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();
        assert_eq!(ids(&sync.snapshot().await), vec!["J1"]);

        // The server row changed, but the payload only names the changed column.
        backend.put(job_row("J1", "assigned", Some("D2")));
        backend
            .push(ChangeKind::Update, Some(json!({ "id": "J1", "status": "assigned" })), None)
            .await;

        eventually(&sync, |s| s.records.is_empty()).await;
        assert!(backend.fetches.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_refetch_of_vanished_row_is_treated_as_delete() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();

        backend.remove("J1");
        backend
            .push(ChangeKind::Update, Some(json!({ "id": "J1" })), None)
            .await;
        eventually(&sync, |s| s.records.is_empty()).await;
    }

    #[tokio::test]
    async fn test_failed_load_keeps_stale_records() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();

        backend.fail_select.store(true, Ordering::SeqCst);
        let collection = sync.load_all().await;
        assert_eq!(collection.len(), 1);

        let snapshot = sync.snapshot().await;
        assert_eq!(ids(&snapshot), vec!["J1"]);
        assert!(snapshot.error.unwrap().contains("connection refused"));
        assert!(!snapshot.loading);

        backend.fail_select.store(false, Ordering::SeqCst);
        sync.load_all().await;
        assert!(sync.snapshot().await.error.is_none());
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop_and_halts_updates() {
        let backend = Arc::new(ScriptedBackend::default());
        let sync = synchronizer(&backend);
        let mut handle = sync.start(driver_open_tab()).await.unwrap();
        assert!(handle.is_active());

        handle.stop();
        handle.stop();
        assert!(!handle.is_active());

        backend
            .push(ChangeKind::Insert, Some(job_row("J1", "open", None)), None)
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sync.snapshot().await.records.is_empty());
    }

    #[tokio::test]
    async fn test_identity_change_clears_and_resubscribes() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "assigned", Some("D1")));
        let sync = synchronizer(&backend);

        let mut first = sync
            .start(FilterContext::new("D1", Role::Driver))
            .await
            .unwrap();
        assert_eq!(ids(&sync.snapshot().await), vec!["J1"]);

        first.stop();
        let _second = sync
            .start(FilterContext::new("D2", Role::Driver))
            .await
            .unwrap();
        assert!(sync.snapshot().await.records.is_empty());

        backend
            .push(ChangeKind::Insert, Some(job_row("J2", "assigned", Some("D2"))), None)
            .await;
        eventually(&sync, |s| ids(s) == vec!["J2"]).await;
    }

    #[tokio::test]
    async fn test_set_selection_evicts_then_reloads() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        backend.put(job_row("J2", "assigned", Some("D1")));
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();
        assert_eq!(ids(&sync.snapshot().await), vec!["J1"]);

        sync.set_selection(Selection::Job(JobStatus::Assigned))
            .await
            .unwrap();
        assert_eq!(ids(&sync.snapshot().await), vec!["J2"]);
    }

    #[tokio::test]
    async fn test_failed_mutation_is_corrected_by_refetch() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();

        // Another driver claimed the job before our accept landed.
        backend.put(job_row("J1", "assigned", Some("D2")));
        let result = sync
            .mutate(
                Mutation::Apply {
                    id: "J1".to_string(),
                    action: JobAction::Accept {
                        driver_id: "D1".to_string(),
                    },
                },
                async {
                    Err::<Option<Value>, _>(AppError::Conflict {
                        message: "Job already taken".to_string(),
                        current_status: Some("assigned".to_string()),
                    })
                },
            )
            .await;

        assert!(matches!(result, Err(AppError::Conflict { .. })));
        let snapshot = sync.snapshot().await;
        assert!(snapshot.records.is_empty());
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.error.as_deref(), Some("Job already taken"));
    }

    #[tokio::test]
    async fn test_successful_mutation_merges_server_row() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "assigned", Some("D1")));
        let sync = synchronizer(&backend);
        let _handle = sync
            .start(FilterContext::new("D1", Role::Driver))
            .await
            .unwrap();

        let mut server = job_row("J1", "in_progress", Some("D1"));
        server["driver_name"] = json!("Dan");
        let confirmed = sync
            .mutate(
                Mutation::Apply {
                    id: "J1".to_string(),
                    action: JobAction::Start,
                },
                async move { Ok(Some(server)) },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(confirmed.driver_name.as_deref(), Some("Dan"));
        let snapshot = sync.snapshot().await;
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].status, Some(JobStatus::InProgress));
        assert!(snapshot.pending.is_empty());
    }

    #[tokio::test]
    async fn test_optimistic_change_is_pending_until_confirmed() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "assigned", Some("D1")));
        let sync = synchronizer(&backend);
        let _handle = sync
            .start(FilterContext::new("D1", Role::Driver))
            .await
            .unwrap();

        sync.apply_optimistic(&Mutation::Apply {
            id: "J1".to_string(),
            action: JobAction::Start,
        })
        .await;
        let snapshot = sync.snapshot().await;
        assert_eq!(snapshot.pending, vec!["J1".to_string()]);
        assert_eq!(snapshot.records[0].status, Some(JobStatus::InProgress));

        backend
            .push(
                ChangeKind::Update,
                Some(job_row("J1", "in_progress", Some("D1"))),
                None,
            )
            .await;
        let snapshot = eventually(&sync, |s| s.pending.is_empty()).await;
        assert_eq!(snapshot.records.len(), 1);
    }

    #[tokio::test]
    async fn test_new_unread_notification_raises_local_alert() {
        let backend = Arc::new(ScriptedBackend::default());
        let recorder = Arc::new(RecordingNotifier::default());
        let sync: Synchronizer<Notification> =
            Synchronizer::new(backend.clone(), backend.clone()).with_notifier(recorder.clone());
        let _handle = sync
            .start(FilterContext::new("U1", Role::Driver))
            .await
            .unwrap();

        let row = json!({
            "id": "N1",
            "user_id": "U1",
            "read": false,
            "title": "Job accepted",
            "body": "Dan accepted Pallet run",
            "created_at": "2024-05-01T10:00:00Z"
        });
        backend.push(ChangeKind::Insert, Some(row.clone()), None).await;
        // Redelivery must not alert twice.
        backend.push(ChangeKind::Insert, Some(row), None).await;

        for _ in 0..100 {
            if !recorder.local.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let snapshot = sync.snapshot().await;
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].title.as_deref(), Some("Job accepted"));
        assert_eq!(
            recorder.local.lock().unwrap().as_slice(),
            &[(
                "Job accepted".to_string(),
                "Dan accepted Pallet run".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_load_in_flight_keeps_newer_merges() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "assigned", Some("D1")));
        let sync = synchronizer(&backend);
        let _handle = sync
            .start(FilterContext::new("D1", Role::Driver))
            .await
            .unwrap();

        // The load reads J1 as assigned, then stalls.
        backend.hold_select.store(true, Ordering::SeqCst);
        let loader = tokio::spawn({
            let sync = sync.clone();
            async move { sync.load_all().await }
        });
        backend.select_entered.notified().await;

        sync.apply_optimistic(&Mutation::Apply {
            id: "J1".to_string(),
            action: JobAction::Start,
        })
        .await;
        backend
            .push(ChangeKind::Insert, Some(job_row("J2", "open", None)), None)
            .await;
        eventually(&sync, |s| ids(s).contains(&"J2")).await;

        backend.release_select.notify_one();
        loader.await.unwrap();

        let snapshot = sync.snapshot().await;
        let j1 = snapshot.records.iter().find(|j| j.id == "J1").unwrap();
        assert_eq!(j1.status, Some(JobStatus::InProgress));
        assert!(ids(&snapshot).contains(&"J2"));
        assert_eq!(snapshot.pending, vec!["J1".to_string()]);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_optimistic_change_on_absent_record_is_not_pending() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.put(job_row("J1", "open", None));
        let sync = synchronizer(&backend);
        let _handle = sync.start(driver_open_tab()).await.unwrap();

        sync.apply_optimistic(&Mutation::Apply {
            id: "J9".to_string(),
            action: JobAction::Start,
        })
        .await;

        let snapshot = sync.snapshot().await;
        assert_eq!(ids(&snapshot), vec!["J1"]);
        assert!(snapshot.pending.is_empty());
    }
}
