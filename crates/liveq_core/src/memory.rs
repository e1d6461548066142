//! In-memory repository backend.
//!
//! The default zero-dependency backend: rows live in a shared vector
//! and every committed mutation is reported through the change
//! notifier. External database drivers plug in behind the same
//! [`Repository`] trait; this implementation also serves as their test
//! stand-in.

use crate::context::RequestContext;
use crate::error::{CoreError, CoreResult};
use crate::find::FindOptions;
use crate::notifier::ChangeNotifier;
use crate::repository::{EntityMeta, Repository, RepositoryProvider};
use liveq_protocol::{ChangeRecord, ItemId};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-context row post-processing.
///
/// Invoked on each row a `find` returns, with the caller's context.
/// Used for computed fields whose value depends on the requesting user.
pub type RowDecorator = Arc<dyn Fn(&mut Value, &RequestContext) + Send + Sync>;

/// An in-memory repository over API-JSON rows.
///
/// Rows are shared between context-bound views created with
/// [`for_context`](MemoryRepository::for_context), so server-side
/// mutations are visible to every view. Mutations notify the change
/// notifier only after the row vector has been updated.
#[derive(Clone)]
pub struct MemoryRepository {
    entity_key: String,
    id_field: String,
    rows: Arc<RwLock<Vec<Value>>>,
    notifier: Arc<ChangeNotifier>,
    context: RequestContext,
    decorator: Option<RowDecorator>,
}

impl MemoryRepository {
    /// Creates an empty repository with its own notifier and an
    /// anonymous context. The identifier field defaults to `"id"`.
    pub fn new(entity_key: impl Into<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
            id_field: "id".to_string(),
            rows: Arc::new(RwLock::new(Vec::new())),
            notifier: Arc::new(ChangeNotifier::new()),
            context: RequestContext::anonymous(),
            decorator: None,
        }
    }

    /// Uses a shared notifier instead of a private one.
    pub fn with_notifier(mut self, notifier: Arc<ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Changes the identifier field name.
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Installs a per-context row decorator.
    pub fn with_decorator(mut self, decorator: RowDecorator) -> Self {
        self.decorator = Some(decorator);
        self
    }

    /// Returns a view over the same rows bound to another caller.
    pub fn for_context(&self, context: RequestContext) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    /// Returns the notifier mutations are reported to.
    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    /// Inserts a row. Fails if a row with the same id exists.
    pub fn insert(&self, row: Value) -> CoreResult<Value> {
        self.insert_many(vec![row.clone()])?;
        Ok(row)
    }

    /// Inserts several rows as one operation, notifying once.
    pub fn insert_many(&self, rows: Vec<Value>) -> CoreResult<()> {
        let mut records = Vec::with_capacity(rows.len());
        {
            let mut stored = self.rows.write();
            for row in &rows {
                let id = self.raw_id(row)?;
                if stored.iter().any(|r| self.raw_id(r).ok() == Some(id.clone())) {
                    return Err(CoreError::DuplicateId(id));
                }
                records.push(ChangeRecord::insert(id));
            }
            stored.extend(rows);
        }
        self.notifier.notify(&self.entity_key, &records);
        Ok(())
    }

    /// Replaces the row currently identified by `id` with `row`.
    ///
    /// The replacement may carry a different identifier; the change
    /// record then reports the rename through `old_id`.
    pub fn update(&self, id: &ItemId, row: Value) -> CoreResult<Value> {
        let new_id = self.raw_id(&row)?;
        {
            let mut stored = self.rows.write();
            let position = stored
                .iter()
                .position(|r| self.raw_id(r).ok() == Some(id.clone()))
                .ok_or_else(|| CoreError::RowNotFound(id.clone()))?;
            stored[position] = row.clone();
        }
        self.notifier.notify(
            &self.entity_key,
            &[ChangeRecord::update(new_id, id.clone())],
        );
        Ok(row)
    }

    /// Deletes the row identified by `id`.
    pub fn delete(&self, id: &ItemId) -> CoreResult<()> {
        {
            let mut stored = self.rows.write();
            let position = stored
                .iter()
                .position(|r| self.raw_id(r).ok() == Some(id.clone()))
                .ok_or_else(|| CoreError::RowNotFound(id.clone()))?;
            stored.remove(position);
        }
        self.notifier
            .notify(&self.entity_key, &[ChangeRecord::delete(id.clone())]);
        Ok(())
    }

    /// Returns the row with the given id, undecorated.
    pub fn find_by_id(&self, id: &ItemId) -> Option<Value> {
        self.rows
            .read()
            .iter()
            .find(|r| self.raw_id(r).ok() == Some(id.clone()))
            .cloned()
    }

    /// Returns the number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn raw_id(&self, row: &Value) -> CoreResult<ItemId> {
        row.get(&self.id_field)
            .and_then(ItemId::from_value)
            .ok_or_else(|| CoreError::missing_id(&self.id_field))
    }
}

impl EntityMeta for MemoryRepository {
    fn entity_key(&self) -> &str {
        &self.entity_key
    }

    fn row_id(&self, row: &Value) -> CoreResult<ItemId> {
        self.raw_id(row)
    }
}

impl Repository for MemoryRepository {
    fn find(&self, options: &FindOptions) -> CoreResult<Vec<Value>> {
        let mut rows: Vec<Value> = self
            .rows
            .read()
            .iter()
            .filter(|r| options.matches(r))
            .cloned()
            .collect();
        options.sort_rows(&mut rows);
        if let Some(limit) = options.limit {
            rows.truncate(limit);
        }
        if let Some(decorator) = &self.decorator {
            for row in &mut rows {
                decorator(row, &self.context);
            }
        }
        Ok(rows)
    }
}

/// Resolves in-memory repositories by entity key.
#[derive(Default)]
pub struct MemoryRepositoryProvider {
    repositories: RwLock<HashMap<String, MemoryRepository>>,
}

impl MemoryRepositoryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a repository under its entity key.
    pub fn register(&self, repository: MemoryRepository) {
        self.repositories
            .write()
            .insert(repository.entity_key().to_string(), repository);
    }
}

impl RepositoryProvider for MemoryRepositoryProvider {
    fn resolve(&self, entity_key: &str, request_json: &Value) -> CoreResult<Arc<dyn Repository>> {
        let repository = self
            .repositories
            .read()
            .get(entity_key)
            .cloned()
            .ok_or_else(|| CoreError::UnknownEntity(entity_key.to_string()))?;
        let context = RequestContext::from_json(request_json)?;
        Ok(Arc::new(repository.for_context(context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::ChangesListener;
    use liveq_protocol::ChangeKind;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Capture {
        seen: Mutex<Vec<(String, Vec<ChangeRecord>)>>,
    }

    impl ChangesListener for Capture {
        fn item_changed(&self, entity_key: &str, changes: &[ChangeRecord]) {
            self.seen
                .lock()
                .push((entity_key.to_string(), changes.to_vec()));
        }
    }

    fn observed_repo() -> (MemoryRepository, Arc<Capture>) {
        let repo = MemoryRepository::new("tasks");
        let capture = Arc::new(Capture::default());
        repo.notifier().set_listener(capture.clone());
        (repo, capture)
    }

    #[test]
    fn insert_notifies_once_per_row() {
        let (repo, capture) = observed_repo();
        repo.insert_many(vec![
            json!({"id": 1, "title": "a"}),
            json!({"id": 2, "title": "b"}),
        ])
        .unwrap();

        let seen = capture.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1.len(), 2);
        assert!(seen[0].1.iter().all(|c| c.kind == ChangeKind::Insert));
    }

    #[test]
    fn duplicate_insert_fails_and_does_not_notify() {
        let (repo, capture) = observed_repo();
        repo.insert(json!({"id": 1})).unwrap();
        capture.seen.lock().clear();

        let result = repo.insert(json!({"id": 1}));
        assert!(matches!(result, Err(CoreError::DuplicateId(_))));
        assert!(capture.seen.lock().is_empty());
    }

    #[test]
    fn update_reports_previous_id() {
        let (repo, capture) = observed_repo();
        repo.insert(json!({"id": 1, "title": "noam"})).unwrap();
        capture.seen.lock().clear();

        repo.update(&ItemId::Int(1), json!({"id": 99, "title": "noam"}))
            .unwrap();

        let seen = capture.seen.lock();
        let record = &seen[0].1[0];
        assert_eq!(record.id, ItemId::Int(99));
        assert_eq!(record.old_id, Some(ItemId::Int(1)));
        assert!(record.renamed());
        assert!(repo.find_by_id(&ItemId::Int(99)).is_some());
        assert!(repo.find_by_id(&ItemId::Int(1)).is_none());
    }

    #[test]
    fn delete_notifies_after_removal() {
        let (repo, capture) = observed_repo();
        repo.insert(json!({"id": 1})).unwrap();
        capture.seen.lock().clear();

        repo.delete(&ItemId::Int(1)).unwrap();
        assert!(repo.is_empty());
        assert_eq!(capture.seen.lock()[0].1[0].kind, ChangeKind::Delete);
    }

    #[test]
    fn failed_mutation_produces_no_record() {
        let (repo, capture) = observed_repo();
        assert!(repo.delete(&ItemId::Int(404)).is_err());
        assert!(repo
            .update(&ItemId::Int(404), json!({"id": 404}))
            .is_err());
        assert!(capture.seen.lock().is_empty());
    }

    #[test]
    fn find_applies_filter_sort_and_limit() {
        let repo = MemoryRepository::new("tasks");
        repo.insert_many(vec![
            json!({"id": 1, "done": false, "title": "c"}),
            json!({"id": 2, "done": true, "title": "a"}),
            json!({"id": 3, "done": false, "title": "b"}),
            json!({"id": 4, "done": false, "title": "a"}),
        ])
        .unwrap();

        let options = FindOptions::new()
            .with_filter("done", json!(false))
            .with_order_by("title")
            .with_limit(2);
        let rows = repo.find(&options).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 4);
        assert_eq!(rows[1]["id"], 3);
    }

    #[test]
    fn decorator_sees_caller_context() {
        let repo = MemoryRepository::new("tasks").with_decorator(Arc::new(|row, context| {
            row["seenBy"] = json!(context.user_id.clone().unwrap_or_default());
        }));
        repo.insert(json!({"id": 1})).unwrap();

        let view = repo.for_context(RequestContext::for_user("client1"));
        let rows = view.find(&FindOptions::new()).unwrap();
        assert_eq!(rows[0]["seenBy"], "client1");
    }

    #[test]
    fn provider_binds_context() {
        let provider = MemoryRepositoryProvider::new();
        let repo = MemoryRepository::new("tasks").with_decorator(Arc::new(|row, context| {
            row["seenBy"] = json!(context.user_id.clone().unwrap_or_default());
        }));
        repo.insert(json!({"id": 1})).unwrap();
        provider.register(repo);

        let request = RequestContext::for_user("u2").to_json().unwrap();
        let resolved = provider.resolve("tasks", &request).unwrap();
        let rows = resolved.find(&FindOptions::new()).unwrap();
        assert_eq!(rows[0]["seenBy"], "u2");

        assert!(provider.resolve("nope", &request).is_err());
    }
}
