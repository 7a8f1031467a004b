use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{
    Collection, Document, DocumentStore, FieldUpdate, Precondition, Query, Snapshot, StoreError,
    Subscription, WriteBatch, WriteOp,
};

type Collections = HashMap<Collection, BTreeMap<String, Document>>;

const CHANGE_CHANNEL_CAPACITY: usize = 64;
const SUBSCRIPTION_BUFFER: usize = 16;

/// In-process document store with atomic batches and live queries.
///
/// One mutex guards every collection, so a commit is serialized against all other reads
/// and writes. Batches are staged on a copy of the state and swapped in only after every
/// precondition and operation succeeds.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    state: Arc<Mutex<Collections>>,
    changes: broadcast::Sender<Collection>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            changes,
        }
    }
}

impl std::fmt::Debug for MemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocumentStore").finish_non_exhaustive()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    pub fn count(&self, collection: Collection) -> usize {
        self.state
            .lock()
            .map(|state| state.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("document store lock poisoned".to_string()))
    }

    fn publish<I: IntoIterator<Item = Collection>>(&self, collections: I) {
        for collection in collections {
            // No receivers simply means nobody is subscribed.
            let _ = self.changes.send(collection);
        }
    }
}

fn snapshot(state: &Mutex<Collections>, query: &Query) -> Snapshot {
    let state = state
        .lock()
        .map_err(|_| StoreError::Unavailable("document store lock poisoned".to_string()))?;
    Ok(run_query(&state, query))
}

fn run_query(state: &Collections, query: &Query) -> Vec<Document> {
    match state.get(&query.collection) {
        Some(documents) => query.apply(documents.values()),
        None => Vec::new(),
    }
}

fn check(state: &Collections, precondition: &Precondition) -> Result<(), StoreError> {
    match precondition {
        Precondition::Exists { collection, id } => {
            let exists = state
                .get(collection)
                .is_some_and(|documents| documents.contains_key(id));
            if exists {
                Ok(())
            } else {
                Err(StoreError::PreconditionFailed(format!(
                    "{collection} document '{id}' does not exist"
                )))
            }
        }
        Precondition::FieldEquals {
            collection,
            id,
            field,
            value,
        } => {
            let document = state
                .get(collection)
                .and_then(|documents| documents.get(id))
                .ok_or_else(|| {
                    StoreError::PreconditionFailed(format!(
                        "{collection} document '{id}' does not exist"
                    ))
                })?;
            if document.get(field) == Some(value) {
                Ok(())
            } else {
                Err(StoreError::PreconditionFailed(format!(
                    "{collection} document '{id}' no longer has {field} = {value}"
                )))
            }
        }
        Precondition::NoMatch(query) => {
            let conflict = state
                .get(&query.collection)
                .is_some_and(|documents| documents.values().any(|document| query.matches(document)));
            if conflict {
                Err(StoreError::PreconditionFailed(format!(
                    "a conflicting {} document exists",
                    query.collection
                )))
            } else {
                Ok(())
            }
        }
    }
}

fn apply(state: &mut Collections, operation: WriteOp) -> Result<(), StoreError> {
    match operation {
        WriteOp::Create {
            collection,
            id,
            document,
        } => {
            let documents = state.entry(collection).or_default();
            if documents.contains_key(&id) {
                return Err(StoreError::AlreadyExists { collection, id });
            }
            documents.insert(id, document);
        }
        WriteOp::Set {
            collection,
            id,
            document,
        } => {
            state.entry(collection).or_default().insert(id, document);
        }
        WriteOp::Update {
            collection,
            id,
            fields,
        } => {
            let Some(document) = state
                .get_mut(&collection)
                .and_then(|documents| documents.get_mut(&id))
            else {
                return Err(StoreError::NotFound { collection, id });
            };
            for field in &fields {
                field.apply(document);
            }
        }
        WriteOp::Delete { collection, id } => {
            if let Some(documents) = state.get_mut(&collection) {
                documents.remove(&id);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .get(&collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let state = self.lock()?;
        Ok(run_query(&state, query))
    }

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.set(collection, id, document);
        self.commit(batch).await
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.update(collection, id, fields);
        self.commit(batch).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, id);
        self.commit(batch).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let (preconditions, operations) = batch.into_parts();
        let touched: BTreeSet<Collection> = operations.iter().map(WriteOp::collection).collect();

        {
            let mut state = self.lock()?;
            for precondition in &preconditions {
                check(&state, precondition)?;
            }

            let mut staged = (*state).clone();
            for operation in operations {
                apply(&mut staged, operation)?;
            }
            *state = staged;
        }

        self.publish(touched);
        Ok(())
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        // Subscribe to changes before taking the first snapshot so no write slips between.
        let mut changes = self.changes.subscribe();
        let state = Arc::clone(&self.state);

        let listener = tokio::spawn(async move {
            loop {
                let current = snapshot(&state, &query);
                if sender.send(current).await.is_err() {
                    return;
                }

                loop {
                    match changes.recv().await {
                        Ok(collection) if collection == query.collection => break,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => break,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });

        Ok(Subscription::new(receiver, listener))
    }
}
