//! Document store abstraction shared by every marketplace component.
//!
//! Records are persisted as field-name-keyed JSON maps. Multi-document writes go through
//! [`WriteBatch`], which a backing store must apply all-or-nothing: every precondition is
//! checked and every operation applied, or the store is left untouched.

mod memory;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use memory::MemoryDocumentStore;

/// A stored record: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Result delivered to subscribers each time the watched collection changes.
pub type Snapshot = Result<Vec<Document>, StoreError>;

/// Collections known to the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Jobs,
    Applications,
    ChatRooms,
    Messages,
    Notifications,
}

impl Collection {
    pub const fn name(self) -> &'static str {
        match self {
            Collection::Jobs => "jobs",
            Collection::Applications => "applications",
            Collection::ChatRooms => "chat_rooms",
            Collection::Messages => "messages",
            Collection::Notifications => "notifications",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Field predicate evaluated against a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equals { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Equals { field, value } => document.get(field).unwrap_or(&Value::Null) == value,
            Filter::In { field, values } => {
                let current = document.get(field).unwrap_or(&Value::Null);
                values.iter().any(|candidate| candidate == current)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Collection query: conjunctive filters, optional ordering, optional limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters.iter().all(|filter| filter.matches(document))
    }

    /// Filter, order, and truncate an in-memory document set.
    pub fn apply<'a, I>(&self, documents: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut selected: Vec<Document> = documents
            .into_iter()
            .filter(|document| self.matches(document))
            .cloned()
            .collect();

        if let Some(order) = &self.order {
            selected.sort_by(|left, right| {
                let left = left.get(&order.field).unwrap_or(&Value::Null);
                let right = right.get(&order.field).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right);
                match order.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }

        selected
    }
}

fn value_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub(crate) fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => {
            let left = left.as_f64().unwrap_or_default();
            let right = right.as_f64().unwrap_or_default();
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        }
        (Value::String(left), Value::String(right)) => left.cmp(right),
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        _ => value_rank(left).cmp(&value_rank(right)),
    }
}

/// Field mutation applied by an update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set { field: String, value: Value },
    /// Applied against the stored value at commit time, never read-modify-write by callers.
    Increment { field: String, by: i64 },
    /// Push onto the stored array at commit time, creating it when absent.
    Append { field: String, value: Value },
}

impl FieldUpdate {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldUpdate::Set {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn increment(field: impl Into<String>, by: i64) -> Self {
        FieldUpdate::Increment {
            field: field.into(),
            by,
        }
    }

    pub fn append(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldUpdate::Append {
            field: field.into(),
            value: value.into(),
        }
    }

    pub(crate) fn apply(&self, document: &mut Document) {
        match self {
            FieldUpdate::Set { field, value } => {
                document.insert(field.clone(), value.clone());
            }
            FieldUpdate::Increment { field, by } => {
                let current = document.get(field).and_then(Value::as_i64).unwrap_or(0);
                document.insert(field.clone(), Value::from(current + by));
            }
            FieldUpdate::Append { field, value } => match document.get_mut(field) {
                Some(Value::Array(items)) => items.push(value.clone()),
                _ => {
                    document.insert(field.clone(), Value::Array(vec![value.clone()]));
                }
            },
        }
    }
}

/// Condition checked against committed state before a batch is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Exists {
        collection: Collection,
        id: String,
    },
    FieldEquals {
        collection: Collection,
        id: String,
        field: String,
        value: Value,
    },
    NoMatch(Query),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Fails with [`StoreError::AlreadyExists`] when the id is taken.
    Create {
        collection: Collection,
        id: String,
        document: Document,
    },
    Set {
        collection: Collection,
        id: String,
        document: Document,
    },
    /// Fails with [`StoreError::NotFound`] when the document is missing.
    Update {
        collection: Collection,
        id: String,
        fields: Vec<FieldUpdate>,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> Collection {
        match self {
            WriteOp::Create { collection, .. }
            | WriteOp::Set { collection, .. }
            | WriteOp::Update { collection, .. }
            | WriteOp::Delete { collection, .. } => *collection,
        }
    }
}

/// Queued multi-document write, committed atomically by [`DocumentStore::commit`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    preconditions: Vec<Precondition>,
    operations: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_exists(&mut self, collection: Collection, id: impl Into<String>) -> &mut Self {
        self.preconditions.push(Precondition::Exists {
            collection,
            id: id.into(),
        });
        self
    }

    pub fn require_field(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.preconditions.push(Precondition::FieldEquals {
            collection,
            id: id.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn require_no_match(&mut self, query: Query) -> &mut Self {
        self.preconditions.push(Precondition::NoMatch(query));
        self
    }

    pub fn create(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
        document: Document,
    ) -> &mut Self {
        self.operations.push(WriteOp::Create {
            collection,
            id: id.into(),
            document,
        });
        self
    }

    pub fn set(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
        document: Document,
    ) -> &mut Self {
        self.operations.push(WriteOp::Set {
            collection,
            id: id.into(),
            document,
        });
        self
    }

    pub fn update(
        &mut self,
        collection: Collection,
        id: impl Into<String>,
        fields: Vec<FieldUpdate>,
    ) -> &mut Self {
        self.operations.push(WriteOp::Update {
            collection,
            id: id.into(),
            fields,
        });
        self
    }

    pub fn delete(&mut self, collection: Collection, id: impl Into<String>) -> &mut Self {
        self.operations.push(WriteOp::Delete {
            collection,
            id: id.into(),
        });
        self
    }

    pub fn operations(&self) -> &[WriteOp] {
        &self.operations
    }

    pub fn into_parts(self) -> (Vec<Precondition>, Vec<WriteOp>) {
        (self.preconditions, self.operations)
    }
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{collection} document '{id}' not found")]
    NotFound { collection: Collection, id: String },
    #[error("{collection} document '{id}' already exists")]
    AlreadyExists { collection: Collection, id: String },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("document codec error: {0}")]
    Codec(String),
}

/// Live query handle. Dropping it cancels the background listener.
pub struct Subscription {
    receiver: mpsc::Receiver<Snapshot>,
    listener: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Snapshot>, listener: JoinHandle<()>) -> Self {
        Self {
            receiver,
            listener: Some(listener),
        }
    }

    /// Wrap a channel fed by an adapter that owns its own listener lifecycle.
    pub fn from_receiver(receiver: mpsc::Receiver<Snapshot>) -> Self {
        Self {
            receiver,
            listener: None,
        }
    }

    /// Wait for the next snapshot; `None` once the source has shut down.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.recv().await
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("listening", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

/// Storage abstraction so the marketplace services can be exercised in isolation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    async fn set(
        &self,
        collection: Collection,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError>;

    /// Apply every queued operation, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Emit the current result of `query`, then a fresh result after each change.
    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;

    fn batch(&self) -> WriteBatch {
        WriteBatch::new()
    }
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value).map_err(|err| StoreError::Codec(err.to_string()))? {
        Value::Object(document) => Ok(document),
        other => Err(StoreError::Codec(format!(
            "expected a JSON object, found {other}"
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(document)).map_err(|err| StoreError::Codec(err.to_string()))
}

pub fn decode_all<T: DeserializeOwned>(documents: Vec<Document>) -> Result<Vec<T>, StoreError> {
    documents.into_iter().map(from_document).collect()
}
