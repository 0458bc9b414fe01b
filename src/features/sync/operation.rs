//! Operation types for the offline queue.
//!
//! A [`PendingOperation`] is the durable record of one mutating action that
//! has not reached the backend yet. Every operation belongs to exactly one
//! [`Partition`], derived from the entity its endpoint targets.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StudySyncError;
use crate::remote::{ApiRequest, HttpMethod};

/// Length of the random suffix in generated operation ids.
const ID_SUFFIX_LEN: usize = 6;

/// Kind of mutation a queued operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Insert a new record
    Create,
    /// Modify an existing record
    Update,
    /// Remove an existing record
    Delete,
}

impl OperationType {
    /// Get the display name for this operation type.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// HTTP method used to replay this operation.
    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        match self {
            Self::Create => HttpMethod::Post,
            Self::Update => HttpMethod::Patch,
            Self::Delete => HttpMethod::Delete,
        }
    }

    /// Whether the replayed request carries a body.
    #[must_use]
    pub const fn carries_body(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = StudySyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(StudySyncError::InvalidInput(format!(
                "Unknown operation type: {other}"
            ))),
        }
    }
}

/// Entity kinds managed by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Routine,
    Course,
    Teacher,
}

impl EntityKind {
    /// All entity kinds.
    pub const ALL: [Self; 4] = [Self::Task, Self::Routine, Self::Course, Self::Teacher];

    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Routine => "routine",
            Self::Course => "course",
            Self::Teacher => "teacher",
        }
    }

    /// Collection endpoint, e.g. `/tasks`.
    #[must_use]
    pub const fn collection(&self) -> &'static str {
        match self {
            Self::Task => "/tasks",
            Self::Routine => "/routines",
            Self::Course => "/courses",
            Self::Teacher => "/teachers",
        }
    }

    /// Instance endpoint, e.g. `/tasks/42`.
    #[must_use]
    pub fn instance(&self, id: &str) -> String {
        format!("{}/{}", self.collection(), id.trim_matches('/'))
    }

    /// Queue partition holding this entity's operations.
    #[must_use]
    pub const fn partition(&self) -> Partition {
        match self {
            Self::Task => Partition::Tasks,
            Self::Routine => Partition::Routines,
            Self::Course | Self::Teacher => Partition::Courses,
        }
    }

    fn from_collection(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.collection().trim_start_matches('/') == segment)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = StudySyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| StudySyncError::InvalidInput(format!("Unknown entity kind: {s}")))
    }
}

/// A resolved endpoint: which entity, and which instance if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub entity: EntityKind,
    pub instance: Option<String>,
}

impl Endpoint {
    /// Parse `/tasks` or `/tasks/<id>`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unknown collections or nested paths.
    pub fn parse(endpoint: &str) -> Result<Self, StudySyncError> {
        let segments: Vec<&str> = endpoint
            .trim()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let invalid = || StudySyncError::InvalidInput(format!("Unsupported endpoint: {endpoint}"));

        match segments.as_slice() {
            [collection] => Ok(Self {
                entity: EntityKind::from_collection(collection).ok_or_else(invalid)?,
                instance: None,
            }),
            [collection, id] => Ok(Self {
                entity: EntityKind::from_collection(collection).ok_or_else(invalid)?,
                instance: Some((*id).to_string()),
            }),
            _ => Err(invalid()),
        }
    }
}

/// A named subdivision of the queue store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Tasks,
    Routines,
    /// Courses and teachers share a partition.
    Courses,
}

impl Partition {
    /// All partitions.
    pub const ALL: [Self; 3] = [Self::Tasks, Self::Routines, Self::Courses];

    /// Storage representation and completion category label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Routines => "routines",
            Self::Courses => "courses",
        }
    }

    /// Category label carried by background-sync completion messages.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        self.as_str()
    }

    /// Background-sync registration tag.
    #[must_use]
    pub const fn sync_tag(&self) -> &'static str {
        match self {
            Self::Tasks => "sync-tasks",
            Self::Routines => "sync-routines",
            Self::Courses => "sync-courses",
        }
    }

    /// Resolve a background-sync tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.sync_tag() == tag)
    }

    /// Resolve a completion category label.
    #[must_use]
    pub fn from_category(category: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.category() == category)
    }

    /// Whether operations for `entity` live in this partition.
    #[must_use]
    pub fn holds(&self, entity: EntityKind) -> bool {
        entity.partition() == *self
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Partition {
    type Err = StudySyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .or_else(|| EntityKind::from_str(&lower).ok().map(|e| e.partition()))
            .ok_or_else(|| StudySyncError::InvalidInput(format!("Unknown partition: {s}")))
    }
}

/// A durable record of one unsynchronized user intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique id: `<entity>-<unix millis>-<random suffix>`
    pub id: String,
    /// Mutation kind
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Target resource, e.g. `/tasks` or `/tasks/42`
    pub endpoint: String,
    /// Request body; always `None` for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// When the intent was captured
    pub timestamp: DateTime<Utc>,
    /// Owner of the operation
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Entity targeted by `endpoint`
    pub entity: EntityKind,
    /// Failed replay attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Most recent replay error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Build a new operation, validating the endpoint against the type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the endpoint is unknown, when a create
    /// targets an instance, when an update/delete targets a collection, or
    /// when a create/update has no payload.
    pub fn new(
        op_type: OperationType,
        endpoint: &str,
        payload: Option<Value>,
        user_id: &str,
    ) -> Result<Self, StudySyncError> {
        let target = Endpoint::parse(endpoint)?;

        match (op_type, &target.instance) {
            (OperationType::Create, Some(_)) => {
                return Err(StudySyncError::InvalidInput(format!(
                    "create must target a collection endpoint, got {endpoint}"
                )));
            },
            (OperationType::Update | OperationType::Delete, None) => {
                return Err(StudySyncError::InvalidInput(format!(
                    "{op_type} must target an instance endpoint, got {endpoint}"
                )));
            },
            _ => {},
        }

        let payload = if op_type.carries_body() {
            match payload {
                Some(Value::Null) | None => {
                    return Err(StudySyncError::InvalidInput(format!(
                        "{op_type} requires a payload"
                    )));
                },
                Some(value) => Some(value),
            }
        } else {
            None
        };

        let timestamp = Utc::now();
        let endpoint = match &target.instance {
            Some(id) => target.entity.instance(id),
            None => target.entity.collection().to_string(),
        };

        Ok(Self {
            id: generate_id(target.entity, timestamp),
            op_type,
            endpoint,
            payload,
            timestamp,
            user_id: user_id.to_string(),
            entity: target.entity,
            attempts: 0,
            last_error: None,
        })
    }

    /// Partition this operation is stored in.
    #[must_use]
    pub const fn partition(&self) -> Partition {
        self.entity.partition()
    }

    /// Instance endpoint for updates and deletes.
    ///
    /// Operations sharing a target key must be replayed in order.
    #[must_use]
    pub fn target_key(&self) -> Option<&str> {
        match self.op_type {
            OperationType::Create => None,
            OperationType::Update | OperationType::Delete => Some(&self.endpoint),
        }
    }

    /// Build the network request that replays this operation.
    #[must_use]
    pub fn to_request(&self) -> ApiRequest {
        ApiRequest {
            method: self.op_type.method(),
            endpoint: self.endpoint.clone(),
            body: if self.op_type.carries_body() {
                self.payload.clone()
            } else {
                None
            },
            idempotency_key: self.id.clone(),
        }
    }
}

/// Generate a fresh operation id.
#[must_use]
pub fn generate_id(entity: EntityKind, timestamp: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}-{}-{}", entity, timestamp.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_type_methods() {
        assert_eq!(OperationType::Create.method(), HttpMethod::Post);
        assert_eq!(OperationType::Update.method(), HttpMethod::Patch);
        assert_eq!(OperationType::Delete.method(), HttpMethod::Delete);
        assert!(!OperationType::Delete.carries_body());
    }

    #[test]
    fn test_endpoint_parse() {
        let collection = Endpoint::parse("/tasks").unwrap();
        assert_eq!(collection.entity, EntityKind::Task);
        assert!(collection.instance.is_none());

        let instance = Endpoint::parse("teachers/17/").unwrap();
        assert_eq!(instance.entity, EntityKind::Teacher);
        assert_eq!(instance.instance.as_deref(), Some("17"));

        assert!(Endpoint::parse("/grades").is_err());
        assert!(Endpoint::parse("/tasks/1/comments").is_err());
        assert!(Endpoint::parse("").is_err());
    }

    #[test]
    fn test_partitions() {
        assert_eq!(EntityKind::Course.partition(), Partition::Courses);
        assert_eq!(EntityKind::Teacher.partition(), Partition::Courses);
        assert_eq!(Partition::from_tag("sync-routines"), Some(Partition::Routines));
        assert_eq!(Partition::from_category("courses"), Some(Partition::Courses));
        assert_eq!(Partition::from_tag("sync-grades"), None);
        assert_eq!("teacher".parse::<Partition>().unwrap(), Partition::Courses);
    }

    #[test]
    fn test_new_create_operation() {
        let op =
            PendingOperation::new(OperationType::Create, "/tasks", Some(json!({"name": "X"})), "alice")
                .unwrap();

        assert_eq!(op.entity, EntityKind::Task);
        assert_eq!(op.partition(), Partition::Tasks);
        assert_eq!(op.user_id, "alice");
        assert!(op.id.starts_with("task-"));
        assert_eq!(op.id.rsplit('-').next().unwrap().len(), ID_SUFFIX_LEN);
        assert!(op.target_key().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PendingOperation::new(OperationType::Delete, "/tasks/1", None, "alice").unwrap();
        let b = PendingOperation::new(OperationType::Delete, "/tasks/1", None, "alice").unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_delete_drops_payload() {
        let op = PendingOperation::new(
            OperationType::Delete,
            "/routines/5",
            Some(json!({"ignored": true})),
            "alice",
        )
        .unwrap();

        assert!(op.payload.is_none());
        assert_eq!(op.target_key(), Some("/routines/5"));

        let request = op.to_request();
        assert_eq!(request.method, HttpMethod::Delete);
        assert!(request.body.is_none());
        assert_eq!(request.idempotency_key, op.id);
    }

    #[test]
    fn test_invalid_operations() {
        assert!(PendingOperation::new(OperationType::Create, "/tasks/3", Some(json!({})), "a").is_err());
        assert!(PendingOperation::new(OperationType::Update, "/tasks", Some(json!({})), "a").is_err());
        assert!(PendingOperation::new(OperationType::Update, "/tasks/3", None, "a").is_err());
    }

    #[test]
    fn test_serialization_field_names() {
        let op = PendingOperation::new(
            OperationType::Update,
            "/courses/cs101",
            Some(json!({"title": "Algorithms"})),
            "bob",
        )
        .unwrap();

        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["userId"], "bob");
        assert_eq!(value["endpoint"], "/courses/cs101");
        assert!(value.get("last_error").is_none());
    }
}
