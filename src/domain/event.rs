//! Change Events
//!
//! Typed records for the source queue (`ChangeEvent`), the central audit log
//! (`RelayedEvent`) and the notification payload (`ChangeNotice`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of schema change, derived from the captured event type
/// (`CREATE_TABLE`, `ALTER_VIEW`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DdlOperation {
    Create,
    Alter,
    Drop,
    Other,
}

impl DdlOperation {
    /// Classify a captured event type by its leading verb
    pub fn from_event_type(event_type: &str) -> Self {
        let verb = event_type
            .trim()
            .split(|c: char| c == '_' || c.is_whitespace())
            .next()
            .unwrap_or_default();

        match verb.to_ascii_uppercase().as_str() {
            "CREATE" => DdlOperation::Create,
            "ALTER" => DdlOperation::Alter,
            "DROP" => DdlOperation::Drop,
            _ => DdlOperation::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DdlOperation::Create => "CREATE",
            DdlOperation::Alter => "ALTER",
            DdlOperation::Drop => "DROP",
            DdlOperation::Other => "DDL",
        }
    }
}

impl std::fmt::Display for DdlOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A schema change as written by the capture mechanism.
///
/// The relay never creates these itself; the type exists so that test
/// fixtures and the queue seeding tool write the same shape the trigger does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedChange {
    pub event_type: String,
    pub object_type: String,
    pub object_name: String,
    pub schema_name: Option<String>,
    pub ddl_statement: Option<String>,
    pub event_data: Option<serde_json::Value>,
    pub login_name: Option<String>,
    pub user_name: Option<String>,
    pub host_name: Option<String>,
    pub application_name: Option<String>,
    pub spid: Option<i32>,
    pub start_time: DateTime<Utc>,
}

impl CapturedChange {
    /// Create a captured change with the current time as start time
    pub fn new(event_type: &str, object_type: &str, object_name: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            object_type: object_type.to_string(),
            object_name: object_name.to_string(),
            schema_name: None,
            ddl_statement: None,
            event_data: None,
            login_name: None,
            user_name: None,
            host_name: None,
            application_name: None,
            spid: None,
            start_time: Utc::now(),
        }
    }

    pub fn with_schema(mut self, schema_name: &str) -> Self {
        self.schema_name = Some(schema_name.to_string());
        self
    }

    pub fn with_statement(mut self, ddl_statement: &str) -> Self {
        self.ddl_statement = Some(ddl_statement.to_string());
        self
    }

    pub fn with_event_data(mut self, event_data: serde_json::Value) -> Self {
        self.event_data = Some(event_data);
        self
    }

    pub fn with_principal(mut self, login_name: &str, user_name: &str, host_name: &str) -> Self {
        self.login_name = Some(login_name.to_string());
        self.user_name = Some(user_name.to_string());
        self.host_name = Some(host_name.to_string());
        self
    }

    pub fn with_application(mut self, application_name: &str, spid: i32) -> Self {
        self.application_name = Some(application_name.to_string());
        self.spid = Some(spid);
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }
}

/// Unprocessed event read from a source store's queue table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    /// Queue sequence id, unique within its source store
    pub id: i64,
    pub database_name: String,
    pub server_name: String,
    pub schema_name: Option<String>,
    pub object_name: String,
    pub object_type: String,
    pub event_type: String,
    pub ddl_statement: Option<String>,
    pub event_data: Option<serde_json::Value>,
    pub login_name: Option<String>,
    pub user_name: Option<String>,
    pub host_name: Option<String>,
    pub application_name: Option<String>,
    pub spid: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Failed relay attempts; NULL in storage reads as 0
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn operation(&self) -> DdlOperation {
        DdlOperation::from_event_type(&self.event_type)
    }

    /// `schema.object`, or just the object when no schema was captured
    pub fn qualified_name(&self) -> String {
        qualify(self.schema_name.as_deref(), &self.object_name)
    }
}

/// Append-only copy of a `ChangeEvent` in the central store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayedEvent {
    pub source_event_id: i64,
    pub database_name: String,
    pub server_name: String,
    pub schema_name: Option<String>,
    pub object_name: String,
    pub object_type: String,
    pub event_type: String,
    pub ddl_statement: Option<String>,
    pub event_data: Option<serde_json::Value>,
    pub login_name: Option<String>,
    pub user_name: Option<String>,
    pub host_name: Option<String>,
    pub application_name: Option<String>,
    pub spid: Option<i32>,
    pub start_time: DateTime<Utc>,
    pub source_created_at: DateTime<Utc>,
    /// Always 0: a relayed copy starts with no failed attempts
    pub retry_count: i32,
    /// Always `None` on a relayed copy
    pub error_message: Option<String>,
    /// Dedup key for downstream consumers; not unique in storage
    pub natural_key: String,
    pub relayed_at: DateTime<Utc>,
}

impl RelayedEvent {
    /// Copy a source event and attach provenance
    pub fn from_change(event: &ChangeEvent, relayed_at: DateTime<Utc>) -> Self {
        Self {
            source_event_id: event.id,
            database_name: event.database_name.clone(),
            server_name: event.server_name.clone(),
            schema_name: event.schema_name.clone(),
            object_name: event.object_name.clone(),
            object_type: event.object_type.clone(),
            event_type: event.event_type.clone(),
            ddl_statement: event.ddl_statement.clone(),
            event_data: event.event_data.clone(),
            login_name: event.login_name.clone(),
            user_name: event.user_name.clone(),
            host_name: event.host_name.clone(),
            application_name: event.application_name.clone(),
            spid: event.spid,
            start_time: event.start_time,
            source_created_at: event.created_at,
            retry_count: 0,
            error_message: None,
            natural_key: natural_key(&event.database_name, event.id, event.start_time),
            relayed_at,
        }
    }
}

/// Hex SHA-256 over source database, source id and capture time.
///
/// Two relays of the same source event produce the same key.
pub fn natural_key(database_name: &str, source_event_id: i64, start_time: DateTime<Utc>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(database_name.as_bytes());
    hasher.update(b"|");
    hasher.update(source_event_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(start_time.timestamp_micros().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Payload handed to the notification sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotice {
    pub id: i64,
    pub database_name: String,
    pub server_name: String,
    pub schema_name: Option<String>,
    pub object_name: String,
    pub object_type: String,
    pub ddl_operation: String,
    pub ddl_statement: Option<String>,
    pub login_name: Option<String>,
    pub user_name: Option<String>,
    pub host_name: Option<String>,
    pub start_time: DateTime<Utc>,
}

impl ChangeNotice {
    pub fn operation(&self) -> DdlOperation {
        DdlOperation::from_event_type(&self.ddl_operation)
    }

    pub fn qualified_name(&self) -> String {
        qualify(self.schema_name.as_deref(), &self.object_name)
    }

    /// Who made the change: user, else login, else "System"
    pub fn actor(&self) -> &str {
        self.user_name
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.login_name.as_deref().filter(|l| !l.is_empty()))
            .unwrap_or("System")
    }
}

impl From<&ChangeEvent> for ChangeNotice {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            id: event.id,
            database_name: event.database_name.clone(),
            server_name: event.server_name.clone(),
            schema_name: event.schema_name.clone(),
            object_name: event.object_name.clone(),
            object_type: event.object_type.clone(),
            ddl_operation: event.event_type.clone(),
            ddl_statement: event.ddl_statement.clone(),
            login_name: event.login_name.clone(),
            user_name: event.user_name.clone(),
            host_name: event.host_name.clone(),
            start_time: event.start_time,
        }
    }
}

fn qualify(schema_name: Option<&str>, object_name: &str) -> String {
    match schema_name.filter(|s| !s.is_empty()) {
        Some(schema) => format!("{}.{}", schema, object_name),
        None => object_name.to_string(),
    }
}
