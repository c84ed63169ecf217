//! Webhook message layout (Discord-compatible embeds)

use chrono::Utc;
use serde::Serialize;

use crate::domain::{ChangeNotice, DdlOperation};

/// Statements longer than this are not shown in the message
pub const MAX_STATEMENT_LEN: usize = 1000;

/// Longest system error text shown in the message
pub const MAX_ERROR_LEN: usize = 1000;

const COLOR_CREATE: u32 = 0x00FF00;
const COLOR_ALTER: u32 = 0xFFFF00;
const COLOR_DROP: u32 = 0xFF0000;
const COLOR_INFO: u32 = 0x0099FF;

pub const CHANGE_USERNAME: &str = "Schema DDL Auditor";
pub const SYSTEM_USERNAME: &str = "Schema DDL Auditor - System";
const FOOTER_SYSTEM: &str = "Schema DDL Relay";

/// Body posted to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub username: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    pub footer: EmbedFooter,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

fn field(name: &str, value: impl Into<String>, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.into(),
        inline,
    }
}

/// Colour and title tag for an operation
pub fn operation_style(operation: DdlOperation) -> (u32, &'static str) {
    match operation {
        DdlOperation::Create => (COLOR_CREATE, "[CREATE]"),
        DdlOperation::Alter => (COLOR_ALTER, "[ALTER]"),
        DdlOperation::Drop => (COLOR_DROP, "[DROP]"),
        DdlOperation::Other => (COLOR_INFO, "[DDL]"),
    }
}

/// Embed for one relayed schema change
pub fn change_embed(change: &ChangeNotice) -> Embed {
    let (color, tag) = operation_style(change.operation());
    let object = if change.object_type.is_empty() {
        "OBJECT"
    } else {
        change.object_type.as_str()
    };

    let mut fields = vec![
        field("User", change.actor(), true),
        field(
            "Date/Time",
            change.start_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            true,
        ),
        field("Database", change.database_name.clone(), true),
    ];

    if let Some(host) = change.host_name.as_deref().filter(|h| !h.is_empty()) {
        fields.push(field("Host", host, true));
    }

    if let Some(statement) = change.ddl_statement.as_deref() {
        let value = if statement.chars().count() <= MAX_STATEMENT_LEN {
            format!("```sql\n{}\n```", statement)
        } else {
            "Statement too long to display".to_string()
        };
        fields.push(field("SQL Statement", value, false));
    }

    Embed {
        title: format!(
            "{} {} {} - {}",
            tag, change.ddl_operation, object, change.database_name
        ),
        description: Some(format!(
            "**{}** `{}`",
            change.object_type,
            change.qualified_name()
        )),
        color,
        timestamp: change.start_time.to_rfc3339(),
        fields,
        footer: EmbedFooter {
            text: format!("Server: {}", change.server_name),
        },
    }
}

/// Embed for a system status message
pub fn status_embed(status: &str, details: Option<&str>) -> Embed {
    let fields = details
        .map(|d| vec![field("Details", d, false)])
        .unwrap_or_default();

    Embed {
        title: "[STATUS] Schema DDL Relay".to_string(),
        description: Some(status.to_string()),
        color: COLOR_INFO,
        timestamp: Utc::now().to_rfc3339(),
        fields,
        footer: EmbedFooter {
            text: FOOTER_SYSTEM.to_string(),
        },
    }
}

/// Embed for a system-level error
pub fn error_embed(context: &str, error: &str) -> Embed {
    let error = if error.chars().count() > MAX_ERROR_LEN {
        let mut cut: String = error.chars().take(MAX_ERROR_LEN).collect();
        cut.push_str("...");
        cut
    } else {
        error.to_string()
    };

    Embed {
        title: "[ERROR] Schema DDL Relay".to_string(),
        description: Some(format!("**Context:** {}", context)),
        color: COLOR_DROP,
        timestamp: Utc::now().to_rfc3339(),
        fields: vec![field("Error", error, false)],
        footer: EmbedFooter {
            text: FOOTER_SYSTEM.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn notice(event_type: &str, statement: Option<String>) -> ChangeNotice {
        ChangeNotice {
            id: 1,
            database_name: "sales".to_string(),
            server_name: "db1".to_string(),
            schema_name: Some("public".to_string()),
            object_name: "orders".to_string(),
            object_type: "TABLE".to_string(),
            ddl_operation: event_type.to_string(),
            ddl_statement: statement,
            login_name: None,
            user_name: Some("alice".to_string()),
            host_name: None,
            start_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_change_embed_layout() {
        let embed = change_embed(&notice("CREATE_TABLE", Some("CREATE TABLE orders (id int)".to_string())));

        assert_eq!(embed.color, 0x00FF00);
        assert_eq!(embed.title, "[CREATE] CREATE_TABLE TABLE - sales");
        assert_eq!(embed.description.as_deref(), Some("**TABLE** `public.orders`"));
        assert_eq!(embed.footer.text, "Server: db1");
        assert_eq!(embed.fields[0].value, "alice");
        assert_eq!(embed.fields[1].value, "2026-03-01 12:30:00 UTC");

        let sql = embed.fields.iter().find(|f| f.name == "SQL Statement").unwrap();
        assert!(sql.value.starts_with("```sql\n"));
        assert!(!sql.inline);
    }

    #[test]
    fn test_long_statement_is_not_shown() {
        let embed = change_embed(&notice("DROP_TABLE", Some("x".repeat(MAX_STATEMENT_LEN + 1))));
        assert_eq!(embed.color, 0xFF0000);

        let sql = embed.fields.iter().find(|f| f.name == "SQL Statement").unwrap();
        assert_eq!(sql.value, "Statement too long to display");
    }

    #[test]
    fn test_missing_statement_has_no_field() {
        let embed = change_embed(&notice("ALTER_TABLE", None));
        assert_eq!(embed.color, 0xFFFF00);
        assert!(embed.fields.iter().all(|f| f.name != "SQL Statement"));
    }

    #[test]
    fn test_unknown_operation_uses_info_style() {
        assert_eq!(operation_style(DdlOperation::Other), (0x0099FF, "[DDL]"));
    }

    #[test]
    fn test_error_embed_truncates() {
        let embed = error_embed("startup", &"e".repeat(MAX_ERROR_LEN + 50));
        assert_eq!(embed.fields[0].value.chars().count(), MAX_ERROR_LEN + 3);
    }

    #[test]
    fn test_payload_serialization() {
        let payload = WebhookPayload {
            username: CHANGE_USERNAME.to_string(),
            embeds: vec![status_embed("System online", None)],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["embeds"][0]["color"], 0x0099FF);
        assert!(json["embeds"][0].get("fields").is_none());
    }
}
