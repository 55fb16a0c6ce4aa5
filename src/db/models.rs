/// Database models shared by the stores
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum UserRole {
    Customer,
    Provider,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Provider => "provider",
        }
    }
}

/// Account record
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// Session record backing a bearer access token
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Public short identifier of a provider
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    pub identifier: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
}

/// Single-use chat token
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatToken {
    pub token: String,
    pub provider_identifier: String,
    pub user_id: Option<String>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Closed,
}

/// Customer/provider dialogue with denormalized list-view fields
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub customer_id: String,
    pub provider_id: String,
    pub case_id: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub status: ConversationStatus,
    pub customer_unread: i64,
    pub provider_unread: i64,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.customer_id == user_id || self.provider_id == user_id
    }

    /// The participant who is not `user_id`
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.customer_id == user_id {
            &self.provider_id
        } else {
            &self.customer_id
        }
    }

    pub fn unread_for(&self, user_id: &str) -> i64 {
        if self.customer_id == user_id {
            self.customer_unread
        } else if self.provider_id == user_id {
            self.provider_unread
        } else {
            0
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum SenderType {
    Customer,
    Provider,
    System,
}

/// Message payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

/// Stored message row
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub seq: i64,
    pub id: String,
    pub conversation_id: String,
    pub sender_user_id: String,
    pub sender_type: SenderType,
    pub message_type: MessageType,
    pub body: String,
    pub attachments: Json<Vec<String>>,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Message as rendered to clients; deleted bodies are hidden
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub seq: i64,
    pub conversation_id: String,
    pub sender_user_id: String,
    pub sender_type: SenderType,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub body: Option<String>,
    pub attachments: Vec<String>,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        let deleted = m.deleted_at.is_some();
        MessageView {
            id: m.id,
            seq: m.seq,
            conversation_id: m.conversation_id,
            sender_user_id: m.sender_user_id,
            sender_type: m.sender_type,
            message_type: m.message_type,
            body: if deleted { None } else { Some(m.body) },
            attachments: if deleted { Vec::new() } else { m.attachments.0 },
            sent_at: m.sent_at,
            is_read: m.is_read,
            edited_at: m.edited_at,
            deleted_at: m.deleted_at,
        }
    }
}

/// Durable notification row, read by client polling
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: Json<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Case lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Bidding,
    Assigned,
    Completed,
    Cancelled,
}

impl CaseStatus {
    pub fn accepts_bids(&self) -> bool {
        matches!(self, CaseStatus::Open | CaseStatus::Bidding)
    }
}

/// Service request
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: String,
    pub customer_id: String,
    pub provider_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: CaseStatus,
    pub bidding_enabled: bool,
    pub current_bidders: i64,
    pub max_bidders: i64,
    pub winning_bid_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bid status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Provider offer on a case
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: String,
    pub case_id: String,
    pub provider_id: String,
    pub price: Option<i64>,
    pub comment: Option<String>,
    pub status: BidStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-(case, provider) decline record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseDecline {
    pub case_id: String,
    pub provider_id: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
