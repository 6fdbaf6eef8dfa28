//! Core message types for the Shopchat conversation model.
//!
//! A [`ChatMessage`] is the unit the client reconciles: it starts life as a
//! provisional entry carrying a client-minted [`MessageId::Local`] and is
//! replaced in place by the authoritative copy carrying the relay-assigned
//! [`MessageId::Server`] identifier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message body size in bytes (4 KB).
pub const MAX_BODY_SIZE: usize = 4 * 1024;

/// Identifier for a chat message.
///
/// The two variants are distinct identifier spaces: `Local` ids are minted
/// by the client for provisional (not yet confirmed) messages, `Server` ids
/// are assigned by the relay when a submission is accepted. A local id can
/// therefore never collide with a server id, and a message is provisional
/// exactly while its id is `Local`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// Client-minted provisional identifier (UUID v7 for time-ordering).
    Local(Uuid),
    /// Relay-assigned authoritative identifier (UUID v7).
    Server(Uuid),
}

impl MessageId {
    /// Mints a new client-side provisional identifier.
    #[must_use]
    pub fn local() -> Self {
        Self::Local(Uuid::now_v7())
    }

    /// Mints a new server-side authoritative identifier.
    #[must_use]
    pub fn server() -> Self {
        Self::Server(Uuid::now_v7())
    }

    /// Returns `true` if this is a client-minted provisional identifier.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        match self {
            Self::Local(uuid) | Self::Server(uuid) => uuid,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(uuid) => write!(f, "local:{uuid}"),
            Self::Server(uuid) => write!(f, "srv:{uuid}"),
        }
    }
}

/// Identifies a conversation between a shopper-side user and a correspondent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new conversation identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ConversationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of the message sender.
///
/// One parameterized client serves every storefront surface; the role is
/// configuration, not a separate implementation per surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SenderRole {
    /// A signed-in shopper on the storefront.
    Customer,
    /// A partner/seller answering from the partner dashboard.
    Partner,
    /// A staff member answering from the admin backoffice.
    Admin,
    /// An anonymous visitor without an account.
    Guest,
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Partner => write!(f, "partner"),
            Self::Admin => write!(f, "admin"),
            Self::Guest => write!(f, "guest"),
        }
    }
}

impl std::str::FromStr for SenderRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "partner" => Ok(Self::Partner),
            "admin" => Ok(Self::Admin),
            "guest" => Ok(Self::Guest),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Error returned when parsing an unknown sender role string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sender role: {0}")]
pub struct UnknownRole(pub String);

/// Millisecond-precision UTC timestamp.
///
/// Client-assigned (approximate) for provisional messages, relay-assigned
/// for authoritative ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Error returned when a message body fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message body is empty (or whitespace only).
    #[error("message body is empty")]
    Empty,
    /// Message body exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the body in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// A single chat message as displayed in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier; the variant tells provisional from authoritative.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Text content.
    pub body: String,
    /// Who sent this message.
    pub sender_role: SenderRole,
    /// When the message was created.
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// Returns `true` while this message awaits authoritative confirmation.
    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        self.id.is_local()
    }

    /// Validates this message's body for submission.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] if the body is empty or whitespace
    /// only, or [`ValidationError::TooLarge`] if it exceeds [`MAX_BODY_SIZE`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_body(&self.body)
    }
}

/// Validates a message body: non-empty after trimming, within size limit.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLarge`].
pub fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = body.len();
    if size > MAX_BODY_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_BODY_SIZE,
        });
    }
    Ok(())
}
