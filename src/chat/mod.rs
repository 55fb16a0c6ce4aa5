/// Chat storage
///
/// Provider identifiers, single-use chat tokens, conversations and messages.
/// All state lives in SQLite; the realtime side is in `gateway`.

mod conversations;
mod identifiers;
mod messages;
mod tokens;

pub use conversations::ConversationStore;
pub use identifiers::IdentifierRegistry;
pub use messages::{AppendedMessage, MessageStore, DEFAULT_PAGE_SIZE};
pub use tokens::{ChatTokenManager, Redemption};
