//! Wire types shared by the backend seam and the client-side state.
//!
//! Identifiers are opaque strings. Timestamps accept both RFC 3339 and the
//! naive ISO form the backend emits (interpreted as UTC).

// ============================================================
// Submodules
// ============================================================

pub mod account;
pub mod chat;
pub mod progress;
pub mod timestamp;
pub mod word;

// ============================================================
// Re-exports
// ============================================================

pub use account::{AuthToken, Child, Credentials, NewChild, User};
pub use chat::{ChatHistory, ChatMessage, ChatRequest, ChatResponse, ChatRole};
pub use progress::{
    NextWordsResponse, ProgressOverview, ProgressStatus, RecommendedWord, WordProgress,
};
pub use word::{Difficulty, Domain, Word, WordTranslation};
