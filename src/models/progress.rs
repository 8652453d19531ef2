use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;
use super::word::Difficulty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Locked,
    Unlocked,
    InProgress,
    Practicing,
    Mastered,
}

impl ProgressStatus {
    pub const ALL: [ProgressStatus; 5] = [
        ProgressStatus::Locked,
        ProgressStatus::Unlocked,
        ProgressStatus::InProgress,
        ProgressStatus::Practicing,
        ProgressStatus::Mastered,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::Locked => "locked",
            ProgressStatus::Unlocked => "unlocked",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Practicing => "practicing",
            ProgressStatus::Mastered => "mastered",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ProgressStatus::Locked => "locked",
            ProgressStatus::Unlocked => "unlocked",
            ProgressStatus::InProgress => "in progress",
            ProgressStatus::Practicing => "practicing",
            ProgressStatus::Mastered => "mastered",
        }
    }

    /// Whether an attempt may be recorded against a word in this status.
    pub const fn is_practicable(self) -> bool {
        !matches!(self, ProgressStatus::Locked)
    }
}

/// Per (child, word) progress record as returned by the attempt endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordProgress {
    #[serde(default)]
    pub id: Option<String>,
    pub word_id: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub correct_count: u32,
    #[serde(default)]
    pub streak_count: u32,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default, with = "timestamp::option")]
    pub last_practiced_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub mastered_at: Option<DateTime<Utc>>,
}

impl WordProgress {
    /// Record for a word the child has been exposed to but never attempted.
    pub fn unlocked(word_id: impl Into<String>) -> Self {
        Self {
            id: None,
            word_id: word_id.into(),
            status: ProgressStatus::Unlocked,
            attempts: 0,
            correct_count: 0,
            streak_count: 0,
            accuracy: 0.0,
            last_practiced_at: None,
            mastered_at: None,
        }
    }

    /// correct / attempts, 0 when there are no attempts.
    pub fn computed_accuracy(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            f64::from(self.correct_count) / f64::from(self.attempts)
        }
    }
}

/// One entry of the next-words ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedWord {
    pub word_id: String,
    #[serde(default)]
    pub word_text: HashMap<String, String>,
    pub status: ProgressStatus,
    #[serde(default)]
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextWordsResponse {
    #[serde(default)]
    pub words: Vec<RecommendedWord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressOverview {
    #[serde(default)]
    pub total_words: u32,
    #[serde(default)]
    pub mastered: u32,
    #[serde(default)]
    pub practicing: u32,
    #[serde(default)]
    pub in_progress: u32,
    #[serde(default)]
    pub unlocked: u32,
    #[serde(default)]
    pub locked: u32,
    #[serde(default)]
    pub total_attempts: u32,
    #[serde(default)]
    pub total_correct: u32,
    #[serde(default)]
    pub accuracy: f64,
}

impl ProgressOverview {
    pub fn count_for(&self, status: ProgressStatus) -> u32 {
        match status {
            ProgressStatus::Locked => self.locked,
            ProgressStatus::Unlocked => self.unlocked,
            ProgressStatus::InProgress => self.in_progress,
            ProgressStatus::Practicing => self.practicing,
            ProgressStatus::Mastered => self.mastered,
        }
    }

    pub fn mastered_ratio(&self) -> f64 {
        if self.total_words == 0 {
            0.0
        } else {
            f64::from(self.mastered) / f64::from(self.total_words)
        }
    }
}
