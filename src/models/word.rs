use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
    Unknown,
}

impl Difficulty {
    pub const fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Unknown => "unknown",
        }
    }
}

impl From<String> for Difficulty {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "beginner" => Difficulty::Beginner,
            "intermediate" => Difficulty::Intermediate,
            "advanced" => Difficulty::Advanced,
            _ => Difficulty::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTranslation {
    #[serde(default)]
    pub id: Option<String>,
    pub language: String,
    pub text: String,
    #[serde(default)]
    pub phonetic: Option<String>,
    #[serde(default)]
    pub example_sentence: Option<String>,
}

/// A vocabulary word. Belongs to exactly one domain; a word without
/// prerequisites is a root of the domain's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub id: String,
    pub domain_id: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub translations: Vec<WordTranslation>,
    #[serde(default)]
    pub prerequisite_ids: Vec<String>,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Word {
    pub fn is_root(&self) -> bool {
        self.prerequisite_ids.is_empty()
    }

    /// Language codes are unique within a word, so the first match is the
    /// only match.
    pub fn translation(&self, language: &str) -> Option<&WordTranslation> {
        self.translations
            .iter()
            .find(|t| t.language.eq_ignore_ascii_case(language))
    }

    /// First translation found following `languages` in order.
    pub fn first_translation<'a>(&'a self, languages: &[&str]) -> Option<&'a WordTranslation> {
        languages.iter().find_map(|lang| self.translation(lang))
    }

    pub fn labels(&self) -> HashMap<String, String> {
        self.translations
            .iter()
            .map(|t| (t.language.clone(), t.text.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub word_count: u32,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
}
