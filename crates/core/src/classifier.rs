use serde::{Deserialize, Serialize};

const DEFAULT_TOPICS: &[(&str, &[&str])] = &[
    (
        "technology",
        &["code", "programming", "software", "computer", "tech", "ai", "machine learning"],
    ),
    ("philosophy", &["think", "believe", "meaning", "purpose", "existence", "truth", "reality"]),
    ("science", &["research", "study", "experiment", "theory", "hypothesis", "data"]),
    ("art", &["creative", "artistic", "design", "beautiful", "aesthetic", "music"]),
    ("politics", &["government", "policy", "election", "democracy", "rights", "law"]),
    ("health", &["health", "medical", "doctor", "medicine", "wellness", "fitness"]),
    ("travel", &["travel", "trip", "vacation", "journey", "adventure", "explore"]),
    ("food", &["food", "cooking", "recipe", "restaurant", "meal", "taste"]),
];

const DEFAULT_MOODS: &[(&str, &[&str])] = &[
    ("excited", &["excited", "amazing", "awesome", "fantastic", "wow", "incredible"]),
    ("curious", &["wonder", "curious", "interesting", "fascinating", "intriguing"]),
    ("concerned", &["worried", "concerned", "problem", "issue", "trouble", "difficult"]),
    ("happy", &["happy", "joy", "pleased", "delighted", "cheerful", "glad"]),
    ("serious", &["serious", "important", "critical", "urgent", "matter"]),
    ("casual", &["casual", "relaxed", "easy", "simple", "chill"]),
];

/// Ordered label table. The first label with any matching keyword wins, so the entry order is
/// the tie-break priority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordTable {
    entries: Vec<KeywordEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordEntry {
    pub label: String,
    pub keywords: Vec<String>,
}

impl KeywordTable {
    pub fn new<I, L, K, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (L, K)>,
        L: Into<String>,
        K: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|(label, keywords)| KeywordEntry {
                label: label.into(),
                keywords: keywords
                    .into_iter()
                    .map(|keyword| keyword.as_ref().trim().to_lowercase())
                    .filter(|keyword| !keyword.is_empty())
                    .collect(),
            })
            .collect();
        Self { entries }
    }

    fn from_static(table: &[(&str, &[&str])]) -> Self {
        Self::new(table.iter().map(|(label, keywords)| (*label, keywords.iter().copied())))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.label.as_str())
    }

    pub fn lookup(&self, text: &str) -> Option<&str> {
        let normalized = text.to_lowercase();
        self.entries
            .iter()
            .find(|entry| {
                entry.keywords.iter().any(|keyword| normalized.contains(keyword.as_str()))
            })
            .map(|entry| entry.label.as_str())
    }
}

/// Derives a topic and a mood label from message text by case-insensitive substring matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classifier {
    topics: KeywordTable,
    moods: KeywordTable,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            topics: KeywordTable::from_static(DEFAULT_TOPICS),
            moods: KeywordTable::from_static(DEFAULT_MOODS),
        }
    }
}

impl Classifier {
    pub fn new(topics: KeywordTable, moods: KeywordTable) -> Self {
        Self { topics, moods }
    }

    pub fn detect_topic(&self, text: &str) -> Option<&str> {
        self.topics.lookup(text)
    }

    pub fn detect_mood(&self, text: &str) -> Option<&str> {
        self.moods.lookup(text)
    }

    pub fn topics(&self) -> &KeywordTable {
        &self.topics
    }

    pub fn moods(&self) -> &KeywordTable {
        &self.moods
    }
}
