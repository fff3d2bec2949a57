//! Intent classification
//!
//! Restore patterns are checked first, then action patterns, then question
//! patterns. Restore patterns only match a request that opens with a restore
//! command ("undo that", "元に戻して"), so "add an undo button" stays an edit.
//! An action match wins over a question match, so "can you make the ball
//! red?" is an edit. Text matching nothing defaults to an edit.

use kiln_engine::Intent;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::Serialize;
use std::fmt::Debug;

static RESTORE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)^(please\s+)?(restore|revert|undo|roll\s*back)\b",
        r"(?i)^(please\s+)?(go|switch)\s+back\s+to\s+the\s+(previous|last|earlier)\s+version\b",
        r"^(さっきの|前の|今の)?(変更|編集)?を?(元に戻して|取り消して)",
        r"^前のバージョンに戻",
    ])
    .expect("restore patterns")
});

static ACTION: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\b(add|change|remove|delete|fix|make|replace|update|create|build|insert|rename|move|increase|decrease|implement|turn)\b",
        r"(変更|追加|削除|修正|作成|実装|調整|改善)(して|する|を)",
        r"(変えて|直して|消して|増やして|減らして|入れて|付けて|つけて|作って|にして)",
    ])
    .expect("action patterns")
});

static QUESTION: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"[?？]\s*$",
        r"(?i)^\s*(what|why|how|when|where|who|which|is|are|does|do|can|could)\b",
        r"(何|なぜ|どうして|どこ|いつ|誰)",
        r"(ですか|ますか|でしょうか)[。]?\s*$",
    ])
    .expect("question patterns")
});

/// Which rule decided an intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Basis {
    Restore,
    Action,
    Question,
    /// Nothing matched
    Default,
}

/// Intent plus the rule that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub basis: Basis,
}

impl Classification {
    /// True when no pattern matched and the default applied
    #[inline]
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.basis == Basis::Default
    }
}

/// Maps free text to an intent
pub trait IntentClassifier: Send + Sync + Debug {
    /// Classify with the deciding rule
    fn explain(&self, text: &str) -> Classification;

    /// Classify
    fn classify(&self, text: &str) -> Intent {
        self.explain(text).intent
    }
}

/// Regular-expression classifier
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    restore: RegexSet,
    action: RegexSet,
    question: RegexSet,
}

impl PatternClassifier {
    /// Built-in English and Japanese patterns
    #[must_use]
    pub fn new() -> Self {
        Self {
            restore: RESTORE.clone(),
            action: ACTION.clone(),
            question: QUESTION.clone(),
        }
    }

    /// Custom pattern tables
    ///
    /// # Errors
    /// Returns error if any pattern fails to compile
    pub fn with_patterns<I, S>(restore: I, action: I, question: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            restore: RegexSet::new(restore)?,
            action: RegexSet::new(action)?,
            question: RegexSet::new(question)?,
        })
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier for PatternClassifier {
    fn explain(&self, text: &str) -> Classification {
        let text = text.trim();
        let (intent, basis) = if self.restore.is_match(text) {
            (Intent::Restore, Basis::Restore)
        } else if self.action.is_match(text) {
            (Intent::Edit, Basis::Action)
        } else if self.question.is_match(text) {
            (Intent::Chat, Basis::Question)
        } else {
            (Intent::Edit, Basis::Default)
        };
        if basis == Basis::Default {
            tracing::debug!(text_len = text.len(), "no intent pattern matched, defaulting to edit");
        }
        Classification { intent, basis }
    }
}
