//! Judgement model (likes and dislikes on articles and comments)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Judgement {
    Like,
    Dislike,
}

impl Judgement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Judgement::Like => "like",
            Judgement::Dislike => "dislike",
        }
    }

    /// Counter column this judgement contributes to
    pub fn counter_column(&self) -> &'static str {
        match self {
            Judgement::Like => "like_count",
            Judgement::Dislike => "dislike_count",
        }
    }

    /// Judgement a user ends up with after requesting `requested`.
    ///
    /// Repeating the current judgement toggles it off, the opposite value
    /// switches it, and `None` clears it.
    pub fn resolve(previous: Option<Judgement>, requested: Option<Judgement>) -> Option<Judgement> {
        match requested {
            Some(value) if previous == Some(value) => None,
            other => other,
        }
    }
}

impl fmt::Display for Judgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Judgement {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "like" => Ok(Judgement::Like),
            "dislike" => Ok(Judgement::Dislike),
            _ => Err(anyhow::anyhow!("Invalid judgement: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Article,
    Comment,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Article => "article",
            TargetType::Comment => "comment",
        }
    }

    /// Table holding the target's counters
    pub fn table(&self) -> &'static str {
        match self {
            TargetType::Article => "article_metadata",
            TargetType::Comment => "comments",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is being judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JudgementTarget {
    pub target_type: TargetType,
    pub target_id: i64,
}

impl JudgementTarget {
    pub fn article(id: i64) -> Self {
        Self {
            target_type: TargetType::Article,
            target_id: id,
        }
    }

    pub fn comment(id: i64) -> Self {
        Self {
            target_type: TargetType::Comment,
            target_id: id,
        }
    }
}

/// Aggregated counters for a target plus the viewer's own judgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgementSummary {
    pub likes: i64,
    pub dislikes: i64,
    pub score: i64,
    pub my_judgement: Option<Judgement>,
}

impl JudgementSummary {
    pub fn new(likes: i64, dislikes: i64, my_judgement: Option<Judgement>) -> Self {
        Self {
            likes,
            dislikes,
            score: likes - dislikes,
            my_judgement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_judgement_columns() {
        assert_eq!(Judgement::Like.counter_column(), "like_count");
        assert_eq!(Judgement::Dislike.counter_column(), "dislike_count");
    }

    #[test]
    fn test_resolve_transitions() {
        use Judgement::*;
        assert_eq!(Judgement::resolve(None, Some(Like)), Some(Like));
        assert_eq!(Judgement::resolve(Some(Like), Some(Like)), None);
        assert_eq!(Judgement::resolve(Some(Like), Some(Dislike)), Some(Dislike));
        assert_eq!(Judgement::resolve(Some(Dislike), None), None);
        assert_eq!(Judgement::resolve(None, None), None);
    }

    #[test]
    fn test_judgement_parse() {
        assert_eq!("LIKE".parse::<Judgement>().unwrap(), Judgement::Like);
        assert!("meh".parse::<Judgement>().is_err());
    }

    #[test]
    fn test_target_serde_shape() {
        let target: JudgementTarget =
            serde_json::from_str(r#"{"target_type":"comment","target_id":3}"#).unwrap();
        assert_eq!(target, JudgementTarget::comment(3));
        assert_eq!(target.target_type.table(), "comments");
    }

    #[test]
    fn test_summary_score() {
        let summary = JudgementSummary::new(5, 2, Some(Judgement::Dislike));
        assert_eq!(summary.score, 3);
    }
}
