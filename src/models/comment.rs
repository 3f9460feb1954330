//! Comment model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::judgement::Judgement;
use super::user::PublicUser;

/// Comment row as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub article_id: i64,
    /// None once the author deleted their account or the comment
    pub user_id: Option<i64>,
    pub parent_id: Option<i64>,
    /// 0 for top-level comments
    pub depth: i64,
    pub content: String,
    pub like_count: i64,
    pub dislike_count: i64,
    pub reply_count: i64,
    pub is_deleted: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn score(&self) -> i64 {
        self.like_count - self.dislike_count
    }
}

/// A comment joined with its author's public profile
#[derive(Debug, Clone)]
pub struct CommentWithAuthor {
    pub comment: Comment,
    pub author: Option<PublicUser>,
}

/// A node of the rendered comment tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNode {
    pub id: i64,
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub depth: i64,
    pub content: String,
    pub author: Option<PublicUser>,
    pub like_count: i64,
    pub dislike_count: i64,
    pub score: i64,
    pub reply_count: i64,
    pub is_deleted: bool,
    pub is_edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The viewer's judgement, only set for authenticated requests
    pub my_judgement: Option<Judgement>,
    pub replies: Vec<CommentNode>,
}

impl From<CommentWithAuthor> for CommentNode {
    fn from(record: CommentWithAuthor) -> Self {
        let CommentWithAuthor { comment, author } = record;
        Self {
            id: comment.id,
            article_id: comment.article_id,
            parent_id: comment.parent_id,
            depth: comment.depth,
            score: comment.score(),
            content: comment.content,
            author: if comment.is_deleted { None } else { author },
            like_count: comment.like_count,
            dislike_count: comment.dislike_count,
            reply_count: comment.reply_count,
            is_deleted: comment.is_deleted,
            is_edited: comment.is_edited,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            my_judgement: None,
            replies: Vec::new(),
        }
    }
}

impl CommentNode {
    /// Number of nodes in this subtree, including itself
    pub fn size(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::size).sum::<usize>()
    }

    /// Depth of the deepest descendant relative to this node (leaf = 1)
    pub fn height(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::height).max().unwrap_or(0)
    }

    /// Visit every node mutably, depth first
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut CommentNode)) {
        f(self);
        for reply in &mut self.replies {
            reply.walk_mut(f);
        }
    }

    pub fn find(&self, id: i64) -> Option<&CommentNode> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter().find_map(|reply| reply.find(id))
    }
}

/// Ordering of top-level comments. Replies are always oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentSort {
    #[default]
    Newest,
    Oldest,
    /// Highest score first, ties broken newest first
    Top,
}

impl CommentSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentSort::Newest => "newest",
            CommentSort::Oldest => "oldest",
            CommentSort::Top => "top",
        }
    }
}

impl FromStr for CommentSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "newest" => Ok(CommentSort::Newest),
            "oldest" => Ok(CommentSort::Oldest),
            "top" => Ok(CommentSort::Top),
            _ => Err(anyhow::anyhow!("Invalid comment sort: {}", s)),
        }
    }
}

/// Input for creating a comment
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentInput {
    pub article_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
}
