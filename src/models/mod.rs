//! Data models
//!
//! Persisted entities (users, sessions, comments, judgements, article
//! metadata), the compiled content types, and API-facing views of them.

mod article;
mod comment;
mod judgement;
mod pagination;
mod session;
mod user;

pub use article::{
    Article, ArticleLink, ArticleMetadata, ArticleSummary, ContentKind, Course, Frontmatter,
    TagCount, TocEntry,
};
pub use comment::{Comment, CommentNode, CommentSort, CommentWithAuthor, CreateCommentInput};
pub use judgement::{Judgement, JudgementSummary, JudgementTarget, TargetType};
pub use pagination::{ListParams, PagedResult};
pub use session::Session;
pub use user::{
    gravatar_url, PublicUser, UpdateProfileInput, User, UserProfile, UserRole, UserStatus,
};
