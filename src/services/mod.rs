//! Services layer - Business logic
//!
//! Services own the rules of the site and coordinate repositories and the
//! cache:
//! - the content pipeline (frontmatter, markdown, content index, feeds, export)
//! - accounts and sessions
//! - comments and judgements

pub mod comment;
pub mod content;
pub mod export;
pub mod feed;
pub mod frontmatter;
pub mod judgement;
pub mod markdown;
pub mod password;
pub mod rate_limiter;
pub mod user;

pub use comment::{CommentService, CommentServiceError, DeleteOutcome};
pub use content::{ContentError, ContentQuery, ContentService, ContentStats, Neighbors};
pub use export::{export_content, ExportSummary};
pub use feed::{FeedError, FeedService};
pub use judgement::{JudgementService, JudgementServiceError};
pub use markdown::{MarkdownRenderer, RenderOptions, RenderedDocument};
pub use password::{hash_password, verify_password};
pub use rate_limiter::LoginRateLimiter;
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
