//! Comment service
//!
//! Threads are stored flat and assembled into a forest on read. The
//! viewer-independent forest of an article is cached per sort order; the
//! viewer's own judgements are laid over a copy on every request.

use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{Cache, CacheLayer};
use crate::config::CommentConfig;
use crate::db::repositories::{
    ArticleMetadataRepository, CommentRepository, JudgementRepository, NewComment,
};
use crate::models::{
    Comment, CommentNode, CommentSort, CreateCommentInput, ListParams, PagedResult, User,
};

/// Cache key of one sorted comment tree
fn tree_cache_key(article_id: i64, sort: CommentSort) -> String {
    format!("comments:tree:{}:{}", article_id, sort.as_str())
}

/// Pattern matching every cached tree of an article
pub fn tree_cache_pattern(article_id: i64) -> String {
    format!("comments:tree:{}:*", article_id)
}

/// Pattern matching the cached trees of all articles
pub const ALL_TREES_PATTERN: &str = "comments:tree:*";

#[derive(Debug, thiserror::Error)]
pub enum CommentServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(i64),

    #[error("Comment not found: {0}")]
    NotFound(i64),

    #[error("Replies may be nested at most {0} levels deep")]
    MaxDepthExceeded(usize),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// What `delete` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The comment still has replies; it was blanked and kept
    SoftDeleted,
    /// Rows removed, counting emptied soft-deleted ancestors
    Removed(usize),
}

pub struct CommentService {
    comment_repo: Arc<dyn CommentRepository>,
    judgement_repo: Arc<dyn JudgementRepository>,
    article_repo: Arc<dyn ArticleMetadataRepository>,
    cache: Cache,
    config: CommentConfig,
}

impl CommentService {
    pub fn new(
        comment_repo: Arc<dyn CommentRepository>,
        judgement_repo: Arc<dyn JudgementRepository>,
        article_repo: Arc<dyn ArticleMetadataRepository>,
        cache: Cache,
        config: CommentConfig,
    ) -> Self {
        Self {
            comment_repo,
            judgement_repo,
            article_repo,
            cache,
            config,
        }
    }

    /// Post a comment or a reply.
    pub async fn create(
        &self,
        input: CreateCommentInput,
        author: &User,
    ) -> Result<Comment, CommentServiceError> {
        let content = self.validate_content(&input.content)?;

        if self
            .article_repo
            .get_by_id(input.article_id)
            .await
            .context("Failed to load article metadata")?
            .is_none()
        {
            return Err(CommentServiceError::ArticleNotFound(input.article_id));
        }

        let depth = match input.parent_id {
            None => 0,
            Some(parent_id) => {
                let parent = self
                    .comment_repo
                    .get_by_id(parent_id)
                    .await
                    .context("Failed to load parent comment")?
                    .filter(|p| p.article_id == input.article_id && !p.is_deleted)
                    .ok_or_else(|| {
                        CommentServiceError::ValidationError(format!(
                            "Parent comment {} does not exist on this article",
                            parent_id
                        ))
                    })?;
                parent.depth + 1
            }
        };
        if depth >= self.config.max_depth as i64 {
            return Err(CommentServiceError::MaxDepthExceeded(self.config.max_depth));
        }

        let comment = self
            .comment_repo
            .create(&NewComment {
                article_id: input.article_id,
                user_id: author.id,
                parent_id: input.parent_id,
                depth,
                content,
            })
            .await
            .context("Failed to create comment")?;

        self.invalidate(comment.article_id).await;
        tracing::debug!(
            "User {} commented {} on article {} at depth {}",
            author.id,
            comment.id,
            comment.article_id,
            depth
        );
        Ok(comment)
    }

    /// Replace the content of one's own comment
    pub async fn edit(
        &self,
        id: i64,
        content: &str,
        user: &User,
    ) -> Result<Comment, CommentServiceError> {
        let comment = self.load_live(id).await?;
        if comment.user_id != Some(user.id) {
            return Err(CommentServiceError::Forbidden(
                "Only the author can edit a comment".to_string(),
            ));
        }
        let content = self.validate_content(content)?;

        let updated = self
            .comment_repo
            .update_content(id, &content)
            .await
            .context("Failed to update comment")?
            .ok_or(CommentServiceError::NotFound(id))?;

        self.invalidate(updated.article_id).await;
        Ok(updated)
    }

    /// Delete a comment as its author or an admin.
    ///
    /// Comments with replies are blanked. Leaves are removed, and so is every
    /// soft-deleted ancestor that no longer has replies.
    pub async fn delete(&self, id: i64, user: &User) -> Result<DeleteOutcome, CommentServiceError> {
        let comment = self.load_live(id).await?;
        if !user.can_moderate(comment.user_id) {
            return Err(CommentServiceError::Forbidden(
                "You cannot delete this comment".to_string(),
            ));
        }

        let outcome = if comment.reply_count > 0 {
            self.comment_repo
                .soft_delete(id)
                .await
                .context("Failed to soft-delete comment")?;
            DeleteOutcome::SoftDeleted
        } else {
            self.comment_repo
                .hard_delete(id)
                .await
                .context("Failed to delete comment")?;
            DeleteOutcome::Removed(1 + self.prune_ancestors(comment.parent_id).await?)
        };

        self.invalidate(comment.article_id).await;
        tracing::info!(
            "Comment {} deleted by user {} ({:?})",
            id,
            user.id,
            outcome
        );
        Ok(outcome)
    }

    /// The comment forest of an article.
    pub async fn tree(
        &self,
        article_id: i64,
        sort: CommentSort,
        viewer: Option<&User>,
    ) -> Result<Vec<CommentNode>, CommentServiceError> {
        let key = tree_cache_key(article_id, sort);
        let mut forest = match self.cache.get::<Vec<CommentNode>>(&key).await {
            Ok(Some(forest)) => forest,
            _ => {
                let forest = self.build_tree(article_id, sort).await?;
                if let Err(e) = self.cache.set(&key, &forest, self.cache.default_ttl()).await {
                    tracing::warn!("Failed to cache comment tree {}: {}", key, e);
                }
                forest
            }
        };

        if let Some(viewer) = viewer {
            self.overlay_judgements(article_id, viewer.id, &mut forest)
                .await?;
        }
        Ok(forest)
    }

    /// The subtree rooted at one comment
    pub async fn thread(
        &self,
        comment_id: i64,
        viewer: Option<&User>,
    ) -> Result<CommentNode, CommentServiceError> {
        let comment = self
            .comment_repo
            .get_by_id(comment_id)
            .await
            .context("Failed to load comment")?
            .ok_or(CommentServiceError::NotFound(comment_id))?;

        let forest = self
            .tree(comment.article_id, CommentSort::Oldest, viewer)
            .await?;
        forest
            .iter()
            .find_map(|root| root.find(comment_id))
            .cloned()
            .ok_or(CommentServiceError::NotFound(comment_id))
    }

    pub async fn list_by_user(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<Comment>, CommentServiceError> {
        let (comments, total) = self
            .comment_repo
            .list_by_user(user_id, params)
            .await
            .context("Failed to list user comments")?;
        Ok(PagedResult::new(comments, total, params))
    }

    /// Drop every cached tree of an article
    pub async fn invalidate(&self, article_id: i64) {
        if let Err(e) = self
            .cache
            .delete_pattern(&tree_cache_pattern(article_id))
            .await
        {
            tracing::warn!("Failed to invalidate comment trees of {}: {}", article_id, e);
        }
    }

    fn validate_content(&self, content: &str) -> Result<String, CommentServiceError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CommentServiceError::ValidationError(
                "Comment cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.config.max_length {
            return Err(CommentServiceError::ValidationError(format!(
                "Comment must be at most {} characters",
                self.config.max_length
            )));
        }
        Ok(content.to_string())
    }

    /// An existing, not deleted comment
    async fn load_live(&self, id: i64) -> Result<Comment, CommentServiceError> {
        self.comment_repo
            .get_by_id(id)
            .await
            .context("Failed to load comment")?
            .filter(|c| !c.is_deleted)
            .ok_or(CommentServiceError::NotFound(id))
    }

    async fn prune_ancestors(&self, mut parent_id: Option<i64>) -> Result<usize, CommentServiceError> {
        let mut removed = 0;
        while let Some(id) = parent_id {
            let Some(parent) = self
                .comment_repo
                .get_by_id(id)
                .await
                .context("Failed to load parent comment")?
            else {
                break;
            };
            if !parent.is_deleted || parent.reply_count > 0 {
                break;
            }
            self.comment_repo
                .hard_delete(id)
                .await
                .context("Failed to remove emptied comment")?;
            removed += 1;
            parent_id = parent.parent_id;
        }
        Ok(removed)
    }

    async fn build_tree(
        &self,
        article_id: i64,
        sort: CommentSort,
    ) -> Result<Vec<CommentNode>, CommentServiceError> {
        let records = self
            .comment_repo
            .list_by_article(article_id)
            .await
            .context("Failed to list comments")?;
        let nodes = records.into_iter().map(CommentNode::from).collect();
        Ok(assemble_forest(nodes, sort, self.config.max_depth))
    }

    async fn overlay_judgements(
        &self,
        article_id: i64,
        user_id: i64,
        forest: &mut [CommentNode],
    ) -> Result<(), CommentServiceError> {
        let judgements = self
            .judgement_repo
            .for_article_comments(article_id, user_id)
            .await
            .context("Failed to load viewer judgements")?;
        if judgements.is_empty() {
            return Ok(());
        }
        for root in forest {
            root.walk_mut(&mut |node| node.my_judgement = judgements.get(&node.id).copied());
        }
        Ok(())
    }
}

/// Attach nodes to their parents.
///
/// Roots are ordered by `sort`, replies oldest first. Nodes deeper than
/// `max_depth` levels and nodes whose parent is missing are left out.
pub fn assemble_forest(
    nodes: Vec<CommentNode>,
    sort: CommentSort,
    max_depth: usize,
) -> Vec<CommentNode> {
    let mut roots = Vec::new();
    let mut children: HashMap<i64, Vec<CommentNode>> = HashMap::new();
    for node in nodes {
        match node.parent_id {
            None => roots.push(node),
            Some(parent_id) => children.entry(parent_id).or_default().push(node),
        }
    }

    for replies in children.values_mut() {
        replies.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    }

    match sort {
        CommentSort::Newest => {
            roots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
        }
        CommentSort::Oldest => {
            roots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        }
        CommentSort::Top => roots.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        }),
    }

    roots
        .into_iter()
        .map(|root| attach(root, &mut children, 1, max_depth))
        .collect()
}

fn attach(
    mut node: CommentNode,
    children: &mut HashMap<i64, Vec<CommentNode>>,
    level: usize,
    max_depth: usize,
) -> CommentNode {
    if level < max_depth {
        if let Some(replies) = children.remove(&node.id) {
            node.replies = replies
                .into_iter()
                .map(|reply| attach(reply, children, level + 1, max_depth))
                .collect();
        }
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::test_support::{insert_article, insert_user, setup_pool};
    use crate::db::repositories::{
        SqlxArticleMetadataRepository, SqlxCommentRepository, SqlxJudgementRepository,
        SqlxUserRepository, UserRepository,
    };
    use crate::db::DynDatabasePool;
    use crate::models::{Judgement, JudgementTarget, UserRole};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    struct Fixture {
        pool: DynDatabasePool,
        service: CommentService,
        cache: Cache,
        article_id: i64,
        alice: User,
        bob: User,
    }

    async fn load_user(pool: &DynDatabasePool, name: &str) -> User {
        let id = insert_user(pool, name).await;
        SqlxUserRepository::new(pool.clone())
            .get_by_id(id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn fixture() -> Fixture {
        let pool = setup_pool().await;
        let cache: Cache = Arc::new(MemoryCache::new());
        let service = CommentService::new(
            SqlxCommentRepository::boxed(pool.clone()),
            SqlxJudgementRepository::boxed(pool.clone()),
            SqlxArticleMetadataRepository::boxed(pool.clone()),
            cache.clone(),
            CommentConfig::default(),
        );
        let article_id = insert_article(&pool, "essay").await;
        let alice = load_user(&pool, "alice").await;
        let bob = load_user(&pool, "bob").await;
        Fixture {
            pool,
            service,
            cache,
            article_id,
            alice,
            bob,
        }
    }

    fn input(article_id: i64, parent_id: Option<i64>, content: &str) -> CreateCommentInput {
        CreateCommentInput {
            article_id,
            parent_id,
            content: content.to_string(),
        }
    }

    async fn post(f: &Fixture, parent_id: Option<i64>, author: &User) -> Comment {
        f.service
            .create(input(f.article_id, parent_id, "a comment"), author)
            .await
            .expect("Failed to create comment")
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = fixture().await;

        let empty = f.service.create(input(f.article_id, None, "   "), &f.alice).await;
        assert!(matches!(empty, Err(CommentServiceError::ValidationError(_))));

        let long = "x".repeat(5001);
        let too_long = f.service.create(input(f.article_id, None, &long), &f.alice).await;
        assert!(matches!(too_long, Err(CommentServiceError::ValidationError(_))));

        let no_article = f.service.create(input(999, None, "hi"), &f.alice).await;
        assert!(matches!(no_article, Err(CommentServiceError::ArticleNotFound(999))));

        let no_parent = f.service.create(input(f.article_id, Some(999), "hi"), &f.alice).await;
        assert!(matches!(no_parent, Err(CommentServiceError::ValidationError(_))));

        let trimmed = f
            .service
            .create(input(f.article_id, None, "  spaced  "), &f.alice)
            .await
            .unwrap();
        assert_eq!(trimmed.content, "spaced");
    }

    #[tokio::test]
    async fn test_parent_must_belong_to_article() {
        let f = fixture().await;
        let other_article = insert_article(&f.pool, "other").await;
        let root = post(&f, None, &f.alice).await;

        let result = f
            .service
            .create(input(other_article, Some(root.id), "cross-post"), &f.bob)
            .await;
        assert!(matches!(result, Err(CommentServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_max_depth() {
        let f = fixture().await;
        let mut parent = post(&f, None, &f.alice).await;
        for expected_depth in 1..5 {
            parent = post(&f, Some(parent.id), &f.bob).await;
            assert_eq!(parent.depth, expected_depth);
        }

        let too_deep = f
            .service
            .create(input(f.article_id, Some(parent.id), "deeper"), &f.alice)
            .await;
        assert!(matches!(too_deep, Err(CommentServiceError::MaxDepthExceeded(5))));

        let tree = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].height(), 5);
    }

    #[tokio::test]
    async fn test_tree_sorting() {
        let f = fixture().await;
        let first = post(&f, None, &f.alice).await;
        let second = post(&f, None, &f.bob).await;
        let reply_a = post(&f, Some(first.id), &f.bob).await;
        let reply_b = post(&f, Some(first.id), &f.alice).await;

        SqlxJudgementRepository::new(f.pool.clone())
            .apply(JudgementTarget::comment(first.id), f.bob.id, Some(Judgement::Like))
            .await
            .unwrap();
        f.service.invalidate(f.article_id).await;

        let newest = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert_eq!(newest.iter().map(|n| n.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let oldest = f.service.tree(f.article_id, CommentSort::Oldest, None).await.unwrap();
        assert_eq!(oldest.iter().map(|n| n.id).collect::<Vec<_>>(), vec![first.id, second.id]);
        let replies: Vec<i64> = oldest[0].replies.iter().map(|n| n.id).collect();
        assert_eq!(replies, vec![reply_a.id, reply_b.id]);

        let top = f.service.tree(f.article_id, CommentSort::Top, None).await.unwrap();
        assert_eq!(top[0].id, first.id);
        assert_eq!(top[0].score, 1);
        assert_eq!(top[0].reply_count, 2);
    }

    #[tokio::test]
    async fn test_tree_overlays_viewer_judgements() {
        let f = fixture().await;
        let root = post(&f, None, &f.alice).await;
        let reply = post(&f, Some(root.id), &f.alice).await;
        SqlxJudgementRepository::new(f.pool.clone())
            .apply(JudgementTarget::comment(reply.id), f.bob.id, Some(Judgement::Dislike))
            .await
            .unwrap();

        let anonymous = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert!(anonymous[0].replies[0].my_judgement.is_none());

        let as_bob = f
            .service
            .tree(f.article_id, CommentSort::Newest, Some(&f.bob))
            .await
            .unwrap();
        assert_eq!(as_bob[0].replies[0].my_judgement, Some(Judgement::Dislike));
        assert!(as_bob[0].my_judgement.is_none());

        let cached: Vec<CommentNode> = f
            .cache
            .get(&tree_cache_key(f.article_id, CommentSort::Newest))
            .await
            .unwrap()
            .unwrap();
        assert!(cached[0].replies[0].my_judgement.is_none());
    }

    #[tokio::test]
    async fn test_mutations_invalidate_cache() {
        let f = fixture().await;
        post(&f, None, &f.alice).await;
        let before = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert_eq!(before.len(), 1);

        post(&f, None, &f.bob).await;
        let after = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_edit_rules() {
        let f = fixture().await;
        let comment = post(&f, None, &f.alice).await;

        let by_other = f.service.edit(comment.id, "hijack", &f.bob).await;
        assert!(matches!(by_other, Err(CommentServiceError::Forbidden(_))));

        let edited = f.service.edit(comment.id, " better ", &f.alice).await.unwrap();
        assert_eq!(edited.content, "better");
        assert!(edited.is_edited);

        f.service.delete(comment.id, &f.alice).await.unwrap();
        let after_delete = f.service.edit(comment.id, "ghost", &f.alice).await;
        assert!(matches!(after_delete, Err(CommentServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_soft_then_prunes() {
        let f = fixture().await;
        let root = post(&f, None, &f.alice).await;
        let reply = post(&f, Some(root.id), &f.bob).await;

        let forbidden = f.service.delete(root.id, &f.bob).await;
        assert!(matches!(forbidden, Err(CommentServiceError::Forbidden(_))));

        let soft = f.service.delete(root.id, &f.alice).await.unwrap();
        assert_eq!(soft, DeleteOutcome::SoftDeleted);
        let tree = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert!(tree[0].is_deleted);
        assert!(tree[0].author.is_none());
        assert_eq!(tree[0].replies.len(), 1);

        let removed = f.service.delete(reply.id, &f.bob).await.unwrap();
        assert_eq!(removed, DeleteOutcome::Removed(2));
        let tree = f.service.tree(f.article_id, CommentSort::Newest, None).await.unwrap();
        assert!(tree.is_empty());

        let metadata = SqlxArticleMetadataRepository::new(f.pool.clone())
            .get_by_id(f.article_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.comment_count, 0);
    }

    #[tokio::test]
    async fn test_admin_can_delete_any_comment() {
        let f = fixture().await;
        let mut admin = f.alice.clone();
        admin.role = UserRole::Admin;
        let comment = post(&f, None, &f.bob).await;

        let outcome = f.service.delete(comment.id, &admin).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Removed(1));
    }

    #[tokio::test]
    async fn test_thread_and_list_by_user() {
        let f = fixture().await;
        let root = post(&f, None, &f.alice).await;
        let reply = post(&f, Some(root.id), &f.bob).await;
        post(&f, Some(reply.id), &f.alice).await;

        let thread = f.service.thread(reply.id, None).await.unwrap();
        assert_eq!(thread.id, reply.id);
        assert_eq!(thread.size(), 2);

        assert!(matches!(
            f.service.thread(999, None).await,
            Err(CommentServiceError::NotFound(999))
        ));

        let page = f
            .service
            .list_by_user(f.alice.id, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    fn node(id: i64, parent_id: Option<i64>, age_minutes: i64, score: i64) -> CommentNode {
        let created_at = Utc::now() - Duration::minutes(age_minutes);
        CommentNode {
            id,
            article_id: 1,
            parent_id,
            depth: 0,
            content: String::new(),
            author: None,
            like_count: score.max(0),
            dislike_count: (-score).max(0),
            score,
            reply_count: 0,
            is_deleted: false,
            is_edited: false,
            created_at,
            updated_at: created_at,
            my_judgement: None,
            replies: Vec::new(),
        }
    }

    #[test]
    fn test_assemble_forest_drops_orphans_and_caps_depth() {
        let nodes = vec![
            node(1, None, 10, 0),
            node(2, Some(1), 9, 0),
            node(3, Some(2), 8, 0),
            node(4, Some(42), 7, 0),
        ];
        let forest = assemble_forest(nodes.clone(), CommentSort::Oldest, 5);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].size(), 3);

        let capped = assemble_forest(nodes, CommentSort::Oldest, 2);
        assert_eq!(capped[0].height(), 2);
    }

    #[test]
    fn test_top_sort_breaks_ties_newest_first() {
        let forest = assemble_forest(
            vec![node(1, None, 30, 2), node(2, None, 20, 5), node(3, None, 10, 2)],
            CommentSort::Top,
            5,
        );
        let ids: Vec<i64> = forest.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    proptest! {
        #[test]
        fn prop_forest_never_exceeds_max_depth(
            parents in proptest::collection::vec(0usize..20, 1..40),
            max_depth in 1usize..6,
        ) {
            // node i+1 hangs under an earlier node (or is a root when the pick is 0)
            let nodes: Vec<CommentNode> = parents
                .iter()
                .enumerate()
                .map(|(i, pick)| {
                    let id = i as i64 + 1;
                    let parent = (*pick % (i + 1)) as i64;
                    node(id, (parent > 0).then_some(parent), 100 - i as i64, 0)
                })
                .collect();
            let forest = assemble_forest(nodes, CommentSort::Newest, max_depth);
            for root in &forest {
                prop_assert!(root.height() <= max_depth);
            }
        }
    }
}
