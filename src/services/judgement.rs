//! Judgement service (likes and dislikes)

use anyhow::Context;
use std::sync::Arc;

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{ArticleMetadataRepository, CommentRepository, JudgementRepository};
use crate::models::{Judgement, JudgementSummary, JudgementTarget, TargetType, User};
use crate::services::comment::tree_cache_pattern;

#[derive(Debug, thiserror::Error)]
pub enum JudgementServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct JudgementService {
    judgement_repo: Arc<dyn JudgementRepository>,
    comment_repo: Arc<dyn CommentRepository>,
    article_repo: Arc<dyn ArticleMetadataRepository>,
    cache: Cache,
}

impl JudgementService {
    pub fn new(
        judgement_repo: Arc<dyn JudgementRepository>,
        comment_repo: Arc<dyn CommentRepository>,
        article_repo: Arc<dyn ArticleMetadataRepository>,
        cache: Cache,
    ) -> Self {
        Self {
            judgement_repo,
            comment_repo,
            article_repo,
            cache,
        }
    }

    /// Like, dislike or clear a judgement on an article or comment.
    ///
    /// Repeating the current value toggles it off. Returns the target's
    /// counters after the change.
    pub async fn judge(
        &self,
        target: JudgementTarget,
        user: &User,
        requested: Option<Judgement>,
    ) -> Result<JudgementSummary, JudgementServiceError> {
        let comment_article = self.check_target(target, user).await?;

        let change = self
            .judgement_repo
            .apply(target, user.id, requested)
            .await
            .context("Failed to apply judgement")?;

        if change.changed() {
            if let Some(article_id) = comment_article {
                if let Err(e) = self
                    .cache
                    .delete_pattern(&tree_cache_pattern(article_id))
                    .await
                {
                    tracing::warn!("Failed to invalidate comment trees of {}: {}", article_id, e);
                }
            }
            tracing::debug!(
                "User {} judged {} {}: {:?} -> {:?}",
                user.id,
                target.target_type,
                target.target_id,
                change.previous,
                change.current
            );
        }

        let (likes, dislikes) = self.counters(target).await?;
        Ok(JudgementSummary::new(likes, dislikes, change.current))
    }

    /// Counters of a target and, for a signed-in viewer, their judgement
    pub async fn summary(
        &self,
        target: JudgementTarget,
        viewer: Option<&User>,
    ) -> Result<JudgementSummary, JudgementServiceError> {
        let (likes, dislikes) = self.counters(target).await?;
        let mine = match viewer {
            Some(user) => self
                .judgement_repo
                .get(target, user.id)
                .await
                .context("Failed to load judgement")?,
            None => None,
        };
        Ok(JudgementSummary::new(likes, dislikes, mine))
    }

    /// Make sure the target can be judged by `user`.
    /// For comments, returns the article the comment belongs to.
    async fn check_target(
        &self,
        target: JudgementTarget,
        user: &User,
    ) -> Result<Option<i64>, JudgementServiceError> {
        match target.target_type {
            TargetType::Article => {
                self.article_repo
                    .get_by_id(target.target_id)
                    .await
                    .context("Failed to load article metadata")?
                    .ok_or_else(|| not_found(target))?;
                Ok(None)
            }
            TargetType::Comment => {
                let comment = self
                    .comment_repo
                    .get_by_id(target.target_id)
                    .await
                    .context("Failed to load comment")?
                    .filter(|c| !c.is_deleted)
                    .ok_or_else(|| not_found(target))?;
                if comment.user_id == Some(user.id) {
                    return Err(JudgementServiceError::ValidationError(
                        "You cannot judge your own comment".to_string(),
                    ));
                }
                Ok(Some(comment.article_id))
            }
        }
    }

    async fn counters(&self, target: JudgementTarget) -> Result<(i64, i64), JudgementServiceError> {
        self.judgement_repo
            .counters(target)
            .await
            .context("Failed to load counters")?
            .ok_or_else(|| not_found(target))
    }
}

fn not_found(target: JudgementTarget) -> JudgementServiceError {
    JudgementServiceError::NotFound(format!("{} {}", target.target_type, target.target_id))
}
