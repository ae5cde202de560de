//! Postgres preview target repositories.
//!
//! One table per target kind; updates are plain last-write-wins so the
//! persister stays idempotent without read-modify-write.

use async_trait::async_trait;
use uuid::Uuid;

use crate::application::repos::{
    ListingsRepo, PreviewPatch, RepoError, TemplatesRepo, UserPagesRepo,
};

use super::{PostgresRepositories, map_sqlx_error};

async fn update_preview(
    repos: &PostgresRepositories,
    table: &'static str,
    id: Uuid,
    patch: &PreviewPatch,
) -> Result<bool, RepoError> {
    let sql = format!(
        r#"
        UPDATE {table}
           SET preview_image_url = $2,
               preview_status = $3::preview_status,
               preview_updated_at = $4
         WHERE id = $1
        "#
    );

    let affected = sqlx::query(&sql)
        .bind(id)
        .bind(&patch.image_url)
        .bind(patch.status.as_str())
        .bind(patch.updated_at)
        .execute(repos.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

    Ok(affected > 0)
}

#[async_trait]
impl ListingsRepo for PostgresRepositories {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError> {
        update_preview(self, "page_listings", id, patch).await
    }
}

#[async_trait]
impl UserPagesRepo for PostgresRepositories {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError> {
        update_preview(self, "user_pages", id, patch).await
    }
}

#[async_trait]
impl TemplatesRepo for PostgresRepositories {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError> {
        update_preview(self, "templates", id, patch).await
    }
}
