//! Writes finished previews back to their owning records.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::repos::{
    ListingsRepo, PreviewPatch, RepoError, TemplatesRepo, UserPagesRepo,
};
use crate::domain::types::{RenderTarget, TargetKind};

/// Resolves the owning-record repository from the closed [`TargetKind`]
/// mapping and applies the preview patch.
///
/// Idempotent by construction: the patch is a plain last-write-wins update,
/// so repeating it with the same arguments leaves the row unchanged. A
/// target row that no longer exists is a logged no-op; the render itself
/// still succeeded.
pub struct ResultPersister {
    listings: Arc<dyn ListingsRepo>,
    user_pages: Arc<dyn UserPagesRepo>,
    templates: Arc<dyn TemplatesRepo>,
}

impl ResultPersister {
    pub fn new(
        listings: Arc<dyn ListingsRepo>,
        user_pages: Arc<dyn UserPagesRepo>,
        templates: Arc<dyn TemplatesRepo>,
    ) -> Self {
        Self {
            listings,
            user_pages,
            templates,
        }
    }

    pub async fn persist(
        &self,
        target: &RenderTarget,
        image_url: &str,
    ) -> Result<(), RepoError> {
        let patch = PreviewPatch::completed(image_url, OffsetDateTime::now_utc());

        let updated = match target.kind {
            TargetKind::PageListing => self.listings.update_preview(target.id, &patch).await?,
            TargetKind::UserPage => self.user_pages.update_preview(target.id, &patch).await?,
            TargetKind::Template => self.templates.update_preview(target.id, &patch).await?,
        };

        if updated {
            info!(
                target = "application::persist",
                entity_kind = target.kind.as_str(),
                entity_id = %target.id,
                image_url,
                "Preview reference persisted"
            );
        } else {
            warn!(
                target = "application::persist",
                entity_kind = target.kind.as_str(),
                entity_id = %target.id,
                "Preview target row missing; update skipped"
            );
        }
        Ok(())
    }
}
