//! Idempotent task definition management.
//!
//! Registration is not idempotent on the platform side: every register
//! call adds a revision. Callers go through [`ensure_task_definition`],
//! which inspects the family first and only registers when needed.
//! Two racing callers may still both register; the duplicate revision is
//! harmless and [`cleanup_stale_revisions`] removes it later.

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::ContainerResult;
use crate::platform::ContainerPlatform;
use crate::types::{TaskDefinitionId, TaskDefinitionSpec};

/// What to do when the family already has a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Use the latest revision as is, whatever it contains.
    #[default]
    ReuseLatest,
    /// Register a new revision when the latest one was built from a
    /// different spec.
    ReplaceOnDrift,
}

/// Return a task definition for `family`, registering one only if needed.
///
/// The flag is `true` when an existing revision was returned and `false`
/// when this call registered it, so a caller that fails afterwards knows
/// whether it left something behind.
pub async fn ensure_task_definition<P>(
    platform: &P,
    ctx: &Context,
    family: &str,
    desired: &TaskDefinitionSpec,
    policy: ReusePolicy,
) -> ContainerResult<(TaskDefinitionId, bool)>
where
    P: ContainerPlatform + ?Sized,
{
    if !platform.is_task_definition_family_exist(ctx, family).await? {
        let id = platform.register_task_definition(ctx, family, desired).await?;
        info!(task_definition = %id, "registered task definition");
        return Ok((id, false));
    }

    let latest = platform.latest_task_definition(ctx, family).await?;
    match policy {
        ReusePolicy::ReuseLatest => {
            debug!(task_definition = %latest.id, "reusing latest task definition");
            Ok((latest.id, true))
        }
        ReusePolicy::ReplaceOnDrift => {
            let digest = desired.digest()?;
            if latest.spec_digest.as_deref() == Some(digest.as_str()) {
                debug!(task_definition = %latest.id, "latest task definition is current");
                return Ok((latest.id, true));
            }
            warn!(
                task_definition = %latest.id,
                recorded = latest.spec_digest.as_deref().unwrap_or("none"),
                desired = %digest,
                "task definition drifted, registering new revision"
            );
            let id = platform.register_task_definition(ctx, family, desired).await?;
            info!(task_definition = %id, "registered task definition");
            Ok((id, false))
        }
    }
}

/// Deregister every active revision of `family` except the latest one.
///
/// Returns the revisions removed.
pub async fn cleanup_stale_revisions<P>(
    platform: &P,
    ctx: &Context,
    family: &str,
) -> ContainerResult<Vec<TaskDefinitionId>>
where
    P: ContainerPlatform + ?Sized,
{
    let revisions = platform.list_task_definition_revisions(ctx, family).await?;
    let Some(latest) = revisions.iter().map(|id| id.revision).max() else {
        return Ok(Vec::new());
    };

    let mut removed = Vec::new();
    for id in revisions.into_iter().filter(|id| id.revision != latest) {
        platform.deregister_task_definition(ctx, &id).await?;
        debug!(task_definition = %id, "deregistered stale revision");
        removed.push(id);
    }
    if !removed.is_empty() {
        info!(%family, removed = removed.len(), latest, "cleaned up stale task definitions");
    }
    Ok(removed)
}

/// Deregister every active revision of `family`.
pub async fn deregister_family<P>(
    platform: &P,
    ctx: &Context,
    family: &str,
) -> ContainerResult<usize>
where
    P: ContainerPlatform + ?Sized,
{
    let revisions = platform.list_task_definition_revisions(ctx, family).await?;
    for id in &revisions {
        platform.deregister_task_definition(ctx, id).await?;
    }
    debug!(%family, count = revisions.len(), "deregistered task definition family");
    Ok(revisions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::{EcsPlatform, LocalEcs};
    use crate::types::tests::service_opts;

    fn spec(image: &str) -> TaskDefinitionSpec {
        let mut opts = service_opts("c1", "zk1");
        opts.common.container_image = image.to_string();
        TaskDefinitionSpec::for_service(&opts)
    }

    #[tokio::test]
    async fn create_then_reuse() {
        let ecs = EcsPlatform::new(LocalEcs::new());
        let ctx = Context::background();
        let family = "c1-zk1";

        assert!(!ecs.is_task_definition_family_exist(&ctx, family).await.unwrap());

        let (first, existed) =
            ensure_task_definition(&ecs, &ctx, family, &spec("img:1"), ReusePolicy::ReuseLatest)
                .await
                .unwrap();
        assert!(!existed);
        assert_eq!(first, TaskDefinitionId::new(family, 1));
        assert!(ecs.is_task_definition_family_exist(&ctx, family).await.unwrap());
        assert!(ecs.is_task_definition_exist(&ctx, &first).await.unwrap());

        let latest = ecs.latest_task_definition(&ctx, family).await.unwrap();
        assert_eq!(latest.id, first);

        // A different spec is ignored under the default policy.
        let (again, existed) =
            ensure_task_definition(&ecs, &ctx, family, &spec("img:2"), ReusePolicy::ReuseLatest)
                .await
                .unwrap();
        assert!(existed);
        assert_eq!(again, first);

        ecs.deregister_task_definition(&ctx, &first).await.unwrap();
        assert!(!ecs.is_task_definition_exist(&ctx, &first).await.unwrap());
        assert!(!ecs.is_task_definition_family_exist(&ctx, family).await.unwrap());
    }

    #[tokio::test]
    async fn drift_registers_new_revision() {
        let ecs = EcsPlatform::new(LocalEcs::new());
        let ctx = Context::background();
        let family = "c1-zk1";
        let policy = ReusePolicy::ReplaceOnDrift;

        let (v1, _) = ensure_task_definition(&ecs, &ctx, family, &spec("img:1"), policy)
            .await
            .unwrap();

        let (same, existed) = ensure_task_definition(&ecs, &ctx, family, &spec("img:1"), policy)
            .await
            .unwrap();
        assert!(existed);
        assert_eq!(same, v1);

        let (v2, existed) = ensure_task_definition(&ecs, &ctx, family, &spec("img:2"), policy)
            .await
            .unwrap();
        assert!(!existed);
        assert_eq!(v2.revision, v1.revision + 1);
        assert_eq!(ecs.latest_task_definition(&ctx, family).await.unwrap().id, v2);
    }

    #[tokio::test]
    async fn cleanup_keeps_only_latest() {
        let ecs = EcsPlatform::new(LocalEcs::new());
        let ctx = Context::background();
        let family = "c1-zk1";

        // Simulates two racing creators plus a later re-registration.
        for _ in 0..3 {
            ecs.register_task_definition(&ctx, family, &spec("img:1")).await.unwrap();
        }
        let removed = cleanup_stale_revisions(&ecs, &ctx, family).await.unwrap();
        assert_eq!(removed.len(), 2);

        let left = ecs.list_task_definition_revisions(&ctx, family).await.unwrap();
        assert_eq!(left, vec![TaskDefinitionId::new(family, 3)]);

        // Nothing further to remove.
        assert!(cleanup_stale_revisions(&ecs, &ctx, family).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_of_unknown_family_is_noop() {
        let ecs = EcsPlatform::new(LocalEcs::new());
        let removed = cleanup_stale_revisions(&ecs, &Context::background(), "nope")
            .await
            .unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn cancelled_context_stops_ensure() {
        let ecs = EcsPlatform::new(LocalEcs::new());
        let ctx = Context::background();
        ctx.cancel();
        let err = ensure_task_definition(&ecs, &ctx, "c1-zk1", &spec("img:1"), ReusePolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ContainerError::Cancelled(_)));
        assert!(
            !ecs.is_task_definition_family_exist(&Context::background(), "c1-zk1")
                .await
                .unwrap()
        );
    }
}
