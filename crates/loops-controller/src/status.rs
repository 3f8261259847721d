use loops_core::Resource;
use loops_storage::{ResourceApi, StorageResult};
use tracing::debug;

/// Write `object`'s status only when it differs from `old_status`.
///
/// The write carries no resource version, so it does not conflict with spec
/// or metadata writes that landed since `object` was read. Returns whether a
/// write happened.
pub async fn patch_status_if_changed<R, S>(
    api: &ResourceApi<R>,
    object: &R,
    old_status: &S,
    new_status: &S,
    controller: &str,
) -> StorageResult<bool>
where
    R: Resource,
    S: PartialEq,
{
    if old_status == new_status {
        debug!(controller, kind = R::KIND, key = %object.key(), "status unchanged, skipping update");
        return Ok(false);
    }

    let mut patch = object.clone();
    patch.metadata_mut().resource_version.clear();
    api.update_status(&patch).await?;
    debug!(controller, kind = R::KIND, key = %object.key(), "status updated");
    Ok(true)
}
