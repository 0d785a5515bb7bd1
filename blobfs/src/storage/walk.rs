//! Depth-first traversal for drivers without a native walk, built on `list` and `stat`.

use std::future::Future;
use std::pin::Pin;

use tracing::info;

use super::{StorageDriver, WalkControl, WalkFn};
use crate::error::Result;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Visits every entry below `from` in sorted order, calling `visitor` on each.
///
/// The start path itself is not visited. Entries that vanish between the
/// listing and their stat are skipped.
pub async fn walk_fallback<D>(driver: &D, from: &str, visitor: &mut WalkFn<'_>) -> Result<()>
where
    D: StorageDriver + ?Sized,
{
    walk_dir(driver, from.to_string(), visitor).await
}

fn walk_dir<'a, 'v, D>(
    driver: &'a D,
    dir: String,
    visitor: &'a mut WalkFn<'v>,
) -> BoxFuture<'a, Result<()>>
where
    D: StorageDriver + ?Sized,
    'v: 'a,
{
    Box::pin(async move {
        let mut children = driver.list(&dir).await?;
        children.sort();

        for child in children {
            let info = match driver.stat(&child).await {
                Ok(info) => info,
                Err(err) if err.is_not_found() => {
                    info!(path = %child, "ignoring deleted path");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match (visitor(&info)?, info.is_dir()) {
                (WalkControl::Continue, true) => walk_dir(driver, child, &mut *visitor).await?,
                (WalkControl::Continue, false) => {}
                (WalkControl::SkipDir, true) => {}
                (WalkControl::SkipDir, false) => return Ok(()),
            }
        }
        Ok(())
    })
}
