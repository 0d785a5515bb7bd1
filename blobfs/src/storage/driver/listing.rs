//! Prefix listings, and the directory view reconstructed from them.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::error::{DriverError, Result};
use crate::storage::backend::BlobStore;
use crate::storage::paths::PathMapper;

/// Lazy sequence of listing pages for one key prefix.
///
/// Each call to [`ListPager::next_page`] fetches one page. A continuation
/// marker the backend already returned during this listing is a contract
/// violation and ends the listing with [`DriverError::PaginationStalled`].
pub struct ListPager<'a> {
    store: &'a dyn BlobStore,
    prefix: String,
    max_results: Option<usize>,
    marker: Option<String>,
    seen: HashSet<String>,
    done: bool,
}

impl<'a> ListPager<'a> {
    pub fn new(store: &'a dyn BlobStore, prefix: impl Into<String>) -> Self {
        ListPager {
            store,
            prefix: prefix.into(),
            max_results: None,
            marker: None,
            seen: HashSet::new(),
            done: false,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    /// Starts over from the first page.
    pub fn restart(&mut self) {
        self.marker = None;
        self.seen.clear();
        self.done = false;
    }

    /// Fetches the next page of keys, or `None` once the listing is exhausted.
    ///
    /// On a stalled marker the error carries the raw keys of the offending page.
    pub async fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }

        debug!(prefix = %self.prefix, marker = ?self.marker, "listing page");
        let page = self
            .store
            .list_page(&self.prefix, self.marker.as_deref(), self.max_results)
            .await?;

        let next_marker = page.next_marker.filter(|marker| !marker.is_empty());
        match next_marker {
            Some(marker) if page.keys.is_empty() => {
                debug!(prefix = %self.prefix, %marker, "empty page carried a marker");
                self.done = true;
            }
            Some(marker) => {
                if !self.seen.insert(marker.clone()) {
                    self.done = true;
                    return Err(DriverError::PaginationStalled {
                        prefix: self.prefix.clone(),
                        marker,
                        listed: page.keys,
                    });
                }
                self.marker = Some(marker);
            }
            None => self.done = true,
        }
        Ok(Some(page.keys))
    }
}

/// Every blob below `virt_path`, as virtual paths.
///
/// A stalled listing still hands back what it collected, inside the error.
pub async fn list_blobs(
    store: &dyn BlobStore,
    mapper: &PathMapper,
    virt_path: &str,
) -> Result<Vec<String>> {
    // Listing the root still ends in `/`, so keys that merely share the
    // root's name are not picked up.
    let mut virt_path = virt_path.to_string();
    if !virt_path.ends_with('/') {
        virt_path.push('/');
    }

    let mut out = vec![];
    let mut pager = ListPager::new(store, mapper.map(&virt_path));
    loop {
        match pager.next_page().await {
            Ok(Some(keys)) => out.extend(keys.iter().map(|key| mapper.unmap(key))),
            Ok(None) => break,
            Err(DriverError::PaginationStalled {
                prefix,
                marker,
                listed,
            }) => {
                out.extend(listed.iter().map(|key| mapper.unmap(key)));
                warn!(%prefix, %marker, listed = out.len(), "backend repeated a listing marker");
                return Err(DriverError::PaginationStalled {
                    prefix,
                    marker,
                    listed: out,
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

/// Finds the entries exactly one level below `prefix`.
///
/// A blob right under the prefix is returned as is; anything deeper collapses
/// into the virtual directory it sits in. Direct descendants of `/` in
/// `{/foo, /bar/1, /bar/2}` are `{/foo, /bar}`, those of `/bar` are
/// `{/bar/1, /bar/2}`.
pub fn direct_descendants(blobs: &[String], prefix: &str) -> Vec<String> {
    let mut prefix = prefix.to_string();
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    let mut out = BTreeSet::new();
    for blob in blobs {
        let Some(rel) = blob.strip_prefix(&prefix) else {
            continue;
        };
        match rel.find('/') {
            None => {
                out.insert(blob.clone());
            }
            Some(idx) => {
                out.insert(format!("{prefix}{}", &rel[..idx]));
            }
        }
    }
    out.into_iter().collect()
}
