// Resource Queries
// Filtered, restartable, keyset-paginated access to codebase resources

use crate::models::{CodebaseResource, ResourceType};
use crate::store::graph::ResourceGraph;
use crate::store::read;

use std::collections::HashSet;
use std::ops::Bound;
use std::sync::Arc;
use uuid::Uuid;

/// Default number of rows per page
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Match on the resource status tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    Any,
    /// No status set (or an empty one)
    Unset,
    Is(String),
}

/// Resource filter; every set criterion must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    /// Directory prefix: "usr/lib" matches "usr/lib" and "usr/lib/..."
    pub path_prefix: Option<String>,
    pub status: StatusFilter,
    pub extension: Option<String>,
    pub resource_type: Option<ResourceType>,
    /// `Some(true)` only resources attached to a package, `Some(false)` only unattached
    pub in_package: Option<bool>,
}

impl ResourceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files() -> Self {
        Self::default().of_type(ResourceType::File)
    }

    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(crate::models::normalize_path(&prefix.into()));
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = StatusFilter::Is(status.into());
        self
    }

    pub fn without_status(mut self) -> Self {
        self.status = StatusFilter::Unset;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn of_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    pub fn in_package(mut self, attached: bool) -> Self {
        self.in_package = Some(attached);
        self
    }

    fn matches(&self, resource: &CodebaseResource, packaged: Option<&HashSet<String>>) -> bool {
        if let Some(prefix) = self.path_prefix.as_deref().filter(|p| !p.is_empty()) {
            let under = resource.path == prefix
                || (resource.path.starts_with(prefix)
                    && resource.path.as_bytes().get(prefix.len()) == Some(&b'/'));
            if !under {
                return false;
            }
        }

        match &self.status {
            StatusFilter::Any => {}
            StatusFilter::Unset if resource.has_status() => return false,
            StatusFilter::Is(status) if resource.status.as_deref() != Some(status.as_str()) => {
                return false
            }
            _ => {}
        }

        if let Some(ext) = &self.extension {
            if !resource.extension.eq_ignore_ascii_case(ext) {
                return false;
            }
        }

        if let Some(kind) = self.resource_type {
            if resource.resource_type != kind {
                return false;
            }
        }

        match (self.in_package, packaged) {
            (Some(attached), Some(paths)) => paths.contains(&resource.path) == attached,
            _ => true,
        }
    }
}

/// One page of results; `next_cursor` is `None` on the last page
#[derive(Debug, Clone)]
pub struct ResourcePage {
    pub items: Vec<CodebaseResource>,
    pub next_cursor: Option<String>,
}

/// Lazy resource query
///
/// Nothing is read until a page is requested. Pages are keyed by the last
/// path returned, so a query can be restarted from any cursor and stays
/// consistent when rows are inserted between pages.
#[derive(Debug, Clone)]
pub struct ResourceQuery {
    graph: Arc<ResourceGraph>,
    filter: ResourceFilter,
    page_size: usize,
}

impl ResourceQuery {
    pub(crate) fn new(graph: Arc<ResourceGraph>, filter: ResourceFilter) -> Self {
        Self {
            graph,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn filter(&self) -> &ResourceFilter {
        &self.filter
    }

    /// Fetch the page following `after` (or the first page)
    pub fn page(&self, after: Option<&str>) -> ResourcePage {
        let packaged = self.packaged_paths();
        let prefix = self.filter.path_prefix.clone().unwrap_or_default();

        let lower = match after {
            Some(cursor) => Bound::Excluded(cursor.to_string()),
            None if prefix.is_empty() => Bound::Unbounded,
            None => Bound::Included(prefix.clone()),
        };

        let table = read(&self.graph.resources);
        let mut items = Vec::with_capacity(self.page_size.min(table.len()));
        let mut has_more = false;

        for (path, resource) in table.range::<String, _>((lower, Bound::Unbounded)) {
            if !prefix.is_empty() && path.as_str() > prefix.as_str() && !path.starts_with(&prefix) {
                break;
            }
            if !self.filter.matches(resource, packaged.as_ref()) {
                continue;
            }
            if items.len() == self.page_size {
                has_more = true;
                break;
            }
            items.push(resource.clone());
        }

        let next_cursor = if has_more {
            items.last().map(|r| r.path.clone())
        } else {
            None
        };
        ResourcePage { items, next_cursor }
    }

    /// Iterate page by page from the start
    pub fn pages(&self) -> Pages {
        Pages {
            query: self.clone(),
            cursor: None,
            done: false,
        }
    }

    /// Iterate over every matching resource, one page in memory at a time
    pub fn iter(&self) -> impl Iterator<Item = CodebaseResource> {
        self.pages().flat_map(|page| page.items)
    }

    pub fn count(&self) -> usize {
        self.pages().map(|page| page.items.len()).sum()
    }

    pub fn paths(&self) -> Vec<String> {
        self.iter().map(|r| r.path).collect()
    }

    fn packaged_paths(&self) -> Option<HashSet<String>> {
        self.filter.in_package?;
        let associations = read(&self.graph.associations);
        Some(associations.iter().map(|(path, _)| path.clone()).collect())
    }

    /// Paths attached to one package
    pub(crate) fn paths_for_package(graph: &ResourceGraph, package: Uuid) -> Vec<String> {
        read(&graph.associations)
            .iter()
            .filter(|(_, p)| *p == package)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

/// Page iterator returned by [`ResourceQuery::pages`]
pub struct Pages {
    query: ResourceQuery,
    cursor: Option<String>,
    done: bool,
}

impl Iterator for Pages {
    type Item = ResourcePage;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let page = self.query.page(self.cursor.as_deref());
        match &page.next_cursor {
            Some(cursor) => self.cursor = Some(cursor.clone()),
            None => self.done = true,
        }
        if page.items.is_empty() && self.done {
            return None;
        }
        Some(page)
    }
}
