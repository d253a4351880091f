//! redb table definitions for the confhub state store.
//!
//! Row tables use `&str` keys and `&[u8]` values (JSON-serialized rows).
//! Ids are rendered zero-padded so key order equals id order; rows that
//! are scanned per namespace are keyed `{namespace_id}/{id}`.

use redb::TableDefinition;

/// Row table shape: padded string key, JSON value.
pub type RowTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Apps keyed by `{id}`.
pub const APPS: RowTable = TableDefinition::new("apps");

/// Clusters keyed by `{id}`.
pub const CLUSTERS: RowTable = TableDefinition::new("clusters");

/// Namespaces keyed by `{id}`.
pub const NAMESPACES: RowTable = TableDefinition::new("namespaces");

/// Config items keyed by `{namespace_id}/{id}`.
pub const ITEMS: RowTable = TableDefinition::new("items");

/// Releases keyed by `{id}`.
pub const RELEASES: RowTable = TableDefinition::new("releases");

/// Release history keyed by `{namespace_id}/{id}`.
pub const RELEASE_HISTORY: RowTable =
    TableDefinition::new("release_history");

/// Commits keyed by `{namespace_id}/{id}`.
pub const COMMITS: RowTable = TableDefinition::new("commits");

/// Audit records keyed by `{id}`.
pub const RECORDS: RowTable = TableDefinition::new("records");

/// Client instance rows keyed by `{id}`.
pub const INSTANCES: RowTable = TableDefinition::new("instances");

/// Id sequences and the store revision counter.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key under [`META`] holding the store-wide revision.
pub const REVISION_KEY: &str = "revision";

/// Id sequence per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seq {
    App,
    Cluster,
    Namespace,
    Item,
    Release,
    History,
    Commit,
    Record,
    Instance,
}

impl Seq {
    pub fn key(&self) -> &'static str {
        match self {
            Seq::App => "seq/apps",
            Seq::Cluster => "seq/clusters",
            Seq::Namespace => "seq/namespaces",
            Seq::Item => "seq/items",
            Seq::Release => "seq/releases",
            Seq::History => "seq/release_history",
            Seq::Commit => "seq/commits",
            Seq::Record => "seq/records",
            Seq::Instance => "seq/instances",
        }
    }
}

pub fn id_key(id: u64) -> String {
    format!("{id:020}")
}

pub fn scoped_key(scope: u64, id: u64) -> String {
    format!("{scope:020}/{id:020}")
}

pub fn scope_prefix(scope: u64) -> String {
    format!("{scope:020}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_keys_sort_numerically() {
        assert!(id_key(9) < id_key(10));
        assert!(scoped_key(1, 99) < scoped_key(1, 100));
        assert!(scoped_key(1, 5).starts_with(&scope_prefix(1)));
        assert!(!scoped_key(11, 5).starts_with(&scope_prefix(1)));
    }
}
