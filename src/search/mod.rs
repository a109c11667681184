//! Search index
//!
//! Incremental token index over artifact name, description, labels, and
//! content. Derived state only: the store is authoritative and the index is
//! rebuildable from it at any time (used on bootstrap from a checkpoint).
//! The materializer updates the index in the same apply step that mutates
//! the store, so the index never lags the store by more than the entry
//! currently being applied.
//!
//! Queries are deterministic: results are ordered by the requested sort key
//! with the artifact id as tie-break, so identical queries against an
//! unchanged index return identical pages.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::store::types::{ArtifactType, VersionRecord};

/// Which fields a query matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchScope {
    /// Name only
    Name,
    /// Description only
    Description,
    /// Labels only
    Labels,
    /// Name, description, labels, and content
    Everything,
}

/// Sort key for query results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortBy {
    /// Artifact name, falling back to the id for unnamed artifacts
    Name,
    /// Creation time of the latest version
    CreatedOn,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One artifact in a result page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchedArtifact {
    /// Artifact id
    pub id: String,
    /// Name of the latest version
    pub name: Option<String>,
    /// Description of the latest version
    pub description: Option<String>,
    /// Content type tag
    pub artifact_type: ArtifactType,
    /// Creation time of the latest version, unix millis
    pub created_on: u64,
}

/// A result page plus the total match count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Count of all matches, independent of paging
    pub count: usize,
    /// The requested page
    pub artifacts: Vec<SearchedArtifact>,
}

/// Indexed view of one artifact's latest version
#[derive(Debug, Clone)]
struct Doc {
    name: Option<String>,
    description: Option<String>,
    artifact_type: ArtifactType,
    created_on: u64,
    name_tokens: BTreeSet<String>,
    description_tokens: BTreeSet<String>,
    label_tokens: BTreeSet<String>,
    content_tokens: BTreeSet<String>,
}

/// Token index over artifact fields
#[derive(Debug, Default)]
pub struct SearchIndex {
    docs: HashMap<String, Doc>,
}

impl SearchIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index (or re-index) an artifact from its latest version
    pub fn index(&mut self, id: &str, latest: &VersionRecord) {
        let meta = &latest.metadata;
        let doc = Doc {
            name: meta.name.clone(),
            description: meta.description.clone(),
            artifact_type: latest.artifact_type,
            created_on: latest.created_on,
            name_tokens: tokenize(meta.name.as_deref().unwrap_or_default()),
            description_tokens: tokenize(meta.description.as_deref().unwrap_or_default()),
            label_tokens: meta
                .labels
                .iter()
                .flat_map(|l| tokenize(l))
                .collect(),
            content_tokens: tokenize(&String::from_utf8_lossy(&latest.content)),
        };
        self.docs.insert(id.to_string(), doc);
    }

    /// Drop an artifact from the index
    pub fn remove(&mut self, id: &str) {
        self.docs.remove(id);
    }

    /// Rebuild the whole index from store contents
    pub fn rebuild(&mut self, artifacts: impl IntoIterator<Item = (String, VersionRecord)>) {
        self.docs.clear();
        for (id, latest) in artifacts {
            self.index(&id, &latest);
        }
    }

    /// Number of indexed artifacts
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Run a paginated query
    ///
    /// Every token of `term` must appear in the scoped field(s) of a
    /// matching artifact. An empty term matches every artifact.
    pub fn query(
        &self,
        term: &str,
        scope: SearchScope,
        offset: usize,
        limit: usize,
        sort_by: SortBy,
        sort_order: SortOrder,
    ) -> SearchResults {
        let term_tokens = tokenize(term);

        let mut matches: Vec<(&String, &Doc)> = self
            .docs
            .iter()
            .filter(|(_, doc)| doc_matches(doc, &term_tokens, scope))
            .collect();

        matches.sort_by(|(id_a, doc_a), (id_b, doc_b)| {
            let cmp = match sort_by {
                SortBy::Name => sort_name(doc_a, id_a).cmp(sort_name(doc_b, id_b)),
                SortBy::CreatedOn => doc_a.created_on.cmp(&doc_b.created_on),
            };
            let cmp = match sort_order {
                SortOrder::Asc => cmp,
                SortOrder::Desc => cmp.reverse(),
            };
            // Tie-break on artifact id keeps pages reproducible
            cmp.then_with(|| id_a.cmp(id_b))
        });

        let count = matches.len();
        let artifacts = matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(id, doc)| SearchedArtifact {
                id: id.clone(),
                name: doc.name.clone(),
                description: doc.description.clone(),
                artifact_type: doc.artifact_type,
                created_on: doc.created_on,
            })
            .collect();

        SearchResults { count, artifacts }
    }
}

fn sort_name<'a>(doc: &'a Doc, id: &'a str) -> &'a str {
    doc.name.as_deref().unwrap_or(id)
}

fn doc_matches(doc: &Doc, term_tokens: &BTreeSet<String>, scope: SearchScope) -> bool {
    term_tokens.iter().all(|token| match scope {
        SearchScope::Name => doc.name_tokens.contains(token),
        SearchScope::Description => doc.description_tokens.contains(token),
        SearchScope::Labels => doc.label_tokens.contains(token),
        SearchScope::Everything => {
            doc.name_tokens.contains(token)
                || doc.description_tokens.contains(token)
                || doc.label_tokens.contains(token)
                || doc.content_tokens.contains(token)
        }
    })
}

/// Lowercased alphanumeric runs of `text`
fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::identity::GlobalId;
    use crate::store::types::EditableMetadata;

    fn record(name: Option<&str>, description: Option<&str>, created_on: u64) -> VersionRecord {
        VersionRecord {
            version: 1,
            global_id: GlobalId::new(created_on),
            artifact_type: ArtifactType::Json,
            content: Bytes::from_static(b"{\"company\":\"redhat\"}"),
            metadata: EditableMetadata {
                name: name.map(String::from),
                description: description.map(String::from),
                labels: vec!["payments".to_string()],
            },
            created_on,
        }
    }

    fn sample_index() -> SearchIndex {
        let mut index = SearchIndex::new();
        index.index("a1", &record(Some("invoice events"), Some("billing stream"), 10));
        index.index("a2", &record(Some("order events"), Some("order stream"), 20));
        index.index("a3", &record(None, None, 30));
        index
    }

    #[test]
    fn test_scope_name_vs_description() {
        let index = sample_index();

        let results = index.query("invoice", SearchScope::Name, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 1);
        assert_eq!(results.artifacts[0].id, "a1");

        let results = index.query("invoice", SearchScope::Description, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 0);

        let results = index.query("billing", SearchScope::Description, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 1);
        assert_eq!(results.artifacts[0].id, "a1");
    }

    #[test]
    fn test_everything_reaches_content_and_labels() {
        let index = sample_index();

        let results = index.query("redhat", SearchScope::Everything, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 3);

        let results = index.query("payments", SearchScope::Labels, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 3);
    }

    #[test]
    fn test_multi_token_term_requires_all() {
        let index = sample_index();

        let results = index.query("order stream", SearchScope::Description, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 1);
        assert_eq!(results.artifacts[0].id, "a2");

        let results = index.query("order billing", SearchScope::Description, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 0);
    }

    #[test]
    fn test_pagination_and_total_count() {
        let index = sample_index();

        let page = index.query("events", SearchScope::Name, 0, 1, SortBy::Name, SortOrder::Asc);
        assert_eq!(page.count, 2);
        assert_eq!(page.artifacts.len(), 1);
        assert_eq!(page.artifacts[0].id, "a1");

        let page = index.query("events", SearchScope::Name, 1, 1, SortBy::Name, SortOrder::Asc);
        assert_eq!(page.count, 2);
        assert_eq!(page.artifacts.len(), 1);
        assert_eq!(page.artifacts[0].id, "a2");

        let page = index.query("events", SearchScope::Name, 2, 1, SortBy::Name, SortOrder::Asc);
        assert_eq!(page.count, 2);
        assert!(page.artifacts.is_empty());
    }

    #[test]
    fn test_sort_orders_and_tiebreak() {
        let index = sample_index();

        let asc = index.query("", SearchScope::Everything, 0, 10, SortBy::CreatedOn, SortOrder::Asc);
        let ids: Vec<&str> = asc.artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "a2", "a3"]);

        let desc = index.query("", SearchScope::Everything, 0, 10, SortBy::CreatedOn, SortOrder::Desc);
        let ids: Vec<&str> = desc.artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a3", "a2", "a1"]);

        // Unnamed artifacts sort by id when sorting on name
        let by_name = index.query("", SearchScope::Everything, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(by_name.artifacts.last().unwrap().id, "a2");
    }

    #[test]
    fn test_repeated_queries_identical() {
        let index = sample_index();
        let a = index.query("events", SearchScope::Everything, 0, 10, SortBy::Name, SortOrder::Desc);
        let b = index.query("events", SearchScope::Everything, 0, 10, SortBy::Name, SortOrder::Desc);
        assert_eq!(a, b);
    }

    #[test]
    fn test_remove_and_rebuild() {
        let mut index = sample_index();
        index.remove("a1");
        assert_eq!(index.len(), 2);
        let results = index.query("invoice", SearchScope::Name, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 0);

        index.rebuild(vec![("a9".to_string(), record(Some("fresh"), None, 1))]);
        assert_eq!(index.len(), 1);
        let results = index.query("fresh", SearchScope::Name, 0, 10, SortBy::Name, SortOrder::Asc);
        assert_eq!(results.count, 1);
    }
}
