//! Static registry of entity types and how each one is fetched and cached.

use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use super::params::{canonical_to_json, CompoundParams};

/// Every entity type the API serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
  Concepts,
  Csets,
  CsetMembersItems,
  Edges,
  Subgraph,
  AllCsets,
  Whoami,
  Usage,
  LastRefreshed,
  DbRefresh,
  ConceptSearch,
  Researchers,
  RelatedCsetConceptCounts,
  BundleReport,
  N3cComparisonRpt,
}

impl EntityKind {
  pub const ALL: [EntityKind; 15] = [
    EntityKind::Concepts,
    EntityKind::Csets,
    EntityKind::CsetMembersItems,
    EntityKind::Edges,
    EntityKind::Subgraph,
    EntityKind::AllCsets,
    EntityKind::Whoami,
    EntityKind::Usage,
    EntityKind::LastRefreshed,
    EntityKind::DbRefresh,
    EntityKind::ConceptSearch,
    EntityKind::Researchers,
    EntityKind::RelatedCsetConceptCounts,
    EntityKind::BundleReport,
    EntityKind::N3cComparisonRpt,
  ];

  /// Name of the cache slice, also used in logs and errors.
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Concepts => "concepts",
      EntityKind::Csets => "csets",
      EntityKind::CsetMembersItems => "cset_members_items",
      EntityKind::Edges => "edges",
      EntityKind::Subgraph => "subgraph",
      EntityKind::AllCsets => "all_csets",
      EntityKind::Whoami => "whoami",
      EntityKind::Usage => "usage",
      EntityKind::LastRefreshed => "last_refreshed",
      EntityKind::DbRefresh => "db_refresh",
      EntityKind::ConceptSearch => "concept_search",
      EntityKind::Researchers => "researchers",
      EntityKind::RelatedCsetConceptCounts => "related_cset_concept_counts",
      EntityKind::BundleReport => "bundle_report",
      EntityKind::N3cComparisonRpt => "n3c_comparison_rpt",
    }
  }

  pub fn descriptor(&self) -> EntityDescriptor {
    use ApiResultShape::*;
    use EntityShape::*;

    let kind = *self;
    match self {
      EntityKind::Concepts => EntityDescriptor {
        kind,
        endpoint: "get-concepts",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: PerKeyBatch(BatchSpec {
          query_param: "id",
          result_shape: ArrayOfKeyedObjects {
            key_fields: &["concept_id"],
          },
          one_row_per_key: true,
          stub: Some(concept_stub),
        }),
      },
      EntityKind::Csets => EntityDescriptor {
        kind,
        endpoint: "get-csets",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: PerKeyBatch(BatchSpec {
          query_param: "codeset_ids",
          result_shape: ArrayOfKeyedObjects {
            key_fields: &["codeset_id"],
          },
          one_row_per_key: true,
          stub: Some(cset_stub),
        }),
      },
      // Rows are grouped per concept set: cset_members_items.<codeset_id>.<concept_id>
      EntityKind::CsetMembersItems => EntityDescriptor {
        kind,
        endpoint: "get-cset-members-items",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: PerKeyBatch(BatchSpec {
          query_param: "codeset_ids",
          result_shape: ArrayOfKeyedObjects {
            key_fields: &["codeset_id", "concept_id"],
          },
          one_row_per_key: false,
          stub: None,
        }),
      },
      EntityKind::Edges => EntityDescriptor {
        kind,
        endpoint: "concept-graph",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: SingleCompoundKey(CompoundSpec {
          required: &["codeset_ids"],
          optional: &["cids"],
          key_fn: CompoundParams::canonical_key,
        }),
      },
      EntityKind::Subgraph => EntityDescriptor {
        kind,
        endpoint: "subgraph",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: SingleCompoundKey(CompoundSpec {
          required: &["concept_ids"],
          optional: &[],
          key_fn: CompoundParams::canonical_key,
        }),
      },
      EntityKind::AllCsets => whole_slice(kind, "get-all-csets", Protocol::Get, Caching::Cached),
      EntityKind::Whoami => whole_slice(kind, "whoami", Protocol::Get, Caching::Cached),
      EntityKind::Usage => whole_slice(kind, "usage", Protocol::Get, Caching::Cached),
      EntityKind::LastRefreshed => {
        whole_slice(kind, "last-refreshed", Protocol::Get, Caching::Bypass)
      }
      EntityKind::DbRefresh => whole_slice(kind, "db-refresh", Protocol::Post, Caching::Bypass),
      EntityKind::ConceptSearch => EntityDescriptor {
        kind,
        endpoint: "concept-search",
        protocol: Protocol::Get,
        caching: Caching::Bypass,
        shape: SingleCompoundKey(CompoundSpec {
          required: &["search"],
          optional: &["vocabulary_ids"],
          key_fn: CompoundParams::canonical_key,
        }),
      },
      EntityKind::Researchers => EntityDescriptor {
        kind,
        endpoint: "researchers",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: PerKeyBatch(BatchSpec {
          query_param: "ids",
          result_shape: ObjectOfObjects,
          one_row_per_key: true,
          stub: Some(researcher_stub),
        }),
      },
      EntityKind::RelatedCsetConceptCounts => EntityDescriptor {
        kind,
        endpoint: "related-cset-concept_counts",
        protocol: Protocol::Either,
        caching: Caching::Cached,
        shape: SingleCompoundKey(CompoundSpec {
          required: &["codeset_ids"],
          optional: &[],
          key_fn: CompoundParams::canonical_key,
        }),
      },
      EntityKind::BundleReport => EntityDescriptor {
        kind,
        endpoint: "bundle-report",
        protocol: Protocol::Get,
        caching: Caching::Cached,
        shape: SingleCompoundKey(CompoundSpec {
          required: &["bundle"],
          optional: &[],
          key_fn: CompoundParams::canonical_key,
        }),
      },
      EntityKind::N3cComparisonRpt => {
        whole_slice(kind, "n3c-comparison-rpt", Protocol::Get, Caching::Cached)
      }
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityKind {
  type Err = String;

  /// Accepts slice names (`cset_members_items`) and endpoint names
  /// (`get-cset-members-items`).
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    EntityKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s || kind.descriptor().endpoint == s)
      .ok_or_else(|| format!("unknown entity type: {}", s))
  }
}

fn whole_slice(
  kind: EntityKind,
  endpoint: &'static str,
  protocol: Protocol,
  caching: Caching,
) -> EntityDescriptor {
  EntityDescriptor {
    kind,
    endpoint,
    protocol,
    caching,
    shape: EntityShape::WholeSlice,
  }
}

/// Which HTTP methods an endpoint accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
  Get,
  Post,
  /// GET for small requests, POST above the size threshold
  Either,
}

/// Whether results are kept in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caching {
  Cached,
  /// Always fetched, never written to the cache
  Bypass,
}

/// How the server lays out a batch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiResultShape {
  /// `[{key_field: .., ..}, ..]`. With more than one field, rows are grouped
  /// into nested objects by the remaining fields; the first field is the
  /// requested identity.
  ArrayOfKeyedObjects { key_fields: &'static [&'static str] },
  /// `{key: [..], ..}`
  ObjectOfArrays,
  /// `{key: {..}, ..}`
  ObjectOfObjects,
  /// Any JSON value, stored as-is
  SingleValue,
}

/// Details of a per-key batch entity.
#[derive(Debug, Clone, Copy)]
pub struct BatchSpec {
  /// Query string parameter (and POST body field) carrying the keys
  pub query_param: &'static str,
  pub result_shape: ApiResultShape,
  /// Every requested key must produce exactly one entity
  pub one_row_per_key: bool,
  /// Placeholder for keys the server did not return
  pub stub: Option<fn(&str) -> Value>,
}

/// Details of a single-compound-key entity.
#[derive(Debug, Clone, Copy)]
pub struct CompoundSpec {
  pub required: &'static [&'static str],
  pub optional: &'static [&'static str],
  /// Must give the same key for the same logical request in any order
  pub key_fn: fn(&CompoundParams) -> String,
}

impl CompoundSpec {
  pub fn accepts(&self, name: &str) -> bool {
    self.required.contains(&name) || self.optional.contains(&name)
  }
}

/// The three request shapes an entity can have.
#[derive(Debug, Clone, Copy)]
pub enum EntityShape {
  /// One cached value for the whole slice, no parameters
  WholeSlice,
  /// One cached value per distinct parameter combination
  SingleCompoundKey(CompoundSpec),
  /// One cached value per identity key, fetched in batches
  PerKeyBatch(BatchSpec),
}

/// How to fetch and cache one entity type.
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
  pub kind: EntityKind,
  pub endpoint: &'static str,
  pub protocol: Protocol,
  pub caching: Caching,
  pub shape: EntityShape,
}

impl EntityDescriptor {
  pub fn slice(&self) -> &'static str {
    self.kind.as_str()
  }

  pub fn is_cached(&self) -> bool {
    self.caching == Caching::Cached
  }
}

fn concept_stub(key: &str) -> Value {
  json!({
    "concept_id": canonical_to_json(key),
    "concept_name": "Missing concept",
    "domain_id": null,
    "vocabulary_id": null,
    "standard_concept": null,
    "stub": true,
  })
}

fn cset_stub(key: &str) -> Value {
  json!({
    "codeset_id": canonical_to_json(key),
    "concept_set_name": "Missing concept set",
    "concept_set_version_title": null,
    "stub": true,
  })
}

fn researcher_stub(key: &str) -> Value {
  json!({
    "multipassId": key,
    "name": "Unknown researcher",
    "stub": true,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_every_endpoint_has_one_descriptor() {
    let mut endpoints: Vec<&str> = EntityKind::ALL
      .iter()
      .map(|kind| kind.descriptor().endpoint)
      .collect();
    let total = endpoints.len();
    endpoints.sort();
    endpoints.dedup();
    assert_eq!(endpoints.len(), total);
  }

  #[test]
  fn test_descriptor_kind_matches() {
    for kind in EntityKind::ALL {
      assert_eq!(kind.descriptor().kind, kind);
    }
  }

  #[test]
  fn test_from_str_accepts_slice_and_endpoint() {
    assert_eq!("concepts".parse::<EntityKind>(), Ok(EntityKind::Concepts));
    assert_eq!("get-concepts".parse::<EntityKind>(), Ok(EntityKind::Concepts));
    assert_eq!(
      "related-cset-concept_counts".parse::<EntityKind>(),
      Ok(EntityKind::RelatedCsetConceptCounts)
    );
    assert!("nonsense".parse::<EntityKind>().is_err());
  }

  #[test]
  fn test_one_row_per_key_entities_have_stubs() {
    for kind in EntityKind::ALL {
      if let EntityShape::PerKeyBatch(spec) = kind.descriptor().shape {
        if spec.one_row_per_key {
          assert!(spec.stub.is_some(), "{} needs a stub", kind);
        }
        assert_ne!(spec.result_shape, ApiResultShape::SingleValue);
      }
    }
  }

  #[test]
  fn test_concept_stub_shape() {
    let stub = concept_stub("123");
    assert_eq!(stub["concept_id"], json!(123));
    assert_eq!(stub["stub"], json!(true));
  }
}
