//! Turning batch responses into `(key, entity)` rows.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::descriptor::ApiResultShape;
use super::params::{json_to_canonical, Key};
use crate::error::{CacheError, Result};

/// Split a batch response into rows keyed by canonical identity.
///
/// Rows come back in response order. Grouped shapes yield one row per group.
pub fn key_rows(
  entity: &str,
  shape: ApiResultShape,
  response: Value,
) -> Result<Vec<(String, Value)>> {
  match shape {
    ApiResultShape::ArrayOfKeyedObjects { key_fields } => {
      let Value::Array(rows) = response else {
        return Err(CacheError::server_shape(
          entity,
          format!("expected an array of objects, got {}", kind_of(&response)),
        ));
      };
      match key_fields {
        [] => Err(CacheError::contract(entity, "no key field declared")),
        [field] => rows
          .into_iter()
          .map(|row| Ok((row_key(entity, &row, field)?, row)))
          .collect(),
        [field, rest @ ..] => group_rows(entity, rows, field, rest),
      }
    }
    ApiResultShape::ObjectOfArrays => keyed_members(entity, response, Value::is_array, "array"),
    ApiResultShape::ObjectOfObjects => keyed_members(entity, response, Value::is_object, "object"),
    ApiResultShape::SingleValue => Err(CacheError::contract(
      entity,
      "a single-value result cannot be split into keyed rows",
    )),
  }
}

fn group_rows(
  entity: &str,
  rows: Vec<Value>,
  field: &str,
  rest: &[&str],
) -> Result<Vec<(String, Value)>> {
  let mut groups: Vec<(String, Map<String, Value>)> = Vec::new();
  let mut index: HashMap<String, usize> = HashMap::new();

  for row in rows {
    let key = row_key(entity, &row, field)?;
    let path = rest
      .iter()
      .map(|inner| row_key(entity, &row, inner))
      .collect::<Result<Vec<_>>>()?;

    let slot = *index.entry(key.clone()).or_insert_with(|| {
      groups.push((key, Map::new()));
      groups.len() - 1
    });
    insert_nested(&mut groups[slot].1, &path, row);
  }

  Ok(
    groups
      .into_iter()
      .map(|(key, map)| (key, Value::Object(map)))
      .collect(),
  )
}

fn insert_nested(map: &mut Map<String, Value>, path: &[String], row: Value) {
  let Some((leaf, parents)) = path.split_last() else {
    return;
  };
  let mut map = map;
  for segment in parents {
    let entry = map
      .entry(segment.clone())
      .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
      *entry = Value::Object(Map::new());
    }
    let Value::Object(next) = entry else {
      unreachable!("entry was just made an object");
    };
    map = next;
  }
  map.insert(leaf.clone(), row);
}

fn keyed_members(
  entity: &str,
  response: Value,
  accepts: fn(&Value) -> bool,
  expected: &str,
) -> Result<Vec<(String, Value)>> {
  let Value::Object(members) = response else {
    return Err(CacheError::server_shape(
      entity,
      format!("expected an object keyed by id, got {}", kind_of(&response)),
    ));
  };
  members
    .into_iter()
    .map(|(key, value)| {
      if !accepts(&value) {
        return Err(CacheError::server_shape(
          entity,
          format!("entry {} should be an {}, got {}", key, expected, kind_of(&value)),
        ));
      }
      Ok((Key::Text(key).canonical(), value))
    })
    .collect()
}

fn row_key(entity: &str, row: &Value, field: &str) -> Result<String> {
  row
    .get(field)
    .and_then(json_to_canonical)
    .ok_or_else(|| {
      CacheError::server_shape(entity, format!("row without usable {}: {}", field, row))
    })
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  const BY_CONCEPT: ApiResultShape = ApiResultShape::ArrayOfKeyedObjects {
    key_fields: &["concept_id"],
  };

  #[test]
  fn test_array_of_keyed_objects() {
    let rows = key_rows(
      "concepts",
      BY_CONCEPT,
      json!([{"concept_id": 2, "name": "b"}, {"concept_id": "1", "name": "a"}]),
    )
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "2");
    assert_eq!(rows[1].0, "1");
    assert_eq!(rows[1].1["name"], json!("a"));
  }

  #[test]
  fn test_missing_key_field_is_server_error() {
    assert!(matches!(
      key_rows("concepts", BY_CONCEPT, json!([{"name": "a"}])),
      Err(CacheError::ServerShapeViolation { .. })
    ));
    assert!(matches!(
      key_rows("concepts", BY_CONCEPT, json!({"1": {}})),
      Err(CacheError::ServerShapeViolation { .. })
    ));
  }

  #[test]
  fn test_grouped_rows() {
    let shape = ApiResultShape::ArrayOfKeyedObjects {
      key_fields: &["codeset_id", "concept_id"],
    };
    let rows = key_rows(
      "cset_members_items",
      shape,
      json!([
        {"codeset_id": 10, "concept_id": 1, "csm": true},
        {"codeset_id": 20, "concept_id": 1, "csm": false},
        {"codeset_id": 10, "concept_id": 2, "csm": true},
      ]),
    )
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "10");
    assert_eq!(rows[0].1["1"]["csm"], json!(true));
    assert_eq!(rows[0].1["2"]["concept_id"], json!(2));
    assert_eq!(rows[1].0, "20");
    assert_eq!(rows[1].1.as_object().unwrap().len(), 1);
  }

  #[test]
  fn test_object_shapes() {
    let rows = key_rows(
      "researchers",
      ApiResultShape::ObjectOfObjects,
      json!({"abc": {"name": "A"}}),
    )
    .unwrap();
    assert_eq!(rows, vec![("abc".to_string(), json!({"name": "A"}))]);

    assert!(matches!(
      key_rows("x", ApiResultShape::ObjectOfArrays, json!({"1": {"not": "array"}})),
      Err(CacheError::ServerShapeViolation { .. })
    ));
    assert!(matches!(
      key_rows("x", ApiResultShape::SingleValue, json!(1)),
      Err(CacheError::ContractViolation { .. })
    ));
  }
}
