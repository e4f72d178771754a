//! Error propagation: inside deferred units, across non-null boundaries,
//! and for malformed `@defer`/`@stream` usage.

mod fixture;

use std::collections::HashMap;

use driftql::{
    parse_query, ConstValue, MetaField, MetaType, Registry, Request, ResolvedValue, Resolver,
    Schema, ServerError,
};
use fixture::{collect_payloads, star_wars_schema};
use futures_util::StreamExt;
use indexmap::IndexMap;
use serde_json::json;

#[tokio::test]
async fn error_inside_deferred_fragment_stays_in_the_patch() {
    let schema = star_wars_schema();
    let document = parse_query(
        r#"{ hero { name ...SecretFragment @defer(label: "SecretFragment") } } fragment SecretFragment on Droid { name secretBackstory }"#,
    )
    .unwrap();

    let payloads = collect_payloads(schema.execute_stream(Request::new(document))).await;

    insta::assert_json_snapshot!(payloads, @r###"
    [
      {
        "data": {
          "hero": {
            "name": "R2-D2"
          }
        },
        "hasNext": true
      },
      {
        "data": {
          "name": "R2-D2",
          "secretBackstory": null
        },
        "path": [
          "hero"
        ],
        "hasNext": false,
        "label": "SecretFragment",
        "errors": [
          {
            "message": "secretBackstory is secret.",
            "locations": [
              {
                "line": 1,
                "column": 109
              }
            ],
            "path": [
              "hero",
              "secretBackstory"
            ]
          }
        ]
      }
    ]
    "###);
}

#[tokio::test]
async fn errors_inside_a_deferred_list_carry_indexed_paths() {
    let schema = star_wars_schema();
    let document = parse_query(
        r#"{ hero { name ...FriendsFragment @defer(label: "FriendsFragment") } } fragment FriendsFragment on Droid { friends { name secretBackstory } }"#,
    )
    .unwrap();

    let payloads = collect_payloads(schema.execute_stream(Request::new(document))).await;

    insta::assert_json_snapshot!(payloads, @r###"
    [
      {
        "data": {
          "hero": {
            "name": "R2-D2"
          }
        },
        "hasNext": true
      },
      {
        "data": {
          "friends": [
            {
              "name": "Luke Skywalker",
              "secretBackstory": null
            },
            {
              "name": "Han Solo",
              "secretBackstory": null
            },
            {
              "name": "Leia Organa",
              "secretBackstory": null
            }
          ]
        },
        "path": [
          "hero"
        ],
        "hasNext": false,
        "label": "FriendsFragment",
        "errors": [
          {
            "message": "secretBackstory is secret.",
            "locations": [
              {
                "line": 1,
                "column": 122
              }
            ],
            "path": [
              "hero",
              "friends",
              0,
              "secretBackstory"
            ]
          },
          {
            "message": "secretBackstory is secret.",
            "locations": [
              {
                "line": 1,
                "column": 122
              }
            ],
            "path": [
              "hero",
              "friends",
              1,
              "secretBackstory"
            ]
          },
          {
            "message": "secretBackstory is secret.",
            "locations": [
              {
                "line": 1,
                "column": 122
              }
            ],
            "path": [
              "hero",
              "friends",
              2,
              "secretBackstory"
            ]
          }
        ]
      }
    ]
    "###);
}

#[tokio::test]
async fn duplicate_labels_are_a_request_error_and_resolve_inline() {
    let schema = star_wars_schema();
    let document = parse_query(
        r#"
        query {
            hero {
                id
                ... on Droid @defer(label: "Dup") {
                    name
                }
                ... on Droid @defer(label: "Dup") {
                    primaryFunction
                }
            }
        }
        "#,
    )
    .unwrap();

    let (response, patches) = schema.execute(Request::new(document)).await.into_parts();

    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].message,
        r#"Duplicate @defer/@stream label "Dup""#
    );

    // The duplicate site resolved inline; the first site still patches.
    let data = serde_json::to_value(&response.data).unwrap();
    assert_eq!(data["hero"]["primaryFunction"], "Astromech");
    assert!(data["hero"].get("name").is_none());

    let patches: Vec<_> = patches.expect("first @defer still registers").collect().await;
    assert_eq!(patches.len(), 1);
    assert_eq!(
        serde_json::to_value(&patches[0]).unwrap(),
        json!({
            "label": "Dup",
            "path": ["hero"],
            "data": { "name": "R2-D2" }
        })
    );
}

#[tokio::test]
async fn deferred_errors_never_reach_the_initial_errors() {
    let schema = star_wars_schema();
    let document = parse_query(
        r#"
        query {
            hero {
                id
                ...Secret @defer(label: "Secret")
            }
        }

        fragment Secret on Droid {
            secretBackstory
        }
        "#,
    )
    .unwrap();

    let (response, patches) = schema.execute(Request::new(document)).await.into_parts();

    assert!(response.errors.is_empty());

    let patches: Vec<_> = patches.expect("one deferred fragment").collect().await;
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].errors.len(), 1);
    assert_eq!(patches[0].errors[0].message, "secretBackstory is secret.");
}

fn failing_schema() -> Schema {
    let mut types = IndexMap::new();
    types.insert("Int".to_owned(), MetaType::Scalar {
        name: "Int".to_owned(),
    });

    let mut box_fields = IndexMap::new();
    box_fields.insert("id".to_owned(), MetaField::new("id", "Int"));
    box_fields.insert(
        "value".to_owned(),
        MetaField::with_resolver(
            "value",
            "Int!",
            Resolver::new(|_| ResolvedValue::error(ServerError::new("kaboom", None))),
        ),
    );
    types.insert("Box".to_owned(), MetaType::Object {
        name: "Box".to_owned(),
        fields: box_fields,
    });

    let mut query_fields = IndexMap::new();
    query_fields.insert(
        "boom".to_owned(),
        MetaField::with_resolver(
            "boom",
            "Int!",
            Resolver::new(|_| ResolvedValue::error(ServerError::new("kaboom", None))),
        ),
    );
    query_fields.insert(
        "box".to_owned(),
        MetaField::with_resolver(
            "box",
            "Box",
            Resolver::new(|_| {
                ResolvedValue::value(ConstValue::from_json(json!({ "id": 1 })).unwrap())
            }),
        ),
    );
    types.insert("Query".to_owned(), MetaType::Object {
        name: "Query".to_owned(),
        fields: query_fields,
    });

    Schema::build(Registry {
        types,
        query_type: "Query".to_owned(),
        mutation_type: None,
        implements: HashMap::new(),
    })
    .expect("failing schema is valid")
}

#[tokio::test]
async fn non_null_error_at_the_root_nulls_the_data() {
    let schema = failing_schema();
    let document = parse_query("{ boom }").unwrap();

    let (response, patches) = schema.execute(Request::new(document)).await.into_parts();

    assert!(patches.is_none());
    assert_eq!(serde_json::to_value(&response.data).unwrap(), json!(null));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "kaboom");
    assert_eq!(
        serde_json::to_value(&response.errors[0].path).unwrap(),
        json!(["boom"])
    );
}

#[tokio::test]
async fn non_null_errors_propagate_to_the_nearest_nullable_field() {
    let schema = failing_schema();
    let document = parse_query("{ box { value } }").unwrap();

    let (response, _) = schema.execute(Request::new(document)).await.into_parts();

    assert_eq!(
        serde_json::to_value(&response.data).unwrap(),
        json!({ "box": null })
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        serde_json::to_value(&response.errors[0].path).unwrap(),
        json!(["box", "value"])
    );
}

#[tokio::test]
async fn non_null_errors_inside_a_deferred_fragment_null_the_patch_data() {
    let schema = failing_schema();
    let document = parse_query(
        r#"{ box { id ...B @defer(label: "B") } } fragment B on Box { value }"#,
    )
    .unwrap();

    let (response, patches) = schema.execute(Request::new(document)).await.into_parts();

    assert!(response.errors.is_empty());
    assert_eq!(
        serde_json::to_value(&response.data).unwrap(),
        json!({ "box": { "id": 1 } })
    );

    let patches: Vec<_> = patches.expect("one deferred fragment").collect().await;
    assert_eq!(patches.len(), 1);
    // Null propagation stops at the fragment root.
    assert_eq!(serde_json::to_value(&patches[0].data).unwrap(), json!(null));
    assert_eq!(patches[0].errors.len(), 1);
    assert_eq!(
        serde_json::to_value(&patches[0].errors[0].path).unwrap(),
        json!(["box", "value"])
    );
}
