//! Star-wars fixture schema shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use driftql::{
    ConstValue, MetaField, MetaType, Registry, ResolvedValue, Resolver, Schema, ServerError,
    StreamingPayload,
};
use futures::Stream;
use futures_util::StreamExt;
use indexmap::IndexMap;
use serde_json::json;

fn character(id: &str) -> Option<serde_json::Value> {
    let value = match id {
        "1000" => json!({
            "__typename": "Human",
            "id": "1000",
            "name": "Luke Skywalker",
            "friendIds": ["1002", "1003", "2000", "2001"],
            "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"],
            "homePlanet": "Tatooine",
        }),
        "1002" => json!({
            "__typename": "Human",
            "id": "1002",
            "name": "Han Solo",
            "friendIds": ["1000", "1003", "2001"],
            "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"],
        }),
        "1003" => json!({
            "__typename": "Human",
            "id": "1003",
            "name": "Leia Organa",
            "friendIds": ["1000", "1002", "2000", "2001"],
            "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"],
            "homePlanet": "Alderaan",
        }),
        "2000" => json!({
            "__typename": "Droid",
            "id": "2000",
            "name": "C-3PO",
            "friendIds": ["1000", "1002", "1003"],
            "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"],
            "primaryFunction": "Protocol",
        }),
        "2001" => json!({
            "__typename": "Droid",
            "id": "2001",
            "name": "R2-D2",
            "friendIds": ["1000", "1002", "1003"],
            "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"],
            "primaryFunction": "Astromech",
        }),
        _ => return None,
    };
    Some(value)
}

fn character_value(id: &str) -> ConstValue {
    ConstValue::from_json(character(id).expect("known character")).expect("valid json")
}

fn friend_ids(parent: &ConstValue) -> Vec<String> {
    let ConstValue::Object(map) = parent else {
        return Vec::new();
    };
    let Some(ConstValue::List(ids)) = map.get("friendIds") else {
        return Vec::new();
    };
    ids.iter()
        .filter_map(|id| match id {
            ConstValue::String(id) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

fn character_fields() -> IndexMap<String, MetaField> {
    let mut fields = IndexMap::new();
    fields.insert("id".to_owned(), MetaField::new("id", "String!"));
    fields.insert("name".to_owned(), MetaField::new("name", "String"));
    fields.insert(
        "friends".to_owned(),
        MetaField::with_resolver(
            "friends",
            "[Character]",
            Resolver::new(|ctx| {
                let ids = friend_ids(ctx.parent_value);
                // Friends resolve through a future to exercise the deferred
                // half of the resolver contract.
                ResolvedValue::future(async move {
                    Ok(ConstValue::List(
                        ids.iter().map(|id| character_value(id)).collect(),
                    ))
                })
            }),
        ),
    );
    fields.insert(
        "appearsIn".to_owned(),
        MetaField::new("appearsIn", "[Episode]"),
    );
    fields.insert(
        "secretBackstory".to_owned(),
        MetaField::with_resolver(
            "secretBackstory",
            "String",
            Resolver::new(|_| {
                ResolvedValue::error(ServerError::new("secretBackstory is secret.", None))
            }),
        ),
    );
    fields
}

/// The schema the graphql-js test suite is built around: a `Character`
/// interface with `Human`/`Droid` implementations and an erroring
/// `secretBackstory` field.
pub fn star_wars_schema() -> Schema {
    let mut types = IndexMap::new();

    types.insert("String".to_owned(), MetaType::Scalar {
        name: "String".to_owned(),
    });
    types.insert("Episode".to_owned(), MetaType::Enum {
        name: "Episode".to_owned(),
        values: vec!["NEWHOPE".to_owned(), "EMPIRE".to_owned(), "JEDI".to_owned()],
    });

    types.insert("Character".to_owned(), MetaType::Interface {
        name: "Character".to_owned(),
        fields: character_fields(),
        possible_types: HashSet::from(["Human".to_owned(), "Droid".to_owned()]),
    });

    let mut human_fields = character_fields();
    human_fields.insert(
        "homePlanet".to_owned(),
        MetaField::new("homePlanet", "String"),
    );
    types.insert("Human".to_owned(), MetaType::Object {
        name: "Human".to_owned(),
        fields: human_fields,
    });

    let mut droid_fields = character_fields();
    droid_fields.insert(
        "primaryFunction".to_owned(),
        MetaField::new("primaryFunction", "String"),
    );
    types.insert("Droid".to_owned(), MetaType::Object {
        name: "Droid".to_owned(),
        fields: droid_fields,
    });

    let mut query_fields = IndexMap::new();
    query_fields.insert(
        "hero".to_owned(),
        MetaField::with_resolver(
            "hero",
            "Character",
            Resolver::new(|_| ResolvedValue::value(character_value("2001"))),
        ),
    );
    query_fields.insert(
        "human".to_owned(),
        MetaField::with_resolver(
            "human",
            "Human",
            Resolver::new(|ctx| {
                let id = match ctx.args.get("id") {
                    Some(ConstValue::String(id)) => id.clone(),
                    _ => return ResolvedValue::value(ConstValue::Null),
                };
                ResolvedValue::value(
                    character(&id)
                        .map(|value| ConstValue::from_json(value).expect("valid json"))
                        .unwrap_or(ConstValue::Null),
                )
            }),
        ),
    );
    types.insert("Query".to_owned(), MetaType::Object {
        name: "Query".to_owned(),
        fields: query_fields,
    });

    let implements = HashMap::from([
        ("Human".to_owned(), HashSet::from(["Character".to_owned()])),
        ("Droid".to_owned(), HashSet::from(["Character".to_owned()])),
    ]);

    Schema::build(Registry {
        types,
        query_type: "Query".to_owned(),
        mutation_type: None,
        implements,
    })
    .expect("fixture registry is valid")
}

/// Drains a streaming execution into the payload list the tests snapshot.
pub async fn collect_payloads(
    stream: impl Stream<Item = StreamingPayload>,
) -> Vec<StreamingPayload> {
    futures_util::pin_mut!(stream);
    stream.collect().await
}
