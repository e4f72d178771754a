use async_graphql_value::ConstValue;
use query_path::QueryPath;
use serde::ser::SerializeMap;
use serde::Serialize;

use crate::error::ServerError;
use crate::response::Response;

/// If a consumer makes a streaming request, this is the set of different
/// response payloads they can receive. The first payload will always be an
/// `InitialResponse` - followed by zero or more `Incremental` payloads (if
/// there were any deferred workloads in the request).
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StreamingPayload {
    InitialResponse(InitialResponse),
    Incremental(IncrementalResponse),
}

/// The initial streaming response is _almost_ identical to a standard
/// response, but with the `hasNext` key in it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialResponse {
    /// The standard GraphQL response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ConstValue>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,

    /// Whether the client should expect more data or not.
    pub has_next: bool,
}

/// A single patch: the delta produced by one `@defer`red fragment (after
/// label aggregation) or one `@stream`ed list element, as described in the
/// [stream & defer RFC][1].
///
/// `path` is the response position `data` merges at; for `@defer` the data
/// is an object with the fragment's fields, for `@stream` it is the bare
/// list element. `errors` carries only errors that arose while resolving
/// this patch's data.
///
/// [1]: https://github.com/graphql/graphql-wg/blob/main/rfcs/DeferStream.md#payload-format
#[derive(Debug)]
pub struct IncrementalPayload {
    pub label: String,
    pub data: ConstValue,
    pub path: QueryPath,
    pub errors: Vec<ServerError>,
}

impl Serialize for IncrementalPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("label", &self.label)?;
        map.serialize_entry("path", &self.path)?;
        map.serialize_entry("data", &self.data)?;
        if !self.errors.is_empty() {
            map.serialize_entry("errors", &self.errors)?;
        }
        map.end()
    }
}

/// An [`IncrementalPayload`] dressed up for the streaming transport, where
/// every payload carries `hasNext`.
#[derive(Debug)]
pub struct IncrementalResponse {
    pub payload: IncrementalPayload,
    pub has_next: bool,
}

impl Serialize for IncrementalResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // This is almost exactly what a derive could generate, but the
        // payload fields are flattened around `hasNext` in wire order.
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("data", &self.payload.data)?;
        map.serialize_entry("path", &self.payload.path)?;
        map.serialize_entry("hasNext", &self.has_next)?;
        map.serialize_entry("label", &self.payload.label)?;
        if !self.payload.errors.is_empty() {
            map.serialize_entry("errors", &self.payload.errors)?;
        }
        map.end()
    }
}

impl Response {
    pub fn into_streaming_payload(self, has_next: bool) -> StreamingPayload {
        StreamingPayload::InitialResponse(InitialResponse {
            data: self.data,
            errors: self.errors,
            has_next,
        })
    }
}

impl IncrementalPayload {
    pub fn into_streaming_payload(self, has_next: bool) -> StreamingPayload {
        StreamingPayload::Incremental(IncrementalResponse {
            payload: self,
            has_next,
        })
    }
}
