use serde::{Deserialize, Serialize};

/// JSON:API envelope: `{"data": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Document<T> {
    pub data: T,
}

impl<T> Document<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// One resource object: `{"type": ..., "id": ..., "attributes": ...}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Resource<A> {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: A,
}

impl<A> Resource<A> {
    pub fn new(kind: &str, id: &str, attributes: A) -> Self {
        Self {
            kind: kind.to_string(),
            id: id.to_string(),
            attributes,
        }
    }
}

/// Incoming resource for create requests, where the id is server-assigned.
#[derive(Debug, Deserialize)]
pub struct NewResource<A> {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    pub kind: Option<String>,
    pub attributes: A,
}
