//! Relay-style connections.

use serde::Serialize;

/// A page shaped as a connection.
///
/// Serializes with camelCase keys, ready to be returned from a resolver:
///
/// ```text
/// {"edges":[{"node":..,"cursor":".."}],"pageInfo":{..},"totalCount":4}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

impl<T> Connection<T> {
    /// The nodes of the connection.
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|edge| &edge.node)
    }
}

/// A node with its cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge<T> {
    pub node: T,
    pub cursor: String,
}

/// Page flags and boundary cursors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize() {
        let connection = Connection {
            edges: vec![Edge {
                node: json!({"title": "Dune"}),
                cursor: "abc".to_string(),
            }],
            page_info: PageInfo {
                has_next_page: true,
                has_previous_page: false,
                start_cursor: Some("abc".to_string()),
                end_cursor: Some("abc".to_string()),
            },
            total_count: None,
        };

        assert_eq!(
            serde_json::to_value(&connection).unwrap(),
            json!({
                "edges": [{"node": {"title": "Dune"}, "cursor": "abc"}],
                "pageInfo": {
                    "hasNextPage": true,
                    "hasPreviousPage": false,
                    "startCursor": "abc",
                    "endCursor": "abc"
                }
            })
        );
        assert_eq!(connection.nodes().count(), 1);
    }
}
