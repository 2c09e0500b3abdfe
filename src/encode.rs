//! Turns vertices and edges into Gremlin mutation statements.
//!
//! Statements are built from single-quoted literals with no escaping. Property
//! values have every `'` deleted before they are embedded; labels, keys and
//! identifiers are written verbatim. Only the first label of a vertex is kept.

use crate::model::{Edge, PropValue, Properties, Statement, Vertex};

/// Encodes `vertex` as `g.addV('<label>').property('id','<id>')[.property('<k>','<v>')]*`.
pub fn encode_vertex(vertex: &Vertex) -> Statement {
    let mut out = String::with_capacity(32 + vertex.properties.len() * 24);
    out.push_str("g.addV('");
    out.push_str(vertex.primary_label());
    out.push_str("')");
    push_property(&mut out, "id", &vertex.id);
    push_properties(&mut out, &vertex.properties);
    Statement::new(out)
}

/// Encodes `edge` as `g.V('<start>').addE('<type>')[.property('<k>','<v>')]*.to(g.V('<end>'))`.
pub fn encode_edge(edge: &Edge) -> Statement {
    let mut out = String::with_capacity(48 + edge.properties.len() * 24);
    out.push_str("g.V('");
    out.push_str(&edge.start_node_id);
    out.push_str("').addE('");
    out.push_str(&edge.rel_type);
    out.push_str("')");
    push_properties(&mut out, &edge.properties);
    out.push_str(".to(g.V('");
    out.push_str(&edge.end_node_id);
    out.push_str("'))");
    Statement::new(out)
}

/// Renders `value` and deletes every single quote from the result.
pub fn sanitize(value: &PropValue) -> String {
    value.to_string().replace('\'', "")
}

fn push_properties(out: &mut String, properties: &Properties) {
    for (key, value) in properties {
        push_property(out, key, &sanitize(value));
    }
}

fn push_property(out: &mut String, key: &str, value: &str) {
    out.push_str(".property('");
    out.push_str(key);
    out.push_str("','");
    out.push_str(value);
    out.push_str("')");
}
