#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use neo2cosmos::dest::memory::{Collection, StoredEdge};
use neo2cosmos::source::GraphSnapshot;
use neo2cosmos::{
    Edge, MemoryStore, MigrateError, MigrationConfig, Migrator, Phase, SnapshotSource, Vertex,
};

fn northwind() -> GraphSnapshot {
    GraphSnapshot {
        nodes: vec![
            Vertex::new("Person", "1").with_property("name", "Alice"),
            Vertex::new("Person", "2").with_property("name", "Bob"),
        ],
        relationships: vec![Edge::new("KNOWS", "1", "2").with_property("since", "2020")],
    }
}

fn larger_graph(vertices: usize) -> GraphSnapshot {
    let nodes = (0..vertices)
        .map(|i| {
            Vertex::new("Item", i.to_string())
                .with_property("rank", i as i64)
                .with_property("name", format!("item-{i}"))
        })
        .collect();
    let relationships = (1..vertices)
        .map(|i| Edge::new("NEXT", (i - 1).to_string(), i.to_string()))
        .collect();
    GraphSnapshot {
        nodes,
        relationships,
    }
}

async fn migrate(
    graph: GraphSnapshot,
    store: &Arc<MemoryStore>,
    workers: usize,
) -> neo2cosmos::Result<neo2cosmos::MigrationReport> {
    let config = MigrationConfig {
        workers,
        ..MigrationConfig::default()
    };
    Migrator::new(&config, Arc::new(SnapshotSource::new(graph)), store.clone())
        .run()
        .await
}

fn sorted(mut collection: Collection) -> Collection {
    collection.edges.sort();
    collection
}

#[tokio::test]
async fn reference_graph_lands_with_exact_statements() {
    let store = Arc::new(MemoryStore::new());
    migrate(northwind(), &store, 4).await.expect("migration");

    let submitted: Vec<String> = store
        .submitted()
        .into_iter()
        .map(|s| s.into_string())
        .collect();
    assert_eq!(submitted.len(), 3);
    assert!(submitted[..2]
        .contains(&"g.addV('Person').property('id','1').property('name','Alice')".to_string()));
    assert!(submitted[..2]
        .contains(&"g.addV('Person').property('id','2').property('name','Bob')".to_string()));
    assert_eq!(
        submitted[2],
        "g.V('1').addE('KNOWS').property('since','2020').to(g.V('2'))"
    );

    let collection = store.collection().expect("collection exists");
    assert_eq!(collection.throughput, 400);
    assert_eq!(collection.vertices["1"].label, "Person");
    assert_eq!(collection.vertices["2"].properties["name"], "Bob");
    assert_eq!(
        collection.edges,
        vec![StoredEdge {
            label: "KNOWS".into(),
            out_v: "1".into(),
            in_v: "2".into(),
            properties: BTreeMap::from([("since".into(), "2020".into())]),
        }]
    );
}

#[tokio::test]
async fn rerunning_converges_on_the_same_graph() {
    let store = Arc::new(MemoryStore::new());
    migrate(larger_graph(40), &store, 4).await.expect("first run");
    let first = sorted(store.collection().expect("collection"));

    migrate(larger_graph(40), &store, 3).await.expect("second run");
    let second = sorted(store.collection().expect("collection"));

    assert_eq!(first, second);
    assert_eq!(second.vertices.len(), 40);
    assert_eq!(second.edges.len(), 39);
}

#[tokio::test]
async fn every_edge_follows_every_vertex() {
    let store = Arc::new(MemoryStore::new());
    migrate(larger_graph(64), &store, 8).await.expect("migration");

    let submitted = store.submitted();
    let last_vertex = submitted
        .iter()
        .rposition(|s| s.as_str().starts_with("g.addV("))
        .expect("vertex statements");
    let first_edge = submitted
        .iter()
        .position(|s| s.as_str().starts_with("g.V("))
        .expect("edge statements");
    assert!(last_vertex < first_edge);
}

#[tokio::test]
async fn failures_surface_after_the_vertex_barrier() {
    let mut graph = larger_graph(12);
    graph.nodes.push(Vertex::new("Item", "3"));
    let store = Arc::new(MemoryStore::new());

    let err = migrate(graph, &store, 4).await.expect_err("duplicate id");
    match err {
        MigrateError::PhaseFailed {
            phase,
            failed,
            total,
            first,
        } => {
            assert_eq!(phase, Phase::Vertices);
            assert_eq!(failed, 1);
            assert_eq!(total, 13);
            assert!(first.to_string().contains("already exists"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.vertex_count(), 12);
    assert_eq!(store.submitted().len(), 13);
    assert_eq!(store.edge_count(), 0);
}

#[tokio::test]
async fn multi_page_responses_are_fully_drained() {
    let store = Arc::new(MemoryStore::new().with_pages_per_response(4));
    let report = migrate(larger_graph(10), &store, 2)
        .await
        .expect("migration");

    assert_eq!(store.page_fetches(), 4 * 19);
    assert_eq!(report.vertices.pages, 40);
    assert_eq!(report.edges.pages, 36);
    assert_eq!(store.vertex_count(), 10);
    assert_eq!(store.edge_count(), 9);
}

#[tokio::test]
async fn apostrophes_in_values_are_dropped() {
    let graph = GraphSnapshot {
        nodes: vec![Vertex::new("Person", "7").with_property("name", "O'Brien")],
        relationships: Vec::new(),
    };
    let store = Arc::new(MemoryStore::new());
    migrate(graph, &store, 1).await.expect("migration");

    let collection = store.collection().expect("collection");
    assert_eq!(collection.vertices["7"].properties["name"], "OBrien");
}

#[tokio::test]
async fn empty_graphs_still_reset_the_collection() {
    let store = Arc::new(MemoryStore::new());
    migrate(northwind(), &store, 2).await.expect("seed");
    let report = migrate(GraphSnapshot::default(), &store, 2)
        .await
        .expect("empty run");

    assert_eq!(report.vertices.total, 0);
    assert_eq!(report.edges.total, 0);
    assert_eq!(store.vertex_count(), 0);
    assert_eq!(store.edge_count(), 0);
}

#[tokio::test]
async fn an_id_property_does_not_shadow_the_node_id() {
    let graph = GraphSnapshot {
        nodes: vec![
            Vertex::new("Person", "1").with_property("id", "emp-7"),
            Vertex::new("Person", "2"),
        ],
        relationships: vec![Edge::new("MANAGES", "1", "2")],
    };
    let store = Arc::new(MemoryStore::new());
    let report = migrate(graph, &store, 2).await.expect("migration");

    assert_eq!(report.edges.executed, 1);
    let collection = store.collection().expect("collection");
    assert_eq!(
        collection.vertices.keys().collect::<Vec<_>>(),
        vec!["1", "2"]
    );
    assert_eq!(collection.vertices["1"].properties["id"], "emp-7");
    assert_eq!(collection.edges[0].out_v, "1");
}
