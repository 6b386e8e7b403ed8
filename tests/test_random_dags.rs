//! Randomized graphs: the validator agrees with petgraph on cyclicity, and
//! instantiation preserves graph shape.

mod common;

use anyhow::Result;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};

use common::Fixture;
use eventflow::{Edge, EngineError, Node, TaskState, TaskTypeId, TemplateGraph, ValidationFailure};

fn random_graph(rng: &mut fastrand::Rng, tt: TaskTypeId, acyclic: bool) -> TemplateGraph {
    let n = rng.usize(1..12);
    let nodes: Vec<Node> = (0..n)
        .map(|i| Node::new(format!("n{}", i), tt, format!("Step {}", i)))
        .collect();

    let mut pairs = HashSet::new();
    for _ in 0..rng.usize(0..(n * 2)) {
        let (from, to) = (rng.usize(0..n), rng.usize(0..n));
        if acyclic && from >= to {
            continue;
        }
        pairs.insert((from, to));
    }
    let edges = pairs
        .into_iter()
        .map(|(from, to)| Edge::new(format!("n{}", from), format!("n{}", to)))
        .collect();
    TemplateGraph::new(nodes, edges)
}

fn petgraph_of(graph: &TemplateGraph) -> DiGraph<(), ()> {
    let mut pg = DiGraph::new();
    let index: HashMap<&str, _> = graph
        .nodes
        .iter()
        .map(|node| (node.node_id.as_str(), pg.add_node(())))
        .collect();
    for edge in &graph.edges {
        pg.add_edge(index[edge.from_node_id.as_str()], index[edge.to_node_id.as_str()], ());
    }
    pg
}

#[tokio::test]
async fn test_validator_matches_petgraph() -> Result<()> {
    let fx = Fixture::new().await;
    let validator = eventflow::TemplateValidator::new(std::sync::Arc::new(
        eventflow::ReferenceData::new(fx.store.clone(), &Default::default())?,
    ));
    let mut rng = fastrand::Rng::with_seed(0x5eed);

    for round in 0..200 {
        let graph = random_graph(&mut rng, fx.task_type.id, false);
        let cyclic = is_cyclic_directed(&petgraph_of(&graph));
        match validator.validate(graph).await {
            Ok(_) => assert!(!cyclic, "round {}: cycle not detected", round),
            Err(EngineError::Validation(ValidationFailure::Cycle { .. })) => {
                assert!(cyclic, "round {}: false cycle", round)
            }
            Err(other) => panic!("round {}: unexpected {}", round, other),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_instantiation_preserves_shape() -> Result<()> {
    let fx = Fixture::new().await;
    let mut rng = fastrand::Rng::with_seed(42);

    for _ in 0..20 {
        let graph = random_graph(&mut rng, fx.task_type.id, true);
        let in_degrees: HashMap<String, usize> = graph
            .in_degrees()
            .into_iter()
            .map(|(id, degree)| (id.to_string(), degree))
            .collect();
        let labels: HashMap<String, String> = graph
            .nodes
            .iter()
            .map(|node| (node.label.clone(), node.node_id.clone()))
            .collect();
        let (node_count, edge_count) = (graph.nodes.len(), graph.edges.len());

        let saved = fx
            .service
            .validate_and_save_template(&fx.admin, "Random", graph.nodes, graph.edges)
            .await?;
        assert!(saved.ok, "{:?}", saved.error);
        let created = fx
            .service
            .instantiate(&fx.admin, &saved.template_id.unwrap(), &fx.event.to_string(), None, None)
            .await?;
        assert!(created.ok, "{:?}", created.error);

        let tasks = fx
            .store
            .list_instance_tasks(created.instance_id.unwrap().parse()?)
            .await?;
        assert_eq!(tasks.len(), node_count);

        let mut dependency_count = 0;
        for task in &tasks {
            dependency_count += fx.store.dependencies_of(task.id).await?.len();
            let node_id = &labels[&task.label];
            let expected = if in_degrees[node_id] == 0 {
                TaskState::Todo
            } else {
                TaskState::Blocked
            };
            assert_eq!(task.state, expected, "node {}", node_id);
        }
        assert_eq!(dependency_count, edge_count);
    }
    Ok(())
}
