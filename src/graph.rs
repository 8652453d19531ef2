//! Vocabulary graph model.
//!
//! A domain's words form a prerequisite DAG (edge direction is
//! prerequisite → dependent). The backend also sends a `levels` partition
//! which the client consumes as given and never recomputes. Dangling edges
//! and stray level members are display-recoverable and are dropped from any
//! derived structure rather than reported as errors.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::LearningApi;
use crate::error::ClientResult;
use crate::models::Difficulty;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub domain_id: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub image_url: Option<String>,
    /// language code → label
    #[serde(default)]
    pub translations: HashMap<String, String>,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningGraph {
    #[serde(default)]
    pub domain_id: String,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub levels: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratificationIssue {
    NodeNotInAnyLevel(String),
    NodeInSeveralLevels(String),
    UnknownLevelMember(String),
    EdgeNotForward { from: String, to: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePosition {
    pub level: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GraphLayout {
    pub positions: HashMap<String, NodePosition>,
    pub edges: Vec<GraphEdge>,
    pub row_count: usize,
}

impl GraphLayout {
    pub fn position(&self, id: &str) -> Option<NodePosition> {
        self.positions.get(id).copied()
    }

    pub fn rows(&self) -> Vec<Vec<&str>> {
        let mut rows: Vec<Vec<(usize, &str)>> = vec![Vec::new(); self.row_count];
        for (id, pos) in &self.positions {
            rows[pos.level].push((pos.column, id.as_str()));
        }
        rows.into_iter()
            .map(|mut row| {
                row.sort_unstable();
                row.into_iter().map(|(_, id)| id).collect()
            })
            .collect()
    }
}

impl LearningGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    fn node_ids(&self) -> HashSet<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Edges whose endpoints both exist in `nodes`.
    pub fn valid_edges(&self) -> impl Iterator<Item = &GraphEdge> {
        let ids = self.node_ids();
        self.edges
            .iter()
            .filter(move |e| ids.contains(e.from.as_str()) && ids.contains(e.to.as_str()))
    }

    pub fn dangling_edge_count(&self) -> usize {
        self.edges.len() - self.valid_edges().count()
    }

    /// Level index per node id. A node listed twice keeps its first level.
    pub fn level_index(&self) -> HashMap<&str, usize> {
        let mut index = HashMap::new();
        for (level, members) in self.levels.iter().enumerate() {
            for id in members {
                index.entry(id.as_str()).or_insert(level);
            }
        }
        index
    }

    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|members| members.iter().any(|m| m == id))
    }

    pub fn prerequisites_of(&self, id: &str) -> Vec<&str> {
        self.valid_edges()
            .filter(|e| e.to == id)
            .map(|e| e.from.as_str())
            .collect()
    }

    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.valid_edges()
            .filter(|e| e.from == id)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Nodes with no incoming valid edge, in node order.
    pub fn roots(&self) -> Vec<&GraphNode> {
        let targets: HashSet<&str> = self.valid_edges().map(|e| e.to.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .collect()
    }

    /// Checks the given partition against the node set and edge direction.
    /// An empty graph with no levels is valid.
    pub fn stratification_issues(&self) -> Vec<StratificationIssue> {
        let ids = self.node_ids();
        let mut issues = Vec::new();
        let mut seen: HashMap<&str, usize> = HashMap::new();

        for members in &self.levels {
            for id in members {
                if !ids.contains(id.as_str()) {
                    issues.push(StratificationIssue::UnknownLevelMember(id.clone()));
                    continue;
                }
                *seen.entry(id.as_str()).or_default() += 1;
            }
        }

        for node in &self.nodes {
            match seen.get(node.id.as_str()) {
                None => issues.push(StratificationIssue::NodeNotInAnyLevel(node.id.clone())),
                Some(count) if *count > 1 => {
                    issues.push(StratificationIssue::NodeInSeveralLevels(node.id.clone()))
                }
                _ => {}
            }
        }

        let index = self.level_index();
        for edge in self.valid_edges() {
            let forward = match (index.get(edge.from.as_str()), index.get(edge.to.as_str())) {
                (Some(from), Some(to)) => from < to,
                // already reported as NodeNotInAnyLevel
                _ => true,
            };
            if !forward {
                issues.push(StratificationIssue::EdgeNotForward {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }

        issues
    }

    pub fn is_stratified(&self) -> bool {
        self.stratification_issues().is_empty()
    }

    /// Row/column placement derived from `levels`. Nodes the partition
    /// forgot go to one trailing row; level members that are not nodes and
    /// edges touching unplaced ids are dropped.
    pub fn layout(&self) -> GraphLayout {
        let ids = self.node_ids();
        let mut positions: HashMap<String, NodePosition> = HashMap::new();
        let mut row_count = 0;

        for members in &self.levels {
            let mut column = 0;
            for id in members {
                if !ids.contains(id.as_str()) || positions.contains_key(id) {
                    continue;
                }
                positions.insert(id.clone(), NodePosition { level: row_count, column });
                column += 1;
            }
            if column > 0 {
                row_count += 1;
            }
        }

        let mut orphans: Vec<&GraphNode> = self
            .nodes
            .iter()
            .filter(|n| !positions.contains_key(&n.id))
            .collect();
        if !orphans.is_empty() {
            warn!(
                domain_id = %self.domain_id,
                count = orphans.len(),
                "graph nodes missing from levels, placing in trailing row"
            );
            orphans.sort_by_key(|n| n.sort_order);
            for (column, node) in orphans.into_iter().enumerate() {
                positions.insert(node.id.clone(), NodePosition { level: row_count, column });
            }
            row_count += 1;
        }

        let edges: Vec<GraphEdge> = self
            .edges
            .iter()
            .filter(|e| positions.contains_key(&e.from) && positions.contains_key(&e.to))
            .cloned()
            .collect();

        let dropped = self.edges.len() - edges.len();
        if dropped > 0 {
            debug!(domain_id = %self.domain_id, dropped, "dropped dangling graph edges");
        }

        GraphLayout {
            positions,
            edges,
            row_count,
        }
    }
}

/// Read-through cache of domain graphs. Graphs are read-only projections, so
/// a cached copy is only refreshed on explicit invalidation.
pub struct GraphCatalog {
    api: Arc<dyn LearningApi>,
    graphs: Mutex<HashMap<String, Arc<LearningGraph>>>,
}

impl GraphCatalog {
    pub fn new(api: Arc<dyn LearningApi>) -> Self {
        Self {
            api,
            graphs: Mutex::new(HashMap::new()),
        }
    }

    pub async fn graph(&self, domain_id: &str) -> ClientResult<Arc<LearningGraph>> {
        if let Some(graph) = self.graphs.lock().get(domain_id) {
            return Ok(Arc::clone(graph));
        }

        let graph = Arc::new(self.api.domain_graph(domain_id).await?);
        let issues = graph.stratification_issues();
        if !issues.is_empty() {
            warn!(domain_id, issues = issues.len(), "learning graph levels are inconsistent");
        }

        self.graphs
            .lock()
            .insert(domain_id.to_string(), Arc::clone(&graph));
        Ok(graph)
    }

    pub fn invalidate(&self, domain_id: &str) {
        self.graphs.lock().remove(domain_id);
    }
}
