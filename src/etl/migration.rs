//! # Schema Migration Module
//!
//! Versioned record schemas connected by directed migration edges. The
//! registry resolves a chain of edges between two versions with a
//! breadth-first search and folds the data through each edge's migrator.
//!
//! Registration is expected up front: the registry is mutated through
//! `&mut self` and shared read-only afterwards (for example behind an `Arc`
//! for [`MigrationRegistry::migrator`]).

use crate::etl::error::{EtlError, Result};
use crate::etl::pipeline::{BoxedTransformer, Transformer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A registered schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub version: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deprecated: bool,
}

impl SchemaVersion {
    pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            created_at: Utc::now(),
            deprecated: false,
        }
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

/// One edge of a resolved migration path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    pub source: String,
    pub target: String,
    pub description: String,
}

/// Registry snapshot for introspection and visualization.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationGraph {
    pub nodes: Vec<SchemaVersion>,
    pub edges: Vec<MigrationStep>,
}

struct MigrationEdge {
    step: MigrationStep,
    migrator: BoxedTransformer<Value, Value>,
}

#[derive(Default)]
pub struct MigrationRegistry {
    versions: Vec<SchemaVersion>,
    index: HashMap<String, usize>,
    /// Edges in registration order; path discovery follows this order
    edges: Vec<MigrationEdge>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_schema_version(&mut self, version: SchemaVersion) -> Result<()> {
        if self.index.contains_key(&version.version) {
            return Err(EtlError::Configuration(format!(
                "Schema version {} is already registered",
                version.version
            )));
        }
        info!("Registered schema version {}", version.version);
        self.index.insert(version.version.clone(), self.versions.len());
        self.versions.push(version);
        Ok(())
    }

    pub fn register_migration<T>(
        &mut self,
        source: &str,
        target: &str,
        migrator: T,
        description: impl Into<String>,
    ) -> Result<()>
    where
        T: Transformer<Value, Value> + 'static,
    {
        for version in [source, target] {
            if !self.index.contains_key(version) {
                return Err(EtlError::Configuration(format!(
                    "Schema version {version} is not registered"
                )));
            }
        }
        if self
            .edges
            .iter()
            .any(|e| e.step.source == source && e.step.target == target)
        {
            return Err(EtlError::Configuration(format!(
                "Migration from {source} to {target} is already registered"
            )));
        }

        info!("Registered migration {} -> {}", source, target);
        self.edges.push(MigrationEdge {
            step: MigrationStep {
                source: source.to_string(),
                target: target.to_string(),
                description: description.into(),
            },
            migrator: Arc::new(migrator),
        });
        Ok(())
    }

    pub fn schema_versions(&self) -> &[SchemaVersion] {
        &self.versions
    }

    pub fn schema_version(&self, version: &str) -> Option<&SchemaVersion> {
        self.index.get(version).map(|&i| &self.versions[i])
    }

    /// Every path from `source` to `target` reached by the breadth-first
    /// frontier, shortest first.
    ///
    /// A version is marked visited when it is dequeued: arrivals queued before
    /// that point stay in the frontier but only the first one dequeued is
    /// expanded. The target is never marked visited, so every arrival at it is
    /// recorded. A path never revisits a version it already passed.
    pub fn find_migration_paths(&self, source: &str, target: &str) -> Vec<Vec<MigrationStep>> {
        self.resolve(source, target)
            .into_iter()
            .map(|path| self.steps(&path))
            .collect()
    }

    /// The path with the fewest edges; ties go to the first one discovered.
    pub fn find_optimal_migration_path(&self, source: &str, target: &str) -> Option<Vec<MigrationStep>> {
        self.optimal(source, target).map(|path| self.steps(&path))
    }

    /// Migrate `data` from `source` to `target`.
    ///
    /// Identical versions return the input untouched. A failing edge aborts
    /// the migration; edges already applied are not rolled back.
    pub async fn migrate_data(&self, data: Value, source: &str, target: &str) -> Result<Value> {
        if source == target {
            return Ok(data);
        }

        let path = self
            .optimal(source, target)
            .ok_or_else(|| EtlError::NoMigrationPath {
                from: source.to_string(),
                to: target.to_string(),
            })?;

        if self.schema_version(source).is_some_and(|v| v.deprecated) {
            warn!("Migrating data from deprecated schema version {}", source);
        }

        let mut current = data;
        for &edge_index in &path {
            let edge = &self.edges[edge_index];
            debug!(
                "Applying migration {} -> {}: {}",
                edge.step.source, edge.step.target, edge.step.description
            );
            current = edge.migrator.transform(current).await.map_err(|e| {
                EtlError::Migration(format!(
                    "{} -> {} failed: {}",
                    edge.step.source, edge.step.target, e
                ))
            })?;
        }
        Ok(current)
    }

    pub fn get_migration_graph(&self) -> MigrationGraph {
        MigrationGraph {
            nodes: self.versions.clone(),
            edges: self.edges.iter().map(|e| e.step.clone()).collect(),
        }
    }

    /// Pipeline stage migrating every input from `source` to `target`.
    pub fn migrator(registry: Arc<Self>, source: impl Into<String>, target: impl Into<String>) -> RegistryMigrator {
        RegistryMigrator {
            registry,
            source: source.into(),
            target: target.into(),
        }
    }

    fn optimal(&self, source: &str, target: &str) -> Option<Vec<usize>> {
        self.resolve(source, target)
            .into_iter()
            .reduce(|best, path| if path.len() < best.len() { path } else { best })
    }

    fn steps(&self, path: &[usize]) -> Vec<MigrationStep> {
        path.iter().map(|&i| self.edges[i].step.clone()).collect()
    }

    fn resolve(&self, source: &str, target: &str) -> Vec<Vec<usize>> {
        let mut found = Vec::new();
        if !self.index.contains_key(source) || !self.index.contains_key(target) {
            return found;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, Vec<usize>)> = VecDeque::from([(source, Vec::new())]);

        while let Some((node, path)) = queue.pop_front() {
            if node == target && !path.is_empty() {
                found.push(path);
                continue;
            }
            if !visited.insert(node) {
                continue;
            }

            for (i, edge) in self.edges.iter().enumerate() {
                if edge.step.source != node {
                    continue;
                }
                let next = edge.step.target.as_str();
                let revisits = next == node
                    || next == source
                    || path.iter().any(|&p| self.edges[p].step.source == next);
                if revisits {
                    continue;
                }
                let mut extended = path.clone();
                extended.push(i);
                queue.push_back((next, extended));
            }
        }

        found
    }
}

pub struct RegistryMigrator {
    registry: Arc<MigrationRegistry>,
    source: String,
    target: String,
}

#[async_trait]
impl Transformer<Value, Value> for RegistryMigrator {
    async fn transform(&self, input: Value) -> Result<Value> {
        self.registry
            .migrate_data(input, &self.source, &self.target)
            .await
    }
}
