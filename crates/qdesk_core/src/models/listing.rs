//! Per-namespace entity snapshots.

use super::entity::{EntityKind, ServerEntity};

/// Immutable listing of every entity in one namespace, partitioned by kind.
#[derive(Debug, Clone, Default)]
pub struct NamespaceListing {
    all: Vec<ServerEntity>,
    tables: Vec<ServerEntity>,
    views: Vec<ServerEntity>,
    variables: Vec<ServerEntity>,
    functions: Vec<ServerEntity>,
}

impl NamespaceListing {
    /// Create a listing. Partitions are computed once here.
    pub fn new(all: Vec<ServerEntity>) -> Self {
        let mut tables = Vec::new();
        let mut views = Vec::new();
        let mut variables = Vec::new();
        let mut functions = Vec::new();

        for entity in &all {
            match entity.kind() {
                EntityKind::Table | EntityKind::PartitionedTable => tables.push(entity.clone()),
                EntityKind::View => views.push(entity.clone()),
                EntityKind::Function => functions.push(entity.clone()),
                EntityKind::Variable | EntityKind::Dictionary => variables.push(entity.clone()),
            }
        }

        Self { all, tables, views, variables, functions }
    }

    /// All entities, in server order.
    pub fn all(&self) -> &[ServerEntity] {
        &self.all
    }

    /// Tables, partitioned or not.
    pub fn tables(&self) -> &[ServerEntity] {
        &self.tables
    }

    pub fn views(&self) -> &[ServerEntity] {
        &self.views
    }

    /// Everything that is not a table, view or function.
    pub fn variables(&self) -> &[ServerEntity] {
        &self.variables
    }

    pub fn functions(&self) -> &[ServerEntity] {
        &self.functions
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Check whether the namespace has no entities.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Check membership by namespace, name and kind.
    pub fn contains(&self, entity: &ServerEntity) -> bool {
        self.all.iter().any(|e| e.same_entity(entity))
    }
}
