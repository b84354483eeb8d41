//! Column layout and read slices.

use std::{collections::BTreeSet, sync::Arc};

use crate::{
    fragment::{
        cell::ColumnId,
        position::{ClusteringRange, PositionRange},
    },
    key::{DecoratedKey, PartitionKey, Partitioner},
};

/// Role of a column within the schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    /// Component of the partition key.
    PartitionKey,
    /// Component of the clustering key.
    Clustering,
    /// Static column, one value per partition.
    Static,
    /// Regular clustered column.
    Regular,
}

/// Declared column type; values stored in the column compare per type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    /// Raw bytes.
    Bytes,
    /// Signed integer.
    Int,
    /// UTF-8 text.
    Text,
}

/// One column of a schema.
#[derive(Clone, Debug)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Identifier used by rows and slices.
    pub id: ColumnId,
    /// Role of the column.
    pub kind: ColumnKind,
    /// Declared type.
    pub ty: ColumnType,
}

/// Immutable column layout shared by readers; owns the partitioner.
#[derive(Clone, Debug)]
pub struct Schema {
    name: String,
    columns: Vec<ColumnDef>,
    partitioner: Partitioner,
}

impl Schema {
    /// Start building a schema called `name`.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The schema's partitioner.
    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Decorate a partition key with its token.
    pub fn decorate(&self, key: PartitionKey) -> DecoratedKey {
        self.partitioner.decorate(key)
    }

    /// Slice selecting every row and column.
    pub fn full_slice(&self) -> Slice {
        Slice::full()
    }
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    columns: Vec<ColumnDef>,
}

impl SchemaBuilder {
    /// Append a column; ids are assigned in declaration order.
    pub fn with_column(mut self, name: impl Into<String>, kind: ColumnKind, ty: ColumnType) -> Self {
        let id = self.columns.len() as ColumnId;
        self.columns.push(ColumnDef {
            name: name.into(),
            id,
            kind,
            ty,
        });
        self
    }

    /// Finish the schema.
    pub fn build(self) -> Arc<Schema> {
        Arc::new(Schema {
            name: self.name,
            columns: self.columns,
            partitioner: Partitioner,
        })
    }
}

/// Which columns a slice exposes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ColumnSelector {
    /// Every column.
    #[default]
    All,
    /// Only the listed columns.
    Columns(BTreeSet<ColumnId>),
}

/// Clustering-row ranges plus a column selector restricting what a reader
/// must emit. Fragments outside the slice may be elided by the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slice {
    row_ranges: Vec<ClusteringRange>,
    columns: ColumnSelector,
}

impl Slice {
    /// Slice selecting every row and column.
    pub fn full() -> Self {
        Self {
            row_ranges: vec![ClusteringRange::full()],
            columns: ColumnSelector::All,
        }
    }

    /// Start building a slice; with no ranges added it selects nothing
    /// clustered.
    pub fn builder() -> SliceBuilder {
        SliceBuilder {
            row_ranges: Vec::new(),
            columns: ColumnSelector::All,
        }
    }

    /// Selected clustering ranges.
    pub fn row_ranges(&self) -> &[ClusteringRange] {
        &self.row_ranges
    }

    /// Column selector.
    pub fn columns(&self) -> &ColumnSelector {
        &self.columns
    }

    /// Column set for row projection; `None` keeps every column.
    pub fn column_set(&self) -> Option<&BTreeSet<ColumnId>> {
        match &self.columns {
            ColumnSelector::All => None,
            ColumnSelector::Columns(set) => Some(set),
        }
    }

    /// Selected ranges as position windows.
    pub fn position_ranges(&self) -> Vec<PositionRange> {
        self.row_ranges
            .iter()
            .map(ClusteringRange::to_position_range)
            .collect()
    }
}

impl Default for Slice {
    fn default() -> Self {
        Self::full()
    }
}

/// Builder for [`Slice`].
#[derive(Debug)]
pub struct SliceBuilder {
    row_ranges: Vec<ClusteringRange>,
    columns: ColumnSelector,
}

impl SliceBuilder {
    /// Add a clustering range to the slice.
    pub fn with_range(mut self, range: ClusteringRange) -> Self {
        self.row_ranges.push(range);
        self
    }

    /// Restrict the slice to `columns`.
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = ColumnId>) -> Self {
        self.columns = ColumnSelector::Columns(columns.into_iter().collect());
        self
    }

    /// Finish the slice.
    pub fn build(self) -> Slice {
        Slice {
            row_ranges: self.row_ranges,
            columns: self.columns,
        }
    }
}
