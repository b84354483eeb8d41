//! Cells, rows, and cell-level conflict resolution.

use std::{cmp::Ordering, collections::BTreeMap, fmt};

/// Typed scalar stored in cells and clustering key components.
///
/// Ordering is defined per variant; a schema never mixes types within one
/// column, so the derived cross-variant order is only a formality.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// Raw bytes compared lexicographically.
    Bytes(Vec<u8>),
    /// Signed integer.
    Int(i64),
    /// UTF-8 text compared lexicographically.
    Text(String),
}

impl Value {
    pub(crate) fn memory_usage(&self) -> usize {
        match self {
            Value::Bytes(b) => b.len(),
            Value::Int(_) => 8,
            Value::Text(s) => s.len(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => write!(f, "Bytes({b:02x?})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
        }
    }
}

/// Column identifier within a schema.
pub type ColumnId = u32;

/// Payload of a cell: a live value or a cell-level deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellPayload {
    /// Live value written at the cell's timestamp.
    Live(Value),
    /// Cell tombstone recorded at `deletion_time`.
    Dead {
        /// Wall-clock second the deletion was issued at.
        deletion_time: i64,
    },
}

/// Timestamped cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    /// Write timestamp used for conflict resolution.
    pub timestamp: i64,
    /// Live value or deletion marker.
    pub payload: CellPayload,
}

impl Cell {
    /// Live cell holding `value`.
    pub fn live(timestamp: i64, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            payload: CellPayload::Live(value.into()),
        }
    }

    /// Cell tombstone.
    pub fn dead(timestamp: i64, deletion_time: i64) -> Self {
        Self {
            timestamp,
            payload: CellPayload::Dead { deletion_time },
        }
    }

    /// Whether the cell carries a live value.
    pub fn is_live(&self) -> bool {
        matches!(self.payload, CellPayload::Live(_))
    }

    /// Resolve a write conflict between two versions of the same cell.
    ///
    /// The greater write timestamp wins. On a timestamp tie a tombstone
    /// beats a live cell, two tombstones resolve to the greater deletion
    /// time, and two live cells tie-break on value order.
    pub fn reconcile(self, other: Cell) -> Cell {
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Greater => self,
            Ordering::Less => other,
            Ordering::Equal => match (&self.payload, &other.payload) {
                (CellPayload::Dead { .. }, CellPayload::Live(_)) => self,
                (CellPayload::Live(_), CellPayload::Dead { .. }) => other,
                (CellPayload::Dead { deletion_time: a }, CellPayload::Dead { deletion_time: b }) => {
                    if a >= b {
                        self
                    } else {
                        other
                    }
                }
                (CellPayload::Live(a), CellPayload::Live(b)) => {
                    if a >= b {
                        self
                    } else {
                        other
                    }
                }
            },
        }
    }

    pub(crate) fn memory_usage(&self) -> usize {
        8 + match &self.payload {
            CellPayload::Live(v) => v.memory_usage(),
            CellPayload::Dead { .. } => 8,
        }
    }
}

/// Cells of one row, keyed by column id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    cells: BTreeMap<ColumnId, Cell>,
}

impl Row {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style cell insertion; later writes to the same column are
    /// reconciled, not overwritten.
    pub fn with_cell(mut self, column: ColumnId, cell: Cell) -> Self {
        self.set(column, cell);
        self
    }

    /// Insert `cell`, reconciling against any existing cell of `column`.
    pub fn set(&mut self, column: ColumnId, cell: Cell) {
        match self.cells.remove(&column) {
            Some(existing) => {
                self.cells.insert(column, existing.reconcile(cell));
            }
            None => {
                self.cells.insert(column, cell);
            }
        }
    }

    /// Cell of `column`, if present.
    pub fn cell(&self, column: ColumnId) -> Option<&Cell> {
        self.cells.get(&column)
    }

    /// Whether the row holds no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate cells in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&ColumnId, &Cell)> {
        self.cells.iter()
    }

    /// Cell-wise merge of two versions of the same row.
    pub fn merge(&mut self, other: Row) {
        for (column, cell) in other.cells {
            self.set(column, cell);
        }
    }

    /// Row restricted to the columns in `keep`; `None` keeps everything.
    pub fn project(&self, keep: Option<&std::collections::BTreeSet<ColumnId>>) -> Row {
        match keep {
            None => self.clone(),
            Some(columns) => Row {
                cells: self
                    .cells
                    .iter()
                    .filter(|(id, _)| columns.contains(id))
                    .map(|(id, cell)| (*id, cell.clone()))
                    .collect(),
            },
        }
    }

    /// Greatest write timestamp across the row's cells.
    pub fn max_timestamp(&self) -> Option<i64> {
        self.cells.values().map(|c| c.timestamp).max()
    }

    pub(crate) fn memory_usage(&self) -> usize {
        self.cells
            .values()
            .map(|c| 16 + c.memory_usage())
            .sum::<usize>()
    }
}
