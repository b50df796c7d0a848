// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use crate::array::{Field, Schema};
use crate::types::{ColumnId, DataType};

/// A logical column of a tablet.
///
/// `unique_id` survives schema changes and is the key used to find the column
/// inside segment footers. Columns added after a segment was written are served
/// from `default_value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletColumn {
    unique_id: u32,
    name: String,
    data_type: DataType,
    is_nullable: bool,
    is_key: bool,
    default_value: Option<String>,
    length: u32,
}

impl TabletColumn {
    pub fn new(unique_id: u32, name: impl Into<String>, data_type: DataType, is_nullable: bool) -> Self {
        let length = match &data_type {
            DataType::Char(len) | DataType::Varchar(len) => *len,
            other => other.fixed_width().unwrap_or_default() as u32,
        };
        Self {
            unique_id,
            name: name.into(),
            data_type,
            is_nullable,
            is_key: false,
            default_value: None,
            length,
        }
    }

    /// Set the default literal. The literal `"NULL"` stands for a null default.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.is_nullable
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn has_default_value(&self) -> bool {
        self.default_value.is_some()
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref()
    }

    /// Declared length in bytes of one value.
    pub fn length(&self) -> u32 {
        self.length
    }
}

/// The ordered columns of a tablet. A column id is the position in this list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabletSchema {
    columns: Vec<TabletColumn>,
    num_short_key_columns: usize,
}

pub type TabletSchemaRef = Arc<TabletSchema>;

impl TabletSchema {
    pub fn new(columns: Vec<TabletColumn>) -> Self {
        let num_short_key_columns = columns.iter().take_while(|c| c.is_key()).count();
        Self {
            columns,
            num_short_key_columns,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[TabletColumn] {
        &self.columns
    }

    pub fn column(&self, cid: ColumnId) -> &TabletColumn {
        &self.columns[cid as usize]
    }

    pub fn num_short_key_columns(&self) -> usize {
        self.num_short_key_columns
    }

    pub fn field_index(&self, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .position(|c| c.name() == name)
            .map(|idx| idx as ColumnId)
    }

    /// A schema over all columns.
    pub fn schema(&self) -> Schema {
        self.schema_for(&(0..self.columns.len() as ColumnId).collect::<Vec<_>>())
    }

    /// A schema over the given columns, in the given order.
    pub fn schema_for(&self, cids: &[ColumnId]) -> Schema {
        cids.iter()
            .map(|&cid| {
                let column = self.column(cid);
                Field::new(
                    cid,
                    column.name(),
                    column.data_type().clone(),
                    column.is_nullable(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_projection() {
        let tablet = TabletSchema::new(vec![
            TabletColumn::new(10, "k", DataType::Int64, false).with_key(true),
            TabletColumn::new(11, "v", DataType::Varchar(20), true).with_default("NULL"),
        ]);
        assert_eq!(tablet.num_short_key_columns(), 1);
        assert_eq!(tablet.column(1).length(), 20);
        assert_eq!(tablet.column(0).length(), 8);
        let schema = tablet.schema_for(&[1]);
        assert_eq!(schema.num_fields(), 1);
        assert_eq!(schema.field(0).id(), 1);
        assert_eq!(schema.field(0).name(), "v");
        assert_eq!(tablet.field_index("k"), Some(0));
    }
}
