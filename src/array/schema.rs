// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{ColumnId, DataType};

/// A named, typed column of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    id: ColumnId,
    name: String,
    data_type: DataType,
    nullable: bool,
}

pub type FieldRef = Arc<Field>;

impl Field {
    pub fn new(id: ColumnId, name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            id,
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn id(&self) -> ColumnId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// The same field with another type.
    pub fn with_type(&self, data_type: DataType) -> Self {
        Self {
            data_type,
            ..self.clone()
        }
    }
}

/// An ordered list of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<FieldRef>,
}

pub type SchemaRef = Arc<Schema>;

impl FromIterator<Field> for Schema {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Arc::new).collect())
    }
}

impl Schema {
    pub fn new(fields: Vec<FieldRef>) -> Self {
        Self { fields }
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> &FieldRef {
        &self.fields[idx]
    }

    pub fn field_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.fields.iter().map(|f| f.id())
    }

    /// Position of the field with column id `id`.
    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.fields.iter().position(|f| f.id() == id)
    }

    pub fn append(&mut self, field: FieldRef) {
        self.fields.push(field);
    }

    pub fn insert(&mut self, idx: usize, field: FieldRef) {
        self.fields.insert(idx, field);
    }

    pub fn remove(&mut self, idx: usize) -> FieldRef {
        self.fields.remove(idx)
    }
}
