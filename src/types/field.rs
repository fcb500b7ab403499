//! Logical fields a chunk's tokens can be attributed to.
//!
//! `Body` names the main token index: only its per-document lengths are
//! stored as a field, never separate postings.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Name,
    Signature,
    Doc,
    Comment,
    Body,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Name,
        Field::Signature,
        Field::Doc,
        Field::Comment,
        Field::Body,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Signature => "signature",
            Field::Doc => "doc",
            Field::Comment => "comment",
            Field::Body => "body",
        }
    }

    /// Whether postings for this field are stored separately from the main
    /// token index.
    pub fn has_own_postings(&self) -> bool {
        !matches!(self, Field::Body)
    }

    fn slot(self) -> usize {
        match self {
            Field::Name => 0,
            Field::Signature => 1,
            Field::Doc => 2,
            Field::Comment => 3,
            Field::Body => 4,
        }
    }
}

impl FromStr for Field {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name" => Ok(Field::Name),
            "signature" => Ok(Field::Signature),
            "doc" => Ok(Field::Doc),
            "comment" => Ok(Field::Comment),
            "body" => Ok(Field::Body),
            _ => Err("Unknown field"),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-size map from every `Field` to a value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet<T> {
    slots: [T; 5],
}

impl<T: Default> Default for FieldSet<T> {
    fn default() -> Self {
        Self {
            slots: Default::default(),
        }
    }
}

impl<T> FieldSet<T> {
    pub fn get(&self, field: Field) -> &T {
        &self.slots[field.slot()]
    }

    pub fn get_mut(&mut self, field: Field) -> &mut T {
        &mut self.slots[field.slot()]
    }

    /// Iterate fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (Field, &T)> {
        Field::ALL.into_iter().map(move |field| (field, self.get(field)))
    }

    pub fn into_iter_fields(self) -> impl Iterator<Item = (Field, T)> {
        Field::ALL.into_iter().zip(self.slots)
    }
}
