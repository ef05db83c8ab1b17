//! Stored values.
//!
//! A key maps to exactly one [`Entity`]. Accessors never coerce between
//! variants; asking a list for its string value is a `WRONGTYPE` error.

use crate::error::CommandError;
use crate::storage::quicklist::PagedList;
use crate::storage::sortedset::SortedSet;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub enum Entity {
    String(Bytes),
    List(PagedList<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(SortedSet),
}

impl Entity {
    /// Name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::String(_) => "string",
            Entity::List(_) => "list",
            Entity::Hash(_) => "hash",
            Entity::Set(_) => "set",
            Entity::SortedSet(_) => "zset",
        }
    }

    /// True for a collection with no elements left.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Entity::String(_) => false,
            Entity::List(list) => list.is_empty(),
            Entity::Hash(hash) => hash.is_empty(),
            Entity::Set(set) => set.is_empty(),
            Entity::SortedSet(zset) => zset.is_empty(),
        }
    }

    pub fn as_string(&self) -> Result<&Bytes, CommandError> {
        match self {
            Entity::String(value) => Ok(value),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_list(&self) -> Result<&PagedList<Bytes>, CommandError> {
        match self {
            Entity::List(list) => Ok(list),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> Result<&mut PagedList<Bytes>, CommandError> {
        match self {
            Entity::List(list) => Ok(list),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_hash(&self) -> Result<&HashMap<Bytes, Bytes>, CommandError> {
        match self {
            Entity::Hash(hash) => Ok(hash),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> Result<&mut HashMap<Bytes, Bytes>, CommandError> {
        match self {
            Entity::Hash(hash) => Ok(hash),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_set(&self) -> Result<&HashSet<Bytes>, CommandError> {
        match self {
            Entity::Set(set) => Ok(set),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> Result<&mut HashSet<Bytes>, CommandError> {
        match self {
            Entity::Set(set) => Ok(set),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_sorted_set(&self) -> Result<&SortedSet, CommandError> {
        match self {
            Entity::SortedSet(zset) => Ok(zset),
            _ => Err(CommandError::WrongType),
        }
    }

    pub fn as_sorted_set_mut(&mut self) -> Result<&mut SortedSet, CommandError> {
        match self {
            Entity::SortedSet(zset) => Ok(zset),
            _ => Err(CommandError::WrongType),
        }
    }
}
