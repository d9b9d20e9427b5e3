//! Materialization helpers over a query result.
//!
//! A [`QueryResult`] wraps a buffered [`ResultSet`]. It can be read as a
//! sequence of rows (indexing, iteration, or the `fetch`/`reset` cursor) and
//! reshaped through helpers such as [`QueryResult::hash`] and
//! [`QueryResult::collect`]. Helpers always start from the first row and do
//! not move the `fetch` cursor, so calling one mid-iteration is safe.

use crate::adapter::ResultSet;
use crate::error::{Error, Result};
use crate::query::QueryState;
use crate::value::{Key, Keyed, Row, Value};
use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;
use tracing::trace;

/// Something a row can be bound onto.
pub trait Bindable {
    /// Whether the target exposes `field` directly.
    fn has_field(&self, field: &str) -> bool;

    /// Direct assignment. Called for exposed fields, and for any field when
    /// binding is forced.
    fn assign(&mut self, field: &str, value: Value);

    /// Setter capability for fields that are not exposed directly. Errors
    /// are ignored by the binder.
    fn set(&mut self, field: &str, _value: Value) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("no setter for `{}`", field))
    }
}

impl Bindable for HashMap<String, Value> {
    fn has_field(&self, field: &str) -> bool {
        self.contains_key(field)
    }

    fn assign(&mut self, field: &str, value: Value) {
        self.insert(field.to_string(), value);
    }
}

/// Types that [`QueryResult::bind_to`] can build for each row.
pub trait Construct: Bindable + Sized {
    fn construct(args: &[Value]) -> anyhow::Result<Self>;
}

/// Shape accepted by [`QueryResult::bind`].
pub enum BindTarget<'a> {
    One(&'a mut dyn Bindable),
    Many(Vec<BindTarget<'a>>),
}

impl<'a, T: Bindable> From<&'a mut T> for BindTarget<'a> {
    fn from(target: &'a mut T) -> Self {
        BindTarget::One(target)
    }
}

impl<'a> BindTarget<'a> {
    /// One target per element, bound in order.
    pub fn many<T: Bindable>(targets: &'a mut [T]) -> Self {
        BindTarget::Many(
            targets
                .iter_mut()
                .map(|t| BindTarget::One(t as &mut dyn Bindable))
                .collect(),
        )
    }
}

/// Instances built by [`QueryResult::bind_to`], keyed by a column value.
#[derive(Debug)]
pub struct InstanceCache<T> {
    entries: Keyed<Arc<T>>,
}

impl<T> Default for InstanceCache<T> {
    fn default() -> Self {
        Self {
            entries: Keyed::new(),
        }
    }
}

impl<T> InstanceCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<Key>, instance: Arc<T>) {
        self.entries.insert(key, instance);
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Arc<T>> {
        self.entries.get(key).cloned()
    }

    pub fn exists(&self, key: impl Into<Key>) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Copy `row` onto `target`.
fn bind_row(target: &mut dyn Bindable, row: &Row, force: bool) {
    for (field, value) in row.iter() {
        if force || target.has_field(field) {
            target.assign(field, value.clone());
        } else if let Err(e) = target.set(field, value.clone()) {
            trace!("ignoring setter failure for `{}`: {}", field, e);
        }
    }
}

/// Rows produced by one query, plus the counters reported with them.
#[derive(Debug, Clone)]
pub struct QueryResult {
    set: Arc<ResultSet>,
    state: QueryState,
    position: usize,
    affected: u64,
    insert_id: i64,
}

impl QueryResult {
    pub fn new(set: Arc<ResultSet>, state: QueryState) -> Self {
        let affected = set.affected_rows();
        let insert_id = set.last_insert_id();
        Self {
            set,
            state,
            position: 0,
            affected,
            insert_id,
        }
    }

    /// The engine state at the time this result was produced.
    pub fn query(&self) -> &QueryState {
        &self.state
    }

    fn rows(&self) -> &[Row] {
        self.set.rows()
    }

    /// First field of the first row.
    pub fn value(&self) -> Result<Value> {
        self.rows()
            .first()
            .and_then(|row| row.value_at(0))
            .cloned()
            .ok_or(Error::EmptyResult)
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows().first()
    }

    pub fn row(&self) -> Option<&Row> {
        self.first()
    }

    pub fn last(&self) -> Option<&Row> {
        self.rows().last()
    }

    /// Column names of the first row; empty when there are no rows.
    pub fn columns(&self) -> Vec<String> {
        self.first()
            .map(|row| row.columns().to_vec())
            .unwrap_or_default()
    }

    pub fn column(&self, position: usize) -> Option<String> {
        self.first()
            .and_then(|row| row.columns().get(position))
            .cloned()
    }

    fn key_column(&self, key: Option<&str>, position: usize) -> Result<Option<String>> {
        match key {
            Some(key) if !key.is_empty() => Ok(Some(key.to_string())),
            _ if self.is_empty() => Ok(None),
            _ => self
                .column(position)
                .map(Some)
                .ok_or_else(|| Error::ColumnNotFound(format!("#{}", position))),
        }
    }

    fn field<'r>(row: &'r Row, column: &str) -> Result<&'r Value> {
        row.get(column)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string()))
    }

    /// Map of `key` column to `value` column. Defaults to the first and
    /// second columns; later rows overwrite earlier ones.
    pub fn hash(&self, key: Option<&str>, value: Option<&str>) -> Result<Keyed<Value>> {
        let mut hash = Keyed::new();
        let Some(key) = self.key_column(key, 0)? else {
            return Ok(hash);
        };
        let Some(value) = self.key_column(value, 1)? else {
            return Ok(hash);
        };
        for row in self.rows() {
            hash.insert(Self::field(row, &key)?, Self::field(row, &value)?.clone());
        }
        Ok(hash)
    }

    /// Rows keyed by the `key` column (default: first column).
    pub fn transpose(&self, key: Option<&str>) -> Result<Keyed<Row>> {
        let mut rows = Keyed::new();
        let Some(key) = self.key_column(key, 0)? else {
            return Ok(rows);
        };
        for row in self.rows() {
            rows.insert(Self::field(row, &key)?, row.clone());
        }
        Ok(rows)
    }

    /// Rows grouped by the `key` column, keeping row order within groups.
    pub fn collect(&self, key: Option<&str>) -> Result<Keyed<Vec<Row>>> {
        let mut groups = Keyed::new();
        let Some(key) = self.key_column(key, 0)? else {
            return Ok(groups);
        };
        for row in self.rows() {
            groups
                .get_or_insert_with(Self::field(row, &key)?, Vec::new)
                .push(row.clone());
        }
        Ok(groups)
    }

    /// Values of one column, in row order.
    pub fn flatten(&self, key: Option<&str>) -> Result<Vec<Value>> {
        let Some(key) = self.key_column(key, 0)? else {
            return Ok(Vec::new());
        };
        self.rows()
            .iter()
            .map(|row| Self::field(row, &key).cloned())
            .collect()
    }

    /// Bind rows onto existing targets: one row for a single target, or one
    /// row per element of a sequence. Targets beyond the last row are left
    /// untouched.
    pub fn bind<'a>(&self, target: impl Into<BindTarget<'a>>, force: bool) -> Result<()> {
        match target.into() {
            BindTarget::One(subject) => {
                if let Some(row) = self.first() {
                    bind_row(subject, row, force);
                }
                Ok(())
            }
            BindTarget::Many(subjects) => {
                let subjects = subjects
                    .into_iter()
                    .map(|subject| match subject {
                        BindTarget::One(subject) => Ok(subject),
                        BindTarget::Many(_) => Err(Error::InvalidBindTarget(
                            "sequences may only contain single targets".to_string(),
                        )),
                    })
                    .collect::<Result<Vec<_>>>()?;
                for (subject, row) in subjects.into_iter().zip(self.rows()) {
                    bind_row(subject, row, force);
                }
                Ok(())
            }
        }
    }

    /// Build a `T` per row, reusing instances already in `cache` under the
    /// row's `cache_key` column (default: first column).
    pub fn bind_to<T: Construct>(
        &self,
        args: &[Value],
        force: bool,
        mut cache: Option<&mut InstanceCache<T>>,
        cache_key: Option<&str>,
    ) -> Result<Vec<Arc<T>>> {
        let key = match cache {
            Some(_) => self.key_column(cache_key, 0)?,
            None => None,
        };

        let mut instances = Vec::with_capacity(self.len());
        for row in self.rows() {
            let row_key = match &key {
                Some(column) => Some(Key::from(Self::field(row, column)?)),
                None => None,
            };
            if let (Some(cache), Some(row_key)) = (cache.as_deref(), &row_key) {
                if let Some(instance) = cache.get(row_key.clone()) {
                    instances.push(instance);
                    continue;
                }
            }

            let mut instance = T::construct(args).map_err(|e| Error::InvalidTypeDescriptor {
                type_name: std::any::type_name::<T>().to_string(),
                reason: e.to_string(),
            })?;
            bind_row(&mut instance, row, force);
            let instance = Arc::new(instance);

            if let (Some(cache), Some(row_key)) = (cache.as_deref_mut(), row_key) {
                cache.add(row_key, Arc::clone(&instance));
            }
            instances.push(instance);
        }
        Ok(instances)
    }

    /// Map every row through `mapper`.
    pub fn bind_with<T, F>(&self, mut mapper: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row) -> Option<T>,
    {
        self.rows()
            .iter()
            .enumerate()
            .map(|(i, row)| mapper(row).ok_or(Error::InvalidMapperResult { row: i }))
            .collect()
    }

    /// Rows affected by the statement, fixed when the result was built.
    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// Last generated row id, fixed when the result was built.
    pub fn id(&self) -> i64 {
        self.insert_id
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    /// Row at `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows().get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows().iter()
    }

    /// Results are read-only; always fails.
    pub fn set(&mut self, _index: usize, _row: Row) -> Result<()> {
        Err(Error::ReadOnlyResult)
    }

    /// Results are read-only; always fails.
    pub fn unset(&mut self, _index: usize) -> Result<()> {
        Err(Error::ReadOnlyResult)
    }

    /// Next row of the forward cursor.
    pub fn fetch(&mut self) -> Option<&Row> {
        let row = self.set.rows().get(self.position)?;
        self.position += 1;
        Some(row)
    }

    /// Rewind the forward cursor to the first row.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// Row access by position.
///
/// # Panics
///
/// Panics if `index` is out of bounds, like indexing a `Vec`. Use
/// [`QueryResult::get`] when the row may be absent.
impl Index<usize> for QueryResult {
    type Output = Row;

    fn index(&self, index: usize) -> &Row {
        &self.rows()[index]
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
