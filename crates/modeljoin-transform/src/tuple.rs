//! Row tuples and grouped tuples.
//!
//! A [`RowTuple`] is a persistent, backward-linked chain: extending a tuple
//! allocates one link and shares the whole prefix, so a join that extends one
//! left tuple with many right instances costs one allocation per output row.

use modeljoin_model::{ObjRef, Value};
use std::fmt;
use std::rc::Rc;

struct Link {
    prev: Option<Rc<Link>>,
    value: Option<ObjRef>,
    len: usize,
}

/// Ordered source instances; `None` marks a left-join miss.
#[derive(Clone, Default)]
pub struct RowTuple {
    last: Option<Rc<Link>>,
}

impl RowTuple {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(value: ObjRef) -> Self {
        Self::empty().extend(Some(value))
    }

    /// A new tuple with `value` appended; `self` is unchanged.
    pub fn extend(&self, value: Option<ObjRef>) -> Self {
        Self {
            last: Some(Rc::new(Link {
                prev: self.last.clone(),
                value,
                len: self.len() + 1,
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.last.as_ref().map_or(0, |link| link.len)
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    /// Slot `index`, counting from the first element.
    pub fn get(&self, index: usize) -> Option<Option<ObjRef>> {
        let len = self.len();
        if index >= len {
            return None;
        }
        let mut link = self.last.as_ref()?;
        for _ in 0..(len - 1 - index) {
            link = link.prev.as_ref()?;
        }
        Some(link.value)
    }

    pub fn to_vec(&self) -> Vec<Option<ObjRef>> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.last.as_ref();
        while let Some(link) = cursor {
            out.push(link.value);
            cursor = link.prev.as_ref();
        }
        out.reverse();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<ObjRef>> {
        self.to_vec().into_iter()
    }

    /// First non-null slot.
    pub fn main_source(&self) -> Option<ObjRef> {
        self.iter().flatten().next()
    }

    /// Slots as evaluator values, `Null` for misses.
    pub fn values(&self) -> Vec<Value> {
        self.iter().map(Value::from).collect()
    }

    /// Whether both tuples share the storage of their first `len` slots.
    #[cfg(test)]
    fn shares_prefix(&self, other: &RowTuple, len: usize) -> bool {
        let find = |tuple: &RowTuple| {
            let mut cursor = tuple.last.as_ref();
            while let Some(link) = cursor {
                if link.len == len {
                    return Some(Rc::as_ptr(link));
                }
                cursor = link.prev.as_ref();
            }
            None
        };
        match (find(self), find(other)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq for RowTuple {
    fn eq(&self, other: &Self) -> bool {
        self.to_vec() == other.to_vec()
    }
}

impl Eq for RowTuple {}

impl fmt::Debug for RowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

impl FromIterator<Option<ObjRef>> for RowTuple {
    fn from_iter<T: IntoIterator<Item = Option<ObjRef>>>(iter: T) -> Self {
        iter.into_iter()
            .fold(RowTuple::empty(), |tuple, value| tuple.extend(value))
    }
}

/// The transposition of one group of row tuples: slot `i` holds the `i`-th
/// element of every row in the group, in row order, nulls preserved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupedTuple {
    columns: Vec<Vec<Option<ObjRef>>>,
}

impl GroupedTuple {
    pub fn transpose(rows: &[RowTuple]) -> Self {
        let width = rows.first().map_or(0, RowTuple::len);
        let mut columns = vec![Vec::with_capacity(rows.len()); width];
        for row in rows {
            for (column, value) in columns.iter_mut().zip(row.iter()) {
                column.push(value);
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[Vec<Option<ObjRef>>] {
        &self.columns
    }

    /// First non-null entry of the first slot list.
    pub fn main_source(&self) -> Option<ObjRef> {
        self.columns.first()?.iter().flatten().next().copied()
    }

    /// Every non-null instance in every slot list.
    pub fn sources(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.columns.iter().flatten().flatten().copied()
    }

    /// One list value per slot.
    pub fn values(&self) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| Value::List(column.iter().copied().map(Value::from).collect()))
            .collect()
    }
}
