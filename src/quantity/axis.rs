use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::core::ArcStr;
use crate::error::QuantityError;

/// A coordinate value along one axis.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Int(i64),
    Str(ArcStr),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Int(i) => write!(f, "{i}"),
            Label::Str(s) => f.write_str(s),
        }
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Int(i) => write!(f, "{i}"),
            Label::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Label {
    fn from(value: i64) -> Self {
        Label::Int(value)
    }
}

impl From<i32> for Label {
    fn from(value: i32) -> Self {
        Label::Int(value.into())
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Label::Str(value.into())
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        Label::Str(value.into())
    }
}

/// A named axis with an ordered set of distinct coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Axis {
    name: ArcStr,
    labels: IndexSet<Label>,
}

impl Axis {
    pub fn new<I>(name: &str, labels: I) -> Result<Self, QuantityError>
    where
        I: IntoIterator,
        I::Item: Into<Label>,
    {
        let mut set = IndexSet::new();
        for label in labels {
            let label = label.into();
            if set.contains(&label) {
                return Err(QuantityError::DuplicateLabel {
                    dim: name.to_string(),
                    label: label.to_string(),
                });
            }
            set.insert(label);
        }

        Ok(Self {
            name: name.into(),
            labels: set,
        })
    }

    pub(crate) fn from_set(name: ArcStr, labels: IndexSet<Label>) -> Self {
        Self { name, labels }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> impl ExactSizeIterator<Item = &Label> + '_ {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn position(&self, label: &Label) -> Option<usize> {
        self.labels.get_index_of(label)
    }

    pub fn label(&self, index: usize) -> Option<&Label> {
        self.labels.get_index(index)
    }

    pub(crate) fn renamed(&self, name: &str) -> Axis {
        Axis {
            name: name.into(),
            labels: self.labels.clone(),
        }
    }

    /// This axis extended with the labels of `other` it doesn't already
    /// have, together with the position of each of `other`'s labels in the
    /// result.
    pub(crate) fn union(&self, other: &Axis) -> (Axis, Vec<usize>) {
        let mut labels = self.labels.clone();
        let remap = other
            .labels
            .iter()
            .map(|label| labels.insert_full(label.clone()).0)
            .collect();

        (Axis::from_set(self.name.clone(), labels), remap)
    }
}
