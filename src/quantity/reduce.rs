use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};

use super::storage::{Backend, Storage};
use super::{Axis, Label, Quantity};
use crate::error::QuantityError;

impl Quantity {
    /// Sums over `dims`, or over every dimension when `dims` is empty.
    /// The unit is kept.
    pub fn sum<S: AsRef<str>>(&self, dims: &[S]) -> Result<Quantity, QuantityError> {
        let drop: IndexSet<usize> = if dims.is_empty() {
            (0..self.axes.len()).collect()
        } else {
            dims.iter()
                .map(|d| self.position(d.as_ref()))
                .collect::<Result<IndexSet<_>, _>>()?
        };

        let keep: Vec<usize> = (0..self.axes.len())
            .filter(|p| !drop.contains(p))
            .collect();
        let axes: Vec<Axis> = keep.iter().map(|&p| self.axes[p].clone()).collect();
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();

        let mut out: BTreeMap<Vec<usize>, f64> = BTreeMap::new();
        for (index, value) in self.storage.cells(&self.shape()) {
            let reduced = keep.iter().map(|&p| index[p]).collect();
            *out.entry(reduced).or_insert(0.0) += value;
        }

        let mut storage = Storage::empty(self.backend(), &shape);
        for (index, value) in out {
            storage.insert(&shape, index, value);
        }

        Ok(Quantity::from_storage(axes, storage, self.unit.clone()))
    }

    /// `Σ(self·weights) / Σweights` over `dims`, or over every dimension of
    /// `self` when `dims` is empty.
    pub fn sum_weighted<S: AsRef<str>>(
        &self,
        weights: &Quantity,
        dims: &[S],
    ) -> Result<Quantity, QuantityError> {
        let dims: Vec<&str> = if dims.is_empty() {
            self.dims().collect()
        } else {
            dims.iter().map(|d| d.as_ref()).collect()
        };
        let weight_dims: Vec<&str> = dims
            .iter()
            .copied()
            .filter(|d| weights.axis(d).is_some())
            .collect();

        let numerator = self.mul(weights).sum(&dims)?;
        let denominator = if weight_dims.is_empty() {
            weights.clone()
        } else {
            weights.sum(&weight_dims)?
        };
        Ok(numerator.div(&denominator))
    }

    /// Keeps the coordinates `labels` of `dim`, in the given order.
    pub fn sel(&self, dim: &str, labels: &[Label]) -> Result<Quantity, QuantityError> {
        let pos = self.position(dim)?;
        let axis = &self.axes[pos];

        let picked = labels
            .iter()
            .map(|label| {
                axis.position(label)
                    .ok_or_else(|| QuantityError::MissingLabel {
                        dim: dim.to_string(),
                        label: label.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut axes = self.axes.clone();
        axes[pos] = Axis::new(dim, labels.iter().cloned())?;
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();

        let mut storage = Storage::empty(self.backend(), &shape);
        for (mut index, value) in self.storage.cells(&self.shape()) {
            if let Some(new) = picked.iter().position(|&i| i == index[pos]) {
                index[pos] = new;
                storage.insert(&shape, index, value);
            }
        }

        Ok(Quantity {
            axes,
            storage,
            ..self.clone()
        })
    }

    /// Picks one coordinate of `dim` and drops the axis.
    pub fn sel_one(&self, dim: &str, label: &Label) -> Result<Quantity, QuantityError> {
        self.sel(dim, std::slice::from_ref(label))?.squeeze(dim)
    }

    /// Applies [`Quantity::sel`] for every `(dim, labels)` pair.
    pub fn select<I, S>(&self, indexers: I) -> Result<Quantity, QuantityError>
    where
        I: IntoIterator<Item = (S, Vec<Label>)>,
        S: AsRef<str>,
    {
        let mut out = self.clone();
        for (dim, labels) in indexers {
            out = out.sel(dim.as_ref(), &labels)?;
        }
        Ok(out)
    }

    fn squeeze(&self, dim: &str) -> Result<Quantity, QuantityError> {
        let pos = self.position(dim)?;
        if self.axes[pos].len() != 1 {
            return Err(QuantityError::Shape(format!(
                "cannot squeeze '{dim}' of length {}",
                self.axes[pos].len()
            )));
        }
        self.sum(&[dim])
    }

    /// Concatenates `parts` along the existing dimension `dim`. Every part
    /// must have the same dimensions; values are converted into the unit of
    /// the first part.
    pub fn concat(parts: &[Quantity], dim: &str) -> Result<Quantity, QuantityError> {
        let Some((first, rest)) = parts.split_first() else {
            return Err(QuantityError::Shape("nothing to concatenate".into()));
        };
        first.position(dim)?;

        let mut out = first.clone();
        for part in rest {
            same_dims(first, part)?;
            let part = part.convert_units(&first.unit).map_err(|_| {
                QuantityError::IncompatibleUnits {
                    left: first.unit.to_string(),
                    right: part.unit.to_string(),
                }
            })?;
            out = out.merge_disjoint(&part)?;
        }
        Ok(out)
    }

    /// Concatenates `parts` along a new leading dimension `dim`, with one
    /// coordinate per part.
    pub fn concat_new(parts: &[(Label, Quantity)], dim: &str) -> Result<Quantity, QuantityError> {
        let mut expanded = Vec::with_capacity(parts.len());
        for (label, part) in parts {
            if part.axis(dim).is_some() {
                return Err(QuantityError::DuplicateDimension(dim.to_string()));
            }
            expanded.push(part.expand_dim(dim, label.clone())?);
        }
        Quantity::concat(&expanded, dim)
    }

    /// Adds a length-one leading axis.
    fn expand_dim(&self, dim: &str, label: Label) -> Result<Quantity, QuantityError> {
        let mut axes = vec![Axis::new(dim, [label])?];
        axes.extend(self.axes.iter().cloned());
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();

        let mut storage = Storage::empty(self.backend(), &shape);
        for (index, value) in self.storage.cells(&self.shape()) {
            let mut full = Vec::with_capacity(index.len() + 1);
            full.push(0);
            full.extend(index);
            storage.insert(&shape, full, value);
        }

        Ok(Quantity {
            axes,
            storage,
            ..self.clone()
        })
    }

    /// Union of two quantities with the same dimensions, failing if any
    /// cell is populated in both.
    fn merge_disjoint(&self, other: &Quantity) -> Result<Quantity, QuantityError> {
        let mut axes = self.axes.clone();
        let mut remaps = Vec::with_capacity(other.axes.len());
        for axis in &other.axes {
            let pos = self.position(axis.name())?;
            let (union, remap) = axes[pos].union(axis);
            axes[pos] = union;
            remaps.push((pos, remap));
        }
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();

        let backend = match (self.backend(), other.backend()) {
            (Backend::Dense, Backend::Dense) => Backend::Dense,
            _ => Backend::Sparse,
        };
        let mut storage = Storage::empty(backend, &shape);
        for (index, value) in self.storage.cells(&self.shape()) {
            storage.insert(&shape, index, value);
        }
        for (index, value) in other.storage.cells(&other.shape()) {
            let mut cell = vec![0; shape.len()];
            for ((pos, remap), &i) in remaps.iter().zip(&index) {
                cell[*pos] = remap[i];
            }
            if storage.get(&shape, &cell).is_some() {
                let labels: Vec<String> = axes
                    .iter()
                    .zip(&cell)
                    .filter_map(|(a, &i)| a.label(i).map(Label::to_string))
                    .collect();
                return Err(QuantityError::Overlap {
                    labels: format!("({})", labels.join(", ")),
                });
            }
            storage.insert(&shape, cell, value);
        }

        Ok(Quantity {
            axes,
            storage,
            ..self.clone()
        })
    }

    /// Sums groups of coordinates of `dim` into new coordinates.
    ///
    /// Group members absent from the axis are skipped. With `keep`, the
    /// original coordinates stay and the groups are appended after them.
    pub fn aggregate(
        &self,
        dim: &str,
        groups: &IndexMap<Label, Vec<Label>>,
        keep: bool,
    ) -> Result<Quantity, QuantityError> {
        let pos = self.position(dim)?;
        let axis = &self.axes[pos];

        let mut labels: Vec<Label> = if keep {
            axis.labels().cloned().collect()
        } else {
            vec![]
        };
        labels.extend(groups.keys().cloned());
        let new_axis = Axis::new(dim, labels)?;

        // Old coordinate index -> every new coordinate it contributes to.
        let mut targets: Vec<Vec<usize>> = vec![vec![]; axis.len()];
        if keep {
            for (i, t) in targets.iter_mut().enumerate() {
                t.push(i);
            }
        }
        for (group, members) in groups {
            let Some(target) = new_axis.position(group) else {
                continue;
            };
            for member in members {
                if let Some(source) = axis.position(member) {
                    targets[source].push(target);
                }
            }
        }

        let mut axes = self.axes.clone();
        axes[pos] = new_axis;
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();

        let mut out: BTreeMap<Vec<usize>, f64> = BTreeMap::new();
        for (index, value) in self.storage.cells(&self.shape()) {
            for &target in &targets[index[pos]] {
                let mut cell = index.clone();
                cell[pos] = target;
                *out.entry(cell).or_insert(0.0) += value;
            }
        }

        let mut storage = Storage::empty(self.backend(), &shape);
        for (index, value) in out {
            storage.insert(&shape, index, value);
        }

        Ok(Quantity {
            axes,
            storage,
            ..self.clone()
        })
    }
}

fn same_dims(a: &Quantity, b: &Quantity) -> Result<(), QuantityError> {
    let mut da: Vec<&str> = a.dims().collect();
    let mut db: Vec<&str> = b.dims().collect();
    da.sort_unstable();
    db.sort_unstable();
    if da != db {
        return Err(QuantityError::Shape(format!(
            "dimensions {da:?} and {db:?} differ"
        )));
    }
    Ok(())
}
