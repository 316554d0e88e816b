//! Labelled, unit-bearing arrays.
//!
//! A [`Quantity`] is a set of named axes, one `f64` per populated coordinate
//! combination, and a [`Unit`]. The payload lives in one of two backends,
//! dense or sparse, and every operation gives equivalent results regardless
//! of which one is in effect.

mod arith;
mod axis;
mod reduce;
mod storage;
mod table;

use std::collections::BTreeMap;
use std::fmt;

use crate::core::ArcStr;
use crate::error::QuantityError;
use crate::units::Unit;

pub use axis::{Axis, Label};
pub use storage::Backend;
pub use table::Table;

use storage::Storage;

#[derive(Clone)]
pub struct Quantity {
    axes: Vec<Axis>,
    storage: Storage,
    unit: Unit,
    name: Option<ArcStr>,
}

impl Quantity {
    /// A zero-dimensional quantity.
    pub fn scalar(value: f64, unit: Unit) -> Self {
        let mut storage = Storage::empty(Backend::Dense, &[]);
        storage.insert(&[], vec![], value);
        Self {
            axes: vec![],
            storage,
            unit,
            name: None,
        }
    }

    /// Builds a quantity over `axes` from `(labels, value)` pairs, one label
    /// per axis in axis order. The backend is picked from the fill ratio.
    pub fn from_cells<I>(axes: Vec<Axis>, cells: I, unit: Unit) -> Result<Self, QuantityError>
    where
        I: IntoIterator<Item = (Vec<Label>, f64)>,
    {
        check_axes(&axes)?;
        let shape: Vec<usize> = axes.iter().map(Axis::len).collect();

        let mut indexed = BTreeMap::new();
        for (labels, value) in cells {
            if labels.len() != axes.len() {
                return Err(QuantityError::Shape(format!(
                    "expected {} labels per cell, got {}",
                    axes.len(),
                    labels.len()
                )));
            }

            let index = axes
                .iter()
                .zip(&labels)
                .map(|(axis, label)| {
                    axis.position(label)
                        .ok_or_else(|| QuantityError::MissingLabel {
                            dim: axis.name().to_string(),
                            label: label.to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if indexed.insert(index, value).is_some() {
                return Err(QuantityError::Overlap {
                    labels: fmt_labels(&labels),
                });
            }
        }

        let backend = Storage::choose(&shape, indexed.len());
        let storage = match backend {
            Backend::Sparse => Storage::Sparse(indexed),
            Backend::Dense => {
                let mut storage = Storage::empty(Backend::Dense, &shape);
                for (index, value) in indexed {
                    storage.insert(&shape, index, value);
                }
                storage
            }
        };

        Ok(Self {
            axes,
            storage,
            unit,
            name: None,
        })
    }

    pub(crate) fn from_storage(axes: Vec<Axis>, storage: Storage, unit: Unit) -> Self {
        Self {
            axes,
            storage,
            unit,
            name: None,
        }
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis(&self, dim: &str) -> Option<&Axis> {
        self.axes.iter().find(|a| a.name() == dim)
    }

    pub fn dims(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.axes.iter().map(Axis::name)
    }

    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }

    /// Number of populated cells.
    pub fn len(&self) -> usize {
        self.storage.populated()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn backend(&self) -> Backend {
        self.storage.backend()
    }

    pub fn to_dense(&self) -> Quantity {
        self.with_backend(Backend::Dense)
    }

    pub fn to_sparse(&self) -> Quantity {
        self.with_backend(Backend::Sparse)
    }

    pub fn with_backend(&self, backend: Backend) -> Quantity {
        Self {
            storage: self.storage.convert(&self.shape(), backend),
            ..self.clone()
        }
    }

    /// Value at the given coordinates, one label per axis in axis order.
    pub fn get(&self, labels: &[Label]) -> Option<f64> {
        if labels.len() != self.axes.len() {
            return None;
        }
        let index = self
            .axes
            .iter()
            .zip(labels)
            .map(|(axis, label)| axis.position(label))
            .collect::<Option<Vec<_>>>()?;
        self.storage.get(&self.shape(), &index)
    }

    /// Populated cells as `(labels, value)` pairs, in storage order.
    pub fn cells(&self) -> Vec<(Vec<Label>, f64)> {
        let shape = self.shape();
        self.storage
            .cells(&shape)
            .map(|(index, value)| (self.labels_at(&index), value))
            .collect()
    }

    fn labels_at(&self, index: &[usize]) -> Vec<Label> {
        self.axes
            .iter()
            .zip(index)
            .filter_map(|(axis, &i)| axis.label(i).cloned())
            .collect()
    }

    /// Axis names sorted, and every populated cell with labels in that axis
    /// order, sorted by labels. Independent of backend and axis order.
    pub fn sorted_cells(&self) -> (Vec<&str>, Vec<(Vec<Label>, f64)>) {
        let mut order: Vec<usize> = (0..self.axes.len()).collect();
        order.sort_by(|&a, &b| self.axes[a].name().cmp(self.axes[b].name()));

        let mut cells: Vec<(Vec<Label>, f64)> = self
            .cells()
            .into_iter()
            .map(|(labels, value)| (order.iter().map(|&i| labels[i].clone()).collect(), value))
            .collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));

        let dims = order.iter().map(|&i| self.axes[i].name()).collect();
        (dims, cells)
    }

    /// The value of a zero-dimensional quantity; `NaN` if it holds no cell.
    pub fn item(&self) -> Result<f64, QuantityError> {
        if !self.axes.is_empty() {
            return Err(QuantityError::NotScalar(
                self.dims().map(String::from).collect(),
            ));
        }
        Ok(self.storage.get(&[], &[]).unwrap_or(f64::NAN))
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Replaces the unit without touching the payload.
    pub fn with_units(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Expresses the same values in `unit`, scaling the payload.
    pub fn convert_units(&self, unit: &Unit) -> Result<Quantity, QuantityError> {
        let factor = self.unit.factor_to(unit)?;
        Ok(Self {
            storage: self.storage.map(|x| x * factor),
            unit: unit.clone(),
            ..self.clone()
        })
    }

    /// Multiplies every value by a plain number.
    pub fn scale(&self, factor: f64) -> Quantity {
        Self {
            storage: self.storage.map(|x| x * factor),
            ..self.clone()
        }
    }

    pub fn rename_dim(&self, from: &str, to: &str) -> Result<Quantity, QuantityError> {
        let pos = self.position(from)?;
        if from != to && self.axis(to).is_some() {
            return Err(QuantityError::DuplicateDimension(to.to_string()));
        }

        let mut axes = self.axes.clone();
        axes[pos] = axes[pos].renamed(to);
        Ok(Self {
            axes,
            ..self.clone()
        })
    }

    /// Same axes, same unit and the same populated cells with values within
    /// `tol` (relative to the larger magnitude, or absolute near zero). `NaN`
    /// matches `NaN`.
    pub fn equivalent(&self, other: &Quantity, tol: f64) -> bool {
        if self.unit != other.unit {
            return false;
        }

        let (dims_a, cells_a) = self.sorted_cells();
        let (dims_b, cells_b) = other.sorted_cells();
        if dims_a != dims_b || cells_a.len() != cells_b.len() {
            return false;
        }

        cells_a.iter().zip(&cells_b).all(|((la, a), (lb, b))| {
            la == lb
                && ((a.is_nan() && b.is_nan())
                    || (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0))
        })
    }

    fn position(&self, dim: &str) -> Result<usize, QuantityError> {
        self.axes
            .iter()
            .position(|a| a.name() == dim)
            .ok_or_else(|| QuantityError::MissingDimension(dim.to_string()))
    }
}

fn check_axes(axes: &[Axis]) -> Result<(), QuantityError> {
    for (i, axis) in axes.iter().enumerate() {
        if axes[..i].iter().any(|a| a.name() == axis.name()) {
            return Err(QuantityError::DuplicateDimension(axis.name().to_string()));
        }
    }
    Ok(())
}

fn fmt_labels(labels: &[Label]) -> String {
    let parts: Vec<String> = labels.iter().map(Label::to_string).collect();
    format!("({})", parts.join(", "))
}

impl fmt::Debug for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quantity")
            .field("name", &self.name)
            .field("dims", &self.dims().collect::<Vec<_>>())
            .field("unit", &self.unit)
            .field("backend", &self.backend())
            .field("cells", &self.len())
            .finish()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<&str> = self.dims().collect();
        writeln!(
            f,
            "{} [{}] ({})",
            self.name.as_deref().unwrap_or("<unnamed>"),
            self.unit,
            dims.join(", ")
        )?;
        for (labels, value) in self.cells() {
            writeln!(f, "  {} {value}", fmt_labels(&labels))?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn unit(s: &str) -> Unit {
        Unit::parse(s).unwrap()
    }

    /// `dims` with the labels found in `rows`, in order of appearance.
    pub(crate) fn qty(dims: &[&str], rows: &[(&[Label], f64)], u: &str) -> Quantity {
        let table = Table {
            name: None,
            dims: dims.iter().map(|d| d.to_string()).collect(),
            unit: unit(u),
            coords: vec![],
            rows: rows.iter().map(|(l, v)| (l.to_vec(), *v)).collect(),
        };
        Quantity::from_table(table).unwrap()
    }

    pub(crate) fn l(s: &str) -> Label {
        Label::from(s)
    }

    #[test]
    fn test_scalar_item() {
        let q = Quantity::scalar(2.5, Unit::dimensionless());
        assert_eq!(q.item().unwrap(), 2.5);
        assert_eq!(q.ndim(), 0);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_not_scalar() {
        let q = qty(&["x"], &[(&[l("a")], 1.0)], "");
        assert_eq!(q.item(), Err(QuantityError::NotScalar(vec!["x".into()])));
    }

    #[test]
    fn test_from_cells_errors() {
        let axes = vec![Axis::new("x", ["a", "b"]).unwrap()];
        let err = Quantity::from_cells(axes.clone(), [(vec![l("c")], 1.0)], Unit::default())
            .unwrap_err();
        assert!(matches!(err, QuantityError::MissingLabel { .. }));

        let err = Quantity::from_cells(
            axes.clone(),
            [(vec![l("a")], 1.0), (vec![l("a")], 2.0)],
            Unit::default(),
        )
        .unwrap_err();
        assert!(matches!(err, QuantityError::Overlap { .. }));

        let dup = vec![axes[0].clone(), axes[0].clone()];
        let none = Vec::<(Vec<Label>, f64)>::new();
        let err = Quantity::from_cells(dup, none, Unit::default()).unwrap_err();
        assert_eq!(err, QuantityError::DuplicateDimension("x".into()));
    }

    #[test]
    fn test_automatic_sparse() {
        let a = Axis::new("a", 0..100).unwrap();
        let b = Axis::new("b", 0..100).unwrap();
        let cells = (0..10).map(|i| (vec![Label::Int(i), Label::Int(i)], 1.0));
        let q = Quantity::from_cells(vec![a, b], cells, Unit::default()).unwrap();
        assert_eq!(q.backend(), Backend::Sparse);
        assert_eq!(q.len(), 10);
        assert_eq!(q.get(&[Label::Int(3), Label::Int(3)]), Some(1.0));
        assert_eq!(q.get(&[Label::Int(3), Label::Int(4)]), None);
    }

    #[test]
    fn test_high_cardinality_sparse() {
        let axes: Vec<Axis> = (0..10)
            .map(|i| Axis::new(&format!("d{i}"), 0..100).unwrap())
            .collect();
        let cells = (0..5).map(|i| (vec![Label::Int(i); 10], i as f64));
        let q = Quantity::from_cells(axes, cells, Unit::default()).unwrap();

        assert_eq!(q.backend(), Backend::Sparse);
        assert_eq!(q.len(), 5);
        assert_eq!(q.get(&vec![Label::Int(4); 10]), Some(4.0));
        assert_eq!(q.to_dense().backend(), Backend::Sparse);

        let total = q.sum(&["d0", "d1", "d2", "d3", "d4"]).unwrap();
        assert_eq!(total.backend(), Backend::Sparse);
        assert_eq!(total.sum::<&str>(&[]).unwrap().item().unwrap(), 10.0);
    }

    #[test]
    fn test_nan_cells_kept() {
        let axes = vec![Axis::new("x", ["a", "b"]).unwrap()];
        let cells = [(vec![l("a")], f64::NAN), (vec![l("b")], 1.0)];
        let q = Quantity::from_cells(axes, cells, Unit::default()).unwrap();

        assert_eq!(q.len(), 2);
        assert!(q.equivalent(&q.to_sparse(), 0.0));
        assert!(!q.equivalent(&q.sel("x", &[l("b")]).unwrap(), 0.0));
    }

    #[test]
    fn test_convert_units() {
        let q = qty(&["x"], &[(&[l("a")], 2.0)], "kg");
        let g = q.convert_units(&unit("g")).unwrap();
        assert_eq!(g.get(&[l("a")]), Some(2000.0));
        assert_eq!(g.unit().to_string(), "g");

        assert!(q.convert_units(&unit("s")).is_err());
    }

    #[test]
    fn test_rename_dim() {
        let q = qty(&["x", "y"], &[(&[l("a"), l("b")], 1.0)], "");
        let r = q.rename_dim("x", "z").unwrap();
        assert_eq!(r.dims().collect::<Vec<_>>(), ["z", "y"]);
        assert_eq!(
            q.rename_dim("x", "y").unwrap_err(),
            QuantityError::DuplicateDimension("y".into())
        );
        assert_eq!(
            q.rename_dim("w", "v").unwrap_err(),
            QuantityError::MissingDimension("w".into())
        );
    }

    #[test]
    fn test_equivalent_ignores_backend_and_axis_order() {
        let a = qty(&["x", "y"], &[(&[l("a"), l("b")], 1.0)], "kg");
        let b = qty(&["y", "x"], &[(&[l("b"), l("a")], 1.0 + 1e-12)], "kg");
        assert!(a.equivalent(&b.to_sparse(), 1e-9));
        assert!(!a.equivalent(&b.with_units(unit("g")), 1e-9));
    }
}
