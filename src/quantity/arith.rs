use std::collections::{BTreeMap, HashMap};

use super::storage::{self, Backend, Storage};
use super::{Axis, Quantity};
use crate::error::QuantityError;
use crate::units::Unit;

/// Where each axis of one operand lands in the aligned result.
struct Side {
    /// For each operand axis: result axis position, and the position of each
    /// of its labels along that result axis.
    maps: Vec<(usize, Vec<usize>)>,
}

impl Side {
    fn identity(pos: usize, axis: &Axis) -> (usize, Vec<usize>) {
        (pos, (0..axis.len()).collect())
    }

    fn covers(&self, pos: usize) -> bool {
        self.maps.iter().any(|(p, _)| *p == pos)
    }

    /// Places an operand index into a result index, leaving positions this
    /// side doesn't cover untouched.
    fn place(&self, index: &[usize], out: &mut [usize]) {
        for ((pos, remap), &i) in self.maps.iter().zip(index) {
            out[*pos] = remap[i];
        }
    }

    /// Every result index this operand cell is broadcast to.
    fn expand(&self, index: &[usize], shape: &[usize]) -> Vec<Vec<usize>> {
        let mut base = vec![0; shape.len()];
        self.place(index, &mut base);

        let free: Vec<usize> = (0..shape.len()).filter(|&p| !self.covers(p)).collect();
        let free_shape: Vec<usize> = free.iter().map(|&p| shape[p]).collect();

        storage::indices(&free_shape)
            .map(|combo| {
                let mut out = base.clone();
                for (&p, i) in free.iter().zip(combo) {
                    out[p] = i;
                }
                out
            })
            .collect()
    }
}

/// Result axes for a binary operation: the left axes, then the axes only the
/// right operand has. Shared axes take the union of coordinates.
struct Alignment {
    axes: Vec<Axis>,
    left: Side,
    right: Side,
}

impl Alignment {
    fn new(left: &Quantity, right: &Quantity) -> Self {
        let mut axes: Vec<Axis> = left.axes.clone();
        let lmaps = axes
            .iter()
            .enumerate()
            .map(|(pos, axis)| Side::identity(pos, axis))
            .collect();

        let mut rmaps = Vec::with_capacity(right.axes.len());
        for axis in &right.axes {
            match axes.iter().position(|a| a.name() == axis.name()) {
                Some(pos) => {
                    let (union, remap) = axes[pos].union(axis);
                    axes[pos] = union;
                    rmaps.push((pos, remap));
                }
                None => {
                    rmaps.push(Side::identity(axes.len(), axis));
                    axes.push(axis.clone());
                }
            }
        }

        Self {
            axes,
            left: Side { maps: lmaps },
            right: Side { maps: rmaps },
        }
    }

    fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Axis::len).collect()
    }
}

fn result_backend(left: &Quantity, right: &Quantity) -> Backend {
    match (left.backend(), right.backend()) {
        (Backend::Dense, Backend::Dense) => Backend::Dense,
        _ => Backend::Sparse,
    }
}

/// The single integer held by every cell, if there is one. An empty quantity
/// counts as the power 1.
fn uniform_integer(q: &Quantity) -> Option<i32> {
    let shape = q.shape();
    let mut values = q.storage.cells(&shape).map(|(_, v)| v);
    let first = values.next().unwrap_or(1.0);
    let integral = first.fract() == 0.0 && first.abs() <= f64::from(i32::MAX);
    (integral && values.all(|v| v == first)).then_some(first as i32)
}

fn collect(backend: Backend, shape: &[usize], cells: BTreeMap<Vec<usize>, f64>) -> Storage {
    match backend {
        Backend::Sparse => Storage::Sparse(cells),
        Backend::Dense => {
            let mut storage = Storage::empty(Backend::Dense, shape);
            for (index, value) in cells {
                storage.insert(shape, index, value);
            }
            storage
        }
    }
}

impl Quantity {
    /// Sum with union alignment; a value missing on either side counts as 0.
    ///
    /// `other` is converted into the unit of `self` first.
    pub fn add(&self, other: &Quantity) -> Result<Quantity, QuantityError> {
        self.additive(other, 1.0)
    }

    pub fn sub(&self, other: &Quantity) -> Result<Quantity, QuantityError> {
        self.additive(other, -1.0)
    }

    /// Product; a cell exists only where both operands have one.
    pub fn mul(&self, other: &Quantity) -> Quantity {
        self.multiplicative(other, |a, b| a * b)
            .with_units(self.unit.mul(&other.unit))
    }

    pub fn div(&self, other: &Quantity) -> Quantity {
        self.multiplicative(other, |a, b| a / b)
            .with_units(self.unit.div(&other.unit))
    }

    /// Raises each cell to the matching cell of `exponent`, aligned like
    /// [`Quantity::mul`].
    ///
    /// The exponent must be dimensionless. When all of its cells hold the
    /// same integer the unit is raised to that power; otherwise the base has
    /// to be dimensionless as well.
    pub fn pow(&self, exponent: &Quantity) -> Result<Quantity, QuantityError> {
        let error = |reason| QuantityError::Power {
            base: self.unit.to_string(),
            exponent: exponent.unit.to_string(),
            reason,
        };
        let dimensionless = Unit::dimensionless();
        let exponent = exponent
            .convert_units(&dimensionless)
            .map_err(|_| error("exponent is not dimensionless"))?;

        let result = match uniform_integer(&exponent) {
            Some(n) => self
                .multiplicative(&exponent, f64::powf)
                .with_units(self.unit.powi(n)),
            None => self
                .convert_units(&dimensionless)
                .map_err(|_| error("exponents differ and the base has a unit"))?
                .multiplicative(&exponent, f64::powf),
        };
        Ok(result)
    }

    /// Raises every value and the unit to the integer power `n`.
    pub fn powi(&self, n: i32) -> Quantity {
        Self {
            storage: self.storage.map(|x| x.powi(n)),
            unit: self.unit.powi(n),
            ..self.clone()
        }
    }

    fn additive(&self, other: &Quantity, sign: f64) -> Result<Quantity, QuantityError> {
        let factor =
            other
                .unit
                .factor_to(&self.unit)
                .map_err(|_| QuantityError::IncompatibleUnits {
                    left: self.unit.to_string(),
                    right: other.unit.to_string(),
                })?;

        let alignment = Alignment::new(self, other);
        let shape = alignment.shape();
        let mut out = BTreeMap::new();

        for (index, value) in self.storage.cells(&self.shape()) {
            for cell in alignment.left.expand(&index, &shape) {
                out.insert(cell, value);
            }
        }
        for (index, value) in other.storage.cells(&other.shape()) {
            for cell in alignment.right.expand(&index, &shape) {
                *out.entry(cell).or_insert(0.0) += sign * value * factor;
            }
        }

        let storage = collect(result_backend(self, other), &shape, out);
        Ok(Quantity::from_storage(
            alignment.axes,
            storage,
            self.unit.clone(),
        ))
    }

    fn multiplicative(&self, other: &Quantity, op: impl Fn(f64, f64) -> f64) -> Quantity {
        let alignment = Alignment::new(self, other);
        let shape = alignment.shape();
        let shared: Vec<usize> = (0..shape.len())
            .filter(|&p| alignment.left.covers(p) && alignment.right.covers(p))
            .collect();

        let mut groups: HashMap<Vec<usize>, Vec<(Vec<usize>, f64)>> = HashMap::new();
        for (index, value) in other.storage.cells(&other.shape()) {
            let mut cell = vec![0; shape.len()];
            alignment.right.place(&index, &mut cell);
            let key = shared.iter().map(|&p| cell[p]).collect();
            groups.entry(key).or_default().push((cell, value));
        }

        let mut out = BTreeMap::new();
        for (index, value) in self.storage.cells(&self.shape()) {
            let mut cell = vec![0; shape.len()];
            alignment.left.place(&index, &mut cell);
            let key: Vec<usize> = shared.iter().map(|&p| cell[p]).collect();

            for (partial, rhs) in groups.get(&key).into_iter().flatten() {
                let mut merged = partial.clone();
                alignment.left.place(&index, &mut merged);
                out.insert(merged, op(value, *rhs));
            }
        }

        let storage = collect(result_backend(self, other), &shape, out);
        Quantity::from_storage(alignment.axes, storage, self.unit.clone())
    }
}
