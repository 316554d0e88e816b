use std::collections::BTreeMap;

/// Which storage a [`crate::Quantity`] is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Row-major buffer over the full cross-product of coordinates.
    Dense,
    /// Only populated cells, keyed by coordinate index.
    Sparse,
}

/// Storage primitives shared by both backends.
///
/// Everything above this layer speaks in terms of populated cells addressed
/// by a tuple of coordinate indices, one per axis. A populated cell may hold
/// `NaN`; absence is tracked separately from the value.
#[derive(Debug, Clone)]
pub(crate) enum Storage {
    Dense(Vec<Option<f64>>),
    Sparse(BTreeMap<Vec<usize>, f64>),
}

/// Cross-product sizes over which sparse storage is considered.
const SPARSE_MIN_CELLS: usize = 1_000;
const SPARSE_MAX_FILL: f64 = 0.01;

impl Storage {
    /// Empty storage for `shape`. A dense request over a cross-product too
    /// large to address gets sparse storage instead.
    pub fn empty(backend: Backend, shape: &[usize]) -> Self {
        match (backend, size(shape)) {
            (Backend::Dense, Some(total)) => Storage::Dense(vec![None; total]),
            _ => Storage::Sparse(BTreeMap::new()),
        }
    }

    /// Picks a backend for `populated` cells out of the cross-product of
    /// `shape`.
    pub fn choose(shape: &[usize], populated: usize) -> Backend {
        match size(shape) {
            None => Backend::Sparse,
            Some(total)
                if total > SPARSE_MIN_CELLS
                    && (populated as f64) < SPARSE_MAX_FILL * total as f64 =>
            {
                Backend::Sparse
            }
            Some(_) => Backend::Dense,
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Storage::Dense(_) => Backend::Dense,
            Storage::Sparse(_) => Backend::Sparse,
        }
    }

    pub fn get(&self, shape: &[usize], index: &[usize]) -> Option<f64> {
        match self {
            Storage::Dense(data) => data.get(offset(shape, index)).copied().flatten(),
            Storage::Sparse(map) => map.get(index).copied(),
        }
    }

    pub fn insert(&mut self, shape: &[usize], index: Vec<usize>, value: f64) {
        match self {
            Storage::Dense(data) => {
                let i = offset(shape, &index);
                data[i] = Some(value);
            }
            Storage::Sparse(map) => {
                map.insert(index, value);
            }
        }
    }

    /// Populated cells in row-major order of their indices.
    pub fn cells<'a>(
        &'a self,
        shape: &'a [usize],
    ) -> Box<dyn Iterator<Item = (Vec<usize>, f64)> + 'a> {
        match self {
            Storage::Dense(data) => Box::new(
                data.iter()
                    .enumerate()
                    .filter_map(move |(i, x)| x.map(|x| (unravel(shape, i), x))),
            ),
            Storage::Sparse(map) => Box::new(map.iter().map(|(k, &v)| (k.clone(), v))),
        }
    }

    pub fn populated(&self) -> usize {
        match self {
            Storage::Dense(data) => data.iter().filter(|x| x.is_some()).count(),
            Storage::Sparse(map) => map.len(),
        }
    }

    pub fn convert(&self, shape: &[usize], backend: Backend) -> Storage {
        if self.backend() == backend {
            return self.clone();
        }

        let mut out = Storage::empty(backend, shape);
        for (index, value) in self.cells(shape) {
            out.insert(shape, index, value);
        }
        out
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Storage {
        match self {
            Storage::Dense(data) => Storage::Dense(data.iter().map(|x| x.map(&f)).collect()),
            Storage::Sparse(map) => {
                Storage::Sparse(map.iter().map(|(k, &v)| (k.clone(), f(v))).collect())
            }
        }
    }
}

/// Number of cells in the cross-product of `shape`, or `None` if it does not
/// fit in a `usize`.
pub(crate) fn size(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &len| acc.checked_mul(len))
}

fn offset(shape: &[usize], index: &[usize]) -> usize {
    shape
        .iter()
        .zip(index)
        .fold(0, |acc, (&len, &i)| acc * len + i)
}

fn unravel(shape: &[usize], mut offset: usize) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (slot, &len) in index.iter_mut().zip(shape).rev() {
        *slot = offset % len;
        offset /= len;
    }
    index
}

/// Every index tuple of the cross-product of `shape`, row-major.
pub(crate) fn indices(shape: &[usize]) -> impl Iterator<Item = Vec<usize>> + '_ {
    let mut next = if shape.contains(&0) {
        None
    } else {
        Some(vec![0; shape.len()])
    };

    std::iter::from_fn(move || {
        let current = next.take()?;
        let mut following = current.clone();
        for (slot, &len) in following.iter_mut().zip(shape).rev() {
            *slot += 1;
            if *slot < len {
                next = Some(following);
                return Some(current);
            }
            *slot = 0;
        }
        Some(current)
    })
}
