use std::collections::HashSet;

use petgraph::Direction;
use petgraph::stable_graph::NodeIndex;

use super::Computer;
use crate::error::{Error, GraphError};
use crate::key::{IntoKey, Key};
use crate::ops;
use crate::task::{Arg, Task};

impl Computer {
    /// The full-dimensional key registered for `name_or_key`.
    ///
    /// Looks for registered keys with the same name and tag whose dimensions
    /// include the requested ones, and returns the one that contains all the
    /// others. `emi` and `emi:n` both resolve to `emi:n-t` if that is how
    /// the quantity was added.
    pub fn full_key(&self, name_or_key: impl IntoKey) -> Result<Key, Error> {
        let query = name_or_key.into_key()?;

        let candidates: Vec<&Key> = self.keys().filter(|k| k.contains(&query)).collect();

        let mut maximal: Vec<Key> = candidates
            .iter()
            .filter(|k| !candidates.iter().any(|o| o != *k && o.contains(k)))
            .map(|k| (*k).clone())
            .collect();

        match maximal.len() {
            0 => Err(GraphError::NotFound(vec![query]).into()),
            1 => Ok(maximal.remove(0)),
            _ => {
                maximal.sort();
                Err(GraphError::Ambiguous {
                    name: query,
                    candidates: maximal,
                }
                .into())
            }
        }
    }

    /// Full keys for `keys`, reduced to `dims` when given.
    ///
    /// Keys that are not known to the computer come back unchanged, so this
    /// can be used on keys that will only be added later.
    pub fn infer_keys<I>(&self, keys: I, dims: Option<&[&str]>) -> Result<Vec<Key>, Error>
    where
        I: IntoIterator,
        I::Item: IntoKey,
    {
        keys.into_iter()
            .map(|key| -> Result<Key, Error> {
                let key = key.into_key()?;
                let full = match self.full_key(&key) {
                    Ok(full) => full,
                    Err(Error::Graph(GraphError::NotFound(_))) => return Ok(key),
                    Err(e) => return Err(e),
                };

                match dims {
                    Some(dims) => {
                        let extra: Vec<&str> = full.dims().filter(|d| !dims.contains(d)).collect();
                        Ok(full.drop(extra)?)
                    }
                    None => Ok(full),
                }
            })
            .collect()
    }

    /// Resolves each of `keys` to a registered key, deriving partial sums
    /// where possible. A bare name stands for its full key.
    ///
    /// Fails with every missing key listed at once.
    pub fn check_keys<I>(&mut self, keys: I) -> Result<Vec<Key>, Error>
    where
        I: IntoIterator,
        I::Item: IntoKey,
    {
        let mut found = vec![];
        let mut missing = vec![];

        for key in keys {
            let key = key.into_key()?;
            match self.resolve(&key)? {
                Some(resolved) => found.push(resolved),
                None => missing.push(key),
            }
        }

        if missing.is_empty() {
            Ok(found)
        } else {
            Err(GraphError::NotFound(missing).into())
        }
    }

    /// The registered key `key` stands for: itself, the full key for a bare
    /// name, or a partial sum derived on the spot. `None` if there is none.
    pub(super) fn resolve(&mut self, key: &Key) -> Result<Option<Key>, Error> {
        if self.contains(key) {
            return Ok(Some(key.clone()));
        }
        if !key.has_dims() {
            return match self.full_key(key) {
                Ok(full) => Ok(Some(full)),
                Err(Error::Graph(GraphError::NotFound(_))) => Ok(None),
                Err(e) => Err(e),
            };
        }
        Ok(self.derive(key)?.then(|| key.clone()))
    }

    /// Makes sure `key` holds a task, registering it as a partial sum of
    /// its full key if needed. A bare name becomes an alias of its full key.
    /// Returns `false` if there is nothing to derive from.
    pub(super) fn derive(&mut self, key: &Key) -> Result<bool, Error> {
        if self.contains(key) {
            return Ok(true);
        }

        let full = match self.full_key(key) {
            Ok(full) => full,
            Err(Error::Graph(GraphError::NotFound(_))) => return Ok(false),
            Err(e) => return Err(e),
        };

        if !key.has_dims() {
            tracing::debug!("Deriving {key} as an alias of {full}");
            self.insert(key.clone(), Task::compute(ops::identity(), [Arg::Ref(full)]), false)?;
            self.derived.insert(key.clone());
            return Ok(true);
        }

        let dropped: Vec<String> = full
            .dims()
            .filter(|d| !key.has_dim(d))
            .map(String::from)
            .collect();

        tracing::debug!("Deriving {key} as the sum of {full} over {dropped:?}");
        let task = Task::compute(ops::sum(dropped), [Arg::Ref(full)]);
        self.insert(key.clone(), task, false)?;
        self.derived.insert(key.clone());

        Ok(true)
    }

    /// Partial sums registered on demand so far.
    pub fn derived(&self) -> impl Iterator<Item = &Key> + '_ {
        self.derived.iter()
    }

    /// Every node `roots` depend on, the roots included.
    ///
    /// Placeholders reached on the way are derived as partial sums where
    /// possible; any that remain make the whole retrieval fail.
    pub(super) fn cull(&mut self, roots: &[NodeIndex]) -> Result<HashSet<NodeIndex>, Error> {
        loop {
            let mut seen: HashSet<NodeIndex> = HashSet::new();
            let mut stack: Vec<NodeIndex> = roots.to_vec();
            let mut missing: Vec<Key> = vec![];

            while let Some(node) = stack.pop() {
                if !seen.insert(node) {
                    continue;
                }
                if self.graph[node].task.is_none() {
                    missing.push(self.graph[node].key.clone());
                }
                stack.extend(self.graph.neighbors_directed(node, Direction::Incoming));
            }

            if missing.is_empty() {
                return Ok(seen);
            }

            let mut unresolved = vec![];
            for key in missing {
                if !self.derive(&key)? {
                    unresolved.push(key);
                }
            }

            if !unresolved.is_empty() {
                unresolved.sort();
                return Err(GraphError::NotFound(unresolved).into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::computer::tests::emissions;

    fn computer() -> Computer {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        c.add("emi:n-t:gas", Task::literal(emissions())).unwrap();
        c.add("price:c-t", Task::literal(1.0f64)).unwrap();
        c
    }

    #[rstest]
    #[case("emi", "emi:n-t")]
    #[case("emi:n", "emi:n-t")]
    #[case("emi:t-n", "emi:n-t")]
    #[case("emi::gas", "emi:n-t:gas")]
    #[case("price:t", "price:c-t")]
    fn test_full_key(#[case] query: &str, #[case] expected: &str) {
        assert_eq!(computer().full_key(query).unwrap(), expected);
    }

    #[test]
    fn test_full_key_not_found() {
        let c = computer();
        for query in ["gdp", "emi:x", "emi::oil"] {
            let err = c.full_key(query).unwrap_err();
            assert!(matches!(err.as_graph(), Some(GraphError::NotFound(_))), "{query}");
        }
    }

    #[test]
    fn test_full_key_ambiguous() {
        let mut c = computer();
        c.add("emi:n-y", Task::literal(1.0f64)).unwrap();

        let err = c.full_key("emi:n").unwrap_err();
        let Some(GraphError::Ambiguous { candidates, .. }) = err.as_graph() else {
            panic!("expected ambiguity, got {err}");
        };
        assert_eq!(candidates, &["emi:n-t", "emi:n-y"]);

        assert_eq!(c.full_key("emi:t").unwrap(), "emi:n-t");
    }

    #[test]
    fn test_infer_keys() {
        let c = computer();
        let keys = c.infer_keys(["emi", "gdp:n", "price"], None).unwrap();
        assert_eq!(keys, ["emi:n-t", "gdp:n", "price:c-t"]);

        let keys = c.infer_keys(["emi", "emi::gas"], Some(&["t"][..])).unwrap();
        assert_eq!(keys, ["emi:t", "emi:t:gas"]);
    }

    #[test]
    fn test_check_keys() {
        let mut c = computer();
        let keys = c.check_keys(["emi:t", "price"]).unwrap();
        assert_eq!(keys, ["emi:t", "price:c-t"]);
        assert!(c.contains("emi:t"));
        assert_eq!(c.derived().collect::<Vec<_>>(), ["emi:t"]);

        let err = c.check_keys(["emi", "gdp", "emi:x"]).unwrap_err();
        let Some(GraphError::NotFound(keys)) = err.as_graph() else {
            panic!("expected missing keys, got {err}");
        };
        assert_eq!(keys, &["gdp", "emi:x"]);
    }

    #[test]
    fn test_derived_dependency() {
        let mut c = computer();
        c.add("share:n-t", Task::call(ops::div(), ["emi:n-t", "emi:t"]).unwrap())
            .unwrap();

        let share = c.get_as::<crate::Quantity>("share:n-t").unwrap();
        let afr = share.get(&["AFR".into(), "2020".into()]).unwrap();
        assert!((afr - 1.0 / 11.0).abs() < 1e-12);
        assert_eq!(c.derived().collect::<Vec<_>>(), ["emi:t"]);
    }

    #[test]
    fn test_bare_name_is_full_key() {
        let mut c = computer();
        assert_eq!(c.check_keys(["emi"]).unwrap(), ["emi:n-t"]);

        let emi = c.get_as::<crate::Quantity>("emi").unwrap();
        assert_eq!(emi.dims().collect::<Vec<_>>(), ["n", "t"]);
        assert!(!c.contains("emi"));

        c.add("copy", Task::call(ops::identity(), ["emi"]).unwrap())
            .unwrap();
        let copy = c.get_as::<crate::Quantity>("copy").unwrap();
        assert!(copy.equivalent(&emi, 0.0));
        assert!(c.derived().any(|k| k == "emi"));

        let err = c.get("price:x").unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::NotFound(_))));
    }
}
