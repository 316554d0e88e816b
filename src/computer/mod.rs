//! The [`Computer`]: a lazily evaluated graph of labelled computations.
mod configure;
mod describe;
mod resolve;

use std::any::{Any, type_name};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{self, CacheStore};
use crate::config::Config;
use crate::core::Dynamic;
use crate::error::{Error, GraphError, UnitError};
use crate::executor;
use crate::key::{IntoKey, Key};
use crate::ops;
use crate::quantity::Label;
use crate::task::{Arg, Operator, Task};
use crate::units::{Unit, UnitRegistry};

/// One node of the graph. A slot without a task is a placeholder for a key
/// that has been referenced but not registered yet.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub key: Key,
    pub task: Option<Task>,
}

/// One deferred registration for [`Computer::add_queue`].
pub type QueueItem<'a> = Box<dyn Fn(&mut Computer) -> Result<Vec<Key>, Error> + 'a>;

/// A graph of named computations, evaluated on demand.
///
/// Nodes are registered under a [`Key`] and may refer to keys that do not
/// exist yet. Nothing runs until [`Computer::get`] is called; then only the
/// requested keys and their transitive dependencies are evaluated, each of
/// them once, in parallel where the graph allows.
///
/// ```rust
/// use reckon::{Computer, Quantity, Table, Task, Unit, ops};
///
/// let table = Table::new(["n", "t"], Unit::parse("Mt").unwrap())
///     .row(["AFR", "2020"], 1.0)
///     .row(["CHN", "2020"], 2.0);
///
/// let mut c = Computer::new();
/// c.add("emi:n-t", Task::literal(Quantity::from_table(table).unwrap())).unwrap();
///
/// // Partial sums of a registered key are derived on request.
/// let total = c.get_as::<Quantity>("emi:t").unwrap();
/// assert_eq!(total.get(&["2020".into()]), Some(3.0));
///
/// c.add("world:t", Task::call(ops::identity(), ["emi:t"]).unwrap()).unwrap();
/// assert!(c.contains("world:t"));
/// ```
#[derive(Clone)]
pub struct Computer {
    graph: StableDiGraph<Slot, ()>,
    index: HashMap<Key, NodeIndex>,
    /// Partial sums registered on demand during retrieval.
    derived: HashSet<Key>,
    default_key: Option<Key>,
    config: Config,
    units: UnitRegistry,
}

impl Default for Computer {
    fn default() -> Self {
        Self::new()
    }
}

impl Computer {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
            derived: HashSet::new(),
            default_key: None,
            config: Config::default(),
            units: UnitRegistry::builtin(),
        }
    }

    /// A computer with `config` applied, see [`Computer::configure`].
    pub fn with_config(config: Config) -> Result<Self, Error> {
        let mut computer = Self::new();
        computer.configure(config)?;
        Ok(computer)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Units known to this computer: the built-in ones plus those defined
    /// through configuration.
    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    pub fn parse_unit(&self, input: &str) -> Result<Unit, UnitError> {
        self.units.parse(input)
    }

    /// Registers `task` under `key`. Fails if `key` already holds a task.
    pub fn add(&mut self, key: impl IntoKey, task: Task) -> Result<Key, Error> {
        self.insert(key.into_key()?, task, false)
    }

    /// Registers `task` under `key`, overwriting whatever was there.
    pub fn replace(&mut self, key: impl IntoKey, task: Task) -> Result<Key, Error> {
        self.insert(key.into_key()?, task, true)
    }

    /// Registers `task` under `key` along with every partial sum of `key`,
    /// the zero-dimensional total included. Sums that already exist are left
    /// alone. Returns `key` first, then the sums that were added.
    pub fn add_with_sums(&mut self, key: impl IntoKey, task: Task) -> Result<Vec<Key>, Error> {
        let key = self.add(key, task)?;
        let mut added = vec![key.clone()];

        for (sum, dropped) in key.partial_sums(true) {
            if self.contains(&sum) {
                continue;
            }
            let op = ops::sum(dropped.iter().map(|d| d.to_string()));
            added.push(self.add(sum, Task::compute(op, [Arg::Ref(key.clone())]))?);
        }

        tracing::debug!("Added {key} with {} partial sum(s)", added.len() - 1);
        Ok(added)
    }

    /// Makes `new` another name for `existing`.
    pub fn alias(&mut self, new: impl IntoKey, existing: impl IntoKey) -> Result<Key, Error> {
        let existing = existing.into_key()?;
        self.add(new, Task::compute(ops::identity(), [Arg::Ref(existing)]))
    }

    /// Registers the product of `inputs` under `name`, with the union of
    /// their dimensions, along with all partial sums. Every input must be
    /// present; bare names stand for their full keys.
    pub fn add_product<I>(&mut self, name: &str, inputs: I) -> Result<Vec<Key>, Error>
    where
        I: IntoIterator,
        I::Item: IntoKey,
    {
        let inputs = self.check_keys(inputs)?;
        let key = Key::product(name, &inputs)?;
        tracing::debug!("Product of {inputs:?} as {key}");
        self.add_with_sums(key, Task::compute(ops::mul(), inputs.into_iter().map(Arg::Ref)))
    }

    /// Splits `qty` along a new dimension `dim` by multiplying it with
    /// `shares`, which must have `dim`. The result is registered under the
    /// full key of `qty` with `dim` appended.
    pub fn disaggregate(
        &mut self,
        qty: impl IntoKey,
        dim: &str,
        shares: impl IntoKey,
    ) -> Result<Key, Error> {
        let mut found = self
            .check_keys([qty.into_key()?, shares.into_key()?])?
            .into_iter();
        let (Some(source), Some(shares)) = (found.next(), found.next()) else {
            return Err(GraphError::NotFound(vec![]).into());
        };

        let target = source.append([dim])?;
        let op = ops::disaggregate_shares(dim);
        self.add(target, Task::compute(op, [Arg::Ref(source), Arg::Ref(shares)]))
    }

    /// Runs each item of `queue` against this computer and returns the keys
    /// they added.
    ///
    /// An item that fails is rolled back. If it failed because a key it
    /// needs is missing, it goes to the back of the queue, so items may come
    /// in any order. After `max_tries` attempts, or on any other error, its
    /// error is returned and items still waiting are dropped.
    pub fn add_queue<'a, I>(&mut self, queue: I, max_tries: usize) -> Result<Vec<Key>, Error>
    where
        I: IntoIterator<Item = QueueItem<'a>>,
    {
        let mut pending: VecDeque<(usize, QueueItem<'a>)> =
            queue.into_iter().map(|item| (1, item)).collect();
        let mut added = vec![];

        while let Some((tries, item)) = pending.pop_front() {
            let snapshot = self.clone();
            match item(&mut *self) {
                Ok(keys) => added.extend(keys),
                Err(e) => {
                    *self = snapshot;
                    let missing = matches!(e.as_graph(), Some(GraphError::NotFound(_)));
                    if !missing || tries >= max_tries {
                        tracing::error!("Failed {tries} time(s), discarded: {e}");
                        return Err(e);
                    }
                    tracing::debug!("Will retry after failure {tries}: {e}");
                    pending.push_back((tries + 1, item));
                }
            }
        }

        Ok(added)
    }

    /// Registers every pair in order, stopping at the first failure.
    pub fn add_all<I, K>(&mut self, tasks: I) -> Result<Vec<Key>, Error>
    where
        I: IntoIterator<Item = (K, Task)>,
        K: IntoKey,
    {
        tasks
            .into_iter()
            .map(|(key, task)| self.add(key, task))
            .collect()
    }

    /// Runs a builder function against this computer.
    pub fn apply<R>(&mut self, f: impl FnOnce(&mut Computer) -> Result<R, Error>) -> Result<R, Error> {
        f(self)
    }

    /// Registers the tasks produced by a generator, which can inspect the
    /// computer but not modify it.
    pub fn extend<F, I, K>(&mut self, generator: F) -> Result<Vec<Key>, Error>
    where
        F: FnOnce(&Computer) -> I,
        I: IntoIterator<Item = (K, Task)>,
        K: IntoKey,
    {
        let tasks: Vec<(K, Task)> = generator(self).into_iter().collect();
        self.add_all(tasks)
    }

    /// Sums the full-dimensional version of `qty` over `dims` and registers
    /// the result with `tag` appended, e.g. `emi:n-t` over `t` with tag
    /// `total` gives `emi:n:total`.
    pub fn aggregate<S: AsRef<str>>(
        &mut self,
        qty: impl IntoKey,
        tag: &str,
        dims: &[S],
    ) -> Result<Key, Error> {
        let source = self.full_key(qty)?;
        let target = source.drop(dims.iter().map(AsRef::as_ref))?.add_tag(tag);
        let op = ops::sum(dims.iter().map(|d| d.as_ref().to_string()));
        self.add(target, Task::compute(op, [Arg::Ref(source)]))
    }

    /// Registers group sums of `qty` along `dim` under `qty` with `tag`
    /// appended, with all partial sums of the new key.
    pub fn aggregate_groups(
        &mut self,
        qty: impl IntoKey,
        tag: &str,
        dim: &str,
        groups: IndexMap<Label, Vec<Label>>,
        keep: bool,
    ) -> Result<Vec<Key>, Error> {
        let source = self.full_key(qty)?;
        let target = source.add_tag(tag);
        let op = ops::aggregate(dim, groups, keep);
        self.add_with_sums(target, Task::compute(op, [Arg::Ref(source)]))
    }

    /// Wraps `func` in the persistent cache configured for this computer.
    ///
    /// Results are stored under `cache_path` and keyed by `name` and the
    /// arguments the operator receives.
    pub fn cache<T, F>(&self, name: &str, func: F) -> Operator
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn(&[Dynamic]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        cache::cached(CacheStore::from_config(&self.config), name, func)
    }

    /// Computes the value of `key` and its dependencies.
    ///
    /// A bare name stands for its full key. A key with dimensions that is
    /// not registered is derived as a partial sum where possible.
    pub fn get(&mut self, key: impl IntoKey) -> Result<Dynamic, Error> {
        let key = key.into_key()?;
        let mut values = self.get_many([key])?;
        values
            .pop()
            .ok_or_else(|| Error::from(GraphError::NotFound(vec![])))
    }

    /// Computes several keys at once. Shared dependencies are evaluated only
    /// once; the values come back in the order of `keys`.
    pub fn get_many<I>(&mut self, keys: I) -> Result<Vec<Dynamic>, Error>
    where
        I: IntoIterator,
        I::Item: IntoKey,
    {
        let keys = keys
            .into_iter()
            .map(IntoKey::into_key)
            .collect::<Result<Vec<_>, _>>()?;

        let span = tracing::info_span!("get", keys = ?keys);
        let _enter = span.enter();

        let mut roots = Vec::with_capacity(keys.len());
        let mut missing = vec![];
        for key in &keys {
            match self.resolve(key)? {
                Some(resolved) => roots.push(self.index[&resolved]),
                None => missing.push(key.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(GraphError::NotFound(missing).into());
        }

        let nodes = self.cull(&roots)?;
        tracing::debug!(
            "Culled graph to {} of {} node(s)",
            nodes.len(),
            self.graph.node_count()
        );

        let values = executor::run(&self.graph, &self.index, &nodes)?;
        roots
            .iter()
            .map(|root| {
                values
                    .get(root)
                    .cloned()
                    .ok_or_else(|| GraphError::NotFound(vec![self.graph[*root].key.clone()]).into())
            })
            .collect()
    }

    /// Like [`Computer::get`], downcast to `T`.
    pub fn get_as<T: Any + Send + Sync>(&mut self, key: impl IntoKey) -> Result<Arc<T>, Error> {
        let key = key.into_key()?;
        let value = self.get(&key)?;
        value.downcast::<T>().map_err(|_| {
            GraphError::WrongType {
                key,
                expected: type_name::<T>(),
            }
            .into()
        })
    }

    /// Computes the configured default key.
    pub fn get_default(&mut self) -> Result<Dynamic, Error> {
        let key = self.default_key.clone().ok_or(GraphError::NoDefault)?;
        self.get(key)
    }

    pub fn default_key(&self) -> Option<&Key> {
        self.default_key.as_ref()
    }

    pub fn set_default(&mut self, key: impl IntoKey) -> Result<(), Error> {
        self.default_key = Some(key.into_key()?);
        Ok(())
    }

    /// Registered keys, in no particular order. Placeholders are left out.
    pub fn keys(&self) -> impl Iterator<Item = &Key> + '_ {
        self.index
            .iter()
            .filter(|(_, node)| self.graph[**node].task.is_some())
            .map(|(key, _)| key)
    }

    /// Whether a task is registered under `key`.
    pub fn contains(&self, key: impl IntoKey) -> bool {
        let Ok(key) = key.into_key() else {
            return false;
        };
        self.index
            .get(&key)
            .is_some_and(|&node| self.graph[node].task.is_some())
    }

    pub fn len(&self) -> usize {
        self.keys().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The node for `key`, created as a placeholder if needed.
    fn slot(&mut self, key: &Key) -> NodeIndex {
        if let Some(&node) = self.index.get(key) {
            return node;
        }
        let node = self.graph.add_node(Slot {
            key: key.clone(),
            task: None,
        });
        self.index.insert(key.clone(), node);
        node
    }

    fn insert(&mut self, key: Key, task: Task, replace: bool) -> Result<Key, Error> {
        let existing = self.index.get(&key).copied();
        let refs = task.refs();

        if let Some(node) = existing
            && self.graph[node].task.is_some()
            && !replace
        {
            return Err(GraphError::Conflict(key).into());
        }

        for dep in &refs {
            let reaches = match (existing, self.index.get(dep)) {
                _ if *dep == key => true,
                (Some(node), Some(&dep_node)) => {
                    has_path_connecting(&self.graph, node, dep_node, None)
                }
                _ => false,
            };
            if reaches {
                return Err(GraphError::Cycle {
                    key,
                    via: dep.clone(),
                }
                .into());
            }
        }

        let node = self.slot(&key);
        let stale: Vec<_> = self
            .graph
            .edges_directed(node, Direction::Incoming)
            .map(|edge| edge.id())
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        for dep in &refs {
            let dep_node = self.slot(dep);
            self.graph.update_edge(dep_node, node, ());
        }

        tracing::debug!("Added {key} = {}", task.name());
        self.graph[node].task = Some(task);
        self.derived.remove(&key);

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::quantity::{Quantity, Table};
    use crate::units::Unit;

    pub(crate) fn emissions() -> Quantity {
        let table = Table::new(["n", "t"], Unit::parse("Mt").unwrap())
            .row(["AFR", "2020"], 1.0)
            .row(["AFR", "2030"], 2.0)
            .row(["CHN", "2020"], 10.0)
            .row(["CHN", "2030"], 20.0);
        Quantity::from_table(table).unwrap()
    }

    fn value(c: &mut Computer, key: &str) -> Quantity {
        (*c.get_as::<Quantity>(key).unwrap()).clone()
    }

    #[test]
    fn test_add_and_conflict() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();

        let err = c.add("emi:t-n", Task::literal(1.0f64)).unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::Conflict(k)) if k == "emi:n-t"));

        c.replace("emi:n-t", Task::literal(emissions().scale(2.0)))
            .unwrap();
        let q = value(&mut c, "emi:n-t");
        assert_eq!(q.get(&["AFR".into(), "2020".into()]), Some(2.0));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_forward_reference() {
        let mut c = Computer::new();
        c.add("total", Task::call(ops::sum(["n", "t"]), ["emi:n-t"]).unwrap())
            .unwrap();
        assert!(!c.contains("emi:n-t"));

        let err = c.get("total").unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::NotFound(keys)) if keys == &["emi:n-t"]));

        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        assert_eq!(value(&mut c, "total").item().unwrap(), 33.0);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut c = Computer::new();
        c.add("b", Task::call(ops::identity(), ["a"]).unwrap()).unwrap();
        c.add("c", Task::call(ops::identity(), ["b"]).unwrap()).unwrap();

        let err = c.add("a", Task::call(ops::identity(), ["c"]).unwrap()).unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::Cycle { .. })));

        let err = c.add("d", Task::call(ops::identity(), ["d"]).unwrap()).unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::Cycle { .. })));
        assert!(!c.contains("a"));
    }

    #[test]
    fn test_add_with_sums() {
        let mut c = Computer::new();
        let keys = c.add_with_sums("emi:n-t", Task::literal(emissions())).unwrap();
        assert_eq!(keys, ["emi:n-t", "emi:t", "emi:n", "emi"]);

        let by_region = value(&mut c, "emi:n");
        assert_eq!(by_region.get(&["CHN".into()]), Some(30.0));
    }

    #[test]
    fn test_derived_sum_then_conflict() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();

        let by_year = value(&mut c, "emi:t");
        assert_eq!(by_year.get(&["2030".into()]), Some(22.0));
        assert_eq!(value(&mut c, "emi").dims().collect::<Vec<_>>(), ["n", "t"]);

        let err = c.add("emi:t", Task::literal(1.0f64)).unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::Conflict(_))));
        c.replace("emi:t", Task::literal(1.0f64)).unwrap();
    }

    #[test]
    fn test_shared_dependency_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let load = {
            let calls = calls.clone();
            Operator::new("load", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(emissions()) as Dynamic)
            })
        };

        let mut c = Computer::new();
        c.add("emi:n-t", Task::compute(load, [])).unwrap();
        c.add("a:n", Task::call(ops::sum(["t"]), ["emi:n-t"]).unwrap()).unwrap();
        c.add("b:t", Task::call(ops::sum(["n"]), ["emi:n-t"]).unwrap()).unwrap();

        let values = c.get_many(["a:n", "b:t"]).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_alias_and_default() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        c.alias("emissions", "emi:n-t").unwrap();

        assert!(matches!(
            c.get_default().unwrap_err().as_graph(),
            Some(GraphError::NoDefault)
        ));
        c.set_default("emissions").unwrap();
        let q = c.get_default().unwrap();
        assert!(q.downcast_ref::<Quantity>().unwrap().equivalent(&emissions(), 0.0));
    }

    #[test]
    fn test_wrong_type() {
        let mut c = Computer::new();
        c.add("x", Task::literal(1.0f64)).unwrap();
        let err = c.get_as::<Quantity>("x").unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::WrongType { .. })));
        assert_eq!(*c.get_as::<f64>("x").unwrap(), 1.0);
    }

    #[test]
    fn test_aggregate() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();

        let key = c.aggregate("emi", "total", &["t"]).unwrap();
        assert_eq!(key, "emi:n:total");

        let mut groups = IndexMap::new();
        groups.insert(Label::from("World"), vec![Label::from("AFR"), Label::from("CHN")]);
        let keys = c
            .aggregate_groups("emi", "agg", "n", groups, false)
            .unwrap();
        assert_eq!(keys[0], "emi:n-t:agg");

        let world = value(&mut c, "emi:t:agg");
        assert_eq!(world.get(&["2020".into()]), Some(11.0));
    }

    #[test]
    fn test_apply_and_extend() {
        let mut c = Computer::new();
        c.apply(|c| {
            c.add("emi:n-t", Task::literal(emissions()))?;
            Ok(())
        })
        .unwrap();

        let added = c
            .extend(|c| {
                c.keys()
                    .map(|k| (k.add_tag("copy"), Task::compute(ops::identity(), [Arg::from(k)])))
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(added, ["emi:n-t:copy"]);
        assert!(c.contains("emi:n-t:copy"));
    }

    fn gas_shares() -> Quantity {
        let table = Table::new(["g"], Unit::dimensionless())
            .row(["CO2"], 0.75)
            .row(["CH4"], 0.25);
        Quantity::from_table(table).unwrap()
    }

    #[test]
    fn test_add_product() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        c.add("shares:g", Task::literal(gas_shares())).unwrap();

        let keys = c.add_product("by_gas", ["emi", "shares:g"]).unwrap();
        assert_eq!(keys[0], "by_gas:g-n-t");
        assert!(keys.iter().any(|k| k == "by_gas"));

        let total = value(&mut c, "by_gas:g");
        assert_eq!(total.get(&["CO2".into()]), Some(24.75));

        let err = c.add_product("nothing", ["emi", "gdp:n"]).unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::NotFound(k)) if k == &["gdp:n"]));
    }

    #[test]
    fn test_disaggregate() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        c.add("shares:g", Task::literal(gas_shares())).unwrap();

        let key = c.disaggregate("emi", "g", "shares:g").unwrap();
        assert_eq!(key, "emi:g-n-t");
        assert_eq!(value(&mut c, "emi:g").get(&["CH4".into()]), Some(8.25));

        c.add("flat:n", Task::literal(emissions().sum(&["t"]).unwrap()))
            .unwrap();
        c.disaggregate("emi:n-t", "x", "flat:n").unwrap();
        let err = c.get("emi:n-t-x").unwrap_err();
        assert!(err.to_string().contains("no dimension 'x'"));
    }

    #[test]
    fn test_add_queue_out_of_order() {
        let product: QueueItem<'_> = Box::new(|c: &mut Computer| -> Result<Vec<Key>, Error> {
            c.add_product("squared", ["emi", "copy:n-t"])
        });
        let copy: QueueItem<'_> = Box::new(|c: &mut Computer| -> Result<Vec<Key>, Error> {
            Ok(vec![c.alias("copy:n-t", "emi:n-t")?])
        });

        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        let added = c.add_queue([product, copy], 2).unwrap();
        assert_eq!(added[0], "copy:n-t");
        assert_eq!(added[1], "squared:n-t");
        assert_eq!(value(&mut c, "squared:n-t").get(&["CHN".into(), "2030".into()]), Some(400.0));
    }

    #[test]
    fn test_add_queue_gives_up() {
        let half_done: QueueItem<'_> = Box::new(|c: &mut Computer| -> Result<Vec<Key>, Error> {
            c.add("partial", Task::literal(1.0f64))?;
            c.check_keys(["gdp:n"])
        });
        let later: QueueItem<'_> = Box::new(|c: &mut Computer| -> Result<Vec<Key>, Error> {
            Ok(vec![c.add("later", Task::literal(2.0f64))?])
        });

        let mut c = Computer::new();
        let err = c.add_queue([half_done, later], 3).unwrap_err();
        assert!(matches!(err.as_graph(), Some(GraphError::NotFound(_))));
        assert!(!c.contains("partial"));
        assert!(c.contains("later"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_units_are_per_computer() {
        let mut a = Computer::new();
        a.configure(Config::from_json(r#"{ "units": { "define": { "pkm": "[transport]" } } }"#).unwrap())
            .unwrap();
        let b = Computer::new();

        let pkm = a.parse_unit("Gpkm").unwrap();
        assert!((pkm.factor_to(&a.parse_unit("pkm").unwrap()).unwrap() - 1e9).abs() < 1e-3);

        // Elsewhere `pkm` is just an unknown symbol, so no prefix applies.
        let elsewhere = b.parse_unit("Gpkm").unwrap();
        assert!(!elsewhere.is_compatible(&b.parse_unit("pkm").unwrap()));
        assert!(!Unit::parse("Gpkm").unwrap().is_compatible(&pkm));
    }

    #[test]
    fn test_get_inside_single_thread_pool() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        c.add("a:n-t", Task::call(ops::identity(), ["emi:n-t"]).unwrap()).unwrap();
        c.add("b:n-t", Task::call(ops::identity(), ["emi:n-t"]).unwrap()).unwrap();
        c.add("both:n-t", Task::call(ops::add(), ["a:n-t", "b:n-t"]).unwrap())
            .unwrap();

        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let both = pool.install(|| c.get_as::<Quantity>("both:n-t").unwrap());
        assert_eq!(both.get(&["CHN".into(), "2030".into()]), Some(40.0));
    }
}
