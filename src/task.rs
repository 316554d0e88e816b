//! What a node of the graph holds.
use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use crate::core::{ArcStr, Dynamic};
use crate::error::KeyError;
use crate::key::{IntoKey, Key};

type OpFn = dyn Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync;

/// A named, type-erased function over node values.
///
/// Keyword parameters are captured by the closure when the operator is
/// built, so the graph only ever sees positional arguments.
#[derive(Clone)]
pub struct Operator {
    name: ArcStr,
    func: Arc<OpFn>,
}

impl Operator {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// An operator over a single argument of type `T`.
    pub fn unary<T, R, F>(name: &str, func: F) -> Self
    where
        T: Any + Send + Sync,
        R: Any + Send + Sync,
        F: Fn(&T) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self::new(name, move |args| {
            let value = func(arg::<T>(args, 0)?)?;
            Ok(Arc::new(value) as Dynamic)
        })
    }

    /// An operator over any number of arguments, all of type `T`.
    pub fn variadic<T, R, F>(name: &str, func: F) -> Self
    where
        T: Any + Send + Sync,
        R: Any + Send + Sync,
        F: Fn(&[&T]) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self::new(name, move |args| {
            let typed = (0..args.len())
                .map(|i| arg::<T>(args, i))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let value = func(&typed)?;
            Ok(Arc::new(value) as Dynamic)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Dynamic]) -> anyhow::Result<Dynamic> {
        (self.func)(args)
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(...)", self.name)
    }
}

/// Downcasts argument `i`, with an error naming the expected type.
pub fn arg<T: Any>(args: &[Dynamic], i: usize) -> anyhow::Result<&T> {
    let value = args
        .get(i)
        .ok_or_else(|| anyhow::anyhow!("missing argument {i}"))?;

    value
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow::anyhow!("argument {i} is not a {}", type_name::<T>()))
}

/// One positional argument of a computation.
#[derive(Clone)]
pub enum Arg {
    /// The value of another node; this is an edge of the graph.
    Ref(Key),
    /// A value used as is. Never looked up in the graph, whatever it holds.
    Literal(Dynamic),
}

impl Arg {
    pub fn key(key: impl IntoKey) -> Result<Arg, KeyError> {
        Ok(Arg::Ref(key.into_key()?))
    }

    pub fn literal<T: Any + Send + Sync>(value: T) -> Arg {
        Arg::Literal(Arc::new(value))
    }
}

impl From<Key> for Arg {
    fn from(value: Key) -> Self {
        Arg::Ref(value)
    }
}

impl From<&Key> for Arg {
    fn from(value: &Key) -> Self {
        Arg::Ref(value.clone())
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Ref(key) => write!(f, "{key:?}"),
            Arg::Literal(_) => f.write_str("<literal>"),
        }
    }
}

/// An operator applied to positional arguments.
#[derive(Clone, Debug)]
pub struct Computation {
    pub op: Operator,
    pub args: Vec<Arg>,
}

impl Computation {
    pub fn new(op: Operator, args: impl IntoIterator<Item = Arg>) -> Self {
        Self {
            op,
            args: args.into_iter().collect(),
        }
    }

    pub(crate) fn refs(&self) -> impl Iterator<Item = &Key> + '_ {
        self.args.iter().filter_map(|arg| match arg {
            Arg::Ref(key) => Some(key),
            Arg::Literal(_) => None,
        })
    }
}

/// The content of a node: a literal value or a computation.
#[derive(Clone, Debug)]
pub enum Task {
    Literal(Dynamic),
    Compute(Computation),
}

impl Task {
    pub fn literal<T: Any + Send + Sync>(value: T) -> Task {
        Task::Literal(Arc::new(value))
    }

    pub fn compute(op: Operator, args: impl IntoIterator<Item = Arg>) -> Task {
        Task::Compute(Computation::new(op, args))
    }

    /// `op` applied to the values of `keys`.
    pub fn call<I>(op: Operator, keys: I) -> Result<Task, KeyError>
    where
        I: IntoIterator,
        I::Item: IntoKey,
    {
        let args = keys
            .into_iter()
            .map(Arg::key)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Task::compute(op, args))
    }

    pub(crate) fn refs(&self) -> Vec<Key> {
        match self {
            Task::Literal(_) => vec![],
            Task::Compute(computation) => computation.refs().cloned().collect(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            Task::Literal(_) => "literal",
            Task::Compute(computation) => computation.op.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_downcast() {
        let double = Operator::unary("double", |x: &f64| Ok(x * 2.0));
        let out = double.call(&[Arc::new(2.0f64) as Dynamic]).unwrap();
        assert_eq!(out.downcast_ref::<f64>(), Some(&4.0));

        let err = double.call(&[Arc::new("two") as Dynamic]).unwrap_err();
        assert!(err.to_string().contains("argument 0 is not a f64"));
    }

    #[test]
    fn test_variadic() {
        let total = Operator::variadic("total", |xs: &[&i64]| Ok(xs.iter().copied().sum::<i64>()));
        let out = total
            .call(&[
                Arc::new(1i64) as Dynamic,
                Arc::new(2i64) as Dynamic,
                Arc::new(3i64) as Dynamic,
            ])
            .unwrap();
        assert_eq!(out.downcast_ref::<i64>(), Some(&6));
    }

    #[test]
    fn test_refs_skip_literals() {
        let op = Operator::new("noop", |_| Ok(Arc::new(()) as Dynamic));
        let task = Task::compute(
            op,
            [
                Arg::key("a:x").unwrap(),
                Arg::literal("b:y".to_string()),
                Arg::key("c").unwrap(),
            ],
        );
        assert_eq!(task.refs(), vec!["a:x", "c"]);
        assert_eq!(task.name(), "noop");
    }
}
