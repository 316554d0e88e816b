use std::collections::HashSet;
use std::fmt::Write;

use petgraph::Direction;

use super::Computer;
use crate::error::{Error, GraphError};
use crate::key::{IntoKey, Key};
use crate::task::{Arg, Task};

impl Computer {
    /// Renders the dependency tree of `key` without computing anything.
    ///
    /// ```text
    /// share:n = div(emi:n, emi)
    ///   emi:n = sum(emi:n-t)
    ///     emi:n-t = literal
    ///   emi = sum(emi:n-t)
    ///     emi:n-t (above)
    /// ```
    pub fn describe(&self, key: impl IntoKey) -> Result<String, Error> {
        let key = key.into_key()?;
        if !self.index.contains_key(&key) {
            return Err(GraphError::NotFound(vec![key]).into());
        }

        let mut out = String::new();
        let mut seen = HashSet::new();
        self.describe_node(&key, 0, &mut seen, &mut out);
        Ok(out)
    }

    /// Trees of every key nothing else depends on, in key order.
    pub fn describe_all(&self) -> String {
        let mut sinks: Vec<&Key> = self
            .index
            .iter()
            .filter(|&(_, &node)| {
                self.graph
                    .neighbors_directed(node, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|(key, _)| key)
            .collect();
        sinks.sort();

        let mut out = String::new();
        for key in sinks {
            let mut seen = HashSet::new();
            self.describe_node(key, 0, &mut seen, &mut out);
        }
        out
    }

    fn describe_node(&self, key: &Key, depth: usize, seen: &mut HashSet<Key>, out: &mut String) {
        let indent = "  ".repeat(depth);

        let Some(task) = self.index.get(key).and_then(|&n| self.graph[n].task.as_ref()) else {
            let _ = writeln!(out, "{indent}{key} (missing)");
            return;
        };

        if !seen.insert(key.clone()) {
            let _ = writeln!(out, "{indent}{key} (above)");
            return;
        }

        match task {
            Task::Literal(_) => {
                let _ = writeln!(out, "{indent}{key} = literal");
            }
            Task::Compute(computation) => {
                let args = computation
                    .args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Ref(key) => key.to_string(),
                        Arg::Literal(_) => String::from("…"),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "{indent}{key} = {}({args})", computation.op.name());

                for dep in computation.refs() {
                    self.describe_node(dep, depth + 1, seen, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computer::tests::emissions;
    use crate::ops;

    #[test]
    fn test_describe_tree() {
        let mut c = Computer::new();
        c.add("emi:n-t", Task::literal(emissions())).unwrap();
        c.add("emi:n", Task::call(ops::sum(["t"]), ["emi:n-t"]).unwrap())
            .unwrap();
        c.add("share:n", Task::call(ops::div(), ["emi:n", "emi"]).unwrap())
            .unwrap();

        let text = c.describe("share:n").unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "share:n = div(emi:n, emi)",
                "  emi:n = sum(emi:n-t)",
                "    emi:n-t = literal",
                "  emi (missing)",
            ]
        );
    }

    #[test]
    fn test_describe_repeated_and_literal() {
        let mut c = Computer::new();
        c.add("x", Task::literal(1.0f64)).unwrap();
        c.add(
            "y",
            Task::compute(
                ops::add(),
                [Arg::key("x").unwrap(), Arg::key("x").unwrap(), Arg::literal(2.0f64)],
            ),
        )
        .unwrap();

        let text = c.describe("y").unwrap();
        assert!(text.starts_with("y = add(x, x, …)\n"));
        assert!(text.contains("  x (above)"));

        assert!(c.describe("z").is_err());
        assert_eq!(c.describe_all(), text);
    }
}
