//! Parallel evaluation of a culled part of the graph.
use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::time::Instant;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use rayon::Yield;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::computer::Slot;
use crate::core::Dynamic;
use crate::error::{ComputationError, Error, GraphError};
use crate::key::Key;
use crate::task::{Arg, Task};
use crate::utils::{STYLE_NODE, STYLE_RUN, panic_message};

pub(crate) type Values = HashMap<NodeIndex, Dynamic>;

/// Evaluates every node in `nodes`, each exactly once, and returns all of
/// their values.
///
/// `nodes` must be closed under dependencies and contain no placeholders.
/// A node is handed to the rayon pool as soon as the last of its
/// dependencies has completed. The calling thread schedules, and runs queued
/// nodes itself when it is one of the pool's workers, so a single-threaded
/// pool makes progress. The first failure ends the run, and values computed
/// so far are discarded.
pub(crate) fn run(
    graph: &StableDiGraph<Slot, ()>,
    index: &HashMap<Key, NodeIndex>,
    nodes: &HashSet<NodeIndex>,
) -> Result<Values, Error> {
    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    let mut pending: HashMap<NodeIndex, usize> = HashMap::with_capacity(nodes.len());

    for &node in nodes {
        let mut count = 0;
        for dep in graph.neighbors_directed(node, Direction::Incoming) {
            if nodes.contains(&dep) {
                dependents.entry(dep).or_default().push(node);
                count += 1;
            }
        }
        pending.insert(node, count);
    }

    let total = nodes.len();
    let mut values = Values::with_capacity(total);

    if total == 0 {
        return Ok(values);
    }

    let root_span = tracing::span!(Level::INFO, "compute", nodes = total);
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&STYLE_RUN);
    root_span.pb_set_message("Computing...");
    let _enter = root_span.enter();

    rayon::in_place_scope(|s| -> Result<(), Error> {
        let (result_sender, result_receiver) =
            channel::<(NodeIndex, Result<Dynamic, ComputationError>)>();

        let spawn_task = |values: &Values, node: NodeIndex| -> Result<(), Error> {
            let slot = &graph[node];
            let Some(task) = &slot.task else {
                return Err(GraphError::NotFound(vec![slot.key.clone()]).into());
            };

            let sender = result_sender.clone();
            let computation = match task {
                Task::Literal(value) => {
                    let _ = sender.send((node, Ok(value.clone())));
                    return Ok(());
                }
                Task::Compute(computation) => computation,
            };

            let args = computation
                .args
                .iter()
                .map(|arg| match arg {
                    Arg::Literal(value) => Ok(value.clone()),
                    Arg::Ref(key) => index
                        .get(key)
                        .and_then(|i| values.get(i))
                        .cloned()
                        .ok_or_else(|| GraphError::NotFound(vec![key.clone()])),
                })
                .collect::<Result<Vec<_>, _>>()?;

            let op = computation.op.clone();
            let key = slot.key.clone();

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "node", key = %key);
                span.pb_set_style(&STYLE_NODE);
                span.pb_set_message(&format!("{}({key})", op.name()));
                let _enter = span.enter();

                let start = Instant::now();

                // Operators only see shared, immutable inputs.
                let output = match catch_unwind(AssertUnwindSafe(|| op.call(&args))) {
                    Ok(output) => output,
                    Err(payload) => Err(anyhow::anyhow!(panic_message(payload.as_ref()))),
                };

                tracing::debug!("Computed {key} with {} in {:?}", op.name(), start.elapsed());

                let output = output.map_err(|e| ComputationError::new(key, e));
                let _ = sender.send((node, output));
            });

            Ok(())
        };

        for &node in nodes {
            if pending.get(&node) == Some(&0) {
                spawn_task(&values, node)?;
            }
        }

        let mut completed = 0;
        while completed < total {
            let Some((node, output)) = receive(&result_receiver) else {
                break;
            };

            values.insert(node, output?);
            completed += 1;
            root_span.pb_inc(1);

            if let Some(next) = dependents.get(&node) {
                for &index in next {
                    if let Some(count) = pending.get_mut(&index) {
                        *count -= 1;
                        if *count == 0 {
                            spawn_task(&values, index)?;
                        }
                    }
                }
            }
        }

        Ok(())
    })?;

    if values.len() < total {
        let missing = nodes
            .iter()
            .filter(|n| !values.contains_key(n))
            .map(|&n| graph[n].key.clone())
            .collect();
        return Err(GraphError::NotFound(missing).into());
    }

    tracing::debug!("Computed {total} node(s)");
    Ok(values)
}

/// Waits for the next message. On a pool worker, queued jobs are run while
/// waiting instead of blocking the thread they may need.
fn receive<T>(receiver: &Receiver<T>) -> Option<T> {
    loop {
        match receiver.try_recv() {
            Ok(message) => return Some(message),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => match rayon::yield_now() {
                Some(Yield::Executed) => {}
                Some(Yield::Idle) => std::thread::yield_now(),
                None => return receiver.recv().ok(),
            },
        }
    }
}
