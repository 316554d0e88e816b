#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod computer;
mod config;
mod core;
mod error;
mod executor;
mod key;
pub mod ops;
mod quantity;
mod task;
mod units;
mod utils;

pub use crate::cache::{CacheStore, Canonical, cached, fingerprint};
pub use crate::computer::{Computer, QueueItem};
pub use crate::config::{
    AggregateConfig, CONFIG, CombineConfig, CombineInput, Config, DEFAULT_CACHE_PATH, GeneralConfig,
    ReportConfig, UnitsConfig,
};
pub use crate::core::{ArcStr, Blake3Hasher, Dynamic, Hash32};
pub use crate::error::*;
pub use crate::key::{IntoKey, Key};
pub use crate::quantity::{Axis, Backend, Label, Quantity, Table};
pub use crate::task::{Arg, Computation, Operator, Task, arg};
pub use crate::units::{Unit, UnitRegistry};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
