//! Fingerprinted, content-addressed storage of computed values.
//!
//! A call is identified by the operator name and the canonical form of every
//! argument. Two arguments that canonicalize identically are the same as far
//! as the cache is concerned, even if they are distinct objects or use a
//! different backend. An argument with no canonical form makes the call
//! uncacheable: it is computed every time and never stored.
//!
//! Entries are never invalidated automatically. Nothing coordinates two
//! processes computing the same fingerprint at the same time; both compute,
//! and the later rename wins.
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::core::{Blake3Hasher, Dynamic, Hash32};
use crate::error::{CacheError, Uncacheable};
use crate::key::Key;
use crate::quantity::{Label, Quantity};
use crate::task::Operator;
use crate::units::Unit;

/// Values with a stable, backend-independent hash.
pub trait Canonical {
    fn canonicalize(&self, hasher: &mut Blake3Hasher);
}

// One tag byte per type keeps e.g. `1i64` and `1.0f64` apart.
const TAG_F64: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_PATH: u8 = 5;
const TAG_SEQ: u8 = 6;
const TAG_NONE: u8 = 7;
const TAG_SOME: u8 = 8;
const TAG_LABEL: u8 = 9;
const TAG_UNIT: u8 = 10;
const TAG_KEY: u8 = 11;
const TAG_QUANTITY: u8 = 12;
const TAG_CONFIG: u8 = 13;

impl Canonical for f64 {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_F64).write_f64(*self);
    }
}

impl Canonical for i64 {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_I64).write_i64(*self);
    }
}

impl Canonical for i32 {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        i64::from(*self).canonicalize(hasher);
    }
}

impl Canonical for bool {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_BOOL).write_u64(u64::from(*self));
    }
}

impl Canonical for str {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_STR).write_str(self);
    }
}

impl Canonical for String {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        self.as_str().canonicalize(hasher);
    }
}

impl Canonical for &'static str {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        (*self).canonicalize(hasher);
    }
}

impl Canonical for Utf8PathBuf {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_PATH).write_str(self.as_str());
    }
}

impl<T: Canonical> Canonical for Vec<T> {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_SEQ).write_u64(self.len() as u64);
        for item in self {
            item.canonicalize(hasher);
        }
    }
}

impl<T: Canonical> Canonical for Option<T> {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        match self {
            None => {
                hasher.write_tag(TAG_NONE);
            }
            Some(value) => {
                hasher.write_tag(TAG_SOME);
                value.canonicalize(hasher);
            }
        }
    }
}

impl Canonical for Label {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_LABEL);
        match self {
            Label::Int(i) => i.canonicalize(hasher),
            Label::Str(s) => s.canonicalize(hasher),
        }
    }
}

impl Canonical for Unit {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher
            .write_tag(TAG_UNIT)
            .write_str(&self.to_string())
            .write_f64(self.scale());
        for (dim, exp) in self.base() {
            hasher.write_str(dim).write_i64(exp.into());
        }
    }
}

impl Canonical for Key {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        hasher.write_tag(TAG_KEY).write_str(self.as_str());
    }
}

impl Canonical for Quantity {
    fn canonicalize(&self, hasher: &mut Blake3Hasher) {
        let (dims, cells) = self.sorted_cells();

        hasher.write_tag(TAG_QUANTITY);
        self.unit().canonicalize(hasher);
        hasher.write_u64(dims.len() as u64);
        for dim in dims {
            hasher.write_str(dim);
            if let Some(axis) = self.axis(dim) {
                hasher.write_u64(axis.len() as u64);
                for label in axis.labels() {
                    label.canonicalize(hasher);
                }
            }
        }
        hasher.write_u64(cells.len() as u64);
        for (labels, value) in cells {
            for label in &labels {
                label.canonicalize(hasher);
            }
            hasher.write_f64(value);
        }
    }
}

/// Hashes the JSON form of `config`. Serialization is field-ordered and
/// `IndexMap`s keep insertion order.
fn canonicalize_config(config: &Config, hasher: &mut Blake3Hasher) -> bool {
    match serde_json::to_string(config) {
        Ok(text) => {
            hasher.write_tag(TAG_CONFIG).write_str(&text);
            true
        }
        Err(e) => {
            tracing::debug!("Configuration has no canonical form: {e}");
            false
        }
    }
}

/// Canonicalizes a type-erased argument by trying every known type.
fn canonicalize_dynamic(value: &Dynamic, hasher: &mut Blake3Hasher) -> bool {
    if let Some(config) = value.downcast_ref::<Config>() {
        return canonicalize_config(config, hasher);
    }

    macro_rules! try_types {
        ($($ty:ty),* $(,)?) => {
            $(
                if let Some(v) = value.downcast_ref::<$ty>() {
                    v.canonicalize(hasher);
                    return true;
                }
            )*
        };
    }

    try_types!(
        Quantity,
        Key,
        Unit,
        Label,
        f64,
        i64,
        i32,
        bool,
        String,
        &'static str,
        Utf8PathBuf,
        Vec<Label>,
        Vec<String>,
        Vec<f64>,
        Vec<i64>,
        Option<f64>,
        Option<String>,
    );

    false
}

/// Fingerprint of calling `name` with `args`.
pub fn fingerprint(name: &str, args: &[Dynamic]) -> Result<Hash32, Uncacheable> {
    let mut hasher = Blake3Hasher::new();
    hasher.write_str(name).write_u64(args.len() as u64);

    for (position, arg) in args.iter().enumerate() {
        if !canonicalize_dynamic(arg, &mut hasher) {
            return Err(Uncacheable { position });
        }
    }

    Ok(hasher.finish())
}

/// A directory of CBOR-encoded results, one file per fingerprint.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: Utf8PathBuf,
    skip: bool,
}

impl CacheStore {
    /// With `skip`, stored entries are ignored and overwritten.
    pub fn new(dir: impl Into<Utf8PathBuf>, skip: bool) -> Self {
        Self {
            dir: dir.into(),
            skip,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_path(), config.cache_skip)
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn path(&self, name: &str, hash: Hash32) -> Utf8PathBuf {
        self.dir.join(format!("{name}-{}.cbor", hash.to_hex()))
    }

    pub fn load<T: DeserializeOwned>(&self, path: &Utf8Path) -> Result<Option<T>, CacheError> {
        if self.skip || !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let value = ciborium::from_reader(BufReader::new(file))?;
        Ok(Some(value))
    }

    /// Writes to a temporary file next to `path`, then renames it into
    /// place, so readers never observe a partial entry.
    pub fn store<T: Serialize>(&self, path: &Utf8Path, value: &T) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;

        let temp = path.with_extension(format!("cbor.{}.tmp", std::process::id()));
        {
            let file = File::create(&temp)?;
            let mut writer = BufWriter::new(file);
            ciborium::into_writer(value, &mut writer)?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        fs::rename(&temp, path)?;
        Ok(())
    }

    /// Returns the stored value for this call, or computes and stores it.
    pub fn get_or_compute<T, F>(&self, name: &str, args: &[Dynamic], compute: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&[Dynamic]) -> anyhow::Result<T>,
    {
        let hash = match fingerprint(name, args) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::debug!("Not caching {name}(...): {e}");
                return compute(args);
            }
        };

        let path = self.path(name, hash);
        let short = format!("{name}(<{}…>)", hash.short());

        if let Some(value) = self.load(&path)? {
            tracing::info!("Cache hit for {short}");
            return Ok(value);
        }

        tracing::info!("Cache miss for {short}");
        let value = compute(args)?;
        self.store(&path, &value)?;
        Ok(value)
    }
}

/// Wraps `func` as an operator whose results are kept in `store`.
pub fn cached<T, F>(store: CacheStore, name: &str, func: F) -> Operator
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(&[Dynamic]) -> anyhow::Result<T> + Send + Sync + 'static,
{
    tracing::debug!("Wrapping {name} in a cache at {}", store.dir);

    let key = name.to_string();
    Operator::new(name, move |args| {
        let value = store.get_or_compute(&key, args, &func)?;
        Ok(Arc::new(value) as Dynamic)
    })
}
