use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::ArcStr;
use crate::error::KeyError;

const SEP_FIELD: char = ':';
const SEP_DIMS: char = '-';
const SEP_TAG: char = '+';

/// A structured identifier for a quantity: a name, a set of dimensions and a
/// chain of tags.
///
/// Dimensions are stored sorted, so two keys built from the same dimensions in
/// a different order are the same key. Equality, ordering and hashing all go
/// through the precomputed canonical string, which makes `Key` and `&str`
/// interchangeable as map keys:
///
/// ```rust
/// use reckon::Key;
///
/// let key: Key = "emi:t-n:gas".parse().unwrap();
/// assert_eq!(key, "emi:n-t:gas");
/// assert_eq!(key.dims().collect::<Vec<_>>(), ["n", "t"]);
/// ```
#[derive(Clone)]
pub struct Key {
    name: ArcStr,
    dims: Arc<[ArcStr]>,
    tag: Arc<[ArcStr]>,
    repr: ArcStr,
}

impl Key {
    /// Builds a key from its parts, validating every token.
    pub fn new<D, T>(name: &str, dims: D, tag: T) -> Result<Self, KeyError>
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        let input = name.to_string();

        if name.is_empty() {
            return Err(parse_error(&input, "name is empty"));
        }
        if name.contains(SEP_FIELD) {
            return Err(parse_error(&input, "name contains ':'"));
        }

        let mut sorted = BTreeSet::new();
        for dim in dims {
            let dim = dim.as_ref();
            check_token(&input, dim, SEP_DIMS)?;
            if !sorted.insert(dim.to_string()) {
                return Err(parse_error(&input, "duplicated dimension"));
            }
        }

        let mut tags = Vec::new();
        for token in tag {
            let token = token.as_ref();
            check_token(&input, token, SEP_TAG)?;
            tags.push(ArcStr::from(token));
        }

        Ok(Self::from_parts(
            name.into(),
            sorted.into_iter().map(ArcStr::from).collect(),
            tags,
        ))
    }

    /// A key with neither dimensions nor tags.
    pub fn bare(name: &str) -> Result<Self, KeyError> {
        Self::new(name, None::<&str>, None::<&str>)
    }

    /// Parses the canonical string form, e.g. `"foo:a-b:bar+baz"`.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let mut fields = input.split(SEP_FIELD);
        let name = fields.next().unwrap_or_default();
        let dims = fields.next().unwrap_or_default();
        let tag = fields.next().unwrap_or_default();

        if fields.next().is_some() {
            return Err(parse_error(input, "more than two ':' separators"));
        }
        if name.is_empty() {
            return Err(parse_error(input, "name is empty"));
        }

        let dims: Vec<&str> = match dims {
            "" => vec![],
            dims => dims.split(SEP_DIMS).collect(),
        };
        let tag: Vec<&str> = match tag {
            "" => vec![],
            tag => tag.split(SEP_TAG).collect(),
        };

        Self::new(name, dims, tag).map_err(|e| match e {
            KeyError::Parse { reason, .. } => parse_error(input, reason),
            other => other,
        })
    }

    fn from_parts(name: ArcStr, dims: Vec<ArcStr>, tag: Vec<ArcStr>) -> Self {
        let mut repr = String::from(&*name);
        if !dims.is_empty() {
            repr.push(SEP_FIELD);
            repr.push_str(&join(&dims, SEP_DIMS));
        }
        if !tag.is_empty() {
            if dims.is_empty() {
                repr.push(SEP_FIELD);
            }
            repr.push(SEP_FIELD);
            repr.push_str(&join(&tag, SEP_TAG));
        }

        Self {
            name,
            dims: dims.into(),
            tag: tag.into(),
            repr: repr.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimensions in canonical (sorted) order.
    pub fn dims(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.dims.iter().map(|d| &**d)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.dims.iter().any(|d| &**d == dim)
    }

    pub fn has_dims(&self) -> bool {
        !self.dims.is_empty()
    }

    /// Tag tokens in the order they were appended.
    pub fn tag(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.tag.iter().map(|t| &**t)
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    /// The key with its dimensions removed, e.g. `foo::bar` for `foo:a-b:bar`.
    pub fn name_and_tag(&self) -> Key {
        Self::from_parts(self.name.clone(), vec![], self.tag.to_vec())
    }

    /// Whether `self` and `other` share name and tag and `self` has every
    /// dimension of `other`.
    pub fn contains(&self, other: &Key) -> bool {
        self.name == other.name
            && self.tag == other.tag
            && other.dims.iter().all(|d| self.dims.contains(d))
    }

    /// A reference to the partial sum of this key over `dims`.
    pub fn drop<I>(&self, dims: I) -> Result<Key, KeyError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut remaining = self.dims.to_vec();

        for dim in dims {
            let dim = dim.as_ref();
            let Some(pos) = remaining.iter().position(|d| &**d == dim) else {
                return Err(KeyError::MissingDimension {
                    key: self.repr.to_string(),
                    dim: dim.to_string(),
                });
            };
            remaining.remove(pos);
        }

        Ok(Self::from_parts(self.name.clone(), remaining, self.tag.to_vec()))
    }

    /// Appends a tag. Tokens are split on `+`; empty tokens are skipped and
    /// any `:` is replaced with `_`, so this never fails.
    pub fn add_tag(&self, tag: &str) -> Key {
        let mut tags = self.tag.to_vec();
        tags.extend(
            tag.split(SEP_TAG)
                .filter(|t| !t.is_empty())
                .map(|t| ArcStr::from(t.replace(SEP_FIELD, "_"))),
        );
        Self::from_parts(self.name.clone(), self.dims.to_vec(), tags)
    }

    /// Adds dimensions; ones already present are left as they are.
    pub fn append<I>(&self, dims: I) -> Result<Key, KeyError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut all: BTreeSet<ArcStr> = self.dims.iter().cloned().collect();
        for dim in dims {
            let dim = dim.as_ref();
            check_token(&self.repr, dim, SEP_DIMS)?;
            all.insert(dim.into());
        }
        Ok(Self::from_parts(
            self.name.clone(),
            all.into_iter().collect(),
            self.tag.to_vec(),
        ))
    }

    /// A key named `name` whose dimensions are the union of those of `keys`.
    pub fn product<'a>(
        name: &str,
        keys: impl IntoIterator<Item = &'a Key>,
    ) -> Result<Key, KeyError> {
        let mut dims = BTreeSet::new();
        for key in keys {
            dims.extend(key.dims());
        }
        Key::new(name, dims, None::<&str>)
    }

    /// Every key reachable from this one by dropping a non-empty, proper
    /// subset of its dimensions, plus the zero-dimensional key when
    /// `include_total` is set.
    ///
    /// Keys come out ordered by how many dimensions were dropped, then by
    /// the lexicographic order of the dropped combination.
    pub fn partial_sums(&self, include_total: bool) -> Vec<(Key, Vec<ArcStr>)> {
        let n = self.dims.len();
        let max = if include_total { n } else { n.saturating_sub(1) };
        let mut out = Vec::new();

        for k in 1..=max {
            for combo in combinations(n, k) {
                let dropped: Vec<ArcStr> = combo.iter().map(|&i| self.dims[i].clone()).collect();
                let kept = (0..n)
                    .filter(|i| !combo.contains(i))
                    .map(|i| self.dims[i].clone())
                    .collect();
                out.push((
                    Self::from_parts(self.name.clone(), kept, self.tag.to_vec()),
                    dropped,
                ));
            }
        }

        out
    }
}

/// All `k`-element combinations of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k > n {
        return vec![];
    }

    let mut out = Vec::new();
    let mut idx: Vec<usize> = (0..k).collect();

    loop {
        out.push(idx.clone());

        let Some(i) = (0..k).rev().find(|&i| idx[i] != i + n - k) else {
            return out;
        };
        idx[i] += 1;
        for j in i + 1..k {
            idx[j] = idx[j - 1] + 1;
        }
    }
}

fn check_token(input: &str, token: &str, sep: char) -> Result<(), KeyError> {
    if token.is_empty() {
        return Err(parse_error(input, "empty dimension or tag token"));
    }
    if token.contains(SEP_FIELD) || token.contains(sep) {
        return Err(parse_error(input, "separator inside a token"));
    }
    Ok(())
}

fn parse_error(input: &str, reason: &'static str) -> KeyError {
    KeyError::Parse {
        input: input.to_string(),
        reason,
    }
}

fn join(tokens: &[ArcStr], sep: char) -> String {
    let mut buffer = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            buffer.push(sep);
        }
        buffer.push_str(token);
    }
    buffer
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.repr == other.repr
    }
}

impl Eq for Key {}

impl PartialEq<str> for Key {
    fn eq(&self, other: &str) -> bool {
        &*self.repr == other
    }
}

impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        &*self.repr == *other
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.repr.cmp(&other.repr)
    }
}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `str`'s Hash for the `Borrow<str>` impl.
        (*self.repr).hash(state);
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.repr
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.repr
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.repr)
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::parse(s)
    }
}

impl TryFrom<&str> for Key {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Key::parse(value)
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr)
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Key::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Anything that can name a node: a [`Key`] or its string form.
pub trait IntoKey {
    fn into_key(self) -> Result<Key, KeyError>;
}

impl IntoKey for Key {
    fn into_key(self) -> Result<Key, KeyError> {
        Ok(self)
    }
}

impl IntoKey for &Key {
    fn into_key(self) -> Result<Key, KeyError> {
        Ok(self.clone())
    }
}

impl IntoKey for &str {
    fn into_key(self) -> Result<Key, KeyError> {
        Key::parse(self)
    }
}

impl IntoKey for String {
    fn into_key(self) -> Result<Key, KeyError> {
        Key::parse(&self)
    }
}

impl IntoKey for &String {
    fn into_key(self) -> Result<Key, KeyError> {
        Key::parse(self)
    }
}
