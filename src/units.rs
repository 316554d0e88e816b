//! Units of measure.
//!
//! A [`Unit`] carries two views of the same thing. The symbolic view is the
//! product of symbols raised to integer powers, exactly as the user wrote it
//! (`MJ/hour` stays `MJ/hour`), and is what gets displayed and fingerprinted.
//! The resolved view is a scale factor together with exponents of base
//! dimensions, and is what conversions and compatibility checks use.
//!
//! Symbols are looked up in a [`UnitRegistry`]. Each [`crate::Computer`]
//! owns one; [`Unit::parse`] uses a shared, read-only registry with the
//! built-in symbols. Symbols the registry doesn't know are not an error: each becomes
//! a base dimension of its own, so `USD` is compatible with `USD` and with
//! nothing else.
//!
//! A unit serializes as its text when the built-in registry resolves
//! that text the same way, and otherwise together with its resolved form,
//! so units defined in a private registry survive a round trip.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::ArcStr;
use crate::error::UnitError;

type Exponents = BTreeMap<ArcStr, i32>;

static BUILTIN: LazyLock<UnitRegistry> = LazyLock::new(UnitRegistry::builtin);

/// A unit of measure, see the module documentation.
#[derive(Clone)]
pub struct Unit {
    terms: Exponents,
    scale: f64,
    base: Exponents,
}

impl Unit {
    /// The unit of pure numbers; also what a missing unit means.
    pub fn dimensionless() -> Self {
        Self {
            terms: Exponents::new(),
            scale: 1.0,
            base: Exponents::new(),
        }
    }

    /// Parses `input` against the built-in symbols. Use
    /// [`UnitRegistry::parse`] or [`crate::Computer::parse_unit`] for units
    /// defined in configuration.
    pub fn parse(input: &str) -> Result<Self, UnitError> {
        BUILTIN.parse(input)
    }

    pub fn is_dimensionless(&self) -> bool {
        self.terms.is_empty()
    }

    /// Factor `f` such that `x [self] == x * f [other]`.
    pub fn factor_to(&self, other: &Unit) -> Result<f64, UnitError> {
        if self.base != other.base {
            return Err(UnitError::Incompatible {
                from: self.to_string(),
                to: other.to_string(),
            });
        }
        Ok(self.scale / other.scale)
    }

    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.base == other.base
    }

    pub fn mul(&self, other: &Unit) -> Unit {
        self.compose(other, 1)
    }

    pub fn div(&self, other: &Unit) -> Unit {
        self.compose(other, -1)
    }

    pub fn powi(&self, n: i32) -> Unit {
        let mut terms = self.terms.clone();
        let mut base = self.base.clone();
        terms.values_mut().for_each(|e| *e *= n);
        base.values_mut().for_each(|e| *e *= n);
        terms.retain(|_, e| *e != 0);
        base.retain(|_, e| *e != 0);

        Unit {
            terms,
            scale: self.scale.powi(n),
            base,
        }
    }

    fn compose(&self, other: &Unit, sign: i32) -> Unit {
        let mut terms = self.terms.clone();
        let mut base = self.base.clone();
        merge(&mut terms, &other.terms, sign);
        merge(&mut base, &other.base, sign);

        Unit {
            terms,
            scale: self.scale * other.scale.powi(sign),
            base,
        }
    }

    /// Symbols with their exponents, in canonical order.
    pub fn terms(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.terms.iter().map(|(s, &e)| (&**s, e))
    }

    /// Scale relative to the product of base dimensions.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Base dimensions with their exponents, in canonical order.
    pub fn base(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.base.iter().map(|(s, &e)| (&**s, e))
    }
}

fn merge(into: &mut Exponents, from: &Exponents, sign: i32) {
    for (symbol, exp) in from {
        *into.entry(symbol.clone()).or_insert(0) += exp * sign;
    }
    into.retain(|_, e| *e != 0);
}

impl Default for Unit {
    fn default() -> Self {
        Self::dimensionless()
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && (self.scale - other.scale).abs() <= 1e-12 * self.scale.abs()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("dimensionless");
        }

        fn write_term(f: &mut fmt::Formatter<'_>, symbol: &str, exp: i32) -> fmt::Result {
            match exp {
                1 => f.write_str(symbol),
                n => write!(f, "{symbol}^{n}"),
            }
        }

        let mut first = true;
        for (symbol, &exp) in self.terms.iter().filter(|(_, e)| **e > 0) {
            if !first {
                f.write_str("*")?;
            }
            write_term(f, symbol, exp)?;
            first = false;
        }
        if first {
            f.write_str("1")?;
        }
        for (symbol, &exp) in self.terms.iter().filter(|(_, e)| **e < 0) {
            f.write_str("/")?;
            write_term(f, symbol, -exp)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unit({self})")
    }
}

impl std::str::FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Unit::parse(s)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum UnitRepr {
    Text(String),
    Resolved {
        symbol: String,
        scale: f64,
        base: BTreeMap<String, i32>,
    },
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let symbol = self.to_string();
        let repr = match Unit::parse(&symbol) {
            Ok(global) if global == *self => UnitRepr::Text(symbol),
            _ => UnitRepr::Resolved {
                symbol,
                scale: self.scale,
                base: self.base().map(|(s, e)| (s.to_string(), e)).collect(),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match UnitRepr::deserialize(deserializer)? {
            UnitRepr::Text(s) => Unit::parse(&s).map_err(serde::de::Error::custom),
            UnitRepr::Resolved {
                symbol,
                scale,
                base,
            } => {
                let terms = UnitRegistry::empty()
                    .parse(&symbol)
                    .map_err(serde::de::Error::custom)?
                    .terms;
                Ok(Unit {
                    terms,
                    scale,
                    base: base.into_iter().map(|(s, e)| (s.into(), e)).collect(),
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Definition {
    scale: f64,
    base: Exponents,
}

/// Symbol table used to resolve units.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: HashMap<String, Definition>,
    replace: Vec<(String, String)>,
}

const PREFIXES: &[(&str, f64)] = &[
    ("kilo", 1e3),
    ("mega", 1e6),
    ("giga", 1e9),
    ("tera", 1e12),
    ("peta", 1e15),
    ("exa", 1e18),
    ("milli", 1e-3),
    ("micro", 1e-6),
    ("nano", 1e-9),
    ("centi", 1e-2),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("n", 1e-9),
    ("c", 1e-2),
];

impl UnitRegistry {
    /// Registry with no symbols at all; every symbol is its own dimension.
    pub fn empty() -> Self {
        Self {
            units: HashMap::new(),
            replace: Vec::new(),
        }
    }

    /// Registry with common SI and energy-system units.
    pub fn builtin() -> Self {
        let mut reg = Self::empty();

        reg.base("g", "[mass]");
        reg.base("m", "[length]");
        reg.base("s", "[time]");
        reg.alias("gram", "g");
        reg.alias("metre", "m");
        reg.alias("meter", "m");
        reg.alias("second", "s");

        const YEAR: f64 = 31_557_600.0;
        let defs: &[(&str, f64, &str)] = &[
            ("dimensionless", 1.0, "1"),
            ("percent", 0.01, "1"),
            ("t", 1e6, "g"),
            ("tonne", 1e6, "g"),
            ("minute", 60.0, "s"),
            ("min", 60.0, "s"),
            ("hour", 3600.0, "s"),
            ("h", 3600.0, "s"),
            ("day", 86400.0, "s"),
            ("year", YEAR, "s"),
            ("a", YEAR, "s"),
            ("yr", YEAR, "s"),
            ("N", 1e3, "g*m/s^2"),
            ("J", 1e3, "g*m^2/s^2"),
            ("joule", 1e3, "g*m^2/s^2"),
            ("W", 1e3, "g*m^2/s^3"),
            ("watt", 1e3, "g*m^2/s^3"),
            ("Wh", 3.6e6, "g*m^2/s^2"),
            ("Wa", YEAR * 1e3, "g*m^2/s^2"),
        ];

        for &(symbol, scale, expr) in defs {
            // Built-in expressions only reference the base symbols above.
            if let Ok(unit) = reg.parse(expr) {
                reg.units.insert(
                    symbol.to_string(),
                    Definition {
                        scale: scale * unit.scale,
                        base: unit.base,
                    },
                );
            }
        }

        reg.replace.push(("%".into(), "percent".into()));
        reg
    }

    fn base(&mut self, symbol: &str, dimension: &str) {
        let mut base = Exponents::new();
        base.insert(dimension.into(), 1);
        self.units
            .insert(symbol.to_string(), Definition { scale: 1.0, base });
    }

    fn alias(&mut self, symbol: &str, target: &str) {
        if let Some(def) = self.units.get(target).cloned() {
            self.units.insert(symbol.to_string(), def);
        }
    }

    /// Defines `symbol` in terms of other units, e.g. `("kWa", "kW*a")`.
    ///
    /// An expression of the form `[name]` introduces a new base dimension.
    pub fn define(&mut self, symbol: &str, expr: &str) -> Result<(), UnitError> {
        let expr = expr.trim();
        if let Some(dim) = expr.strip_prefix('[').and_then(|e| e.strip_suffix(']')) {
            self.base(symbol, &format!("[{}]", dim.trim()));
            return Ok(());
        }

        let unit = self.parse(expr)?;
        self.units.insert(
            symbol.to_string(),
            Definition {
                scale: unit.scale,
                base: unit.base,
            },
        );
        Ok(())
    }

    /// Adds a textual substitution applied before parsing, e.g. `%` to
    /// `percent`.
    pub fn replace(&mut self, from: &str, to: &str) {
        self.replace.retain(|(f, _)| f != from);
        self.replace.push((from.to_string(), to.to_string()));
    }

    /// Parses `a*b^2/c`-style expressions. `""`, `"1"` and `"dimensionless"`
    /// all give the dimensionless unit.
    pub fn parse(&self, input: &str) -> Result<Unit, UnitError> {
        let mut text = input.trim().to_string();
        for (from, to) in &self.replace {
            text = text.replace(from.as_str(), to);
        }

        let mut unit = Unit::dimensionless();
        if text.is_empty() || text == "dimensionless" {
            return Ok(unit);
        }

        let mut sign = 1;
        let mut rest = text.as_str();
        loop {
            let end = rest.find(['*', '/']).unwrap_or(rest.len());
            let factor = rest[..end].trim();
            self.apply_factor(&mut unit, input, factor, sign)?;

            if end == rest.len() {
                break;
            }
            sign = if rest[end..].starts_with('/') { -1 } else { 1 };
            rest = &rest[end + 1..];
        }

        Ok(unit)
    }

    fn apply_factor(
        &self,
        unit: &mut Unit,
        input: &str,
        factor: &str,
        sign: i32,
    ) -> Result<(), UnitError> {
        let error = |reason| UnitError::Parse {
            input: input.to_string(),
            reason,
        };

        let (symbol, exp) = match factor.split_once('^') {
            Some((symbol, exp)) => {
                let exp = exp
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| error("exponent is not an integer"))?;
                (symbol.trim(), exp)
            }
            None => (factor, 1),
        };

        if symbol.is_empty() {
            return Err(error("empty factor"));
        }
        if symbol == "1" {
            return Ok(());
        }
        if symbol.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(error("numeric factors other than 1 are not supported"));
        }
        if symbol
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '^'))
        {
            return Err(error("invalid character in symbol"));
        }

        let def = self.lookup(symbol);
        let exp = exp * sign;

        let mut terms = Exponents::new();
        terms.insert(symbol.into(), exp);
        merge(&mut unit.terms, &terms, 1);

        let mut base = def.base;
        base.values_mut().for_each(|e| *e *= exp);
        merge(&mut unit.base, &base, 1);

        unit.scale *= def.scale.powi(exp);
        Ok(())
    }

    fn lookup(&self, symbol: &str) -> Definition {
        if let Some(def) = self.units.get(symbol) {
            return def.clone();
        }

        for &(prefix, factor) in PREFIXES {
            if let Some(rest) = symbol.strip_prefix(prefix)
                && !rest.is_empty()
                && let Some(def) = self.units.get(rest)
            {
                return Definition {
                    scale: factor * def.scale,
                    base: def.base.clone(),
                };
            }
        }

        // Undefined symbols become a dimension of their own.
        let mut base = Exponents::new();
        base.insert(symbol.into(), 1);
        Definition { scale: 1.0, base }
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(s: &str) -> Unit {
        UnitRegistry::builtin().parse(s).unwrap()
    }

    #[test]
    fn test_dimensionless_forms() {
        assert_eq!(unit(""), Unit::dimensionless());
        assert_eq!(unit("1"), Unit::dimensionless());
        assert_eq!(unit("dimensionless"), Unit::default());
        assert!(unit("").is_dimensionless());
        assert_eq!(unit("").to_string(), "dimensionless");
    }

    #[test]
    fn test_prefix_conversion() {
        let factor = unit("kg").factor_to(&unit("g")).unwrap();
        assert!((factor - 1000.0).abs() < 1e-9);

        let factor = unit("Mt").factor_to(&unit("kg")).unwrap();
        assert!((factor - 1e9).abs() < 1e-3);
    }

    #[test]
    fn test_incompatible() {
        let err = unit("kg").factor_to(&unit("s")).unwrap_err();
        assert_eq!(
            err,
            UnitError::Incompatible {
                from: "kg".into(),
                to: "s".into()
            }
        );
    }

    #[test]
    fn test_compose_symbolic() {
        let energy = unit("MJ");
        let time = unit("hour");
        let power = energy.div(&time);
        assert_eq!(power.to_string(), "MJ/hour");

        let factor = power.factor_to(&unit("kW")).unwrap();
        assert!((factor - 1.0 / 3.6).abs() < 1e-9);
    }

    #[test]
    fn test_simplification() {
        let u = unit("m^2/m");
        assert_eq!(u.to_string(), "m");
        assert_eq!(unit("kg*m/s").to_string(), "kg*m/s");
        assert_eq!(unit("1/s").to_string(), "1/s");
        assert_eq!(unit("kg").div(&unit("kg")), Unit::dimensionless());
    }

    #[test]
    fn test_left_associative_division() {
        assert_eq!(unit("a/b*c").to_string(), "a*c/b");
        assert_eq!(unit("a/b/c").to_string(), "a/b/c");
    }

    #[test]
    fn test_percent_replacement() {
        let pct = unit("%");
        assert_eq!(pct.to_string(), "percent");
        let factor = pct.factor_to(&Unit::dimensionless()).unwrap();
        assert!((factor - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_symbols_are_own_dimension() {
        assert!(unit("USD").is_compatible(&unit("USD")));
        assert!(!unit("USD").is_compatible(&unit("EUR")));
        assert!(unit("kUSD").factor_to(&unit("USD")).is_err());
    }

    #[test]
    fn test_define() {
        let mut reg = UnitRegistry::builtin();
        reg.define("USD", "[currency]").unwrap();
        reg.define("kUSD_2010", "USD").unwrap();
        let a = reg.parse("kUSD").unwrap();
        let b = reg.parse("USD").unwrap();
        assert!((a.factor_to(&b).unwrap() - 1e3).abs() < 1e-9);
        assert!(reg.parse("kUSD_2010").unwrap().is_compatible(&b));
    }

    #[test]
    fn test_private_definition_survives_serde() {
        let mut reg = UnitRegistry::builtin();
        reg.define("kWa_x", "kW*a").unwrap();
        let private = reg.parse("kWa_x").unwrap();

        let text = serde_json::to_string(&private).unwrap();
        let back: Unit = serde_json::from_str(&text).unwrap();
        assert_eq!(back, private);
        assert_eq!(back.to_string(), "kWa_x");
        assert!((back.factor_to(&unit("MWh")).unwrap() - 8.766).abs() < 1e-9);

        // Units the built-in registry knows stay plain text.
        assert_eq!(serde_json::to_string(&unit("kg/s")).unwrap(), r#""kg/s""#);
    }

    #[test]
    fn test_parse_errors() {
        let reg = UnitRegistry::builtin();
        assert!(reg.parse("kg*").is_err());
        assert!(reg.parse("m^x").is_err());
        assert!(reg.parse("10*m").is_err());
        assert!(reg.parse("(kg)").is_err());
    }
}
