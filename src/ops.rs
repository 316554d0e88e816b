//! Built-in operators over [`Quantity`] values.
//!
//! Each function returns an [`Operator`] with its parameters captured, ready
//! to be wrapped in a [`crate::Task`]:
//!
//! ```rust
//! use reckon::{Computer, Task, ops};
//!
//! let mut c = Computer::new();
//! c.add("total:n", Task::call(ops::sum(["t"]), ["emi:n-t"]).unwrap()).unwrap();
//! ```
use anyhow::{anyhow, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::core::Dynamic;
use crate::error::Error;
use crate::quantity::{Label, Quantity};
use crate::task::Operator;
use crate::units::{Unit, UnitRegistry};

/// Per-dimension coordinate selection.
pub type Indexers = IndexMap<String, Vec<Label>>;

/// Passes its single argument through; used for aliases.
pub fn identity() -> Operator {
    Operator::new("identity", |args: &[Dynamic]| {
        args.first()
            .cloned()
            .ok_or_else(|| anyhow!("identity() takes one argument"))
    })
}

/// Sum over `dims`; all dimensions when `dims` is empty.
pub fn sum<S: Into<String>>(dims: impl IntoIterator<Item = S>) -> Operator {
    let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
    Operator::unary("sum", move |q: &Quantity| Ok(q.sum(&dims)?))
}

/// Weighted mean of the first argument over `dims`, weights in the second.
pub fn sum_weighted<S: Into<String>>(dims: impl IntoIterator<Item = S>) -> Operator {
    let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
    Operator::variadic("sum_weighted", move |qs: &[&Quantity]| {
        ensure!(qs.len() == 2, "sum_weighted() takes a quantity and weights");
        Ok(qs[0].sum_weighted(qs[1], &dims)?)
    })
}

/// Sum of any number of quantities, in the unit of the first.
pub fn add() -> Operator {
    Operator::variadic("add", |qs: &[&Quantity]| {
        let (first, rest) = qs
            .split_first()
            .ok_or_else(|| anyhow!("add() needs at least one argument"))?;
        rest.iter()
            .try_fold((*first).clone(), |acc, q| Ok(acc.add(q)?))
    })
}

pub fn sub() -> Operator {
    Operator::variadic("sub", |qs: &[&Quantity]| {
        ensure!(qs.len() == 2, "sub() takes two arguments");
        Ok(qs[0].sub(qs[1])?)
    })
}

/// Product of any number of quantities.
pub fn mul() -> Operator {
    Operator::variadic("mul", |qs: &[&Quantity]| {
        let (first, rest) = qs
            .split_first()
            .ok_or_else(|| anyhow!("mul() needs at least one argument"))?;
        Ok(rest.iter().fold((*first).clone(), |acc, q| acc.mul(q)))
    })
}

pub fn div() -> Operator {
    Operator::variadic("div", |qs: &[&Quantity]| {
        ensure!(qs.len() == 2, "div() takes two arguments");
        Ok(qs[0].div(qs[1]))
    })
}

/// First argument raised to the second, see [`Quantity::pow`].
pub fn pow() -> Operator {
    Operator::variadic("pow", |qs: &[&Quantity]| {
        ensure!(qs.len() == 2, "pow() takes a base and an exponent");
        Ok(qs[0].pow(qs[1])?)
    })
}

pub fn select(indexers: Indexers) -> Operator {
    Operator::unary("select", move |q: &Quantity| {
        Ok(q.select(indexers.iter().map(|(d, l)| (d, l.clone())))?)
    })
}

/// Group sums along `dim`, see [`Quantity::aggregate`].
pub fn aggregate(dim: &str, groups: IndexMap<Label, Vec<Label>>, keep: bool) -> Operator {
    let dim = dim.to_string();
    Operator::unary("aggregate", move |q: &Quantity| {
        Ok(q.aggregate(&dim, &groups, keep)?)
    })
}

pub fn convert_units(unit: Unit) -> Operator {
    Operator::unary("convert_units", move |q: &Quantity| {
        Ok(q.convert_units(&unit)?)
    })
}

/// Sets the unit without converting values.
pub fn apply_units(unit: Unit) -> Operator {
    Operator::unary("apply_units", move |q: &Quantity| {
        Ok(q.clone().with_units(unit.clone()))
    })
}

pub fn rename_dim(from: &str, to: &str) -> Operator {
    let (from, to) = (from.to_string(), to.to_string());
    Operator::unary("rename_dim", move |q: &Quantity| Ok(q.rename_dim(&from, &to)?))
}

/// Concatenation along the existing dimension `dim`.
pub fn concat(dim: &str) -> Operator {
    let dim = dim.to_string();
    Operator::variadic("concat", move |qs: &[&Quantity]| {
        let parts: Vec<Quantity> = qs.iter().map(|q| (*q).clone()).collect();
        Ok(Quantity::concat(&parts, &dim)?)
    })
}

/// Stacks the arguments along a new dimension `dim`, labelling argument `i`
/// with `labels[i]`.
pub fn concat_new(dim: &str, labels: Vec<Label>) -> Operator {
    let dim = dim.to_string();
    Operator::variadic("concat_new", move |qs: &[&Quantity]| {
        ensure!(
            qs.len() == labels.len(),
            "concat_new() got {} quantities for {} labels",
            qs.len(),
            labels.len()
        );
        let parts: Vec<(Label, Quantity)> = labels
            .iter()
            .cloned()
            .zip(qs.iter().map(|q| (*q).clone()))
            .collect();
        Ok(Quantity::concat_new(&parts, &dim)?)
    })
}

/// Splits the first argument along `dim` by multiplying it with the shares
/// in the second, which must have `dim`.
pub fn disaggregate_shares(dim: &str) -> Operator {
    let dim = dim.to_string();
    Operator::variadic("disaggregate_shares", move |qs: &[&Quantity]| {
        ensure!(qs.len() == 2, "disaggregate_shares() takes a quantity and shares");
        ensure!(
            qs[1].axis(&dim).is_some(),
            "Shares have no dimension '{dim}' to disaggregate along"
        );
        Ok(qs[0].mul(qs[1]))
    })
}

/// Weighted sum of quantities after selection.
///
/// Argument `i` is narrowed with `select[i]` and summed over the selected
/// dimensions, so every term ends up with the same dimensions, then
/// multiplied by `weights[i]`.
pub fn combine(select: Vec<Indexers>, weights: Vec<f64>) -> Operator {
    Operator::variadic("combine", move |qs: &[&Quantity]| {
        ensure!(
            qs.len() == select.len() && qs.len() == weights.len(),
            "combine() got {} quantities for {} selections and {} weights",
            qs.len(),
            select.len(),
            weights.len()
        );

        let mut result: Option<Quantity> = None;
        for ((q, indexers), &weight) in qs.iter().zip(&select).zip(&weights) {
            let picked = q.select(indexers.iter().map(|(d, l)| (d, l.clone())))?;
            let dims: Vec<&str> = indexers.keys().map(String::as_str).collect();
            let term = if dims.is_empty() {
                picked
            } else {
                picked.sum(&dims)?
            }
            .scale(weight);

            result = Some(match result {
                Some(acc) => acc.add(&term)?,
                None => term,
            });
        }

        result.ok_or_else(|| anyhow!("combine() needs at least one argument"))
    })
}

#[derive(Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct DimsArgs {
    dims: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DimArgs {
    dim: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitArgs {
    unit: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RenameArgs {
    from: String,
    to: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AggregateArgs {
    dim: String,
    groups: IndexMap<String, Vec<Label>>,
    #[serde(default = "yes")]
    keep: bool,
}

fn yes() -> bool {
    true
}

fn parse<T: DeserializeOwned>(args: &Map<String, Value>) -> Result<T, Error> {
    Ok(serde_json::from_value(Value::Object(args.clone()))?)
}

/// Looks up a built-in operator by name and builds it from JSON arguments.
///
/// Units named in `args` are resolved with `units`. Operators that take no
/// parameters reject any arguments.
pub fn from_name(
    name: &str,
    args: &Map<String, Value>,
    units: &UnitRegistry,
) -> Result<Operator, Error> {
    let plain = |op: fn() -> Operator| -> Result<Operator, Error> {
        match args.keys().next() {
            None => Ok(op()),
            Some(arg) => Err(Error::UnknownArgument {
                operator: name.to_string(),
                arg: arg.clone(),
            }),
        }
    };

    match name {
        "identity" => plain(identity),
        "add" => plain(add),
        "sub" => plain(sub),
        "mul" => plain(mul),
        "div" => plain(div),
        "pow" => plain(pow),
        "sum" => Ok(sum(parse::<DimsArgs>(args)?.dims)),
        "sum_weighted" => Ok(sum_weighted(parse::<DimsArgs>(args)?.dims)),
        "select" => Ok(select(parse::<Indexers>(args)?)),
        "aggregate" => {
            let a: AggregateArgs = parse(args)?;
            let groups = a
                .groups
                .into_iter()
                .map(|(group, members)| (Label::from(group.as_str()), members))
                .collect();
            Ok(aggregate(&a.dim, groups, a.keep))
        }
        "convert_units" => Ok(convert_units(units.parse(&parse::<UnitArgs>(args)?.unit)?)),
        "apply_units" => Ok(apply_units(units.parse(&parse::<UnitArgs>(args)?.unit)?)),
        "rename_dim" => {
            let a: RenameArgs = parse(args)?;
            Ok(rename_dim(&a.from, &a.to))
        }
        "concat" => Ok(concat(&parse::<DimArgs>(args)?.dim)),
        _ => Err(Error::UnknownOperator(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::quantity::Table;

    fn dynamic<T: std::any::Any + Send + Sync>(value: T) -> Dynamic {
        Arc::new(value)
    }

    fn q(rows: &[(&str, &str, f64)], unit: &str) -> Dynamic {
        let mut table = Table::new(["x", "y"], Unit::parse(unit).unwrap());
        for &(x, y, v) in rows {
            table = table.row([x, y], v);
        }
        dynamic(Quantity::from_table(table).unwrap())
    }

    fn out(value: Dynamic) -> Quantity {
        value.downcast_ref::<Quantity>().unwrap().clone()
    }

    #[test]
    fn test_add_many() {
        let a = q(&[("a", "p", 1.0)], "kg");
        let b = q(&[("a", "p", 1000.0)], "g");
        let c = q(&[("b", "p", 1.0)], "kg");
        let r = out(add().call(&[a, b, c]).unwrap());
        let ap = r.get(&["a".into(), "p".into()]).unwrap();
        assert!((ap - 2.0).abs() < 1e-12);
        assert_eq!(r.get(&["b".into(), "p".into()]), Some(1.0));
    }

    #[test]
    fn test_add_propagates_unit_error() {
        let a = q(&[("a", "p", 1.0)], "kg");
        let b = q(&[("a", "p", 1.0)], "s");
        let err = add().call(&[a, b]).unwrap_err();
        assert!(err.downcast_ref::<crate::QuantityError>().is_some());
    }

    #[test]
    fn test_sum_and_identity() {
        let a = q(&[("a", "p", 1.0), ("a", "q", 2.0)], "");
        let s = out(sum(["y"]).call(&[a.clone()]).unwrap());
        assert_eq!(s.get(&["a".into()]), Some(3.0));

        let same = identity().call(&[a.clone()]).unwrap();
        assert!(Arc::ptr_eq(&same, &a));
    }

    #[test]
    fn test_combine() {
        let a = q(&[("a", "p", 1.0), ("a", "q", 2.0)], "");
        let b = q(&[("a", "p", 10.0)], "");

        let mut sel = Indexers::new();
        sel.insert("y".into(), vec!["p".into(), "q".into()]);
        let mut sel_b = Indexers::new();
        sel_b.insert("y".into(), vec!["p".into()]);

        let op = combine(vec![sel, sel_b], vec![1.0, -0.5]);
        let r = out(op.call(&[a, b]).unwrap());
        assert_eq!(r.dims().collect::<Vec<_>>(), ["x"]);
        assert_eq!(r.get(&["a".into()]), Some(3.0 - 5.0));
    }

    #[test]
    fn test_pow_and_concat_new() {
        let a = q(&[("a", "p", 3.0)], "m");
        let two = dynamic(Quantity::scalar(2.0, Unit::dimensionless()));
        let r = out(pow().call(&[a.clone(), two]).unwrap());
        assert_eq!(r.get(&["a".into(), "p".into()]), Some(9.0));

        let op = concat_new("v", vec!["first".into(), "second".into()]);
        let r = out(op.call(&[a.clone(), a]).unwrap());
        assert_eq!(r.dims().collect::<Vec<_>>(), ["v", "x", "y"]);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_disaggregate_needs_dimension() {
        let a = q(&[("a", "p", 3.0)], "");
        let err = disaggregate_shares("z").call(&[a.clone(), a]).unwrap_err();
        assert!(err.to_string().contains("no dimension 'z'"));
    }

    #[test]
    fn test_from_name() {
        let units = UnitRegistry::builtin();
        let args: Map<String, Value> =
            serde_json::from_str(r#"{ "dims": ["y"] }"#).unwrap();
        let a = q(&[("a", "p", 1.0), ("a", "q", 2.0)], "");
        let s = out(from_name("sum", &args, &units).unwrap().call(&[a]).unwrap());
        assert_eq!(s.get(&["a".into()]), Some(3.0));

        let args: Map<String, Value> = serde_json::from_str(r#"{ "unit": "g" }"#).unwrap();
        let kg = q(&[("a", "p", 1.0)], "kg");
        let op = from_name("convert_units", &args, &units).unwrap();
        assert_eq!(out(op.call(&[kg]).unwrap()).get(&["a".into(), "p".into()]), Some(1000.0));

        assert!(matches!(
            from_name("frobnicate", &Map::new(), &units),
            Err(Error::UnknownOperator(_))
        ));
        assert!(matches!(
            from_name("mul", &args, &units),
            Err(Error::UnknownArgument { .. })
        ));
        assert!(matches!(
            from_name("sum", &args, &units),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_wrong_argument_type() {
        let err = sum(["y"]).call(&[dynamic(1.0f64)]).unwrap_err();
        assert!(err.to_string().contains("is not a"));
    }
}
