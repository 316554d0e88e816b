use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Axis, Label, Quantity};
use crate::error::QuantityError;
use crate::units::Unit;

/// Plain tabular form of a [`Quantity`]: one row per populated cell.
///
/// This is the interchange format for readers and writers, and the form a
/// quantity takes when serialized. `coords` lists every coordinate of each
/// dimension, populated or not; when it is empty the coordinates are the
/// labels found in `rows`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dims: Vec<String>,
    #[serde(default)]
    pub unit: Unit,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coords: Vec<Vec<Label>>,
    pub rows: Vec<(Vec<Label>, f64)>,
}

impl Table {
    pub fn new<S: Into<String>>(dims: impl IntoIterator<Item = S>, unit: Unit) -> Self {
        Self {
            name: None,
            dims: dims.into_iter().map(Into::into).collect(),
            unit,
            coords: vec![],
            rows: vec![],
        }
    }

    pub fn row<L: Into<Label>>(mut self, labels: impl IntoIterator<Item = L>, value: f64) -> Self {
        self.rows
            .push((labels.into_iter().map(Into::into).collect(), value));
        self
    }
}

impl Quantity {
    /// Builds a quantity from `table`. Without explicit `coords`, the
    /// coordinates are the labels found in the rows, in order of first
    /// appearance.
    pub fn from_table(table: Table) -> Result<Quantity, QuantityError> {
        if !table.coords.is_empty() {
            if table.coords.len() != table.dims.len() {
                return Err(QuantityError::Shape(format!(
                    "{} coordinate lists for {} dimensions",
                    table.coords.len(),
                    table.dims.len()
                )));
            }
            let axes = table
                .dims
                .iter()
                .zip(table.coords)
                .map(|(dim, labels)| Axis::new(dim, labels))
                .collect::<Result<Vec<_>, _>>()?;
            let quantity = Quantity::from_cells(axes, table.rows, table.unit)?;
            return Ok(with_name(quantity, table.name));
        }

        let mut coords = vec![IndexSet::new(); table.dims.len()];
        for (labels, _) in &table.rows {
            if labels.len() != table.dims.len() {
                return Err(QuantityError::Shape(format!(
                    "row has {} labels for {} dimensions",
                    labels.len(),
                    table.dims.len()
                )));
            }
            for (set, label) in coords.iter_mut().zip(labels) {
                set.insert(label.clone());
            }
        }

        let axes = table
            .dims
            .iter()
            .zip(coords)
            .map(|(dim, labels)| Axis::from_set(dim.as_str().into(), labels))
            .collect();

        let quantity = Quantity::from_cells(axes, table.rows, table.unit)?;
        Ok(with_name(quantity, table.name))
    }

    pub fn to_table(&self) -> Table {
        Table {
            name: self.name().map(String::from),
            dims: self.dims().map(String::from).collect(),
            unit: self.unit.clone(),
            coords: self
                .axes
                .iter()
                .map(|axis| axis.labels().cloned().collect())
                .collect(),
            rows: self.cells(),
        }
    }
}

fn with_name(quantity: Quantity, name: Option<String>) -> Quantity {
    match name {
        Some(name) => quantity.with_name(&name),
        None => quantity,
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_table().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let table = Table::deserialize(deserializer)?;
        Quantity::from_table(table).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_back() {
        let table = Table::new(["n", "t"], Unit::parse("Mt").unwrap())
            .row([Label::from("R11_AFR"), Label::from(2020)], 1.5)
            .row([Label::from("R11_CHN"), Label::from(2020)], 7.0);

        let q = Quantity::from_table(table).unwrap();
        assert_eq!(q.shape(), vec![2, 1]);
        assert_eq!(q.get(&["R11_CHN".into(), 2020.into()]), Some(7.0));

        let back = q.to_table();
        assert_eq!(back.dims, ["n", "t"]);
        assert_eq!(back.rows.len(), 2);
        assert_eq!(back.unit.to_string(), "Mt");
    }

    #[test]
    fn test_row_arity() {
        let table = Table::new(["n"], Unit::default()).row(["a", "b"], 1.0);
        assert!(matches!(
            Quantity::from_table(table),
            Err(QuantityError::Shape(_))
        ));
    }

    #[test]
    fn test_json() {
        let json = r#"{"dims": ["t"], "unit": "kg", "rows": [[[2020], 1.0], [[2030], 2.0]]}"#;
        let q: Quantity = serde_json::from_str(json).unwrap();
        assert_eq!(q.get(&[2030.into()]), Some(2.0));
        assert_eq!(q.unit().to_string(), "kg");

        let text = serde_json::to_string(&q).unwrap();
        let again: Quantity = serde_json::from_str(&text).unwrap();
        assert!(q.equivalent(&again, 0.0));
    }

    #[test]
    fn test_unpopulated_coords_survive() {
        let axes = vec![Axis::new("x", ["a", "b", "c"]).unwrap()];
        let q = Quantity::from_cells(axes, [(vec![Label::from("a")], 1.0)], Unit::default())
            .unwrap();

        let text = serde_json::to_string(&q).unwrap();
        let again: Quantity = serde_json::from_str(&text).unwrap();
        assert_eq!(again.shape(), vec![3]);
        assert_eq!(again.len(), 1);

        let mut bytes = Vec::new();
        ciborium::into_writer(&q, &mut bytes).unwrap();
        let again: Quantity = ciborium::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(again.axis("x"), q.axis("x"));
    }

    #[test]
    fn test_coords_arity() {
        let mut table = Table::new(["x", "y"], Unit::default());
        table.coords = vec![vec![Label::from("a")]];
        assert!(matches!(
            Quantity::from_table(table),
            Err(QuantityError::Shape(_))
        ));
    }
}
