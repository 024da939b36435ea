use std::collections::BTreeMap;
use std::fmt;

use crate::keys::{EntityKey, PARTITION_KEY, ROW_KEY};

/// A single row of a partitioned table.
///
/// Properties other than the two keys are kept as raw JSON values; the scan
/// engine never interprets them.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableRow {
    #[cfg_attr(feature = "serde", serde(rename = "PartitionKey"))]
    pub partition_key: String,
    #[cfg_attr(feature = "serde", serde(rename = "RowKey"))]
    pub row_key: String,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl TableRow {
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter. Key columns are ignored.
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        let name = name.into();
        if name != PARTITION_KEY && name != ROW_KEY {
            self.properties.insert(name, value.into());
        }
        self
    }

    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.partition_key.clone(), self.row_key.clone())
    }

    /// Copy of this row carrying only the selected properties.
    ///
    /// The key columns are always kept. `None` keeps everything.
    pub fn project(&self, select: Option<&[String]>) -> TableRow {
        let Some(columns) = select else {
            return self.clone();
        };

        let properties = self
            .properties
            .iter()
            .filter(|(name, _)| columns.iter().any(|c| c == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        TableRow {
            partition_key: self.partition_key.clone(),
            row_key: self.row_key.clone(),
            properties,
        }
    }
}

impl fmt::Display for TableRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition_key, self.row_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projection_keeps_keys_and_selected_columns() {
        let row = TableRow::new("PK", "RK")
            .with_property("Size", 10)
            .with_property("Name", "a")
            .with_property("Hash", "deadbeef");

        let projected =
            row.project(Some(&["Size".to_string(), "Missing".to_string()]));

        assert_eq!(projected.partition_key, "PK");
        assert_eq!(projected.row_key, "RK");
        assert_eq!(projected.properties.len(), 1);
        assert_eq!(projected.property("Size"), Some(&json!(10)));
    }

    #[test]
    fn projection_none_keeps_everything() {
        let row = TableRow::new("PK", "RK").with_property("Size", 10);
        assert_eq!(row.project(None), row);
    }

    #[test]
    fn key_columns_cannot_be_shadowed() {
        let row = TableRow::new("PK", "RK").with_property(PARTITION_KEY, "x");
        assert!(row.properties.is_empty());
        assert_eq!(row.to_string(), "PK/RK");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_with_flat_properties() {
        let row = TableRow::new("PK", "RK").with_property("Size", 3);
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(
            value,
            json!({"PartitionKey": "PK", "RowKey": "RK", "Size": 3})
        );

        let back: TableRow = serde_json::from_value(value).unwrap();
        assert_eq!(back, row);
    }
}
