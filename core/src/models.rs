use std::collections::BTreeMap;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A grocery purchase as stored in the `foods` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodRecord {
    pub id: i64,
    pub food: String,
    pub location: String,
    pub price: f64,
    pub dt: String,
    pub count: Option<f64>,
    pub unit: Option<String>,
    pub deleted: bool,
    /// Derived at read time, never stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<String>,
}

/// Outcome of a create, update or soft delete.
///
/// Serializes to the `{ "message", "success" }` object the edit page expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mutation {
    pub message: String,
    pub success: bool,
    #[serde(skip)]
    pub id: Option<i64>,
    #[serde(skip)]
    pub rows_affected: usize,
}

impl Mutation {
    pub fn ok(message: impl Into<String>, id: Option<i64>, rows_affected: usize) -> Self {
        Self {
            message: message.into(),
            success: true,
            id,
            rows_affected,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
            id: None,
            rows_affected: 0,
        }
    }
}

/// Editable record fields, mapping the names used in forms to table columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Food,
    Location,
    Price,
    Date,
    Count,
    Unit,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Food,
        Field::Location,
        Field::Price,
        Field::Date,
        Field::Count,
        Field::Unit,
    ];

    pub const REQUIRED: [Field; 3] = [Field::Food, Field::Location, Field::Price];

    pub const OPTIONAL: [Field; 3] = [Field::Date, Field::Count, Field::Unit];

    /// Name shown to people and used by HTML forms.
    pub fn human_name(self) -> &'static str {
        match self {
            Field::Food => "food",
            Field::Location => "location",
            Field::Price => "price",
            Field::Date => "date",
            Field::Count => "count",
            Field::Unit => "unit",
        }
    }

    /// Column name in the `foods` table.
    pub fn column(self) -> &'static str {
        match self {
            Field::Date => "dt",
            other => other.human_name(),
        }
    }

    pub fn from_human(name: &str) -> Option<Field> {
        Self::ALL.into_iter().find(|f| f.human_name() == name)
    }

    pub fn from_column(name: &str) -> Option<Field> {
        Self::ALL.into_iter().find(|f| f.column() == name)
    }

    /// Accepts either naming.
    pub fn parse(name: &str) -> Option<Field> {
        Self::from_human(name).or_else(|| Self::from_column(name))
    }

    /// Columns that may be set to NULL. `dt` has a default but is never NULL.
    pub fn is_nullable(self) -> bool {
        matches!(self, Field::Count | Field::Unit)
    }

    /// Look up this field in submitted form data, by human name first.
    pub fn lookup(self, fields: &BTreeMap<String, String>) -> Option<&str> {
        fields
            .get(self.human_name())
            .or_else(|| fields.get(self.column()))
            .map(String::as_str)
    }
}

/// Format `price / count` as `$<value>/<unit>`, rounded to cents.
///
/// Returns `None` when there is no usable count.
pub fn price_per_unit(price: f64, count: Option<f64>, unit: Option<&str>) -> Option<String> {
    let count = count.filter(|c| *c != 0.0 && c.is_finite())?;
    let value = (price / count * 100.0).round() / 100.0;
    let value = if value == 0.0 { 0.0 } else { value };
    let unit = unit.map(str::trim).filter(|u| !u.is_empty()).unwrap_or("unit");
    Some(format!("${value}/{unit}"))
}

/// Normalize a submitted purchase date to `YYYY-MM-DD`.
pub fn normalize_date(input: &str) -> Result<String, StoreError> {
    let s = input.trim();
    let today = Local::now().date_naive();
    let date = match s.to_lowercase().as_str() {
        "today" => today,
        "yesterday" => today - chrono::Duration::days(1),
        _ => ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"]
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
            .ok_or_else(|| {
                StoreError::Validation(format!(
                    "Invalid date '{s}'. Use YYYY-MM-DD, MM/DD/YYYY, today or yesterday"
                ))
            })?,
    };
    Ok(date.format("%Y-%m-%d").to_string())
}

/// Extract the record id from submitted form data.
pub fn parse_id(fields: &BTreeMap<String, String>) -> Result<i64, StoreError> {
    let raw = fields
        .get("id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::Validation("missing required field 'id'".to_string()))?;
    raw.parse()
        .map_err(|_| StoreError::Validation(format!("Invalid id '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_field_mapping_round_trips() {
        for field in Field::ALL {
            assert_eq!(Field::from_human(field.human_name()), Some(field));
            assert_eq!(Field::from_column(field.column()), Some(field));
        }
        assert_eq!(Field::Date.column(), "dt");
        assert_eq!(Field::from_column("dt"), Some(Field::Date));
        assert_eq!(Field::from_human("dt"), None);
    }

    #[test]
    fn test_field_parse_rejects_internal_columns() {
        assert_eq!(Field::parse("date"), Some(Field::Date));
        assert_eq!(Field::parse("dt"), Some(Field::Date));
        assert_eq!(Field::parse("deleted"), None);
        assert_eq!(Field::parse("id"), None);
        assert_eq!(Field::parse("food; DROP TABLE foods"), None);
    }

    #[test]
    fn test_lookup_prefers_human_name() {
        let fields = form(&[("date", "2024-01-02"), ("dt", "2024-05-06")]);
        assert_eq!(Field::Date.lookup(&fields), Some("2024-01-02"));
        let fields = form(&[("dt", "2024-05-06")]);
        assert_eq!(Field::Date.lookup(&fields), Some("2024-05-06"));
    }

    #[test]
    fn test_price_per_unit() {
        assert_eq!(
            price_per_unit(3.50, Some(1.0), Some("gal")).as_deref(),
            Some("$3.5/gal")
        );
        assert_eq!(
            price_per_unit(10.0, Some(3.0), Some("lb")).as_deref(),
            Some("$3.33/lb")
        );
        assert_eq!(
            price_per_unit(4.0, Some(2.0), None).as_deref(),
            Some("$2/unit")
        );
    }

    #[test]
    fn test_price_per_unit_without_count() {
        assert_eq!(price_per_unit(3.5, None, Some("gal")), None);
        assert_eq!(price_per_unit(3.5, Some(0.0), Some("gal")), None);
    }

    #[test]
    fn test_normalize_date_formats() {
        assert_eq!(normalize_date("2024-01-15").unwrap(), "2024-01-15");
        assert_eq!(normalize_date(" 01/15/2024 ").unwrap(), "2024-01-15");
        assert_eq!(normalize_date("2024/01/15").unwrap(), "2024-01-15");
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(normalize_date("Today").unwrap(), today);
    }

    #[test]
    fn test_normalize_date_invalid() {
        assert!(matches!(
            normalize_date("next tuesday"),
            Err(StoreError::Validation(_))
        ));
        assert!(normalize_date("2024-02-30").is_err());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id(&form(&[("id", " 42 ")])).unwrap(), 42);
        assert!(matches!(
            parse_id(&form(&[("food", "milk")])),
            Err(StoreError::Validation(_))
        ));
        assert!(parse_id(&form(&[("id", "abc")])).is_err());
        assert!(parse_id(&form(&[("id", "")])).is_err());
    }

    #[test]
    fn test_mutation_serializes_message_and_success_only() {
        let json = serde_json::to_value(Mutation::ok("done", Some(7), 1)).unwrap();
        assert_eq!(json, serde_json::json!({"message": "done", "success": true}));
    }
}
