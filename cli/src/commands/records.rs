use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::process;

use grocer_core::{Database, Field};

use super::helpers::{json_error, print_records};

pub(crate) fn cmd_search(db: &Database, terms: &[String], json: bool) -> Result<()> {
    let records = db.search(terms)?;

    if records.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No matching records");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_records(&records);
    }
    Ok(())
}

pub(crate) struct NewPurchase {
    pub food: String,
    pub location: String,
    pub price: String,
    pub date: Option<String>,
    pub count: Option<String>,
    pub unit: Option<String>,
}

impl NewPurchase {
    fn into_fields(self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |field: Field, value: Option<String>| {
            if let Some(v) = value {
                fields.insert(field.human_name().to_string(), v);
            }
        };
        put(Field::Food, Some(self.food));
        put(Field::Location, Some(self.location));
        put(Field::Price, Some(self.price));
        put(Field::Date, self.date);
        put(Field::Count, self.count);
        put(Field::Unit, self.unit);
        fields
    }
}

pub(crate) fn cmd_add(db: &Database, purchase: NewPurchase, json: bool) -> Result<()> {
    let mutation = db.create(&purchase.into_fields())?;

    if !mutation.success {
        if json {
            println!("{}", json_error(&mutation.message));
            process::exit(1);
        }
        bail!("{}", mutation.message);
    }

    let record = match mutation.id {
        Some(id) => db.get(id)?,
        None => None,
    };

    if json {
        match record {
            Some(r) => println!("{}", serde_json::to_string_pretty(&r)?),
            None => println!("{}", serde_json::to_string_pretty(&mutation)?),
        }
    } else if let Some(r) = record {
        let per_unit = r
            .price_per_unit
            .as_deref()
            .map(|p| format!(", {p}"))
            .unwrap_or_default();
        println!(
            "Added {} at {} for {:.2} on {} (id: {}{per_unit})",
            r.food, r.location, r.price, r.dt, r.id
        );
    } else {
        println!("{}", mutation.message);
    }
    Ok(())
}

pub(crate) fn cmd_delete(db: &Database, id: i64, json: bool) -> Result<()> {
    let Some(record) = db.get(id)? else {
        if json {
            println!("{}", json_error(&format!("Record {id} not found")));
        } else {
            eprintln!("Record {id} not found");
        }
        process::exit(2);
    };

    db.soft_delete(id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else if record.deleted {
        println!("Record {id} was already deleted");
    } else {
        println!("Deleted {} (id: {id})", record.food);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_purchase_fields_skip_absent_options() {
        let fields = NewPurchase {
            food: "milk".into(),
            location: "store A".into(),
            price: "3.50".into(),
            date: None,
            count: Some("1".into()),
            unit: None,
        }
        .into_fields();

        assert_eq!(fields.len(), 4);
        assert_eq!(fields["food"], "milk");
        assert_eq!(fields["count"], "1");
        assert!(!fields.contains_key("date"));
        assert!(!fields.contains_key("unit"));
    }

    #[test]
    fn test_new_purchase_creates_record() {
        let db = Database::open_in_memory().unwrap();
        let purchase = NewPurchase {
            food: "eggs".into(),
            location: "farm stand".into(),
            price: "6".into(),
            date: Some("2024-03-01".into()),
            count: Some("12".into()),
            unit: Some("egg".into()),
        };
        let mutation = db.create(&purchase.into_fields()).unwrap();
        assert!(mutation.success);

        let record = db.get(mutation.id.unwrap()).unwrap().unwrap();
        assert_eq!(record.dt, "2024-03-01");
        assert_eq!(record.price_per_unit.as_deref(), Some("$0.5/egg"));
    }
}
