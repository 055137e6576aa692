use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use grocer_core::FoodRecord;

pub(crate) fn print_records(records: &[FoodRecord]) {
    #[derive(Tabled)]
    struct RecordRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Food")]
        food: String,
        #[tabled(rename = "Location")]
        location: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Count")]
        count: String,
        #[tabled(rename = "Unit")]
        unit: String,
        #[tabled(rename = "Per unit")]
        per_unit: String,
    }

    let rows: Vec<RecordRow> = records
        .iter()
        .map(|r| RecordRow {
            id: r.id,
            food: truncate(&r.food, 30),
            location: truncate(&r.location, 20),
            price: format!("{:.2}", r.price),
            date: r.dt.clone(),
            count: r.count.map_or("-".into(), |c| c.to_string()),
            unit: r.unit.clone().unwrap_or_default(),
            per_unit: r.price_per_unit.clone().unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("milk", 10), "milk");
        assert_eq!(truncate("organic whole milk gallon", 10), "organic...");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("日清カップヌードル", 8), "日清カップ...");
    }

    #[test]
    fn test_json_error_escapes() {
        let out = json_error("bad \"price\"");
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["error"], "bad \"price\"");
    }
}
