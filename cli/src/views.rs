use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use grocer_core::{Field, FoodRecord};

const BUILTIN_INDEX: &str = include_str!("../templates/index.html");
const KEY_PLACEHOLDER: &str = "{{ key }}";

/// Header order of the results table. Body cells follow the same list.
pub const COLUMNS: [&str; 9] = [
    "id",
    "food",
    "location",
    "price",
    "dt",
    "count",
    "unit",
    "price_per_unit",
    "actions",
];

/// Source of the index page.
#[derive(Debug, Clone)]
pub enum IndexTemplate {
    /// Compiled into the binary, or read from disk once at startup.
    Cached(String),
    /// Re-read from disk on every request.
    Reload(PathBuf),
}

impl Default for IndexTemplate {
    fn default() -> Self {
        Self::Cached(BUILTIN_INDEX.to_string())
    }
}

impl IndexTemplate {
    pub fn from_file(path: &Path, reload: bool) -> Result<Self> {
        let source = read_template(path)?;
        if reload {
            Ok(Self::Reload(path.to_path_buf()))
        } else {
            Ok(Self::Cached(source))
        }
    }

    /// Fill in the access key, URL-encoded. Templates place `{{ key }}` only
    /// inside URLs.
    pub fn render(&self, key: &str) -> Result<String> {
        let encoded = urlencoding::encode(key);
        match self {
            Self::Cached(source) => Ok(source.replace(KEY_PLACEHOLDER, &encoded)),
            Self::Reload(path) => Ok(read_template(path)?.replace(KEY_PLACEHOLDER, &encoded)),
        }
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read template: {}", path.display()))
}

/// Render search results as an editable table.
///
/// Each row carries an update form (all editable fields plus the hidden id)
/// and a delete form. The inputs sit in table cells and join the row's update
/// form through the `form` attribute.
pub fn results_table(records: &[FoodRecord], key: &str) -> String {
    let action = format!("/food?key={}", urlencoding::encode(key));
    let mut html = String::from("<table id=\"food_search\">\n  <tr>\n");
    for column in COLUMNS {
        let _ = writeln!(html, "    <th>{column}</th>");
    }
    html.push_str("  </tr>\n");

    if records.is_empty() {
        let _ = writeln!(
            html,
            "  <tr><td colspan=\"{}\">No matching records</td></tr>",
            COLUMNS.len()
        );
    }

    for record in records {
        html.push_str("  <tr>\n");
        for column in COLUMNS {
            let _ = writeln!(html, "    <td>{}</td>", cell(record, column, &action));
        }
        html.push_str("  </tr>\n");
    }

    html.push_str("</table>\n");
    html
}

fn cell(record: &FoodRecord, column: &str, action: &str) -> String {
    let form_id = format!("update-{}", record.id);
    match column {
        "id" => record.id.to_string(),
        "price_per_unit" => escape_html(record.price_per_unit.as_deref().unwrap_or("")),
        "actions" => format!(
            "<form id=\"{form_id}\" action=\"{action}\" method=\"post\" data-method=\"PUT\">\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <button>update</button></form>\
             <form action=\"{action}\" method=\"post\" data-method=\"DELETE\">\
             <input type=\"hidden\" name=\"id\" value=\"{id}\">\
             <button>delete</button></form>",
            id = record.id,
        ),
        other => match Field::from_column(other) {
            Some(field) => format!(
                "<input form=\"{form_id}\" name=\"{}\" value=\"{}\">",
                field.human_name(),
                escape_html(&field_value(record, field))
            ),
            None => String::new(),
        },
    }
}

fn field_value(record: &FoodRecord, field: Field) -> String {
    match field {
        Field::Food => record.food.clone(),
        Field::Location => record.location.clone(),
        Field::Price => record.price.to_string(),
        Field::Date => record.dt.clone(),
        Field::Count => record.count.map(|c| c.to_string()).unwrap_or_default(),
        Field::Unit => record.unit.clone().unwrap_or_default(),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, food: &str) -> FoodRecord {
        FoodRecord {
            id,
            food: food.to_string(),
            location: "store A".to_string(),
            price: 3.5,
            dt: "2024-01-15".to_string(),
            count: Some(1.0),
            unit: Some("gal".to_string()),
            deleted: false,
            price_per_unit: Some("$3.5/gal".to_string()),
        }
    }

    fn header_cells(html: &str) -> Vec<&str> {
        html.split("<th>")
            .skip(1)
            .map(|s| s.split("</th>").next().unwrap())
            .collect()
    }

    #[test]
    fn test_header_matches_columns() {
        let html = results_table(&[record(1, "milk")], "k");
        assert_eq!(header_cells(&html), COLUMNS.to_vec());
        assert!(!html.contains("<th>deleted</th>"));
    }

    #[test]
    fn test_one_row_per_record_with_matching_cell_count() {
        let html = results_table(&[record(1, "milk"), record(2, "eggs")], "k");
        let rows: Vec<&str> = html.split("<tr>").skip(2).collect();
        assert_eq!(rows.len(), 2);
        for row in rows {
            assert_eq!(row.matches("<td>").count(), COLUMNS.len());
        }
    }

    #[test]
    fn test_row_cells_in_header_order() {
        let html = results_table(&[record(7, "milk")], "k");
        let row = html.split("<tr>").nth(2).unwrap();
        let cells: Vec<&str> = row
            .split("<td>")
            .skip(1)
            .map(|s| s.split("</td>").next().unwrap())
            .collect();
        assert_eq!(cells[0], "7");
        assert!(cells[1].contains("name=\"food\" value=\"milk\""));
        assert!(cells[2].contains("name=\"location\" value=\"store A\""));
        assert!(cells[3].contains("name=\"price\" value=\"3.5\""));
        assert!(cells[4].contains("name=\"date\" value=\"2024-01-15\""));
        assert!(cells[5].contains("name=\"count\" value=\"1\""));
        assert!(cells[6].contains("name=\"unit\" value=\"gal\""));
        assert_eq!(cells[7], "$3.5/gal");
        assert!(cells[8].contains("data-method=\"PUT\""));
        assert!(cells[8].contains("data-method=\"DELETE\""));
    }

    #[test]
    fn test_forms_carry_id_and_key() {
        let html = results_table(&[record(42, "milk")], "a b&c");
        assert_eq!(html.matches("name=\"id\" value=\"42\"").count(), 2);
        assert!(html.contains("action=\"/food?key=a%20b%26c\""));
        assert!(html.contains("id=\"update-42\""));
        assert_eq!(html.matches("form=\"update-42\"").count(), 6);
    }

    #[test]
    fn test_values_are_escaped() {
        let mut r = record(1, "<script>alert(\"x\")</script>");
        r.location = "Tom & Jerry's".to_string();
        let html = results_table(&[r], "k");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&quot;x&quot;)&lt;/script&gt;"));
        assert!(html.contains("Tom &amp; Jerry&#39;s"));
    }

    #[test]
    fn test_missing_optional_values_render_empty() {
        let mut r = record(3, "bread");
        r.count = None;
        r.unit = None;
        r.price_per_unit = None;
        let html = results_table(&[r], "k");
        assert!(html.contains("name=\"count\" value=\"\""));
        assert!(html.contains("name=\"unit\" value=\"\""));
    }

    #[test]
    fn test_empty_results() {
        let html = results_table(&[], "k");
        assert_eq!(header_cells(&html).len(), COLUMNS.len());
        assert!(html.contains("No matching records"));
    }

    #[test]
    fn test_builtin_index_renders_key() {
        let page = IndexTemplate::default().render("abc123").unwrap();
        assert!(page.contains("/food?key=abc123"));
        assert!(!page.contains(KEY_PLACEHOLDER));
    }

    #[test]
    fn test_builtin_index_key_with_reserved_characters() {
        let page = IndexTemplate::default().render("p@ss word&x=1").unwrap();
        assert_eq!(
            page.matches("action=\"/food?key=p%40ss%20word%26x%3D1\"").count(),
            2
        );
        // Only ever embedded in URLs, never as a form value that gets encoded again
        assert!(!page.contains("name=\"key\""));
        assert!(!page.contains("p@ss word"));
    }

    #[test]
    fn test_cached_template_ignores_later_edits() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.html");
        std::fs::write(&path, "v1 {{ key }}").unwrap();

        let template = IndexTemplate::from_file(&path, false).unwrap();
        std::fs::write(&path, "v2 {{ key }}").unwrap();
        assert_eq!(template.render("k").unwrap(), "v1 k");
    }

    #[test]
    fn test_reload_template_reads_every_time() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.html");
        std::fs::write(&path, "v1 {{ key }}").unwrap();

        let template = IndexTemplate::from_file(&path, true).unwrap();
        assert_eq!(template.render("k").unwrap(), "v1 k");
        std::fs::write(&path, "v2 {{ key }}").unwrap();
        assert_eq!(template.render("k").unwrap(), "v2 k");
    }

    #[test]
    fn test_missing_template_file_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(IndexTemplate::from_file(&tmp.path().join("nope.html"), true).is_err());
    }
}
