use tabled::{settings::Style, Table, Tabled};
use crate::repo::{ForwardRecord, ForwardStats, PromptTemplate, SavedQuery};
use crate::ui::output::timestamp;
use crate::ui::Icons;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Two-column metric/value table
#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

#[derive(Tabled)]
struct TemplateRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Uses")]
    uses: i64,
    #[tabled(rename = "Description")]
    description: String,
}

pub fn templates_table(templates: &[PromptTemplate]) -> String {
    let rows: Vec<TemplateRow> = templates
        .iter()
        .map(|t| TemplateRow {
            id: t.id,
            name: if t.is_favorite {
                format!("{} {}", Icons::STAR, t.name)
            } else {
                t.name.clone()
            },
            category: t.category.clone(),
            uses: t.usage_count,
            description: t.description.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct QueryRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Query")]
    query: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Uses")]
    uses: i64,
    #[tabled(rename = "Last used")]
    last_used: String,
}

pub fn queries_table(queries: &[SavedQuery]) -> String {
    let rows: Vec<QueryRow> = queries
        .iter()
        .map(|q| QueryRow {
            name: q.name.clone(),
            query: q.query_text.clone(),
            category: q.category.clone(),
            uses: q.use_count,
            last_used: q.last_used.map(timestamp).unwrap_or_else(|| "never".to_string()),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct ForwardRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Message")]
    object_id: String,
    #[tabled(rename = "Destination")]
    destination: String,
    #[tabled(rename = "Status")]
    status: String,
}

pub fn forwards_table(records: &[ForwardRecord]) -> String {
    let rows: Vec<ForwardRow> = records
        .iter()
        .map(|r| ForwardRow {
            id: r.id,
            when: timestamp(r.forward_time),
            object_id: r.object_id.clone(),
            destination: r.destination_path.clone(),
            status: r.status.to_string(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn forward_stats_table(stats: &ForwardStats, window_hours: i64) -> String {
    let mut builder = TableBuilder::new();
    builder.add_row("Total forwards", &stats.total_forwards.to_string());
    builder.add_row(&format!("Last {}h", window_hours), &stats.recent_forwards.to_string());
    builder.add_row("Succeeded", &stats.success_count.to_string());
    builder.add_row("Failed", &stats.failed_count.to_string());
    builder.add_row("Pending", &stats.pending_count.to_string());
    builder.add_row("Success rate", &format!("{:.1}%", stats.success_rate));
    for (template, count) in &stats.template_usage {
        builder.add_row(&format!("Template: {}", template), &count.to_string());
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_builder_renders_nothing() {
        assert!(TableBuilder::new().build().is_empty());
    }

    #[test]
    fn test_stats_table_contains_rows() {
        let table = stats_table(&[("Schema version", "5".to_string()), ("Tables", "7".to_string())]);
        assert!(table.contains("Metric"));
        assert!(table.contains("Schema version"));
        assert!(table.contains("7"));
    }

    #[test]
    fn test_forward_stats_table() {
        let mut stats = ForwardStats {
            total_forwards: 4,
            success_count: 3,
            failed_count: 1,
            success_rate: 75.0,
            ..Default::default()
        };
        stats.template_usage.insert("note".to_string(), 3);

        let table = forward_stats_table(&stats, 24);
        assert!(table.contains("75.0%"));
        assert!(table.contains("Last 24h"));
        assert!(table.contains("Template: note"));
    }
}
