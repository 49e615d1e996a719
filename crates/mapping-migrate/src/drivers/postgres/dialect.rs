//! PostgreSQL SQL dialect (Strategy pattern).

use crate::core::traits::Dialect;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        // PostgreSQL uses double quotes for identifier quoting
        // Handle names that contain double quotes by doubling them
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        // PostgreSQL uses $1, $2, etc. (1-based)
        format!("${}", index)
    }

    fn paged_select(&self, fields: &[String], from: &str, order_by: &[String]) -> String {
        let order = if order_by.is_empty() {
            (1..=fields.len())
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            self.select_list(order_by)
        };
        format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT {} OFFSET {}",
            self.select_list(fields),
            from,
            order,
            self.placeholder(2),
            self.placeholder(1)
        )
    }
}
