//! MSSQL SQL dialect (Strategy pattern).
//!
//! Provides MSSQL-specific SQL syntax for identifier quoting, query building,
//! and parameter placeholders.

use crate::core::traits::Dialect;

/// Microsoft SQL Server dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        // MSSQL uses square brackets for identifier quoting
        // Handle names that contain closing brackets by doubling them
        format!("[{}]", name.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn count_query(&self, from: &str) -> String {
        // COUNT(*) is INT on SQL Server and overflows past 2^31 rows
        format!("SELECT CAST(COUNT(*) AS BIGINT) FROM {}", from)
    }

    fn paged_select(&self, fields: &[String], from: &str, order_by: &[String]) -> String {
        let order = if order_by.is_empty() {
            "(SELECT NULL)".to_string()
        } else {
            self.select_list(order_by)
        };
        format!(
            "SELECT {} FROM {} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            self.select_list(fields),
            from,
            order,
            self.placeholder(1),
            self.placeholder(2)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.quote_ident("users"), "[users]");
        assert_eq!(dialect.quote_ident("table]name"), "[table]]name]");
    }

    #[test]
    fn test_qualify_table() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.qualify("dbo.Orders"), "[dbo].[Orders]");
        assert_eq!(dialect.qualify("Orders"), "[Orders]");
    }

    #[test]
    fn test_paged_select() {
        let dialect = MssqlDialect::new();
        let sql = dialect.paged_select(
            &["id".to_string(), "o.name".to_string()],
            "[dbo].[Orders] o",
            &["id".to_string()],
        );
        assert_eq!(
            sql,
            "SELECT [id], [o].[name] FROM [dbo].[Orders] o ORDER BY [id] \
             OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY"
        );
    }

    #[test]
    fn test_paged_select_without_order() {
        let dialect = MssqlDialect::new();
        let sql = dialect.paged_select(&["id".to_string()], "[t]", &[]);
        assert!(sql.contains("ORDER BY (SELECT NULL)"));
    }

    #[test]
    fn test_insert_query() {
        let dialect = MssqlDialect::new();
        let sql = dialect.insert_query("dbo.Customers", &["Id".to_string(), "Name".to_string()]);
        assert_eq!(
            sql,
            "INSERT INTO [dbo].[Customers] ([Id], [Name]) VALUES (@P1, @P2)"
        );
    }

    #[test]
    fn test_count_query() {
        let dialect = MssqlDialect::new();
        assert_eq!(
            dialect.count_query("[dbo].[Orders]"),
            "SELECT CAST(COUNT(*) AS BIGINT) FROM [dbo].[Orders]"
        );
    }
}
