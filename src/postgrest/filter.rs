//! Row filters for table queries

/// Operator for filter expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to
    Eq,

    /// Not equal to
    Neq,

    /// Is (`null`, `true`, `false`)
    Is,

    /// In a list of values
    In,
}

impl FilterOperator {
    /// Convert the operator to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Neq => "neq",
            FilterOperator::Is => "is",
            FilterOperator::In => "in",
        }
    }
}

/// Quote a value for use inside `in.(...)` or `or=(...)` lists
fn quote_list_value(value: &str) -> String {
    if value.contains([',', '(', ')', '"', '\\', ' ']) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

/// Ordered list of `column=op.value` query parameters
#[derive(Debug, Clone, Default)]
pub struct Filters {
    params: Vec<(String, String)>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw filter
    pub fn push(&mut self, column: &str, operator: FilterOperator, value: &str) {
        self.params
            .push((column.to_string(), format!("{}.{}", operator.as_str(), value)));
    }

    pub fn equals(&mut self, column: &str, value: &str) {
        self.push(column, FilterOperator::Eq, value);
    }

    pub fn in_list<T: ToString>(&mut self, column: &str, values: &[T]) {
        let list: Vec<String> = values
            .iter()
            .map(|v| quote_list_value(&v.to_string()))
            .collect();
        self.push(column, FilterOperator::In, &format!("({})", list.join(",")));
    }

    pub fn is_null(&mut self, column: &str) {
        self.push(column, FilterOperator::Is, "null");
    }

    /// Match rows satisfying any of the given `(column, operator, value)`
    /// conditions
    pub fn or(&mut self, conditions: &[(&str, FilterOperator, &str)]) {
        let parts: Vec<String> = conditions
            .iter()
            .map(|(column, op, value)| {
                let value = if *op == FilterOperator::Is {
                    value.to_string()
                } else {
                    quote_list_value(value)
                };
                format!("{}.{}.{}", column, op.as_str(), value)
            })
            .collect();
        self.params
            .push(("or".to_string(), format!("({})", parts.join(","))));
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_simple_filters() {
        let mut filters = Filters::new();
        filters.equals("id", "42");
        filters.is_null("mechanic_id");
        assert_eq!(
            filters.params(),
            &[
                ("id".to_string(), "eq.42".to_string()),
                ("mechanic_id".to_string(), "is.null".to_string()),
            ]
        );
    }

    #[test]
    fn in_list_quotes_reserved_characters() {
        let mut filters = Filters::new();
        filters.in_list("status", &["accepted", "arrived"]);
        filters.in_list("car_type", &["Ford, Focus"]);
        assert_eq!(filters.params()[0].1, "in.(accepted,arrived)");
        assert_eq!(filters.params()[1].1, "in.(\"Ford, Focus\")");
    }

    #[test]
    fn or_group() {
        let mut filters = Filters::new();
        filters.or(&[
            ("mechanic_id", FilterOperator::Is, "null"),
            ("mechanic_id", FilterOperator::Eq, "m-1"),
        ]);
        assert_eq!(
            filters.params()[0],
            ("or".to_string(), "(mechanic_id.is.null,mechanic_id.eq.m-1)".to_string())
        );
    }
}
