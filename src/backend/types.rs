use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Row predicate understood by the table endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    /// Case-insensitive LIKE; `%` is the wildcard
    ILike(String, String),
    In(String, Vec<Value>),
    /// Matches when any of the inner predicates matches
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(column.to_string(), value.into())
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Lte(column.to_string(), value.into())
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(column.to_string(), value.into())
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(column.to_string(), value.into())
    }

    pub fn ilike(column: &str, pattern: impl Into<String>) -> Self {
        Filter::ILike(column.to_string(), pattern.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    /// Render as a PostgREST query parameter pair, e.g. `("price", "gte.2000000")`.
    pub fn to_query_pair(&self) -> (String, String) {
        match self {
            Filter::Or(inner) => {
                let parts: Vec<String> = inner.iter().map(Filter::to_logic_operand).collect();
                ("or".to_string(), format!("({})", parts.join(",")))
            }
            other => {
                let (column, op, value) = other.operands();
                (column.to_string(), format!("{}.{}", op, value))
            }
        }
    }

    /// Form used inside `or=(...)`: `column.op.value`, with values quoted.
    fn to_logic_operand(&self) -> String {
        match self {
            Filter::Or(inner) => {
                let parts: Vec<String> = inner.iter().map(Filter::to_logic_operand).collect();
                format!("or({})", parts.join(","))
            }
            Filter::In(..) => {
                let (column, op, value) = self.operands();
                format!("{}.{}.{}", column, op, value)
            }
            other => {
                let (column, op, value) = other.operands();
                format!("{}.{}.{}", column, op, quote(&value))
            }
        }
    }

    fn operands(&self) -> (&str, &'static str, String) {
        match self {
            Filter::Eq(c, v) => (c, "eq", render_value(v)),
            Filter::Lt(c, v) => (c, "lt", render_value(v)),
            Filter::Lte(c, v) => (c, "lte", render_value(v)),
            Filter::Gt(c, v) => (c, "gt", render_value(v)),
            Filter::Gte(c, v) => (c, "gte", render_value(v)),
            Filter::ILike(c, p) => (c, "ilike", p.clone()),
            Filter::In(c, vs) => {
                let items: Vec<String> = vs.iter().map(|v| quote(&render_value(v))).collect();
                (c, "in", format!("({})", items.join(",")))
            }
            Filter::Or(_) => ("or", "or", String::new()),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Double-quote a value when it contains characters reserved by the logic syntax.
fn quote(raw: &str) -> String {
    if raw.chars().any(|c| matches!(c, ',' | '(' | ')' | '"' | ':' | '\\' | ' ')) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: false,
        }
    }
}

/// Zero-based inclusive row range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
    pub from: u64,
    pub to: u64,
}

impl RowRange {
    /// Number of rows covered; 0 when `to` is before `from`.
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

/// A read against one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub range: Option<RowRange>,
    /// Ask for the exact number of matching rows
    pub exact_count: bool,
}

impl SelectRequest {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
            exact_count: false,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some(RowRange { from, to });
        self
    }

    pub fn exact_count(mut self) -> Self {
        self.exact_count = true;
        self
    }

    /// Query string pairs for the table endpoint (range and count travel as headers).
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), self.columns.clone())];
        pairs.extend(self.filters.iter().map(Filter::to_query_pair));
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect();
            pairs.push(("order".to_string(), order.join(",")));
        }
        pairs
    }
}

/// Rows of one page plus the total match count when it was requested
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectResponse {
    pub rows: Vec<Value>,
    pub count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_comparison_filters() {
        assert_eq!(
            Filter::gte("price", 2_000_000).to_query_pair(),
            ("price".to_string(), "gte.2000000".to_string())
        );
        assert_eq!(
            Filter::eq("id", "abc").to_query_pair(),
            ("id".to_string(), "eq.abc".to_string())
        );
        assert_eq!(
            Filter::is_in("id", [1, 2, 3]).to_query_pair(),
            ("id".to_string(), "in.(1,2,3)".to_string())
        );
    }

    #[test]
    fn renders_or_group_with_quoting() {
        let filter = Filter::Or(vec![
            Filter::ilike("title", "%Cầu Giấy%"),
            Filter::ilike("address", "%Cầu Giấy%"),
        ]);
        assert_eq!(
            filter.to_query_pair(),
            (
                "or".to_string(),
                "(title.ilike.\"%Cầu Giấy%\",address.ilike.\"%Cầu Giấy%\")".to_string()
            )
        );

        let plain = Filter::Or(vec![Filter::ilike("title", "%abc%")]);
        assert_eq!(plain.to_query_pair().1, "(title.ilike.%abc%)");
    }

    #[test]
    fn select_request_query_pairs() {
        let request = SelectRequest::new("rooms")
            .columns("id, title")
            .filter(Filter::lt("price", 2_000_000))
            .order(Order::desc("created_at"))
            .range(5, 9)
            .exact_count();

        assert_eq!(
            request.query_pairs(),
            vec![
                ("select".to_string(), "id, title".to_string()),
                ("price".to_string(), "lt.2000000".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
        assert_eq!(request.range.map(|r| r.len()), Some(5));
    }

    #[test]
    fn inverted_range_is_empty() {
        let single = RowRange { from: 3, to: 3 };
        assert_eq!(single.len(), 1);
        assert!(!single.is_empty());

        let inverted = RowRange { from: 4, to: 3 };
        assert!(inverted.is_empty());
        assert_eq!(inverted.len(), 0);
    }
}
