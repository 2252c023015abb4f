use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Collection, Role};
use crate::schema::FieldKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal(&'static str, Value),
    LessThan(&'static str, Value),
    Contains(&'static str, Value),
    NotContains(&'static str, Value),
}

impl Filter {
    fn field(&self) -> &'static str {
        match self {
            Self::Equal(f, _) | Self::LessThan(f, _) | Self::Contains(f, _) | Self::NotContains(f, _) => f,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            Self::Equal(..) => "equal",
            Self::LessThan(..) => "less_than",
            Self::Contains(..) => "contains",
            Self::NotContains(..) => "not_contains",
        }
    }

    fn required_kind(&self) -> FieldKind {
        match self {
            Self::Equal(..) | Self::LessThan(..) => FieldKind::Scalar,
            Self::Contains(..) | Self::NotContains(..) => FieldKind::Array,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Row query over declared fields: filters, one ordering, limit/offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<(&'static str, Order)>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Equal(field, value.into()));
        self
    }

    pub fn less_than(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::LessThan(field, value.into()));
        self
    }

    pub fn contains(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Contains(field, value.into()));
        self
    }

    pub fn not_contains(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::NotContains(field, value.into()));
        self
    }

    pub fn order_asc(mut self, field: &'static str) -> Self {
        self.order = Some((field, Order::Asc));
        self
    }

    pub fn order_desc(mut self, field: &'static str) -> Self {
        self.order = Some((field, Order::Desc));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Render to SQL over the `rows` table, restricted to rows `actor` may read.
    /// Field names come from the declared schema only, so they are safe to
    /// splice into `json_extract` paths; values are always bound.
    pub(crate) fn to_sql(&self, collection: Collection, actor: Uuid) -> Result<(String, Vec<SqlValue>), StoreError> {
        let mut sql = String::from(
            "SELECT id, data, read_perms, update_perms, delete_perms FROM rows \
             WHERE collection = ?1 \
             AND EXISTS (SELECT 1 FROM json_each(rows.read_perms) AS p WHERE p.value IN ('any', ?2))",
        );
        let mut params = vec![
            SqlValue::Text(collection.name().to_string()),
            SqlValue::Text(Role::User(actor).tag()),
        ];

        for filter in &self.filters {
            let spec = collection.field(filter.field())?;
            if spec.kind != filter.required_kind() {
                return Err(StoreError::InvalidQuery {
                    collection: collection.name(),
                    field: spec.name.to_string(),
                    op: filter.op(),
                });
            }

            params.push(sql_value(match filter {
                Filter::Equal(_, v) | Filter::LessThan(_, v) | Filter::Contains(_, v) | Filter::NotContains(_, v) => v,
            }));
            let n = params.len();
            let clause = match filter {
                Filter::Equal(..) => format!(" AND json_extract(rows.data, '$.{}') = ?{}", spec.name, n),
                Filter::LessThan(..) => format!(" AND json_extract(rows.data, '$.{}') < ?{}", spec.name, n),
                Filter::Contains(..) => format!(
                    " AND EXISTS (SELECT 1 FROM json_each(rows.data, '$.{}') AS e WHERE e.value = ?{})",
                    spec.name, n
                ),
                Filter::NotContains(..) => format!(
                    " AND NOT EXISTS (SELECT 1 FROM json_each(rows.data, '$.{}') AS e WHERE e.value = ?{})",
                    spec.name, n
                ),
            };
            sql.push_str(&clause);
        }

        match self.order {
            Some((field, order)) => {
                let spec = collection.field(field)?;
                if spec.kind != FieldKind::Scalar {
                    return Err(StoreError::InvalidQuery {
                        collection: collection.name(),
                        field: field.to_string(),
                        op: "order",
                    });
                }
                let dir = match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                };
                sql.push_str(&format!(" ORDER BY json_extract(rows.data, '$.{}') {}, rows.id", spec.name, dir));
            }
            None => sql.push_str(" ORDER BY rows.rowid"),
        }

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        if self.limit.is_some() || self.offset.is_some() {
            params.push(SqlValue::Integer(self.limit.map_or(-1, i64::from)));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
            params.push(SqlValue::Integer(i64::from(self.offset.unwrap_or(0))));
            sql.push_str(&format!(" OFFSET ?{}", params.len()));
        }

        Ok((sql, params))
    }
}

/// JSON value to the SQL value `json_extract` / `json_each` would yield for it.
fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filters_in_order() {
        let actor = Uuid::new_v4();
        let (sql, params) = Query::new()
            .equal("conversationId", "c1")
            .not_contains("readBy", actor.to_string())
            .order_desc("createdAt")
            .limit(10)
            .offset(20)
            .to_sql(Collection::Messages, actor)
            .unwrap();

        assert!(sql.contains("json_extract(rows.data, '$.conversationId') = ?3"));
        assert!(sql.contains("NOT EXISTS (SELECT 1 FROM json_each(rows.data, '$.readBy') AS e WHERE e.value = ?4)"));
        assert!(sql.contains("ORDER BY json_extract(rows.data, '$.createdAt') DESC"));
        assert!(sql.ends_with("LIMIT ?5 OFFSET ?6"));
        assert_eq!(params.len(), 6);
        assert_eq!(params[4], SqlValue::Integer(10));
    }

    #[test]
    fn contains_on_scalar_is_invalid() {
        let err = Query::new()
            .contains("senderId", "x")
            .to_sql(Collection::Messages, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuery { op: "contains", .. }));
    }

    #[test]
    fn undeclared_order_field_is_refused() {
        let err = Query::new()
            .order_asc("content")
            .to_sql(Collection::Messages, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, StoreError::UndeclaredField { .. }));
    }

    #[test]
    fn booleans_bind_as_integers() {
        assert_eq!(sql_value(&Value::Bool(true)), SqlValue::Integer(1));
        assert_eq!(sql_value(&Value::from(7)), SqlValue::Integer(7));
    }
}
