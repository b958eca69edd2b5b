//! SQL text generation, parameter binding and row conversion.

use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use crate::errors::AppError;
use crate::remote::{Filter, Query, Table};

pub(super) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Real,
    Flag,
}

fn column_kind(table: Table, column: &str) -> ColumnKind {
    match (table, column) {
        (Table::Jobs, "price") | (Table::Invoices, "amount") => ColumnKind::Real,
        (Table::Notifications, "read") => ColumnKind::Flag,
        _ => ColumnKind::Text,
    }
}

fn alias(table: Table) -> &'static str {
    match table {
        Table::Jobs => "j",
        Table::Notifications => "n",
        Table::Invoices => "i",
        Table::Profiles => "p",
    }
}

fn qualified(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(alias) => format!("{}.\"{}\"", alias, column),
        None => format!("\"{}\"", column),
    }
}

/// SELECT clause with joined display fields for `table`.
fn select_clause(table: Table) -> String {
    let a = alias(table);
    let mut columns: Vec<String> = table
        .columns()
        .iter()
        .map(|column| qualified(Some(a), column))
        .collect();
    let from = match table {
        Table::Jobs => {
            columns.push("adm.full_name AS admin_name".to_string());
            columns.push("drv.full_name AS driver_name".to_string());
            "jobs j \
             LEFT JOIN profiles adm ON adm.id = j.admin_id \
             LEFT JOIN profiles drv ON drv.id = j.driver_id"
        }
        Table::Invoices => {
            columns.push("job.title AS job_title".to_string());
            columns.push("drv.full_name AS driver_name".to_string());
            "invoices i \
             LEFT JOIN jobs job ON job.id = i.job_id \
             LEFT JOIN profiles drv ON drv.id = i.driver_id"
        }
        Table::Notifications => "notifications n",
        Table::Profiles => "profiles p",
    };
    format!("SELECT {} FROM {}", columns.join(", "), from)
}

/// Reject columns that are not writable base columns of `table`.
pub(super) fn check_columns<'a>(
    table: Table,
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<(), AppError> {
    for column in columns {
        if !table.columns().contains(&column) {
            return Err(AppError::Validation(format!(
                "Unknown column '{}' on {}",
                column, table
            )));
        }
    }
    Ok(())
}

/// Full SELECT statement and its parameters.
pub(super) fn select_statement(query: &Query) -> Result<(String, Vec<Value>), AppError> {
    for filter in &query.filters {
        check_columns(query.table, filter.columns())?;
    }
    if let Some(order) = &query.order {
        check_columns(query.table, [order.column])?;
    }

    let a = alias(query.table);
    let mut sql = select_clause(query.table);
    let mut binds = Vec::new();
    if !query.filters.is_empty() {
        sql.push_str(" WHERE ");
        push_group(&query.filters, " AND ", "1", Some(a), &mut sql, &mut binds);
    }
    if let Some(order) = &query.order {
        sql.push_str(&format!(
            " ORDER BY {} IS NULL, {} {}",
            qualified(Some(a), order.column),
            qualified(Some(a), order.column),
            if order.ascending { "ASC" } else { "DESC" }
        ));
    }
    Ok((sql, binds))
}

/// WHERE fragment for a guard on an unaliased UPDATE.
pub(super) fn guard_clause(guard: &[Filter], binds: &mut Vec<Value>) -> String {
    let mut sql = String::new();
    push_group(guard, " AND ", "1", None, &mut sql, binds);
    sql
}

fn push_group(
    parts: &[Filter],
    separator: &str,
    empty: &str,
    alias: Option<&str>,
    sql: &mut String,
    binds: &mut Vec<Value>,
) {
    match parts {
        [] => {
            sql.push_str(empty);
            return;
        }
        // A lone part needs no parentheses; nested groups bring their own.
        [only] => {
            push_filter(only, alias, sql, binds);
            return;
        }
        _ => {}
    }
    sql.push('(');
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            sql.push_str(separator);
        }
        push_filter(part, alias, sql, binds);
    }
    sql.push(')');
}

fn push_filter(filter: &Filter, alias: Option<&str>, sql: &mut String, binds: &mut Vec<Value>) {
    match filter {
        Filter::Eq(column, Value::Null) | Filter::IsNull(column) => {
            sql.push_str(&format!("{} IS NULL", qualified(alias, column)));
        }
        Filter::Eq(column, value) => {
            sql.push_str(&format!("{} = ?", qualified(alias, column)));
            binds.push(value.clone());
        }
        Filter::In(_, values) if values.is_empty() => sql.push('0'),
        Filter::In(column, values) => {
            let placeholders = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!("{} IN ({})", qualified(alias, column), placeholders));
            binds.extend(values.iter().cloned());
        }
        Filter::And(parts) => push_group(parts, " AND ", "1", alias, sql, binds),
        Filter::Or(parts) => push_group(parts, " OR ", "0", alias, sql, binds),
    }
}

/// Bind a JSON value. Nested objects and arrays are stored as JSON text.
pub(super) fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        nested => query.bind(nested.to_string()),
    }
}

/// Snake_case JSON object for a row produced by [`select_statement`].
pub(super) fn row_to_json(table: Table, row: &SqliteRow) -> Value {
    let mut map = Map::new();
    for column in table.columns().iter().chain(table.joined_columns()) {
        let value = match column_kind(table, column) {
            ColumnKind::Text => row
                .try_get::<Option<String>, _>(*column)
                .ok()
                .flatten()
                .map(Value::String),
            ColumnKind::Real => row
                .try_get::<Option<f64>, _>(*column)
                .ok()
                .flatten()
                .map(Value::from),
            ColumnKind::Flag => row
                .try_get::<Option<i64>, _>(*column)
                .ok()
                .flatten()
                .map(|v| Value::Bool(v != 0)),
        };
        map.insert(column.to_string(), value.unwrap_or(Value::Null));
    }
    Value::Object(map)
}

/// Drop joined display fields, leaving the base table row.
pub(super) fn base_row(table: Table, row: &Value) -> Value {
    let mut row = row.clone();
    if let Some(map) = row.as_object_mut() {
        for column in table.joined_columns() {
            map.remove(*column);
        }
    }
    row
}
