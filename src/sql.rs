use sqlparser::ast::{
    self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::Ms;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertVehicle {
        id: Ulid,
        name: String,
        capacity_kg: f64,
        tyres: u32,
        returning: bool,
    },
    InsertBooking {
        id: Ulid,
        vehicle_id: Ulid,
        customer_id: String,
        from_pincode: String,
        to_pincode: String,
        start_time: Ms,
        returning: bool,
    },
    SelectVehicles {
        min_capacity_kg: Option<f64>,
    },
    SelectAvailability {
        capacity_required: f64,
        from_pincode: String,
        to_pincode: String,
        start_time: Ms,
    },
    SelectBookings {
        vehicle_id: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "vehicles" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("vehicles", 4, values.len()));
            }
            Ok(Command::InsertVehicle {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                capacity_kg: parse_f64(&values[2])?,
                tyres: parse_u32(&values[3])?,
                returning,
            })
        }
        "bookings" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("bookings", 6, values.len()));
            }
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                vehicle_id: parse_ulid(&values[1])?,
                customer_id: parse_string(&values[2])?,
                from_pincode: parse_string(&values[3])?,
                to_pincode: parse_string(&values[4])?,
                start_time: parse_i64(&values[5])?,
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "vehicles" => {
            let mut min_capacity_kg = None;
            if let Some(selection) = &select.selection {
                extract_vehicle_filters(selection, &mut min_capacity_kg)?;
            }
            Ok(Command::SelectVehicles { min_capacity_kg })
        }
        "availability" => {
            let (mut capacity, mut from, mut to, mut start) = (None, None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(selection, &mut capacity, &mut from, &mut to, &mut start)?;
            }
            Ok(Command::SelectAvailability {
                capacity_required: capacity.ok_or(SqlError::MissingFilter("capacity_required"))?,
                from_pincode: from.ok_or(SqlError::MissingFilter("from_pincode"))?,
                to_pincode: to.ok_or(SqlError::MissingFilter("to_pincode"))?,
                start_time: start.ok_or(SqlError::MissingFilter("start_time"))?,
            })
        }
        "bookings" => {
            let mut vehicle_id = None;
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut vehicle_id)?;
            }
            Ok(Command::SelectBookings { vehicle_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_vehicle_filters(
    expr: &Expr,
    min_capacity_kg: &mut Option<f64>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_vehicle_filters(left, min_capacity_kg)?;
                extract_vehicle_filters(right, min_capacity_kg)?;
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("capacity_kg") {
                    *min_capacity_kg = Some(parse_f64_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_availability_filters(
    expr: &Expr,
    capacity_required: &mut Option<f64>,
    from_pincode: &mut Option<String>,
    to_pincode: &mut Option<String>,
    start_time: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, capacity_required, from_pincode, to_pincode, start_time)?;
                extract_availability_filters(right, capacity_required, from_pincode, to_pincode, start_time)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("capacity_required") => *capacity_required = Some(parse_f64_expr(right)?),
                Some("from_pincode") => *from_pincode = Some(parse_string_expr(right)?),
                Some("to_pincode") => *to_pincode = Some(parse_string_expr(right)?),
                Some("start_time") => *start_time = Some(parse_i64_expr(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

fn extract_booking_filters(expr: &Expr, vehicle_id: &mut Option<Ulid>) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, vehicle_id)?;
                extract_booking_filters(right, vehicle_id)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("vehicle_id") {
                    *vehicle_id = Some(parse_ulid_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            Value::Number(s, _) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_f64_expr(expr: &Expr) -> Result<f64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad number: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_f64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_expr(expr)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    parse_f64_expr(expr)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
