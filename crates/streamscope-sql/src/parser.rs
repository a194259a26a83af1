//! SQL parser.
//!
//! Lowers the supported SQL subset onto the [`Query`] AST:
//!
//! ```text
//! SELECT fieldlist FROM topic [WHERE predicate] [LIMIT n]
//! ```
//!
//! where `fieldlist` is `*`, a comma list of fields, or a single aggregate
//! (`COUNT`/`MIN`/`MAX`/`SUM`). Parsing is pure; nothing here touches the
//! network, so a rejected query costs no cluster traffic.

use chrono::DateTime;
use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, SelectItem,
    SetExpr, Statement, TableFactor, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::parser::ParserError;

use crate::error::{Result, SqlError};
use crate::types::{
    Aggregate, AggregateSpec, CompareOp, Field, Literal, Predicate, Projection, Query,
};

/// Parses one query string. Errors are [`SqlError::Syntax`] for malformed
/// text and [`SqlError::Semantic`] for well-formed text that is not a valid
/// query in this subset.
pub fn parse_query(sql: &str) -> Result<Query> {
    let dialect = GenericDialect {};
    let trimmed = sql.trim();

    let statements =
        Parser::parse_sql(&dialect, trimmed).map_err(|e| syntax_error(trimmed, &e))?;

    let statement = match statements.as_slice() {
        [statement] => statement,
        [] => {
            return Err(SqlError::Syntax {
                position: 0,
                expected: "a SELECT statement".to_string(),
            })
        }
        _ => {
            return Err(SqlError::Syntax {
                position: 0,
                expected: "a single SELECT statement".to_string(),
            })
        }
    };

    let query = match statement {
        Statement::Query(query) => query,
        _ => {
            return Err(SqlError::Syntax {
                position: 0,
                expected: "SELECT".to_string(),
            })
        }
    };

    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => {
            return Err(SqlError::Syntax {
                position: 0,
                expected: "a plain SELECT".to_string(),
            })
        }
    };

    if !query.order_by.is_empty() {
        return Err(semantic("ORDER BY is not supported; results are ordered by partition then offset"));
    }
    if query.offset.is_some() {
        return Err(semantic("OFFSET is not supported"));
    }
    if select.distinct.is_some() {
        return Err(semantic("DISTINCT is not supported"));
    }
    if select.having.is_some() {
        return Err(semantic("HAVING is not supported"));
    }
    match &select.group_by {
        GroupByExpr::Expressions(exprs) if exprs.is_empty() => {}
        _ => return Err(semantic("GROUP BY is not supported")),
    }

    let topic = parse_from_clause(&select.from)?;
    let projection = parse_projection(&select.projection)?;

    let predicate = match &select.selection {
        Some(expr) => Some(lower_predicate(expr)?),
        None => None,
    };

    let limit = match &query.limit {
        Some(expr) => Some(parse_limit(expr)?),
        None => None,
    };

    let start_timestamp = predicate.as_ref().and_then(hoist_start_timestamp);

    Ok(Query {
        topic,
        projection,
        predicate,
        limit,
        start_timestamp,
    })
}

fn semantic(reason: impl Into<String>) -> SqlError {
    SqlError::Semantic {
        reason: reason.into(),
    }
}

/// Shapes a sqlparser error into `Syntax { position, expected }`. The byte
/// offset is recovered from the "Line: N, Column: M" suffix when present,
/// otherwise 0.
fn syntax_error(sql: &str, err: &ParserError) -> SqlError {
    let message = err.to_string();
    let message = message
        .strip_prefix("sql parser error: ")
        .or_else(|| message.strip_prefix("sql tokenizer error: "))
        .unwrap_or(&message)
        .to_string();

    let position = location_to_offset(sql, &message).unwrap_or(0);

    let expected = match message.strip_prefix("Expected ") {
        Some(rest) => rest
            .split(", found")
            .next()
            .unwrap_or(rest)
            .trim()
            .to_string(),
        None => message,
    };

    SqlError::Syntax { position, expected }
}

fn location_to_offset(sql: &str, message: &str) -> Option<usize> {
    let after_line = message.split("Line: ").nth(1)?;
    let line: usize = after_line
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;
    let after_column = message.split("Column: ").nth(1)?;
    let column: usize = after_column
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()?;

    let mut offset = 0;
    for (index, text) in sql.split('\n').enumerate() {
        if index + 1 == line {
            return Some(offset + column.saturating_sub(1).min(text.len()));
        }
        offset += text.len() + 1;
    }
    None
}

fn parse_from_clause(from: &[sqlparser::ast::TableWithJoins]) -> Result<String> {
    let table = match from {
        [table] => table,
        [] => return Err(semantic("FROM clause is required")),
        _ => return Err(semantic("queries read exactly one topic")),
    };
    if !table.joins.is_empty() {
        return Err(semantic("joins are not supported"));
    }
    match &table.relation {
        TableFactor::Table { name, .. } => Ok(name
            .0
            .iter()
            .map(|ident| ident.value.as_str())
            .collect::<Vec<_>>()
            .join(".")),
        _ => Err(semantic("FROM must name a topic")),
    }
}

fn parse_projection(items: &[SelectItem]) -> Result<Projection> {
    let mut fields = Vec::new();
    let mut aggregates = Vec::new();
    let mut wildcard = false;

    for item in items {
        match item {
            SelectItem::Wildcard(_) => wildcard = true,
            SelectItem::UnnamedExpr(expr) => match expr {
                Expr::Function(function) => aggregates.push(parse_aggregate(function)?),
                _ => fields.push(field_from_expr(expr)?),
            },
            SelectItem::ExprWithAlias { .. } => {
                return Err(semantic("column aliases are not supported"))
            }
            SelectItem::QualifiedWildcard(..) => {
                return Err(semantic("qualified wildcards are not supported"))
            }
        }
    }

    if wildcard {
        if !fields.is_empty() || !aggregates.is_empty() {
            return Err(semantic("'*' cannot be combined with other columns"));
        }
        return Ok(Projection::All);
    }

    match (aggregates.len(), fields.len()) {
        (0, 0) => Err(semantic("projection list is empty")),
        (0, _) => Ok(Projection::Fields(fields)),
        (1, 0) => Ok(Projection::Aggregate(aggregates.remove(0))),
        // No implicit GROUP BY: an aggregating query projects only the
        // aggregate.
        _ => Err(semantic(
            "an aggregate must be the only projected column (no implicit GROUP BY)",
        )),
    }
}

fn parse_aggregate(function: &Function) -> Result<AggregateSpec> {
    let name = function.name.to_string().to_ascii_uppercase();
    let aggregate = match name.as_str() {
        "COUNT" => Aggregate::Count,
        "MIN" => Aggregate::Min,
        "MAX" => Aggregate::Max,
        "SUM" => Aggregate::Sum,
        _ => return Err(semantic(format!("unknown function '{name}'"))),
    };
    if function.distinct {
        return Err(semantic("DISTINCT aggregates are not supported"));
    }

    let arg = match function.args.as_slice() {
        [arg] => arg,
        _ => {
            return Err(semantic(format!(
                "{name} takes exactly one argument"
            )))
        }
    };

    let field = match arg {
        FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => {
            if aggregate != Aggregate::Count {
                return Err(semantic(format!("{name}(*) is not meaningful; name a field")));
            }
            None
        }
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(field_from_expr(expr)?),
        _ => return Err(semantic(format!("unsupported argument to {name}"))),
    };

    Ok(AggregateSpec {
        function: aggregate,
        field,
    })
}

fn field_from_expr(expr: &Expr) -> Result<Field> {
    match expr {
        Expr::Identifier(ident) => Ok(Field::parse(&ident.value)),
        Expr::CompoundIdentifier(parts) => {
            let path = parts
                .iter()
                .map(|p| p.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            Ok(Field::ValuePath(path))
        }
        _ => Err(semantic(format!("expected a field name, got {expr}"))),
    }
}

fn lower_predicate(expr: &Expr) -> Result<Predicate> {
    match expr {
        Expr::Nested(inner) => lower_predicate(inner),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(Predicate::And(
                Box::new(lower_predicate(left)?),
                Box::new(lower_predicate(right)?),
            )),
            BinaryOperator::Or => Ok(Predicate::Or(
                Box::new(lower_predicate(left)?),
                Box::new(lower_predicate(right)?),
            )),
            _ => lower_comparison(left, op, right),
        },
        _ => Err(semantic(format!("unsupported predicate: {expr}"))),
    }
}

fn lower_comparison(left: &Expr, op: &BinaryOperator, right: &Expr) -> Result<Predicate> {
    let op = match op {
        BinaryOperator::Eq => CompareOp::Eq,
        BinaryOperator::NotEq => CompareOp::NotEq,
        BinaryOperator::Gt => CompareOp::Gt,
        BinaryOperator::Lt => CompareOp::Lt,
        BinaryOperator::GtEq => CompareOp::GtEq,
        BinaryOperator::LtEq => CompareOp::LtEq,
        other => return Err(semantic(format!("unsupported operator '{other}'"))),
    };

    let field = field_from_expr(left)?;
    let literal = literal_from_expr(right)?;
    let literal = check_types(&field, literal)?;

    Ok(Predicate::Compare { field, op, literal })
}

fn literal_from_expr(expr: &Expr) -> Result<Literal> {
    match expr {
        Expr::Value(SqlValue::Number(text, _)) => {
            if let Ok(n) = text.parse::<i64>() {
                Ok(Literal::Int(n))
            } else {
                text.parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| semantic(format!("invalid number '{text}'")))
            }
        }
        Expr::Value(SqlValue::SingleQuotedString(s))
        | Expr::Value(SqlValue::DoubleQuotedString(s)) => Ok(Literal::Str(s.clone())),
        Expr::UnaryOp {
            op: sqlparser::ast::UnaryOperator::Minus,
            expr,
        } => match literal_from_expr(expr)? {
            Literal::Int(n) => Ok(Literal::Int(-n)),
            Literal::Float(f) => Ok(Literal::Float(-f)),
            Literal::Str(_) => Err(semantic("cannot negate a string literal")),
        },
        _ => Err(semantic(format!("expected a literal, got {expr}"))),
    }
}

/// Parse-time type check between a field and its literal. String literals
/// against the timestamp field are lowered to epoch milliseconds here, so
/// evaluation only ever compares numbers to numbers.
fn check_types(field: &Field, literal: Literal) -> Result<Literal> {
    match (field, literal) {
        (Field::Timestamp, Literal::Str(text)) => match DateTime::parse_from_rfc3339(&text) {
            Ok(ts) => Ok(Literal::Int(ts.timestamp_millis())),
            Err(_) => Err(semantic(format!(
                "timestamp literal '{text}' is not ISO-8601"
            ))),
        },
        (Field::Timestamp | Field::Partition | Field::Offset, Literal::Str(text)) => Err(
            semantic(format!("field '{field}' is numeric, got string '{text}'")),
        ),
        (Field::Partition | Field::Offset, Literal::Float(f)) => Err(semantic(format!(
            "field '{field}' is an integer, got {f}"
        ))),
        (Field::Key, Literal::Int(_) | Literal::Float(_)) => {
            Err(semantic("field 'key' is a string; use a quoted literal"))
        }
        (_, literal) => Ok(literal),
    }
}

fn parse_limit(expr: &Expr) -> Result<usize> {
    match literal_from_expr(expr)? {
        Literal::Int(n) if n > 0 => Ok(n as usize),
        Literal::Int(n) => Err(semantic(format!("LIMIT must be positive, got {n}"))),
        _ => Err(semantic("LIMIT must be an integer")),
    }
}

/// Lower time bound implied by the predicate: the tightest AND-connected
/// `timestamp >` / `timestamp >=` term. An OR anywhere at the top level
/// disables hoisting because the bound no longer covers every branch.
fn hoist_start_timestamp(predicate: &Predicate) -> Option<i64> {
    match predicate {
        Predicate::Compare {
            field: Field::Timestamp,
            op: CompareOp::GtEq,
            literal: Literal::Int(ms),
        } => Some(*ms),
        Predicate::Compare {
            field: Field::Timestamp,
            op: CompareOp::Gt,
            literal: Literal::Int(ms),
        } => Some(ms.saturating_add(1)),
        Predicate::And(a, b) => match (hoist_start_timestamp(a), hoist_start_timestamp(b)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (bound, None) | (None, bound) => bound,
        },
        _ => None,
    }
}
