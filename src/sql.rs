use chrono::{DateTime, NaiveDate, NaiveTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::DEFAULT_REVIEWS_PAGE;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        full_name: String,
        email: String,
    },
    InsertExpert {
        id: Ulid,
        user_id: Ulid,
        full_name: String,
        specialization: String,
        bio: Option<String>,
    },
    /// `UPDATE experts SET ... WHERE id = ...`; only the named fields change.
    UpdateExpert {
        id: Ulid,
        update: ExpertProfileUpdate,
    },
    SelectExpert {
        id: Ulid,
    },
    InsertConsultationType {
        id: Ulid,
        expert_id: Ulid,
        duration_minutes: u32,
        price: u64,
        description: Option<String>,
    },
    InsertAvailability {
        id: Ulid,
        expert_id: Ulid,
        day_of_week: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    /// Windows are deactivated, never removed.
    DeactivateAvailability {
        id: Ulid,
    },
    InsertBooking {
        client_id: Ulid,
        expert_id: Ulid,
        consultation_type_id: Ulid,
        scheduled_at: Ms,
        notes: Option<String>,
    },
    /// A status change, written as a row in `booking_transitions`.
    InsertTransition {
        booking_id: Ulid,
        status: BookingStatus,
        meeting_link: Option<String>,
    },
    /// `DELETE FROM bookings` cancels; bookings are never removed.
    CancelBooking {
        id: Ulid,
    },
    SelectSlots {
        expert_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    },
    SelectBookings {
        user_id: Ulid,
        role: Role,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectConsultationTypes {
        expert_id: Ulid,
    },
    InsertReview {
        booking_id: Ulid,
        client_id: Ulid,
        rating: u8,
        comment: Option<String>,
    },
    SelectReviews {
        expert_id: Ulid,
        limit: usize,
    },
}

/// Parse a single statement; anything after the first is ignored.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    let first = stmts.first().ok_or(SqlError::Empty)?;
    parse_statement(first)
}

/// Parse every `;`-separated statement, as sent in one simple query.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    let stmts = parse_statements(sql)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Column order assumed when an INSERT names no columns.
fn default_columns(table: &str) -> Option<&'static [&'static str]> {
    let columns: &'static [&'static str] = match table {
        "users" => &["id", "full_name", "email"],
        "experts" => &["id", "user_id", "full_name", "specialization", "bio"],
        "consultation_types" => &["id", "expert_id", "duration", "price", "description"],
        "availability" => &["id", "expert_id", "day_of_week", "start_time", "end_time"],
        "bookings" => &["client_id", "expert_id", "consultation_type_id", "scheduled_at", "notes"],
        "booking_transitions" => &["booking_id", "status", "meeting_link"],
        "reviews" => &["booking_id", "client_id", "rating", "comment"],
        _ => return None,
    };
    Some(columns)
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = default_columns(&table).ok_or_else(|| SqlError::UnknownTable(table.clone()))?;
    let values = extract_insert_values(insert)?;

    let names: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() > names.len() {
        return Err(SqlError::WrongArity("VALUES", names.len(), values.len()));
    }
    let row = Row {
        table: table.clone(),
        cells: names.into_iter().zip(values.iter()).collect(),
    };

    match table.as_str() {
        "users" => Ok(Command::InsertUser {
            id: parse_ulid_expr(row.required("id")?)?,
            full_name: parse_string(row.required("full_name")?)?,
            email: parse_string(row.required("email")?)?,
        }),
        "experts" => Ok(Command::InsertExpert {
            id: parse_ulid_expr(row.required("id")?)?,
            user_id: parse_ulid_expr(row.required("user_id")?)?,
            full_name: parse_string(row.required("full_name")?)?,
            specialization: parse_string(row.required("specialization")?)?,
            bio: row.optional("bio").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "consultation_types" => Ok(Command::InsertConsultationType {
            id: parse_ulid_expr(row.required("id")?)?,
            expert_id: parse_ulid_expr(row.required("expert_id")?)?,
            duration_minutes: parse_u32(row.required("duration")?)?,
            price: parse_u64(row.required("price")?)?,
            description: row.optional("description").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "availability" => Ok(Command::InsertAvailability {
            id: parse_ulid_expr(row.required("id")?)?,
            expert_id: parse_ulid_expr(row.required("expert_id")?)?,
            day_of_week: parse_u8(row.required("day_of_week")?)?,
            start_time: parse_time(row.required("start_time")?)?,
            end_time: parse_time(row.required("end_time")?)?,
        }),
        "bookings" => Ok(Command::InsertBooking {
            client_id: parse_ulid_expr(row.required("client_id")?)?,
            expert_id: parse_ulid_expr(row.required("expert_id")?)?,
            consultation_type_id: parse_ulid_expr(row.required("consultation_type_id")?)?,
            scheduled_at: parse_timestamp(row.required("scheduled_at")?)?,
            notes: row.optional("notes").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "booking_transitions" => Ok(Command::InsertTransition {
            booking_id: parse_ulid_expr(row.required("booking_id")?)?,
            status: parse_string(row.required("status")?)?
                .parse()
                .map_err(SqlError::Parse)?,
            meeting_link: row.optional("meeting_link").map(parse_string_or_null).transpose()?.flatten(),
        }),
        "reviews" => Ok(Command::InsertReview {
            booking_id: parse_ulid_expr(row.required("booking_id")?)?,
            client_id: parse_ulid_expr(row.required("client_id")?)?,
            rating: parse_u8(row.required("rating")?)?,
            comment: row.optional("comment").map(parse_string_or_null).transpose()?.flatten(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: String,
    cells: Vec<(String, &'a Expr)>,
}

impl<'a> Row<'a> {
    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.optional(column)
            .ok_or_else(|| SqlError::MissingColumn(self.table.clone(), column))
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "availability" => Ok(Command::DeactivateAvailability { id }),
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Only expert profiles are edited in place. `bio = NULL` clears the bio.
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "experts" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut update = ExpertProfileUpdate::default();
    for assignment in assignments {
        let column = match &assignment.target {
            ast::AssignmentTarget::ColumnName(column) => object_name_last(column),
            ast::AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported(format!("assignment to {}", assignment.target)))?;
        match column.as_str() {
            "full_name" => update.full_name = Some(parse_string(&assignment.value)?),
            "specialization" => update.specialization = Some(parse_string(&assignment.value)?),
            "bio" => update.bio = Some(parse_string_or_null(&assignment.value)?.unwrap_or_default()),
            other => return Err(SqlError::Unsupported(format!("cannot update experts.{other}"))),
        }
    }
    Ok(Command::UpdateExpert { id, update })
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters);
    }
    let filter = |column: &str| {
        filters
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| *expr)
    };

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            expert_id: parse_ulid_expr(filter("expert_id").ok_or(SqlError::MissingFilter("expert_id"))?)?,
            date: parse_date(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
            duration_minutes: parse_u32(filter("duration").ok_or(SqlError::MissingFilter("duration"))?)?,
        }),
        "bookings" => {
            if let Some(id) = filter("id") {
                return Ok(Command::SelectBooking {
                    id: parse_ulid_expr(id)?,
                });
            }
            let user_id = parse_ulid_expr(filter("user_id").ok_or(SqlError::MissingFilter("user_id"))?)?;
            let role = match filter("role") {
                Some(expr) => parse_string(expr)?.parse().map_err(SqlError::Parse)?,
                None => Role::Client,
            };
            Ok(Command::SelectBookings { user_id, role })
        }
        "consultation_types" => Ok(Command::SelectConsultationTypes {
            expert_id: parse_ulid_expr(filter("expert_id").ok_or(SqlError::MissingFilter("expert_id"))?)?,
        }),
        "experts" => Ok(Command::SelectExpert {
            id: parse_ulid_expr(filter("id").ok_or(SqlError::MissingFilter("id"))?)?,
        }),
        "reviews" => Ok(Command::SelectReviews {
            expert_id: parse_ulid_expr(filter("expert_id").ok_or(SqlError::MissingFilter("expert_id"))?)?,
            limit: query_limit(query)?.unwrap_or(DEFAULT_REVIEWS_PAGE),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn query_limit(query: &ast::Query) -> Result<Option<usize>, SqlError> {
    let limit = match &query.limit_clause {
        None => return Ok(None),
        Some(ast::LimitClause::LimitOffset { limit, .. }) => limit.as_ref(),
        Some(ast::LimitClause::OffsetCommaLimit { limit, .. }) => Some(limit),
    };
    limit
        .map(|expr| {
            let v = parse_i64_expr(expr)?;
            usize::try_from(v).map_err(|_| SqlError::Parse(format!("LIMIT {v} must not be negative")))
        })
        .transpose()
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out);
            collect_eq_filters(right, out);
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if let Some(col) = expr_column_name(left) {
                out.push((col, &**right));
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => {}
    }
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<&[Expr], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row),
            rows => Err(SqlError::Unsupported(format!("{} VALUES rows, expected 1", rows.len()))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
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

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_u64(expr: &Expr) -> Result<u64, SqlError> {
    let v = parse_i64_expr(expr)?;
    u64::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

/// Unix milliseconds, either as a number or an RFC 3339 string.
fn parse_timestamp(expr: &Expr) -> Result<Ms, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr)
        && s.parse::<i64>().is_err()
    {
        return DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp_millis())
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s}: {e}")));
    }
    parse_i64_expr(expr)
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_string(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time of day {s}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(String, &'static str),
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
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing column {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";
    const C: &str = "01BX5ZZKBKACTAV9WEVGEMMVS0";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn insert_user_with_columns() {
        let cmd = parse_sql(&format!(
            "INSERT INTO users (id, full_name, email) VALUES ('{A}', 'Ada', 'ada@example.com')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser {
                id: ulid(A),
                full_name: "Ada".into(),
                email: "ada@example.com".into(),
            }
        );
    }

    #[test]
    fn insert_columns_in_any_order() {
        let cmd = parse_sql(&format!(
            "INSERT INTO experts (user_id, specialization, id, full_name) VALUES ('{B}', 'tarot', '{A}', 'Vega')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertExpert {
                id: ulid(A),
                user_id: ulid(B),
                full_name: "Vega".into(),
                specialization: "tarot".into(),
                bio: None,
            }
        );
    }

    #[test]
    fn insert_expert_positional_with_bio() {
        let cmd = parse_sql(&format!(
            "INSERT INTO experts VALUES ('{A}', '{B}', 'Vega', 'tarot', 'Reads cards since 1999')"
        ))
        .unwrap();
        assert!(matches!(cmd, Command::InsertExpert { bio: Some(ref b), .. } if b == "Reads cards since 1999"));
    }

    #[test]
    fn update_expert_names_only_what_changes() {
        let cmd = parse_sql(&format!(
            "UPDATE experts SET specialization = 'family therapy', bio = NULL WHERE id = '{A}'"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::UpdateExpert {
                id: ulid(A),
                update: ExpertProfileUpdate {
                    full_name: None,
                    specialization: Some("family therapy".into()),
                    bio: Some(String::new()),
                },
            }
        );
    }

    #[test]
    fn update_rejects_other_columns_tables_and_missing_id() {
        let err = parse_sql(&format!("UPDATE experts SET user_id = '{B}' WHERE id = '{A}'")).unwrap_err();
        assert!(matches!(err, SqlError::Unsupported(ref msg) if msg.contains("user_id")));
        assert_eq!(
            parse_sql(&format!("UPDATE bookings SET notes = 'x' WHERE id = '{A}'")).unwrap_err(),
            SqlError::UnknownTable("bookings".into())
        );
        assert_eq!(
            parse_sql("UPDATE experts SET full_name = 'x'").unwrap_err(),
            SqlError::MissingFilter("id")
        );
        let err = parse_sql(&format!("UPDATE experts SET full_name = NULL WHERE id = '{A}'")).unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn select_expert_by_id() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM experts WHERE id = '{A}'")).unwrap(),
            Command::SelectExpert { id: ulid(A) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM experts").unwrap_err(),
            SqlError::MissingFilter("id")
        );
    }

    #[test]
    fn insert_review_row() {
        let cmd = parse_sql(&format!(
            "INSERT INTO reviews (booking_id, client_id, rating, comment) VALUES ('{A}', '{B}', 5, 'Great')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertReview {
                booking_id: ulid(A),
                client_id: ulid(B),
                rating: 5,
                comment: Some("Great".into()),
            }
        );
        let err = parse_sql(&format!("INSERT INTO reviews VALUES ('{A}', '{B}', 300)")).unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn select_reviews_limit_defaults() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reviews WHERE expert_id = '{A}'")).unwrap(),
            Command::SelectReviews {
                expert_id: ulid(A),
                limit: DEFAULT_REVIEWS_PAGE,
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM reviews WHERE expert_id = '{A}' LIMIT 3")).unwrap(),
            Command::SelectReviews {
                expert_id: ulid(A),
                limit: 3,
            }
        );
    }

    #[test]
    fn insert_consultation_type_positional() {
        let cmd = parse_sql(&format!(
            "INSERT INTO consultation_types VALUES ('{A}', '{B}', 60, 5000)"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertConsultationType {
                id: ulid(A),
                expert_id: ulid(B),
                duration_minutes: 60,
                price: 5000,
                description: None,
            }
        );
    }

    #[test]
    fn negative_price_rejected() {
        let err = parse_sql(&format!(
            "INSERT INTO consultation_types VALUES ('{A}', '{B}', 60, -1)"
        ))
        .unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn insert_availability_accepts_short_times() {
        let cmd = parse_sql(&format!(
            "INSERT INTO availability (id, expert_id, day_of_week, start_time, end_time) \
             VALUES ('{A}', '{B}', 1, '09:00', '12:30:00')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertAvailability {
                id: ulid(A),
                expert_id: ulid(B),
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(12, 30, 0).unwrap(),
            }
        );
    }

    #[test]
    fn insert_booking_with_rfc3339_start() {
        let cmd = parse_sql(&format!(
            "INSERT INTO bookings (client_id, expert_id, consultation_type_id, scheduled_at, notes) \
             VALUES ('{A}', '{B}', '{C}', '2026-03-02T10:00:00Z', 'hello')"
        ))
        .unwrap();
        let expected_start = day_start(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()) + 10 * 3_600_000;
        assert_eq!(
            cmd,
            Command::InsertBooking {
                client_id: ulid(A),
                expert_id: ulid(B),
                consultation_type_id: ulid(C),
                scheduled_at: expected_start,
                notes: Some("hello".into()),
            }
        );
    }

    #[test]
    fn insert_booking_with_ms_start_and_null_notes() {
        let cmd = parse_sql(&format!(
            "INSERT INTO bookings VALUES ('{A}', '{B}', '{C}', 1772445600000, NULL)"
        ))
        .unwrap();
        assert!(matches!(
            cmd,
            Command::InsertBooking {
                scheduled_at: 1772445600000,
                notes: None,
                ..
            }
        ));
    }

    #[test]
    fn insert_booking_missing_column() {
        let err = parse_sql(&format!(
            "INSERT INTO bookings (client_id, expert_id) VALUES ('{A}', '{B}')"
        ))
        .unwrap_err();
        assert_eq!(err, SqlError::MissingColumn("bookings".into(), "consultation_type_id"));
    }

    #[test]
    fn transition_row_parses_status() {
        let cmd = parse_sql(&format!(
            "INSERT INTO booking_transitions (booking_id, status, meeting_link) \
             VALUES ('{A}', 'confirmed', 'https://meet.example/a')"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::InsertTransition {
                booking_id: ulid(A),
                status: BookingStatus::Confirmed,
                meeting_link: Some("https://meet.example/a".into()),
            }
        );

        let err = parse_sql(&format!(
            "INSERT INTO booking_transitions (booking_id, status) VALUES ('{A}', 'archived')"
        ))
        .unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn deletes_deactivate_and_cancel() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM availability WHERE id = '{A}'")).unwrap(),
            Command::DeactivateAvailability { id: ulid(A) }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{A}'")).unwrap(),
            Command::CancelBooking { id: ulid(A) }
        );
        assert_eq!(
            parse_sql("DELETE FROM bookings").unwrap_err(),
            SqlError::MissingFilter("id")
        );
    }

    #[test]
    fn select_slots() {
        let cmd = parse_sql(&format!(
            "SELECT * FROM slots WHERE expert_id = '{A}' AND date = '2026-03-02' AND duration = 60"
        ))
        .unwrap();
        assert_eq!(
            cmd,
            Command::SelectSlots {
                expert_id: ulid(A),
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                duration_minutes: 60,
            }
        );
    }

    #[test]
    fn select_slots_requires_date() {
        let err = parse_sql(&format!("SELECT * FROM slots WHERE expert_id = '{A}' AND duration = 60"))
            .unwrap_err();
        assert_eq!(err, SqlError::MissingFilter("date"));
    }

    #[test]
    fn select_bookings_role_defaults_to_client() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE user_id = '{A}'")).unwrap(),
            Command::SelectBookings {
                user_id: ulid(A),
                role: Role::Client,
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE user_id = '{A}' AND role = 'expert'")).unwrap(),
            Command::SelectBookings {
                user_id: ulid(A),
                role: Role::Expert,
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE id = '{B}'")).unwrap(),
            Command::SelectBooking { id: ulid(B) }
        );
    }

    #[test]
    fn select_consultation_types() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM consultation_types WHERE expert_id = '{A}'")).unwrap(),
            Command::SelectConsultationTypes { expert_id: ulid(A) }
        );
    }

    #[test]
    fn unknown_table_and_garbage() {
        assert_eq!(
            parse_sql("SELECT * FROM invoices WHERE id = 1").unwrap_err(),
            SqlError::UnknownTable("invoices".into())
        );
        assert!(matches!(parse_sql("SELEKT nonsense").unwrap_err(), SqlError::Parse(_)));
        assert!(matches!(parse_sql("CREATE TABLE t (a INT)").unwrap_err(), SqlError::Unsupported(_)));
    }

    #[test]
    fn batch_keeps_statement_order() {
        let cmds = parse_batch(&format!(
            "DELETE FROM bookings WHERE id = '{A}'; SELECT * FROM bookings WHERE id = '{B}';"
        ))
        .unwrap();
        assert_eq!(
            cmds,
            vec![
                Command::CancelBooking { id: ulid(A) },
                Command::SelectBooking { id: ulid(B) },
            ]
        );
        assert_eq!(parse_batch("").unwrap_err(), SqlError::Empty);
    }

    #[test]
    fn bad_ulid_is_a_parse_error() {
        let err = parse_sql("SELECT * FROM bookings WHERE user_id = 'not-a-ulid'").unwrap_err();
        assert!(err.to_string().contains("bad ULID"));
    }
}
