use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{BookingEngine, BookingError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};

pub struct HelpertHandler {
    engine: Arc<BookingEngine>,
    query_parser: Arc<HelpertQueryParser>,
}

impl HelpertHandler {
    pub fn new(engine: Arc<BookingEngine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(HelpertQueryParser),
        }
    }

    /// Parse and run one statement.
    async fn run_sql(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(parse_failed)?;
        self.run_command(cmd).await
    }

    /// Run one command, recording RED metrics under its label.
    async fn run_command(&self, cmd: Command) -> PgWireResult<Response> {
        let started = Instant::now();
        let label = observability::command_label(&cmd);
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertUser { id, full_name, email } => {
                engine
                    .register_user(UserSummary { id, full_name, email })
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertExpert {
                id,
                user_id,
                full_name,
                specialization,
                bio,
            } => {
                engine
                    .create_expert_profile(ExpertProfile {
                        id,
                        user_id,
                        full_name,
                        specialization,
                        bio,
                        updated_at: 0,
                    })
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateExpert { id, update } => {
                engine.update_expert_profile(id, update).await.map_err(booking_err)?;
                let details = engine.expert_details(id).await.map_err(booking_err)?;
                expert_rows(details)
            }
            Command::SelectExpert { id } => {
                let details = engine.expert_details(id).await.map_err(booking_err)?;
                expert_rows(details)
            }
            Command::InsertConsultationType {
                id,
                expert_id,
                duration_minutes,
                price,
                description,
            } => {
                engine
                    .create_consultation_type(id, expert_id, duration_minutes, price, description)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertAvailability {
                id,
                expert_id,
                day_of_week,
                start_time,
                end_time,
            } => {
                engine
                    .add_availability_window(id, expert_id, day_of_week, start_time, end_time)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::DeactivateAvailability { id } => {
                engine.set_window_active(id, false).await.map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking {
                client_id,
                expert_id,
                consultation_type_id,
                scheduled_at,
                notes,
            } => {
                let details = engine
                    .create_booking(BookingRequest {
                        client_id,
                        expert_id,
                        consultation_type_id,
                        requested_start: scheduled_at,
                        notes,
                    })
                    .await
                    .map_err(booking_err)?;
                booking_rows(vec![details])
            }
            Command::InsertTransition {
                booking_id,
                status,
                meeting_link,
            } => {
                engine
                    .transition_status(booking_id, status, meeting_link)
                    .await
                    .map_err(booking_err)?;
                let details = engine.booking_details(booking_id).await.map_err(booking_err)?;
                booking_rows(vec![details])
            }
            Command::CancelBooking { id } => {
                engine
                    .transition_status(id, BookingStatus::Cancelled, None)
                    .await
                    .map_err(booking_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSlots {
                expert_id,
                date,
                duration_minutes,
            } => {
                let slots = engine
                    .bookable_slots(expert_id, date, duration_minutes)
                    .await
                    .map_err(booking_err)?;

                let schema = Arc::new(slots_schema());
                let expert_str = expert_id.to_string();
                let slot_ms = Ms::from(duration_minutes) * MINUTE_MS;
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|start| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&expert_str)?;
                        encoder.encode_field(&start)?;
                        encoder.encode_field(&(start + slot_ms))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBookings { user_id, role } => {
                let bookings = engine.list_bookings(user_id, role).await.map_err(booking_err)?;
                booking_rows(bookings)
            }
            Command::SelectBooking { id } => {
                let details = engine.booking_details(id).await.map_err(booking_err)?;
                booking_rows(vec![details])
            }
            Command::SelectConsultationTypes { expert_id } => {
                let types = engine.consultation_types(expert_id).await.map_err(booking_err)?;

                let schema = Arc::new(consultation_types_schema());
                let rows: Vec<PgWireResult<_>> = types
                    .into_iter()
                    .map(|ct| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&ct.id.to_string())?;
                        encoder.encode_field(&ct.expert_id.to_string())?;
                        encoder.encode_field(&(ct.duration_minutes as i32))?;
                        encoder.encode_field(&price_column(ct.price))?;
                        encoder.encode_field(&ct.description)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertReview {
                booking_id,
                client_id,
                rating,
                comment,
            } => {
                let review = engine
                    .post_review(booking_id, client_id, rating, comment)
                    .await
                    .map_err(booking_err)?;
                let details = engine.review_details(review).await.map_err(booking_err)?;
                review_rows(vec![details])
            }
            Command::SelectReviews { expert_id, limit } => {
                let reviews = engine.expert_reviews(expert_id, limit).await.map_err(booking_err)?;
                review_rows(reviews)
            }
        }
    }
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn int4(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![varchar("expert_id"), int8("start"), int8("end")]
}

fn consultation_types_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("expert_id"),
        int4("duration"),
        int8("price"),
        varchar("description"),
    ]
}

/// Booking columns, then the related records as JSON text (NULL when missing).
fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("client_id"),
        varchar("expert_id"),
        varchar("consultation_type_id"),
        int8("scheduled_at"),
        int4("duration_minutes"),
        int8("total_price"),
        varchar("status"),
        varchar("meeting_link"),
        varchar("notes"),
        int8("created_at"),
        int8("updated_at"),
        varchar("client"),
        varchar("expert"),
        varchar("consultation_type"),
    ]
}

/// Profile columns, then the owning user and the offered consultation types
/// as JSON text.
fn experts_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("user_id"),
        varchar("full_name"),
        varchar("specialization"),
        varchar("bio"),
        int8("updated_at"),
        varchar("user"),
        varchar("consultation_types"),
    ]
}

fn reviews_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("booking_id"),
        varchar("client_id"),
        varchar("expert_id"),
        int4("rating"),
        varchar("comment"),
        int8("created_at"),
        varchar("client_name"),
    ]
}

fn price_column(price: u64) -> i64 {
    i64::try_from(price).unwrap_or(i64::MAX)
}

fn json_column<T: serde::Serialize>(value: &Option<T>) -> PgWireResult<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| PgWireError::ApiError(Box::new(e)))
}

fn expert_rows(details: ExpertDetails) -> PgWireResult<Response> {
    let schema = Arc::new(experts_schema());
    let p = &details.profile;
    let types =
        serde_json::to_string(&details.consultation_types).map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&p.id.to_string())?;
    encoder.encode_field(&p.user_id.to_string())?;
    encoder.encode_field(&p.full_name)?;
    encoder.encode_field(&p.specialization)?;
    encoder.encode_field(&p.bio)?;
    encoder.encode_field(&p.updated_at)?;
    encoder.encode_field(&json_column(&details.user)?)?;
    encoder.encode_field(&types)?;
    let rows: Vec<PgWireResult<_>> = vec![Ok(encoder.take_row())];
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn review_rows(reviews: Vec<ReviewDetails>) -> PgWireResult<Response> {
    let schema = Arc::new(reviews_schema());
    let rows: Vec<PgWireResult<_>> = reviews
        .into_iter()
        .map(|d| {
            let r = &d.review;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.booking_id.to_string())?;
            encoder.encode_field(&r.client_id.to_string())?;
            encoder.encode_field(&r.expert_id.to_string())?;
            encoder.encode_field(&i32::from(r.rating))?;
            encoder.encode_field(&r.comment)?;
            encoder.encode_field(&r.created_at)?;
            encoder.encode_field(&d.client_name)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: Vec<BookingDetails>) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|d| {
            let b = &d.booking;
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.client_id.to_string())?;
            encoder.encode_field(&b.expert_id.to_string())?;
            encoder.encode_field(&b.consultation_type_id.to_string())?;
            encoder.encode_field(&b.scheduled_at)?;
            encoder.encode_field(&(b.duration_minutes as i32))?;
            encoder.encode_field(&price_column(b.total_price))?;
            encoder.encode_field(&b.status.as_str())?;
            encoder.encode_field(&b.meeting_link)?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.updated_at)?;
            encoder.encode_field(&json_column(&d.client)?)?;
            encoder.encode_field(&json_column(&d.expert)?)?;
            encoder.encode_field(&json_column(&d.consultation_type)?)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns a statement will produce, judged from its text alone
/// (it may still hold `$n` placeholders).
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if upper.starts_with("SELECT") {
        if upper.contains("FROM SLOTS") {
            slots_schema()
        } else if upper.contains("FROM CONSULTATION_TYPES") {
            consultation_types_schema()
        } else if upper.contains("FROM REVIEWS") {
            reviews_schema()
        } else if upper.contains("FROM BOOKINGS") {
            bookings_schema()
        } else if upper.contains("FROM EXPERTS") {
            experts_schema()
        } else {
            vec![]
        }
    } else if upper.starts_with("INSERT") {
        if upper.contains("INTO BOOKINGS") || upper.contains("INTO BOOKING_TRANSITIONS") {
            bookings_schema()
        } else if upper.contains("INTO REVIEWS") {
            reviews_schema()
        } else {
            vec![]
        }
    } else if upper.starts_with("UPDATE EXPERTS") {
        experts_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for HelpertHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmds = sql::parse_batch(query).map_err(parse_failed)?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run_command(cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HelpertQueryParser;

#[async_trait]
impl QueryParser for HelpertQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HelpertHandler {
    type Statement = String;
    type QueryParser = HelpertQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run_sql(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Walk `sql`, calling `on_placeholder` for every `$N` outside a quoted
/// literal with the byte range of the placeholder and its index.
fn scan_placeholders(sql: &str, mut on_placeholder: impl FnMut(usize, usize, Option<usize>)) {
    let bytes = sql.as_bytes();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // A doubled quote inside a literal closes and reopens it.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                on_placeholder(start, i, sql[start + 1..i].parse().ok());
            }
            _ => i += 1,
        }
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    scan_placeholders(sql, |_, _, index| max = max.max(index.unwrap_or(0)));
    max
}

/// Splice bound parameters into `template` as quoted text literals in one
/// left-to-right pass. Spliced text is never scanned again, so a value that
/// contains `$2` stays literal. Placeholders with no bound value are kept.
fn bind_params<P: AsRef<[u8]>>(template: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut copied = 0;
    scan_placeholders(template, |start, end, index| {
        let Some(param) = index.and_then(|n| n.checked_sub(1)).and_then(|k| params.get(k)) else {
            return;
        };
        out.push_str(&template[copied..start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = end;
    });
    out.push_str(&template[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every login.
#[derive(Debug)]
pub struct HelpertAuthSource {
    password: String,
}

impl HelpertAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for HelpertAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HelpertFactory {
    handler: Arc<HelpertHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<HelpertAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HelpertFactory {
    pub fn new(engine: Arc<BookingEngine>, password: String) -> Self {
        Self {
            handler: Arc::new(HelpertHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                HelpertAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HelpertFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<BookingEngine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = HelpertFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each booking failure kind.
fn sqlstate(e: &BookingError) -> &'static str {
    match e {
        BookingError::NotFound { .. } => "P0002",
        BookingError::SlotUnavailable { .. } | BookingError::SlotConflict { .. } => "23P01",
        BookingError::InvalidTransition { .. } | BookingError::Invalid(_) => "22023",
        BookingError::Timeout(_) => "57014",
        BookingError::Storage(_) => "58000",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn parse_failed(e: SqlError) -> PgWireError {
    metrics::counter!(observability::QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
    sql_err(e)
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(
            count_params("SELECT * FROM slots WHERE expert_id = $1 AND date = $2 AND duration = $3"),
            3
        );
        assert_eq!(count_params("INSERT INTO users VALUES ($2, $10, $1)"), 10);
        assert_eq!(count_params("SELECT '$' FROM bookings"), 0);
        assert_eq!(count_params("SELECT * FROM bookings WHERE notes = 'costs $9' AND id = $1"), 1);
    }

    #[test]
    fn bound_values_are_spliced_once() {
        let sql = bind_params(
            "INSERT INTO bookings VALUES ($1, $2, $10, 'literal $1', $3)",
            &[
                Some("it's $2".as_bytes()),
                None,
                Some("$1$1".as_bytes()),
                None,
                None,
                None,
                None,
                None,
                None,
                Some("ten".as_bytes()),
            ],
        );
        assert_eq!(
            sql,
            "INSERT INTO bookings VALUES ('it''s $2', NULL, 'ten', 'literal $1', '$1$1')"
        );
    }

    #[test]
    fn unbound_placeholders_stay_put() {
        let none: [Option<&[u8]>; 0] = [];
        assert_eq!(bind_params("SELECT $1, $, $x", &none), "SELECT $1, $, $x");
        assert_eq!(
            bind_params("SELECT 'a''$1' , $1", &[Some(b"v".as_slice())]),
            "SELECT 'a''$1' , 'v'"
        );
    }

    #[test]
    fn schema_follows_statement_kind() {
        assert_eq!(result_schema("select * from slots where x = $1").len(), 3);
        assert_eq!(result_schema("SELECT * FROM consultation_types WHERE expert_id = $1").len(), 5);
        assert_eq!(result_schema("SELECT * FROM bookings WHERE user_id = $1").len(), 15);
        assert_eq!(result_schema("INSERT INTO bookings VALUES ($1, $2, $3, $4)").len(), 15);
        assert_eq!(result_schema("INSERT INTO booking_transitions VALUES ($1, $2)").len(), 15);
        assert_eq!(result_schema("SELECT * FROM reviews WHERE expert_id = $1 LIMIT 5").len(), 8);
        assert_eq!(result_schema("INSERT INTO reviews VALUES ($1, $2, $3)").len(), 8);
        assert_eq!(result_schema("SELECT *\n  FROM experts WHERE id = $1").len(), 8);
        assert_eq!(result_schema("UPDATE experts SET bio = $1 WHERE id = $2").len(), 8);
        assert!(result_schema("INSERT INTO experts VALUES ($1, $2, $3, $4)").is_empty());
        assert!(result_schema("INSERT INTO users VALUES ($1, $2, $3)").is_empty());
        assert!(result_schema("DELETE FROM bookings WHERE id = $1").is_empty());
    }

    #[test]
    fn every_failure_kind_has_a_sqlstate() {
        let id = Ulid::new();
        let cases = [
            (BookingError::NotFound { entity: "booking", id }, "P0002"),
            (BookingError::SlotUnavailable { expert_id: id, start: 0 }, "23P01"),
            (BookingError::SlotConflict { conflicting: id }, "23P01"),
            (
                BookingError::InvalidTransition {
                    from: BookingStatus::Completed,
                    to: BookingStatus::Pending,
                },
                "22023",
            ),
            (BookingError::Invalid("x".into()), "22023"),
            (BookingError::Timeout("get_booking"), "57014"),
            (BookingError::Storage("disk".into()), "58000"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code, "{err}");
        }
    }
}
