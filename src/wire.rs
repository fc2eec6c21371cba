use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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

use crate::auth::FleetLinkAuthSource;
use crate::engine::Engine;
use crate::fleet::FleetManager;
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};

pub struct FleetLinkHandler {
    fleets: Arc<FleetManager>,
    query_parser: Arc<FleetLinkQueryParser>,
}

impl FleetLinkHandler {
    pub fn new(fleets: Arc<FleetManager>) -> Self {
        Self {
            fleets,
            query_parser: Arc::new(FleetLinkQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.fleets.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("fleet error: {e}"),
            )))
        })
    }

    /// Execute with RED metrics around the engine call.
    async fn run(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertVehicle {
                id,
                name,
                capacity_kg,
                tyres,
                returning,
            } => {
                let info = engine
                    .register_vehicle(id, name, capacity_kg, tyres)
                    .await
                    .map_err(engine_err)?;
                if returning {
                    Ok(vec![vehicle_rows(vec![info])?])
                } else {
                    Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
                }
            }
            Command::InsertBooking {
                id,
                vehicle_id,
                customer_id,
                from_pincode,
                to_pincode,
                start_time,
                returning,
            } => {
                let booking = engine
                    .create_booking(id, vehicle_id, customer_id, from_pincode, to_pincode, start_time)
                    .await
                    .map_err(engine_err)?;
                if returning {
                    Ok(vec![booking_rows(vec![booking])?])
                } else {
                    Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
                }
            }
            Command::SelectVehicles { min_capacity_kg } => {
                let vehicles = match min_capacity_kg {
                    Some(min) => engine.vehicles_with_capacity(min).await,
                    None => engine.list_vehicles().await,
                };
                Ok(vec![vehicle_rows(vehicles)?])
            }
            Command::SelectAvailability {
                capacity_required,
                from_pincode,
                to_pincode,
                start_time,
            } => {
                let hits = engine
                    .find_available(capacity_required, &from_pincode, &to_pincode, start_time)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = hits
                    .into_iter()
                    .map(|hit| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&hit.vehicle.id.to_string())?;
                        encoder.encode_field(&hit.vehicle.name)?;
                        encoder.encode_field(&hit.vehicle.capacity_kg)?;
                        encoder.encode_field(&(hit.vehicle.tyres as i32))?;
                        encoder.encode_field(&(hit.estimated_ride_duration_hours as i32))?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { vehicle_id } => {
                let bookings = match vehicle_id {
                    Some(vid) => engine.bookings_for_vehicle(vid).await.map_err(engine_err)?,
                    None => engine.list_bookings().await,
                };
                Ok(vec![booking_rows(bookings)?])
            }
        }
    }
}

fn vehicle_rows(vehicles: Vec<VehicleInfo>) -> PgWireResult<Response<'static>> {
    let schema = Arc::new(vehicle_schema());
    let rows: Vec<PgWireResult<_>> = vehicles
        .into_iter()
        .map(|v| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&v.id.to_string())?;
            encoder.encode_field(&v.name)?;
            encoder.encode_field(&v.capacity_kg)?;
            encoder.encode_field(&(v.tyres as i32))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn booking_rows(bookings: Vec<BookingInfo>) -> PgWireResult<Response<'static>> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.vehicle_id.to_string())?;
            encoder.encode_field(&b.customer_id)?;
            encoder.encode_field(&b.from_pincode)?;
            encoder.encode_field(&b.to_pincode)?;
            encoder.encode_field(&b.start)?;
            encoder.encode_field(&b.end)?;
            encoder.encode_field(&(b.duration_hours as i32))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn vehicle_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("name"),
        FieldInfo::new("capacity_kg".into(), None, None, Type::FLOAT8, FieldFormat::Text),
        FieldInfo::new("tyres".into(), None, None, Type::INT4, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    let mut fields = vehicle_schema();
    fields.push(FieldInfo::new(
        "estimated_ride_duration_hours".into(),
        None,
        None,
        Type::INT4,
        FieldFormat::Text,
    ));
    fields
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("vehicle_id"),
        varchar("customer_id"),
        varchar("from_pincode"),
        varchar("to_pincode"),
        FieldInfo::new("start_time".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end_time".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new(
            "estimated_ride_duration_hours".into(),
            None,
            None,
            Type::INT4,
            FieldFormat::Text,
        ),
    ]
}

/// Guess the result schema from raw SQL for Describe responses.
fn result_schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let produces_rows = upper.contains("SELECT") || upper.contains("RETURNING");
    if !produces_rows {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("VEHICLES") {
        vehicle_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for FleetLinkHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(&engine, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct FleetLinkQueryParser;

#[async_trait]
impl QueryParser for FleetLinkQueryParser {
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
        Ok(result_schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for FleetLinkHandler {
    type Statement = String;
    type QueryParser = FleetLinkQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(&engine, cmd).await?;
        Ok(responses.remove(0))
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
            result_schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(result_schema_for(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct FleetLinkFactory {
    handler: Arc<FleetLinkHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<FleetLinkAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl FleetLinkFactory {
    pub fn new(fleets: Arc<FleetManager>, password: String) -> Self {
        let auth_source = FleetLinkAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(FleetLinkHandler::new(fleets)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for FleetLinkFactory {
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

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    fleets: Arc<FleetManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = FleetLinkFactory::new(fleets, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Each error kind gets its own SQLSTATE so clients can tell bad input,
/// missing vehicles, lost booking races, and storage failures apart.
fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    use crate::engine::EngineError;
    let code = match &e {
        EngineError::Invalid(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "42710",
        EngineError::Conflict(_) => "23P01",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
