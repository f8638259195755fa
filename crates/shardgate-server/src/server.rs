use crate::config::Config;
use crate::datasource::MemoryDataSource;
use crate::prepared::PreparedStatementRegistry;
use crate::router::ShardRouter;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::Rng;
use shardgate_core::error::ShardgateError;
use shardgate_core::types::{ColumnMeta, DataValue, Failure, MergedOutcome};
use shardgate_engine::emitter::{column_definition, error_packet};
use shardgate_engine::{
    emit, merge_strategy_for, DataSource, DataSourceRegistry, FrameStream, RowEncoding,
    ScatterGatherEngine,
};
use shardgate_protocol::backend::write_frame;
use shardgate_protocol::frontend::{
    decode_command, decode_execute_parameters, decode_handshake_response, read_packet,
};
use shardgate_protocol::messages::{
    HandshakeV10, OkPacket, SERVER_CAPABILITIES, SERVER_STATUS_AUTOCOMMIT,
};
use shardgate_protocol::{ClientCommand, Frame, FrameSequence, ServerPacket};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ER_UNKNOWN_STMT_HANDLER: i32 = 1243;
const ER_WRONG_ARGUMENTS: i32 = 1210;
/// Rows pulled from the shards per blocking hop while streaming a result.
const FRAME_BATCH: usize = 256;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    let metrics_addr = config.metrics.listen_addr.clone();
    tokio::spawn(async move {
        let app = axum::Router::new()
            .route(
                "/metrics",
                axum::routing::get(|| async move { metrics_handle.render() }),
            )
            .route("/health", axum::routing::get(|| async { "ok" }))
            .route("/ready", axum::routing::get(|| async { "ok" }));
        match tokio::net::TcpListener::bind(&metrics_addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app).await {
                    error!("metrics endpoint failed: {err}");
                }
            }
            Err(err) => error!("metrics endpoint could not bind {metrics_addr}: {err}"),
        }
    });

    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    info!("Shardgate listening on {}", config.server.listen_addr);
    let proxy = Arc::new(Proxy::new(&config));
    serve(listener, proxy, config.server.max_connections, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("ctrl-c handler failed: {err}");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Accept clients until `shutdown` resolves. At most `max_connections`
/// clients are served at once; further clients wait in the backlog.
pub async fn serve<F>(
    listener: TcpListener,
    proxy: Arc<Proxy>,
    max_connections: usize,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    tokio::pin!(shutdown);
    loop {
        let permit = tokio::select! {
            _ = &mut shutdown => break,
            permit = permits.clone().acquire_owned() => permit?,
        };
        let (socket, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted?,
        };
        let proxy = proxy.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let connection_id = proxy.next_connection_id();
            info!(connection_id, %peer, "client connected");
            match handle_client(socket, proxy, connection_id).await {
                Ok(()) => info!(connection_id, "client disconnected"),
                Err(err) => warn!(connection_id, "client connection ended: {err}"),
            }
        });
    }
    info!("shutting down");
    Ok(())
}

/// State shared by every client connection.
pub struct Proxy {
    router: ShardRouter,
    engine: ScatterGatherEngine,
    prepared: PreparedStatementRegistry,
    server_version: String,
    audit_enabled: bool,
    connection_ids: AtomicU32,
}

impl Proxy {
    pub fn new(config: &Config) -> Self {
        let registry = Arc::new(DataSourceRegistry::new());
        for name in &config.sharding.data_sources {
            registry.get_or_init(name, || -> Arc<dyn DataSource> {
                Arc::new(MemoryDataSource::new(name.clone()))
            });
        }
        info!(
            data_sources = ?registry.shard_ids(),
            mode = ?config.proxy.mode,
            "data sources ready"
        );
        Self {
            router: ShardRouter::from_config(config),
            engine: ScatterGatherEngine::new(registry, config.engine_options()),
            prepared: PreparedStatementRegistry::new(),
            server_version: config.server.server_version.clone(),
            audit_enabled: config.audit.enabled,
            connection_ids: AtomicU32::new(1),
        }
    }

    fn next_connection_id(&self) -> u32 {
        self.connection_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Route, scatter, merge, and turn the outcome into response frames.
    async fn execute(
        &self,
        session: &Session,
        sql: &str,
        parameters: &[DataValue],
        encoding: RowEncoding,
    ) -> FrameStream {
        counter!("shardgate_statement_total").increment(1);
        if self.audit_enabled {
            info!(
                target: "audit",
                statement_id = %Uuid::new_v4(),
                user = %session.user,
                database = session.database.as_deref().unwrap_or_default(),
                sql = sql
            );
        }
        let outcome = match self.router.route(sql, parameters) {
            Ok(routed) => {
                debug!(kind = ?routed.kind, units = routed.units.len(), "statement routed");
                let strategy = merge_strategy_for(&routed.merge);
                self.engine
                    .execute(routed.kind, routed.units, strategy.as_ref())
                    .await
            }
            Err(err) => {
                debug!("routing failed: {err}");
                MergedOutcome::from(err)
            }
        };
        if let MergedOutcome::Failure(failure) = &outcome {
            counter!("shardgate_statement_error_total").increment(1);
            debug!(code = failure.code, "statement failed: {}", failure.message);
        }
        emit(outcome, encoding)
    }
}

/// Per-connection state.
struct Session {
    connection_id: u32,
    user: String,
    database: Option<String>,
    /// prepared statement ids opened by this connection
    statements: Vec<u32>,
}

pub async fn handle_client<S>(stream: S, proxy: Arc<Proxy>, connection_id: u32) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut stream = BufWriter::new(stream);
    let mut session = match handshake(&mut stream, &proxy, connection_id).await? {
        Some(session) => session,
        None => return Ok(()),
    };
    let result = command_loop(&mut stream, &proxy, &mut session).await;
    for id in session.statements.drain(..) {
        proxy.prepared.close(id);
    }
    result
}

async fn handshake<S>(
    stream: &mut S,
    proxy: &Proxy,
    connection_id: u32,
) -> anyhow::Result<Option<Session>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let scramble: Vec<u8> = {
        let mut rng = rand::thread_rng();
        (0..20).map(|_| rng.gen_range(0x21u8..0x7f)).collect()
    };
    let greeting = HandshakeV10 {
        server_version: proxy.server_version.clone(),
        connection_id,
        auth_plugin_data: scramble,
        capabilities: SERVER_CAPABILITIES,
        status_flags: SERVER_STATUS_AUTOCOMMIT,
    };
    send(stream, &Frame::new(0, ServerPacket::Handshake(greeting))).await?;

    let Some(packet) = read_packet(stream).await? else {
        return Ok(None);
    };
    let reply_id = packet.sequence_id.wrapping_add(1);
    let response = match decode_handshake_response(&packet.payload) {
        Ok(response) => response,
        Err(err) => {
            let failure = ShardgateError::Protocol(err.to_string()).failure();
            send(stream, &Frame::new(reply_id, error_packet(&failure))).await?;
            return Ok(None);
        }
    };
    info!(
        connection_id,
        user = %response.username,
        database = response.database.as_deref().unwrap_or_default(),
        "client authenticated"
    );
    send(stream, &Frame::new(reply_id, ServerPacket::Ok(OkPacket::new(0, 0)))).await?;
    Ok(Some(Session {
        connection_id,
        user: response.username,
        database: response.database,
        statements: Vec::new(),
    }))
}

async fn command_loop<S>(stream: &mut S, proxy: &Proxy, session: &mut Session) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    while let Some(packet) = read_packet(stream).await? {
        let command = match decode_command(&packet.payload) {
            Ok(command) => command,
            Err(err) => {
                reply_failure(stream, &ShardgateError::Protocol(err.to_string()).failure()).await?;
                continue;
            }
        };
        match command {
            ClientCommand::Quit => break,
            ClientCommand::Ping => reply_ok(stream).await?,
            ClientCommand::InitDb { schema } => {
                session.database = Some(schema);
                reply_ok(stream).await?;
            }
            ClientCommand::Query { sql } => {
                let frames = proxy.execute(session, &sql, &[], RowEncoding::Text).await;
                write_frames(stream, frames).await?;
            }
            ClientCommand::StmtPrepare { sql } => {
                let (statement_id, parameter_count) = proxy.prepared.prepare(&sql);
                session.statements.push(statement_id);
                debug!(
                    connection_id = session.connection_id,
                    statement_id, parameter_count, "statement prepared"
                );
                for frame in prepare_response(statement_id, parameter_count) {
                    write_frame(stream, &frame).await?;
                }
                stream.flush().await?;
            }
            ClientCommand::StmtExecute {
                statement_id,
                payload,
            } => {
                let Some(statement) = proxy.prepared.get(statement_id) else {
                    let failure = Failure::new(
                        ER_UNKNOWN_STMT_HANDLER,
                        "HY000",
                        format!("Unknown prepared statement handler ({statement_id}) given to mysqld_stmt_execute"),
                    );
                    reply_failure(stream, &failure).await?;
                    continue;
                };
                let parameters = match decode_execute_parameters(
                    &payload,
                    statement.parameter_count,
                    &statement.parameter_types,
                ) {
                    Ok(parameters) => parameters,
                    Err(err) => {
                        let failure = Failure::new(
                            ER_WRONG_ARGUMENTS,
                            "HY000",
                            format!("Incorrect arguments to mysqld_stmt_execute: {err}"),
                        );
                        reply_failure(stream, &failure).await?;
                        continue;
                    }
                };
                if parameters.types != statement.parameter_types {
                    proxy
                        .prepared
                        .bind_types(statement_id, parameters.types.clone());
                }
                let frames = proxy
                    .execute(session, &statement.sql, &parameters.values, RowEncoding::Binary)
                    .await;
                write_frames(stream, frames).await?;
            }
            ClientCommand::StmtClose { statement_id } => {
                proxy.prepared.close(statement_id);
                session.statements.retain(|id| *id != statement_id);
            }
            ClientCommand::StmtReset { .. } => reply_ok(stream).await?,
            ClientCommand::Unsupported { code } => {
                let failure = ShardgateError::Protocol(format!("Unknown command 0x{code:02x}")).failure();
                reply_failure(stream, &failure).await?;
            }
        }
    }
    Ok(())
}

/// COM_STMT_PREPARE_OK, one definition per parameter, then EOF.
fn prepare_response(statement_id: u32, parameter_count: usize) -> Vec<Frame> {
    let mut sequence = FrameSequence::new();
    let mut frames = vec![Frame::new(
        sequence.next_id(),
        ServerPacket::StmtPrepareOk {
            statement_id,
            columns: 0,
            params: u16::try_from(parameter_count).unwrap_or(u16::MAX),
            warnings: 0,
        },
    )];
    if parameter_count > 0 {
        let parameter = column_definition(&ColumnMeta::new("", "?", "VARCHAR"));
        for _ in 0..parameter_count {
            frames.push(Frame::new(
                sequence.next_id(),
                ServerPacket::ColumnDefinition(parameter.clone()),
            ));
        }
        frames.push(Frame::new(sequence.next_id(), ServerPacket::eof()));
    }
    frames
}

/// Pull frames off the merged stream on the blocking pool, since producing
/// a row may block on a shard cursor, and write them out in batches.
async fn write_frames<S>(stream: &mut S, frames: FrameStream) -> anyhow::Result<()>
where
    S: AsyncWrite + Unpin + Send,
{
    let mut frames = frames;
    loop {
        let (rest, batch) = tokio::task::spawn_blocking(move || {
            let batch: Vec<Frame> = frames.by_ref().take(FRAME_BATCH).collect();
            (frames, batch)
        })
        .await?;
        frames = rest;
        for frame in &batch {
            write_frame(stream, frame).await?;
        }
        if batch.len() < FRAME_BATCH {
            break;
        }
    }
    stream.flush().await?;
    Ok(())
}

async fn send<S: AsyncWrite + Unpin>(stream: &mut S, frame: &Frame) -> anyhow::Result<()> {
    write_frame(stream, frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn reply_ok<S: AsyncWrite + Unpin>(stream: &mut S) -> anyhow::Result<()> {
    send(stream, &Frame::new(1, ServerPacket::Ok(OkPacket::new(0, 0)))).await
}

async fn reply_failure<S: AsyncWrite + Unpin>(stream: &mut S, failure: &Failure) -> anyhow::Result<()> {
    send(stream, &Frame::new(1, error_packet(failure))).await
}
