/// Stratum Server - async TCP front end for miner connections
///
/// One read/dispatch task per connection plus a dedicated writer task fed by
/// an unbounded FIFO queue; the queue ordering is what guarantees a
/// set-difficulty message reaches the wire before any later job
/// notification to the same connection.

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::connection::{parse_difficulty_hint, ConnectionState, ExtraNonceProvider, WorkerContext};
use super::protocol::{beam_login_ok, beam_result, StratumRequest, StratumResponse, WireError};
use crate::config::{CoinFamily, Config};
use crate::difficulty::{difficulty_to_target, target_to_hex};
use crate::error::ShareError;
use crate::jobs::{equihash, JobManager, JobNotification, PoolJob, Share};
use crate::metrics::prometheus as metrics;

/// Kaspa-family nonce width in bytes; the miner rolls whatever the
/// extranonce prefix leaves free.
const KASPA_NONCE_BYTES: usize = 8;

/// Accepted share plus submission context, handed off to the persistence /
/// block-submission collaborators.
#[derive(Debug, Clone)]
pub struct ShareEvent {
    pub share: Share,
    pub block_hex: Option<String>,
    pub worker: String,
    pub job_id: String,
}

/// How the dispatch loop should proceed after one message.
enum Handled {
    Reply(Value),
    /// Handler queued its own messages.
    Silent,
    /// Protocol violation: optionally answer, then drop the connection.
    Terminate(Option<Value>),
}

pub struct StratumServer {
    config: Config,
    jobs: Arc<JobManager>,
    connections: Arc<RwLock<HashMap<String, Arc<RwLock<WorkerContext>>>>>,
    connection_count: Arc<AtomicUsize>,
    connections_per_ip: Arc<RwLock<HashMap<IpAddr, usize>>>,
    extranonce: ExtraNonceProvider,
    share_tx: mpsc::UnboundedSender<ShareEvent>,
}

impl StratumServer {
    pub fn new(
        config: Config,
        jobs: Arc<JobManager>,
        share_tx: mpsc::UnboundedSender<ShareEvent>,
    ) -> Self {
        let extranonce = ExtraNonceProvider::new(config.pool.extranonce1_size);
        Self {
            config,
            jobs,
            connections: Arc::new(RwLock::new(HashMap::new())),
            connection_count: Arc::new(AtomicUsize::new(0)),
            connections_per_ip: Arc::new(RwLock::new(HashMap::new())),
            extranonce,
            share_tx,
        }
    }

    /// Bind the listener with SO_REUSEADDR so restarts do not trip over
    /// lingering sockets.
    pub fn bind(&self) -> Result<TcpListener> {
        let addr: SocketAddr = self
            .config
            .listen
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {e}", self.config.listen))?;

        let domain = if addr.is_ipv6() {
            socket2::Domain::IPV6
        } else {
            socket2::Domain::IPV4
        };
        let socket =
            socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&socket2::SockAddr::from(addr))?;
        socket.listen(1024)?;

        let listener = TcpListener::from_std(socket.into())?;
        tracing::info!("stratum server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = self.bind()?;
        self.run(listener).await
    }

    /// Accept loop plus the two background tasks (job fanout, vardiff
    /// sweep). Connection limits are enforced before spawning.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        {
            let server = Arc::clone(&self);
            let mut notifications = server.jobs.subscribe();
            let fanout = Arc::clone(&self);
            tokio::spawn(async move {
                while let Ok(notification) = notifications.recv().await {
                    fanout.broadcast_job(notification).await;
                }
            });
        }

        {
            let server = Arc::clone(&self);
            let period = Duration::from_secs(server.config.vardiff.retarget_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    server.vardiff_sweep().await;
                }
            });
        }

        loop {
            match listener.accept().await {
                Ok((mut socket, peer_addr)) => {
                    if self.connection_count.load(Ordering::Relaxed) >= self.config.pool.max_connections
                    {
                        tracing::warn!(
                            "max connections ({}) reached, rejecting {}",
                            self.config.pool.max_connections,
                            peer_addr
                        );
                        let _ = socket.shutdown().await;
                        continue;
                    }

                    {
                        let per_ip = self.connections_per_ip.read().await;
                        let count = per_ip.get(&peer_addr.ip()).copied().unwrap_or(0);
                        if count >= self.config.pool.max_connections_per_ip {
                            tracing::warn!(
                                "per-ip limit ({}) reached for {}, rejecting",
                                self.config.pool.max_connections_per_ip,
                                peer_addr.ip()
                            );
                            let _ = socket.shutdown().await;
                            continue;
                        }
                    }
                    {
                        let mut per_ip = self.connections_per_ip.write().await;
                        *per_ip.entry(peer_addr.ip()).or_insert(0) += 1;
                    }

                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket, peer_addr).await {
                            tracing::error!("connection error from {}: {e:#}", peer_addr);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("failed to accept connection: {e}");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let connection_id = Uuid::new_v4().to_string();
        let context = Arc::new(RwLock::new(WorkerContext::new(
            connection_id.clone(),
            peer_addr,
            self.extranonce.next(),
            self.config.pool.initial_difficulty,
        )));

        {
            let mut connections = self.connections.write().await;
            connections.insert(connection_id.clone(), Arc::clone(&context));
        }
        self.connection_count.fetch_add(1, Ordering::Relaxed);
        metrics::inc_connections();
        tracing::debug!(connection = %connection_id, peer = %peer_addr, "connection registered");

        let (reader, mut writer) = socket.into_split();
        let mut reader = BufReader::new(reader);

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        {
            let mut ctx = context.write().await;
            ctx.outbound = Some(tx);
        }

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if writer.write_all(message.as_bytes()).await.is_err() {
                    break;
                }
                let _ = writer.flush().await;
            }
        });

        let timeout = Duration::from_secs(self.config.pool.client_timeout_secs);
        let mut line = String::new();
        loop {
            line.clear();

            match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
                Ok(Ok(0)) => {
                    tracing::debug!(peer = %peer_addr, "connection closed by client");
                    break;
                }
                Ok(Ok(_)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    match self.handle_message(&context, trimmed).await {
                        Handled::Reply(response) => {
                            Self::send_json(&context, response).await;
                        }
                        Handled::Silent => {}
                        Handled::Terminate(response) => {
                            if let Some(response) = response {
                                Self::send_json(&context, response).await;
                            }
                            let mut ctx = context.write().await;
                            ctx.state = ConnectionState::Disconnecting;
                            break;
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(peer = %peer_addr, "read error: {e}");
                    break;
                }
                Err(_) => {
                    tracing::debug!(peer = %peer_addr, "connection timed out");
                    break;
                }
            }

            let mut ctx = context.write().await;
            ctx.update_activity();
        }

        {
            let mut connections = self.connections.write().await;
            connections.remove(&connection_id);
        }
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
        metrics::dec_connections();

        {
            let mut per_ip = self.connections_per_ip.write().await;
            if let Some(count) = per_ip.get_mut(&peer_addr.ip()) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    per_ip.remove(&peer_addr.ip());
                }
            }
        }

        {
            let mut ctx = context.write().await;
            ctx.outbound = None;
        }

        tracing::debug!(connection = %connection_id, peer = %peer_addr, "connection closed");
        Ok(())
    }

    async fn handle_message(&self, context: &Arc<RwLock<WorkerContext>>, line: &str) -> Handled {
        let request = match StratumRequest::parse(line) {
            Ok(request) => request,
            Err(e) => {
                let peer = context.read().await.peer_addr;
                tracing::warn!(peer = %peer, "malformed message, disconnecting: {e}");
                return Handled::Terminate(Some(
                    StratumResponse::error(
                        Value::Null,
                        WireError::new(WireError::PARSE_ERROR, "malformed message"),
                    )
                    .to_value(),
                ));
            }
        };

        let mining_dialect = matches!(self.config.coin, CoinFamily::Equihash | CoinFamily::Kaspa);
        match (mining_dialect, request.method.as_str()) {
            (true, "mining.subscribe") => self.handle_subscribe(context, &request).await,
            (true, "mining.authorize") => self.handle_authorize(context, &request).await,
            (true, "mining.submit") => self.handle_submit(context, &request).await,
            (false, "login") => self.handle_beam_login(context, &request).await,
            (false, "solution") => self.handle_beam_submit(context, &request).await,
            (_, method) => {
                let authorized = context.read().await.is_authorized();
                let response =
                    StratumResponse::error(request.id.clone(), WireError::method_not_found(method))
                        .to_value();
                if authorized {
                    // Tolerated post-auth (hashrate reports and such).
                    Handled::Reply(response)
                } else {
                    let peer = context.read().await.peer_addr;
                    tracing::warn!(peer = %peer, method, "unknown method before auth, disconnecting");
                    Handled::Terminate(Some(response))
                }
            }
        }
    }

    async fn handle_subscribe(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        request: &StratumRequest,
    ) -> Handled {
        let mut ctx = context.write().await;

        if ctx.is_subscribed() {
            return Handled::Reply(
                StratumResponse::error(
                    request.id.clone(),
                    WireError::new(20, "already subscribed"),
                )
                .to_value(),
            );
        }

        ctx.user_agent = request.param_str(0).map(str::to_string);
        ctx.state = ConnectionState::Subscribed;
        tracing::info!(
            connection = %ctx.connection_id,
            agent = ctx.user_agent.as_deref().unwrap_or(""),
            "subscribed"
        );

        let result = match self.config.coin {
            CoinFamily::Equihash => json!([ctx.connection_id, ctx.extranonce1]),
            CoinFamily::Kaspa => {
                let extranonce2_size =
                    KASPA_NONCE_BYTES.saturating_sub(self.config.pool.extranonce1_size);
                json!([
                    [
                        ["mining.notify", ctx.connection_id],
                        ["mining.set_difficulty", ctx.connection_id],
                    ],
                    ctx.extranonce1,
                    extranonce2_size,
                ])
            }
            CoinFamily::Beam => Value::Null,
        };

        Handled::Reply(StratumResponse::success(request.id.clone(), result).to_value())
    }

    async fn handle_authorize(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        request: &StratumRequest,
    ) -> Handled {
        {
            let ctx = context.read().await;
            if !ctx.is_subscribed() {
                return Handled::Reply(
                    StratumResponse::error(
                        request.id.clone(),
                        WireError::new(ShareError::NotSubscribed.stratum_code(), "not subscribed"),
                    )
                    .to_value(),
                );
            }
        }

        // A handshake without a username is malformed, not merely denied.
        let Some(username) = request.param_str(0) else {
            return Handled::Terminate(Some(
                StratumResponse::error(request.id.clone(), WireError::invalid_params("missing username"))
                    .to_value(),
            ));
        };
        let password = request.param_str(1).unwrap_or("");

        let mut parts = username.splitn(2, '.');
        let wallet = parts.next().unwrap_or("").trim().to_string();
        let worker = parts.next().map(str::to_string);

        // Address/credential policy is the pool operator's collaborator;
        // here only emptiness is fatal.
        if wallet.is_empty() {
            tracing::warn!("authorization rejected: empty wallet");
            return Handled::Reply(
                StratumResponse::error(
                    request.id.clone(),
                    WireError::new(ShareError::Unauthorized.stratum_code(), "unauthorized worker"),
                )
                .to_value(),
            );
        }

        let difficulty = {
            let mut ctx = context.write().await;
            ctx.state = ConnectionState::Authorized;
            ctx.wallet = Some(wallet.clone());
            ctx.worker_name = worker.clone();
            if let Some(fixed) = parse_difficulty_hint(password) {
                let fixed = fixed.clamp(
                    self.config.vardiff.min_difficulty,
                    self.config.vardiff.max_difficulty,
                );
                ctx.difficulty = fixed;
                ctx.static_difficulty = true;
            }
            ctx.difficulty
        };

        tracing::info!(wallet = %wallet, worker = worker.as_deref().unwrap_or(""), "authorized");

        // Response, then difficulty, then the current job - in that order on
        // the wire.
        Self::send_json(
            context,
            StratumResponse::success(request.id.clone(), json!(true)).to_value(),
        )
        .await;
        if let Some(message) = self.set_difficulty_message(difficulty) {
            Self::send_json(context, message).await;
        }
        if let Some(job) = self.jobs.current_job().await {
            {
                let mut ctx = context.write().await;
                ctx.current_job_id = Some(job.id().to_string());
            }
            Self::send_json(context, job.notify_message(true, difficulty)).await;
        }

        Handled::Silent
    }

    async fn handle_submit(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        request: &StratumRequest,
    ) -> Handled {
        let (snapshot, worker_id, authorized, subscribed) = {
            let ctx = context.read().await;
            (
                ctx.snapshot(),
                ctx.worker_id().unwrap_or_else(|| ctx.connection_id.clone()),
                ctx.is_authorized(),
                ctx.is_subscribed(),
            )
        };

        if !subscribed {
            return self
                .reject(context, request.id.clone(), &worker_id, ShareError::NotSubscribed)
                .await;
        }
        if !authorized {
            return self
                .reject(context, request.id.clone(), &worker_id, ShareError::Unauthorized)
                .await;
        }

        let Some(job_id) = request.param_str(1).map(str::to_string) else {
            return self
                .reject(
                    context,
                    request.id.clone(),
                    &worker_id,
                    ShareError::Invalid("missing job id".to_string()),
                )
                .await;
        };

        let Some(job) = self.jobs.find_job(&job_id).await else {
            return self
                .reject(context, request.id.clone(), &worker_id, ShareError::Stale(job_id))
                .await;
        };

        let outcome = match &job {
            PoolJob::Equihash(j) => {
                let (ntime, extranonce2, solution) = (
                    request.param_str(2).unwrap_or(""),
                    request.param_str(3).unwrap_or(""),
                    request.param_str(4).unwrap_or(""),
                );
                j.process_share(&snapshot, ntime, extranonce2, solution)
            }
            PoolJob::Kaspa(j) => {
                let nonce = request.param_str(2).unwrap_or("");
                j.process_share(&snapshot, nonce).map(|share| (share, None))
            }
            PoolJob::Beam(_) => Err(ShareError::Other("job/dialect mismatch".to_string())),
        };

        match outcome {
            Ok((share, block_hex)) => {
                self.accept(context, &worker_id, &job_id, share, block_hex)
                    .await;
                Handled::Reply(
                    StratumResponse::success(request.id.clone(), json!(true)).to_value(),
                )
            }
            Err(error) => self.reject(context, request.id.clone(), &worker_id, error).await,
        }
    }

    async fn handle_beam_login(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        request: &StratumRequest,
    ) -> Handled {
        let api_key = request.field_str("api_key").unwrap_or("").trim().to_string();
        if api_key.is_empty() {
            tracing::warn!("beam login rejected: missing api_key");
            return Handled::Reply(beam_result(request.id.clone(), -32003, "Login failed"));
        }

        let (extranonce1, difficulty) = {
            let mut ctx = context.write().await;
            // Beam's login subsumes subscribe.
            ctx.state = ConnectionState::Authorized;
            ctx.wallet = Some(api_key.clone());
            (ctx.extranonce1.clone(), ctx.difficulty)
        };

        tracing::info!(wallet = %api_key, "beam login");

        Self::send_json(context, beam_login_ok(request.id.clone(), &extranonce1)).await;
        if let Some(job) = self.jobs.current_job().await {
            {
                let mut ctx = context.write().await;
                ctx.current_job_id = Some(job.id().to_string());
            }
            Self::send_json(context, job.notify_message(true, difficulty)).await;
        }

        Handled::Silent
    }

    async fn handle_beam_submit(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        request: &StratumRequest,
    ) -> Handled {
        let (snapshot, worker_id, authorized) = {
            let ctx = context.read().await;
            (
                ctx.snapshot(),
                ctx.worker_id().unwrap_or_else(|| ctx.connection_id.clone()),
                ctx.is_authorized(),
            )
        };

        if !authorized {
            return self
                .reject(context, request.id.clone(), &worker_id, ShareError::Unauthorized)
                .await;
        }

        // In the Beam dialect the message id is the job id.
        let job_id = match &request.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let nonce = request.field_str("nonce").unwrap_or("").to_string();
        let output = request.field_str("output").unwrap_or("").to_string();

        let Some(job) = self.jobs.find_job(&job_id).await else {
            return self
                .reject(context, request.id.clone(), &worker_id, ShareError::Stale(job_id))
                .await;
        };

        let outcome = match &job {
            PoolJob::Beam(j) => j.process_share(&snapshot, &nonce, &output),
            _ => Err(ShareError::Other("job/dialect mismatch".to_string())),
        };

        match outcome {
            Ok((share, block_hex)) => {
                self.accept(context, &worker_id, &job_id, share, block_hex)
                    .await;
                Handled::Reply(beam_result(request.id.clone(), 1, "accepted"))
            }
            Err(error) => self.reject(context, request.id.clone(), &worker_id, error).await,
        }
    }

    /// Accepted-share bookkeeping: stats, vardiff, forwarding. Lock is
    /// released before any notification goes out.
    async fn accept(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        worker_id: &str,
        job_id: &str,
        share: Share,
        block_hex: Option<String>,
    ) {
        let retarget = {
            let mut ctx = context.write().await;
            ctx.record_share(true);
            if ctx.static_difficulty {
                None
            } else {
                let now = Instant::now();
                let current = ctx.difficulty;
                match ctx.vardiff.on_share(now, true, current, &self.config.vardiff) {
                    Some(new_difficulty) => {
                        ctx.apply_retarget(new_difficulty);
                        Some((current, new_difficulty))
                    }
                    None => None,
                }
            }
        };

        if share.is_block_candidate {
            metrics::inc_block_candidates();
            tracing::info!(
                worker = %worker_id,
                job = %job_id,
                height = share.block_height,
                hash = share.block_hash.as_deref().unwrap_or(""),
                "block candidate found"
            );
        } else {
            tracing::debug!(worker = %worker_id, job = %job_id, difficulty = share.difficulty, "share accepted");
        }
        metrics::inc_accepted();

        let _ = self.share_tx.send(ShareEvent {
            share,
            block_hex,
            worker: worker_id.to_string(),
            job_id: job_id.to_string(),
        });

        if let Some((old, new)) = retarget {
            metrics::inc_vardiff_retarget();
            tracing::info!(worker = %worker_id, old, new, "vardiff retarget");
            self.send_retarget(context, new).await;
        }
    }

    async fn reject(
        &self,
        context: &Arc<RwLock<WorkerContext>>,
        id: Value,
        worker_id: &str,
        error: ShareError,
    ) -> Handled {
        {
            let mut ctx = context.write().await;
            ctx.record_share(false);
        }
        metrics::inc_rejected(rejection_label(&error));

        let peer = context.read().await.peer_addr;
        tracing::warn!(worker = %worker_id, peer = %peer, "share rejected: {error}");

        let response = match self.config.coin {
            CoinFamily::Beam => beam_result(id, error.beam_code(), error.to_string()),
            _ => StratumResponse::error(id, WireError::new(error.stratum_code(), error.to_string()))
                .to_value(),
        };
        Handled::Reply(response)
    }

    /// Family-appropriate initial-difficulty notification, or `None` when the
    /// family carries difficulty inside the job message instead (Beam).
    fn set_difficulty_message(&self, difficulty: f64) -> Option<Value> {
        match self.config.coin {
            CoinFamily::Equihash => {
                let target = difficulty_to_target(equihash::diff1(), difficulty);
                Some(json!({
                    "id": Value::Null,
                    "method": "mining.set_target",
                    "params": [target_to_hex(&target)],
                }))
            }
            CoinFamily::Kaspa => Some(json!({
                "id": Value::Null,
                "method": "mining.set_difficulty",
                "params": [difficulty],
            })),
            CoinFamily::Beam => None,
        }
    }

    /// Family-appropriate retarget notification. Enqueued immediately, so it
    /// reaches the wire ahead of any job notification broadcast afterwards.
    async fn send_retarget(&self, context: &Arc<RwLock<WorkerContext>>, difficulty: f64) {
        match self.config.coin {
            CoinFamily::Equihash => {
                let target = difficulty_to_target(equihash::diff1(), difficulty);
                Self::send_json(
                    context,
                    json!({
                        "id": Value::Null,
                        "method": "mining.set_target",
                        "params": [target_to_hex(&target)],
                    }),
                )
                .await;
            }
            CoinFamily::Kaspa => {
                Self::send_json(
                    context,
                    json!({
                        "id": Value::Null,
                        "method": "mining.set_difficulty",
                        "params": [difficulty],
                    }),
                )
                .await;
            }
            CoinFamily::Beam => {
                // Beam carries difficulty inside the job message.
                if let Some(job) = self.jobs.current_job().await {
                    Self::send_json(context, job.notify_message(false, difficulty)).await;
                }
            }
        }
    }

    async fn broadcast_job(&self, notification: JobNotification) {
        let connections: Vec<Arc<RwLock<WorkerContext>>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let mut sent = 0usize;
        for connection in &connections {
            let difficulty = {
                let ctx = connection.read().await;
                if !ctx.is_authorized() {
                    continue;
                }
                ctx.difficulty
            };

            Self::send_json(
                connection,
                notification.job.notify_message(notification.clean_jobs, difficulty),
            )
            .await;

            let mut ctx = connection.write().await;
            ctx.current_job_id = Some(notification.job.id().to_string());
            sent += 1;
        }

        metrics::inc_job_broadcasts();
        tracing::info!(
            job = notification.job.id(),
            clean = notification.clean_jobs,
            miners = sent,
            "job broadcast"
        );
    }

    /// Timer-driven downward retarget for connections that went quiet.
    async fn vardiff_sweep(&self) {
        let connections: Vec<Arc<RwLock<WorkerContext>>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };

        let now = Instant::now();
        for connection in &connections {
            let retarget = {
                let mut ctx = connection.write().await;
                if !ctx.is_authorized() || ctx.static_difficulty {
                    continue;
                }
                let current = ctx.difficulty;
                match ctx.vardiff.on_idle(now, current, &self.config.vardiff) {
                    Some(new_difficulty) => {
                        ctx.apply_retarget(new_difficulty);
                        Some(new_difficulty)
                    }
                    None => None,
                }
            };

            if let Some(new_difficulty) = retarget {
                metrics::inc_vardiff_retarget();
                tracing::info!(new = new_difficulty, "idle vardiff retarget");
                self.send_retarget(connection, new_difficulty).await;
            }
        }
    }

    async fn send_json(context: &Arc<RwLock<WorkerContext>>, message: Value) {
        let payload = match serde_json::to_string(&message) {
            Ok(s) => s + "\n",
            Err(_) => return,
        };
        let sender = { context.read().await.outbound.clone() };
        if let Some(tx) = sender {
            let _ = tx.send(payload);
        }
    }
}

fn rejection_label(error: &ShareError) -> &'static str {
    match error {
        ShareError::Stale(_) => "stale",
        ShareError::Duplicate => "duplicate",
        ShareError::LowDifficulty(_) => "low-difficulty",
        ShareError::Invalid(_) => "invalid",
        ShareError::Unauthorized => "unauthorized",
        ShareError::NotSubscribed => "not-subscribed",
        ShareError::Other(_) => "other",
    }
}
