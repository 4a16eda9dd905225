#![allow(dead_code)]

//! Shared test fixtures: a scripted in-memory transport and a mock editor
//! host listening on a local TCP port.

use async_trait::async_trait;
use cmdflow_core::config::CmdflowConfig;
use cmdflow_core::execution::{Connection, Transport};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// How the fake host answers one request
#[derive(Debug, Clone)]
pub enum HostReply {
    Json(Value),
    Delayed(Duration, Value),
    /// Close the connection without answering
    Hangup,
    /// Panic inside the client-side connection (in-memory transport only)
    Panic(&'static str),
}

pub fn ok(result: Value) -> HostReply {
    HostReply::Json(json!({"success": true, "result": result}))
}

pub fn fail(message: &str) -> HostReply {
    HostReply::Json(json!({"success": false, "error": message}))
}

type Handler = Arc<dyn Fn(&str, &Value) -> HostReply + Send + Sync>;

/// Every request the fake host received, in arrival order
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<(String, Value)>>>);

impl RequestLog {
    fn push(&self, operation: String, params: Value) {
        self.0.lock().push((operation, params));
    }

    pub fn operations(&self) -> Vec<String> {
        self.0.lock().iter().map(|(op, _)| op.clone()).collect()
    }

    pub fn params(&self, index: usize) -> Option<Value> {
        self.0.lock().get(index).map(|(_, params)| params.clone())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

fn parse_request(bytes: &[u8]) -> Option<(String, Value)> {
    let request: Value = serde_json::from_slice(bytes).ok()?;
    let operation = request.get("type")?.as_str()?.to_string();
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    Some((operation, params))
}

/// Engine configuration tuned for fast tests
pub fn test_config() -> CmdflowConfig {
    let mut config = CmdflowConfig::default();
    config.remote.warm_pool_on_start = false;
    config.remote.connection_timeout_ms = 1_000;
    config.remote.command_timeout_ms = 2_000;
    config.retry.max_retries = 0;
    config.retry.backoff_base_ms = 1;
    config.workflow.step_timeout_ms = 5_000;
    config
}

/// In-memory transport answering through a handler
#[derive(Clone)]
pub struct ScriptedTransport {
    handler: Handler,
    log: RequestLog,
    connects: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("requests", &self.log.len())
            .field("connects", &self.connects())
            .finish()
    }
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&str, &Value) -> HostReply + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Arc::new(handler),
            log: RequestLog::default(),
            connects: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Succeeds for everything, echoing the operation name
    pub fn echo() -> Arc<Self> {
        Self::new(|operation, params| ok(json!({"operation": operation, "params": params})))
    }

    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> io::Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            handler: self.handler.clone(),
            log: self.log.clone(),
            pending: None,
        }))
    }

    fn describe(&self) -> String {
        "memory://scripted".to_string()
    }
}

struct ScriptedConnection {
    handler: Handler,
    log: RequestLog,
    pending: Option<Vec<u8>>,
}

impl std::fmt::Debug for ScriptedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedConnection")
            .field("pending", &self.pending.as_ref().map(Vec::len))
            .finish()
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let (operation, params) = parse_request(bytes)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad request envelope"))?;
        self.log.push(operation.clone(), params.clone());

        self.pending = match (self.handler)(&operation, &params) {
            HostReply::Json(reply) => Some(reply.to_string().into_bytes()),
            HostReply::Delayed(delay, reply) => {
                tokio::time::sleep(delay).await;
                Some(reply.to_string().into_bytes())
            }
            HostReply::Hangup => None,
            HostReply::Panic(message) => panic!("{message}"),
        };
        Ok(())
    }

    async fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        match self.pending.take() {
            Some(bytes) => {
                buf.extend_from_slice(&bytes);
                Ok(bytes.len())
            }
            None => Ok(0),
        }
    }
}

/// Newline-delimited JSON host on 127.0.0.1
pub struct MockEditorHost {
    address: SocketAddr,
    log: RequestLog,
    accepted: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl MockEditorHost {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> HostReply + Send + Sync + 'static,
    {
        Self::serve(handler, false).await
    }

    /// Host that closes every connection after writing one reply
    pub async fn start_closing<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> HostReply + Send + Sync + 'static,
    {
        Self::serve(handler, true).await
    }

    async fn serve<F>(handler: F, close_after_reply: bool) -> Self
    where
        F: Fn(&str, &Value) -> HostReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let log = RequestLog::default();
        let accepted = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let (task_log, task_accepted, token) = (log.clone(), accepted.clone(), shutdown.clone());
        tokio::spawn(async move {
            loop {
                let socket = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, _)) => socket,
                        Err(_) => break,
                    },
                };
                task_accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(
                    socket,
                    handler.clone(),
                    task_log.clone(),
                    close_after_reply,
                ));
            }
        });

        Self {
            address,
            log,
            accepted,
            shutdown,
        }
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn log(&self) -> RequestLog {
        self.log.clone()
    }

    /// Number of TCP connections accepted so far
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> CmdflowConfig {
        let mut config = test_config();
        config.remote.host = self.address.ip().to_string();
        config.remote.port = self.port();
        config
    }
}

impl Drop for MockEditorHost {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve_connection(socket: TcpStream, handler: Handler, log: RequestLog, close_after_reply: bool) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Some((operation, params)) = parse_request(line.as_bytes()) else {
            return;
        };
        log.push(operation.clone(), params.clone());

        let reply = match handler(&operation, &params) {
            HostReply::Json(reply) => reply,
            HostReply::Delayed(delay, reply) => {
                tokio::time::sleep(delay).await;
                reply
            }
            HostReply::Hangup | HostReply::Panic(_) => return,
        };
        if writer
            .write_all(format!("{reply}\n").as_bytes())
            .await
            .is_err()
        {
            return;
        }
        if close_after_reply {
            return;
        }
    }
}

/// A local port with nothing listening on it
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
