//! Unix socket server

use crate::stats::ExecutionStats;
use pyexpl_core::protocol::{self, ExecuteRequest, ExecuteResponse, Request, Response};
use pyexpl_core::Executor;
use std::future::Future;
use std::sync::Arc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// State shared by every connection
#[derive(Debug, Clone)]
pub struct State {
    executor: Arc<Executor>,
    stats: Arc<ExecutionStats>,
}

impl State {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor: Arc::new(executor),
            stats: Arc::new(ExecutionStats::default()),
        }
    }
}

/// Run the daemon server until `shutdown` resolves
pub async fn run(
    listener: UnixListener,
    state: State,
    shutdown: impl Future<Output = ()>,
) -> Result<(), BoxError> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                let state = state.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        tracing::error!(error = %e, "connection error");
                    }
                });
            }
            () = &mut shutdown => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
        }
    }

    Ok(())
}

/// Handle a single client connection
async fn handle_connection(mut stream: UnixStream, state: State) -> Result<(), BoxError> {
    let mut buf = vec![0u8; 64 * 1024]; // 64KB buffer

    loop {
        // Read length prefix (4 bytes, big-endian)
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            break; // Client disconnected
        }
        let len = protocol::check_frame_len(u32::from_be_bytes(len_buf))?;

        if len > buf.len() {
            buf.resize(len, 0);
        }

        stream.read_exact(&mut buf[..len]).await?;

        let response = match protocol::decode::<Request>(&buf[..len]) {
            Ok(request) => {
                tracing::debug!(?request, "received request");
                handle_request(request, &state).await
            }
            Err(e) => Response::Error {
                message: format!("malformed request: {e}"),
            },
        };

        let response_bytes = protocol::encode(&response)?;
        let len_bytes = protocol::frame_len(response_bytes.len())?.to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&response_bytes).await?;
    }

    Ok(())
}

/// Handle a single request
async fn handle_request(request: Request, state: &State) -> Response {
    match request {
        Request::Execute(req) => execute(req, state).await,
        Request::Runners => Response::Runners {
            ids: state
                .executor
                .registry()
                .ids()
                .into_iter()
                .map(String::from)
                .collect(),
        },
        Request::Status => {
            let stats = state.stats.snapshot();
            Response::Status {
                in_flight: stats.in_flight,
                completed: stats.completed,
                failed: stats.failed,
            }
        }
        Request::Ping => Response::Pong,
    }
}

/// Each execution supervises its child on a blocking thread of its own.
async fn execute(req: ExecuteRequest, state: &State) -> Response {
    let executor = Arc::clone(&state.executor);
    state.stats.begin();

    let outcome =
        tokio::task::spawn_blocking(move || executor.execute(&req.code, &req.runner)).await;

    match outcome {
        Ok(Ok(result)) => {
            state.stats.end(true);
            Response::Execute(ExecuteResponse::ok(result))
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "execution failed");
            state.stats.end(false);
            Response::Execute(ExecuteResponse::failed(&e))
        }
        Err(e) => {
            tracing::error!(error = %e, "execution task panicked");
            state.stats.end(false);
            Response::Error {
                message: format!("execution task failed: {e}"),
            }
        }
    }
}
