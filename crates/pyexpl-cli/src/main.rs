//! pyexpl CLI - Command line interface for bounded sandboxed execution

use clap::{Parser, Subcommand};
use pyexpl_core::config::default_socket_path;
use pyexpl_core::protocol::{self, ExecuteRequest, Request, Response};
use pyexpl_core::{ExecutionResult, Executor, RunnerRegistry, Settings};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "pyexpl")]
#[command(author, version, about = "Run untrusted snippets under a sandbox with bounded output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code through the daemon
    Exec {
        /// Code to execute (or - for stdin)
        code: String,

        /// Runner id
        #[arg(short, long, default_value = "python3.13")]
        runner: String,

        /// Socket path (defaults to PYEXPL_SOCKET env var or /run/pyexpl/pyexpl.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Print a JSON object instead of raw output
        #[arg(long)]
        json: bool,
    },

    /// Run code directly (without daemon)
    Run {
        /// Code to execute (or - for stdin)
        code: String,

        /// Runner id
        #[arg(short, long, default_value = "python3.13")]
        runner: String,

        /// Configuration file (defaults to PYEXPL_CONFIG env var, then built-in defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print a JSON object instead of raw output
        #[arg(long)]
        json: bool,
    },

    /// List available runners
    Runners {
        /// Socket path (defaults to PYEXPL_SOCKET env var or /run/pyexpl/pyexpl.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// List the built-in runner table without asking the daemon
        #[arg(long)]
        local: bool,
    },

    /// Get daemon status
    Status {
        /// Socket path (defaults to PYEXPL_SOCKET env var or /run/pyexpl/pyexpl.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },

    /// Ping the daemon
    Ping {
        /// Socket path (defaults to PYEXPL_SOCKET env var or /run/pyexpl/pyexpl.sock)
        #[arg(short, long)]
        socket: Option<PathBuf>,
    },
}

fn main() -> CliResult<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pyexpl=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Exec {
            code,
            runner,
            socket,
            json,
        } => {
            let code = read_code(&code)?;
            let socket = socket.unwrap_or_else(default_socket_path);
            tracing::debug!(socket = ?socket, runner = %runner, "executing via daemon");

            match request(&socket, &Request::Execute(ExecuteRequest { code, runner }))? {
                Response::Execute(resp) => match resp.result {
                    Some(result) => report(&result, json),
                    None => Err(resp.error.unwrap_or_else(|| "execution failed".into()).into()),
                },
                other => Err(unexpected(&other)),
            }
        }

        Commands::Run {
            code,
            runner,
            config,
            json,
        } => {
            let code = read_code(&code)?;
            let executor = Executor::from_settings(Settings::load(config.as_deref())?)?;
            report(&executor.execute(&code, &runner)?, json)
        }

        Commands::Runners { socket, local } => {
            let ids: Vec<String> = if local {
                RunnerRegistry::standard()?
                    .ids()
                    .into_iter()
                    .map(String::from)
                    .collect()
            } else {
                let socket = socket.unwrap_or_else(default_socket_path);
                match request(&socket, &Request::Runners)? {
                    Response::Runners { ids } => ids,
                    other => return Err(unexpected(&other)),
                }
            };
            for id in ids {
                println!("{id}");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Status { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match request(&socket, &Request::Status)? {
                Response::Status {
                    in_flight,
                    completed,
                    failed,
                } => {
                    println!("in flight: {in_flight}");
                    println!("completed: {completed}");
                    println!("failed:    {failed}");
                    Ok(ExitCode::SUCCESS)
                }
                other => Err(unexpected(&other)),
            }
        }

        Commands::Ping { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            match request(&socket, &Request::Ping)? {
                Response::Pong => {
                    println!("pong");
                    Ok(ExitCode::SUCCESS)
                }
                other => Err(unexpected(&other)),
            }
        }
    }
}

/// `-` reads the snippet from stdin
fn read_code(arg: &str) -> CliResult<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut code = String::new();
    std::io::stdin().read_to_string(&mut code)?;
    Ok(code)
}

fn request(socket: &Path, request: &Request) -> CliResult<Response> {
    let mut stream = UnixStream::connect(socket)
        .map_err(|e| format!("failed to connect to {}: {e}", socket.display()))?;
    protocol::write_frame(&mut stream, request)?;
    Ok(protocol::read_frame(&mut stream)?)
}

fn unexpected(response: &Response) -> Box<dyn std::error::Error> {
    match response {
        Response::Error { message } => message.clone().into(),
        other => format!("unexpected response: {other:?}").into(),
    }
}

/// Print the result and mirror its exit status
fn report(result: &ExecutionResult, json: bool) -> CliResult<ExitCode> {
    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(result))?);
    } else {
        std::io::stdout().write_all(&result.stdout)?;
        std::io::stderr().write_all(&result.stderr)?;
    }
    Ok(ExitCode::from(
        u8::try_from(result.exit_code).unwrap_or(u8::MAX),
    ))
}

/// The response shape web clients expect
fn to_json(result: &ExecutionResult) -> serde_json::Value {
    serde_json::json!({
        "stdout": result.stdout_str(),
        "stderr": result.stderr_str(),
        "exit_code": result.exit_code,
        "truncated": result.truncated,
        "timed_out": result.timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_python() {
        let cli = Cli::try_parse_from(["pyexpl", "run", "print(1)"]).unwrap();
        match cli.command {
            Commands::Run { runner, json, .. } => {
                assert_eq!(runner, "python3.13");
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn json_shape_matches_web_response() {
        let result = ExecutionResult {
            exit_code: 143,
            stdout: b"1111\n[Output truncated]".to_vec(),
            truncated: true,
            ..ExecutionResult::default()
        };
        let value = to_json(&result);

        assert_eq!(value["stdout"], "1111\n[Output truncated]");
        assert_eq!(value["stderr"], "");
        assert_eq!(value["exit_code"], 143);
        assert_eq!(value["truncated"], true);
    }

    #[test]
    fn runners_asks_the_daemon_unless_local() {
        let cli = Cli::try_parse_from(["pyexpl", "runners", "-s", "/tmp/p.sock"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Runners { socket: Some(_), local: false }
        ));

        let cli = Cli::try_parse_from(["pyexpl", "runners", "--local"]).unwrap();
        assert!(matches!(cli.command, Commands::Runners { local: true, .. }));
    }

    #[test]
    fn literal_code_is_passed_through() {
        assert_eq!(read_code("print(1)").unwrap(), "print(1)");
    }
}
