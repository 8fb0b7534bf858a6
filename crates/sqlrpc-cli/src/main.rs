//! sqlrpc CLI — serve, call and inspect declarative RPC services.
//!
//! Reuses the same runtime (sqlrpc-core) and server bootstrap
//! (sqlrpc-server) that back the HTTP endpoint.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sqlrpc_cli::commands;

/// sqlrpc — declarative RPC services over SQL
#[derive(Parser)]
#[command(name = "sqlrpc", version, about = "sqlrpc — declarative RPC services over SQL")]
pub struct Cli {
    /// Path to the YAML settings file
    #[arg(long, global = true, env = "SQLRPC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server {
        /// Host to bind to
        #[arg(long, env = "SQLRPC_HOST", default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, env = "SQLRPC_PORT", default_value_t = 3210)]
        port: u16,
        /// Prefix the protocol is mounted under
        #[arg(long, env = "SQLRPC_BASE_PATH", default_value = "/api")]
        base_path: String,
    },

    /// Route one request in-process and print the response envelope
    Call {
        /// Request path, e.g. /v1/users/v1/queries/GetUser
        target: String,
        /// HTTP verb to route with
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Parameters as key=value; values are JSON (e.g. id=12 name='"ann"')
        params: Vec<String>,
    },

    /// List discovered services and their methods
    List {
        /// Also validate and compile every method
        #[arg(long)]
        validate: bool,
    },

    /// Run a text processor over a command file and print the result
    Preprocess {
        /// File containing command text
        file: PathBuf,
        /// Registered text processor name
        #[arg(long, default_value = "query-macros")]
        processor: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sqlrpc_core=warn,sqlrpc_server=info,sqlrpc_cli=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Some(Commands::Server {
            host,
            port,
            base_path,
        }) => commands::server::run(host, port, base_path, cli.config).await,

        Some(Commands::Call {
            target,
            method,
            params,
        }) => match commands::init_state(cli.config.as_deref()) {
            Ok(state) => commands::call::run(&state, &method, &target, &params).await,
            Err(e) => Err(e),
        },

        Some(Commands::List { validate }) => match commands::init_state(cli.config.as_deref()) {
            Ok(state) => commands::list::run(&state, validate).await,
            Err(e) => Err(e),
        },

        Some(Commands::Preprocess { file, processor }) => {
            commands::preprocess::run(&file, &processor).await
        }

        None => {
            // No subcommand — show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
