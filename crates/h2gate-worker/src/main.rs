use clap::Parser;
use h2gate_worker::{resolve_user, Config, RelayService, WorkerProcess, WorkerProcessConfig};
use std::process;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// h2gate worker process - accepts connections on sockets inherited from the
/// supervising parent and relays them to the backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "h2gate-worker")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "h2gate.json")]
    config_path: String,

    /// Inherited IPv4 listening socket descriptor (negative when absent)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    server_fd: i32,

    /// Inherited IPv6 listening socket descriptor (negative when absent)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    server_fd6: i32,

    /// Inherited IPC read descriptor; the parent holds the write end
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    ipc_fd: i32,

    /// Validate configuration and exit (doesn't start the worker)
    #[arg(short, long)]
    validate: bool,
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");

            if cli.validate {
                eprintln!("Configuration validation failed!");
                eprintln!("   Error: {}", e);
                process::exit(1);
            }

            error!(path = %cli.config_path, error = %e, "Could not load configuration");
            process::exit(1);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Workers: {}", config.num_worker);
        println!("  Backend: {}", config.backend);
        println!("  TLS: {}", if config.upstream_no_tls { "off" } else { "on" });
        if !config.upstream_no_tls {
            println!("  Ticket key cipher: {}", config.tls_ticket_key_cipher);
            if let Some(ref host) = config.tls_ticket_key_memcached_host {
                println!("  Ticket key cache: {}", host);
            } else if !config.tls_ticket_key_files.is_empty() {
                println!("  Ticket key files: {}", config.tls_ticket_key_files.len());
            } else {
                println!("  Ticket keys: auto-rotated");
            }
        }
        if let Some(ref user) = config.user {
            match resolve_user(user) {
                Ok((uid, gid)) => println!("  Run as: {} (uid={}, gid={})", user, uid, gid),
                Err(e) => {
                    eprintln!("Configuration validation failed!");
                    eprintln!("   Error: {}", e);
                    process::exit(1);
                }
            }
        }
        process::exit(0);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    init_tracing(log_level);

    info!("h2gate worker process v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config = %cli.config_path,
        server_fd = cli.server_fd,
        server_fd6 = cli.server_fd6,
        ipc_fd = cli.ipc_fd,
        "Starting"
    );

    let wpconf = WorkerProcessConfig {
        server_fd: cli.server_fd,
        server_fd6: cli.server_fd6,
        ipc_fd: cli.ipc_fd,
    };

    let service = Arc::new(RelayService::new(config.backend.clone()));

    match WorkerProcess::new(config, wpconf, service).run() {
        Ok(()) => info!("Shutdown complete"),
        Err(e) => {
            error!(error = %e, "Worker process failed");
            process::exit(1);
        }
    }
}
