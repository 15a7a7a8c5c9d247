//! # endpoint
//!
//! Command-line front end for running and probing endpoints.
//!
//! ```bash
//! endpoint serve                       # TCP responder on server.address
//! endpoint serve --unix /tmp/ep.sock   # Unix domain socket responder
//! endpoint connect 127.0.0.1:8768      # handshake and ping
//! endpoint resolve localhost seed.example.com:9000
//! endpoint config > endpoint.toml
//! ```

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use endpoint_protocol::config::NetworkConfig;
use endpoint_protocol::protocol::instance::{InstanceFlavor, InstanceType};
use endpoint_protocol::protocol::message::{Message, Outcome};
use endpoint_protocol::protocol::HandlerSpec;
use endpoint_protocol::resolver::Resolver;
use endpoint_protocol::transport::{tcp, EndpointContext};
use endpoint_protocol::utils::logging::init_logging;
use endpoint_protocol::utils::metrics::global_metrics;
use endpoint_protocol::{ProtocolError, Result};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "endpoint", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (v: debug, vv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections until CTRL+C
    Serve {
        /// Listen address, overrides server.address
        #[arg(long)]
        address: Option<String>,

        /// Serve on a Unix domain socket instead of TCP
        #[arg(long, value_name = "PATH")]
        unix: Option<PathBuf>,
    },
    /// Open a session with a server and ping it
    Connect {
        /// Server target, overrides client.address
        target: Option<String>,

        #[arg(long, value_enum, default_value_t = Kind::Client)]
        instance: Kind,

        #[arg(long, value_enum, default_value_t = Flavor::Lifegem)]
        flavor: Flavor,

        /// Number of pings to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Resolve peer targets to socket addresses
    Resolve {
        #[arg(required = true)]
        targets: Vec<String>,
    },
    /// Print the default configuration as TOML
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Agent,
    Client,
}

impl From<Kind> for InstanceType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Agent => InstanceType::Agent,
            Kind::Client => InstanceType::Client,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Flavor {
    Vanilla,
    Ascetic,
    Lifegem,
    Soapstone,
    Lockstone,
}

impl From<Flavor> for InstanceFlavor {
    fn from(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Vanilla => InstanceFlavor::Vanilla,
            Flavor::Ascetic => InstanceFlavor::Ascetic,
            Flavor::Lifegem => InstanceFlavor::Lifegem,
            Flavor::Soapstone => InstanceFlavor::Soapstone,
            Flavor::Lockstone => InstanceFlavor::Lockstone,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Config = cli.command {
        println!("{}", NetworkConfig::example_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => NetworkConfig::from_file(path)?,
        None => NetworkConfig::default(),
    };
    config.apply_env();
    match cli.verbose {
        0 => {}
        1 => config.logging.log_level = Level::DEBUG,
        _ => config.logging.log_level = Level::TRACE,
    }

    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Serve { address, unix } => {
            if let Some(address) = address {
                config.server.address = address;
            }
            serve(config, unix).await
        }
        Command::Connect {
            target,
            instance,
            flavor,
            count,
        } => {
            config.instance.instance = instance.into();
            config.instance.flavor = flavor.into();
            if let Some(target) = target {
                config.client.address = target;
            }
            connect(config, count).await
        }
        Command::Resolve { targets } => resolve(config, &targets).await,
        Command::Config => Ok(()),
    }
}

async fn serve(mut config: NetworkConfig, unix: Option<PathBuf>) -> Result<()> {
    config.instance.instance = InstanceType::Server;
    config.validate_strict()?;

    let ctx = EndpointContext::from_config(config);
    ctx.dispatcher.register(HandlerSpec::new("ECHO"), |ctx| {
        let reply = match &ctx.envelope.message {
            Message::Custom { payload, .. } => Message::custom("ECHO", payload.clone()),
            _ => Message::Outcome(Outcome::failure("ECHO expects a custom payload")),
        };
        Ok(Some(reply))
    })?;

    let served = match unix {
        #[cfg(unix)]
        Some(path) => endpoint_protocol::transport::local::start_server(ctx, path).await,
        #[cfg(not(unix))]
        Some(_) => Err(ProtocolError::ConfigError(
            "Unix domain sockets are not available on this platform".into(),
        )),
        None => tcp::start_server(ctx).await,
    };

    global_metrics().log_metrics();
    served
}

async fn connect(config: NetworkConfig, count: u32) -> Result<()> {
    config.validate_strict()?;
    let target = config.client.address.clone();

    let ctx = EndpointContext::from_config(config);
    let conn = tcp::connect(&ctx, &target).await?;
    let remote = conn.remote().ok_or(ProtocolError::ConnectionClosed)?;
    println!(
        "connected to {} (server sid {}, local sid {})",
        conn.peer(),
        remote.sid,
        conn.local_sid()
    );

    for seq in 1..=count {
        let started = Instant::now();
        let reply = conn.request(Message::Ping).await?;
        println!(
            "{} from sid {}: seq={} time={:.2?}",
            reply.message.opcode(),
            reply.from,
            seq,
            started.elapsed()
        );
    }

    let traffic = conn.traffic();
    conn.close().await;
    info!(
        bytes_read = traffic.bytes_read,
        bytes_written = traffic.bytes_written,
        "Connection closed"
    );
    Ok(())
}

async fn resolve(config: NetworkConfig, targets: &[String]) -> Result<()> {
    let resolver = Resolver::new(config.resolver);
    let mut failed = 0;

    for target in targets {
        match resolver.resolve(target).await {
            Ok(addrs) => {
                let list: Vec<String> = addrs.iter().map(ToString::to_string).collect();
                println!("{target}: {}", list.join(", "));
            }
            Err(e) => {
                failed += 1;
                eprintln!("{target}: {e}");
            }
        }
    }

    if failed == targets.len() {
        return Err(ProtocolError::ResolveError(targets.join(", ")));
    }
    Ok(())
}
