//! Courier CLI
//!
//! Command-line interface for poking at a store and its queues by hand.

use std::time::Duration;

use clap::{Parser, Subcommand};
use courier::{Client, Command, Config, Connector, CourierError, Wait};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

/// Courier CLI
#[derive(Parser, Debug)]
#[command(name = "courier-cli")]
#[command(about = "Store client with reliable queues and RPC")]
#[command(version)]
struct Args {
    /// Store host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Store port
    #[arg(short, long, default_value = "6379")]
    port: u16,

    /// Keyspace to select
    #[arg(short = 'n', long, default_value = "0")]
    db: i64,

    /// AUTH credential
    #[arg(short = 'a', long)]
    password: Option<String>,

    /// Socket timeout in seconds
    #[arg(long)]
    socket_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run any command and print the reply
    Raw {
        /// Command name followed by its arguments
        #[arg(required = true)]
        words: Vec<String>,
    },

    /// Send a value to a queue
    Send {
        /// Destination queue
        queue: String,

        /// JSON value; anything that is not JSON is sent as a string
        value: String,

        /// Push for last-in first-out delivery
        #[arg(long)]
        lifo: bool,

        /// Signing secret
        #[arg(long)]
        secret: Option<String>,
    },

    /// Receive one envelope from a queue
    Receive {
        /// Queue to read
        queue: String,

        /// Seconds to wait; -1 does not block, 0 blocks forever
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        timeout: i64,

        /// Signing secret
        #[arg(long)]
        secret: Option<String>,
    },

    /// Call a function on a worker
    Call {
        /// Worker queue
        dst: String,

        /// Function name
        funcname: String,

        /// Positional arguments as JSON values
        args: Vec<String>,

        /// Seconds to wait for the answer
        #[arg(short, long, default_value = "10")]
        timeout: i64,
    },

    /// Serve a demo `echo` function
    Serve {
        /// Queue to serve on
        name: String,

        /// Stage requests until they are answered
        #[arg(long)]
        safe: bool,
    },

    /// Print events from channels and patterns
    Subscribe {
        /// Channels to subscribe to
        channels: Vec<String>,

        /// Patterns to subscribe to
        #[arg(long = "pattern")]
        patterns: Vec<String>,
    },
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,courier=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let mut builder = Config::builder()
        .host(&args.host)
        .port(args.port)
        .db(args.db);
    if let Some(password) = &args.password {
        builder = builder.password(password);
    }
    if let Some(secs) = args.socket_timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    let config = builder.build();

    tracing::debug!("Courier CLI v{} against {}", courier::VERSION, config.addr());

    if let Err(e) = run(config, args.command) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: Config, command: Commands) -> courier::Result<()> {
    match command {
        Commands::Raw { words } => {
            let mut client = Client::new(config);
            let command = Command::new(words[0].as_str()).args(&words[1..]);
            println!("{}", client.execute(command)?);
        }

        Commands::Send {
            queue,
            value,
            lifo,
            secret,
        } => {
            let mut builder = Connector::builder().fifo(!lifo);
            if let Some(secret) = secret {
                builder = builder.secret(secret);
            }
            let mut connector = builder.build(Client::new(config));
            let length = connector.send(&queue, parse_value(&value))?;
            println!("(integer) {}", length);
        }

        Commands::Receive {
            queue,
            timeout,
            secret,
        } => {
            let mut builder = Connector::builder();
            if let Some(secret) = secret {
                builder = builder.secret(secret);
            }
            let mut connector = builder.build(Client::new(config));
            match connector.receive_from(&queue, Wait::from(timeout))? {
                Some(envelope) => println!("{}", serde_json::to_string_pretty(&envelope)?),
                None => println!("(nil)"),
            }
        }

        Commands::Call {
            dst,
            funcname,
            args,
            timeout,
        } => {
            let mut connector = Connector::builder()
                .timeout(Wait::from(timeout))
                .build(Client::new(config));
            let args = args.iter().map(String::as_str).map(parse_value).collect();
            let result = connector.proxy(dst).call(&funcname, args)?;
            println!("{}", result);
        }

        Commands::Serve { name, safe } => {
            let mut connector = Connector::builder()
                .name(name)
                .safe(safe)
                .function("echo", |args, _kwargs| Ok(Value::Array(args.to_vec())))
                .build(Client::new(config));
            connector.worker(|| true)?;
        }

        Commands::Subscribe { channels, patterns } => {
            if channels.is_empty() && patterns.is_empty() {
                return Err(CourierError::Config("nothing to subscribe to".to_string()));
            }
            let mut client = Client::new(config);
            if !channels.is_empty() {
                client.subscribe(&channels)?;
            }
            if !patterns.is_empty() {
                client.psubscribe(&patterns)?;
            }
            for message in client.listen_messages() {
                let message = message?;
                println!(
                    "{} {} {}",
                    message.kind,
                    String::from_utf8_lossy(&message.channel),
                    message.data
                );
            }
        }
    }

    Ok(())
}

/// Read a command-line value as JSON, falling back to a plain string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
