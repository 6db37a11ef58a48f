use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::BufReader;
use tracing::Level;

use ipk24chat_client::client::Client;
use ipk24chat_client::config::{ClientConfig, TransportKind};

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Tcp,
    Udp,
}

#[derive(Parser)]
#[command(name = "ipk24chat-client", about = "Terminal chat client speaking IPK24-CHAT over TCP or UDP")]
struct Args {
    /// transport protocol to use
    #[arg(short = 't', value_enum)]
    transport: TransportArg,

    /// server IPv4 address or host name
    #[arg(short = 's')]
    server: String,

    /// server port
    #[arg(short = 'p', default_value_t = 4567)]
    port: u16,

    /// UDP confirmation timeout in milliseconds
    #[arg(short = 'd', default_value_t = 250)]
    timeout: u64,

    /// maximum number of UDP retransmissions
    #[arg(short = 'r', default_value_t = 3)]
    max_retransmissions: u32,

    #[arg(long, default_value_t = false)]
    verbose: bool,

    #[arg(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::WARN,
    };

    // diagnostics go to stderr so protocol output on stdout stays clean
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let config = ClientConfig {
        transport: match args.transport {
            TransportArg::Tcp => TransportKind::Tcp,
            TransportArg::Udp => TransportKind::Udp,
        },
        server: args.server,
        port: args.port,
        confirm_timeout: Duration::from_millis(args.timeout),
        max_retransmissions: args.max_retransmissions,
    };

    // startup failure: no session was established, nothing to tear down
    let mut client = match Client::connect(&config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("ERR: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let stdin = BufReader::new(tokio::io::stdin());
    if client.run(stdin).await {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
