//! Runs one side of an ARQ session over TCP.
//!
//! ```text
//! cargo run --example arq_peer -- server --addr 127.0.0.1:9000 --window-size 3
//! cargo run --example arq_peer -- client --addr 127.0.0.1:9000 --mode selective-repeat --drop 1 "ABCDEFGHIJKL"
//! ```

use std::time::Duration;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use rustarq::config::{ClientConfig, EncryptionConfig, ServerConfig, TransferConfig};
use rustarq::fault_injection::FaultPlan;
use rustarq::packet::OperationMode;
use rustarq::session::Session;

#[derive(Parser, Debug)]
#[command(about = "ARQ (Go-Back-N / Selective Repeat) peer over TCP")]
struct Args {
    #[command(subcommand)]
    role: RoleArgs,

    /// log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum RoleArgs {
    /// listen for a single client and print the messages it sends
    Server {
        #[arg(long, default_value = "127.0.0.1:9000")]
        addr: String,
        #[arg(long, default_value_t = 5)]
        window_size: u32,
        #[arg(long, default_value_t = 64 * 1024)]
        max_message_size: u64,
        #[arg(long)]
        no_encryption: bool,
        #[command(flatten)]
        transfer: TransferArgs,
    },
    /// connect to a server and send messages
    Client {
        #[arg(long, default_value = "127.0.0.1:9000")]
        addr: String,
        #[arg(long, value_enum, default_value_t = Mode::GoBackN)]
        mode: Mode,
        #[arg(long, default_value_t = 50)]
        max_message_size: u64,
        /// Caesar cipher shift
        #[arg(long, conflicts_with = "secret")]
        caesar: Option<u8>,
        /// shared secret to derive an AES-256-GCM key from
        #[arg(long)]
        secret: Option<String>,
        #[command(flatten)]
        transfer: TransferArgs,
        messages: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct TransferArgs {
    #[arg(long, default_value_t = 4)]
    payload_unit_size: usize,
    #[arg(long, default_value_t = 1000)]
    timeout_millis: u64,
    /// 0 means unlimited
    #[arg(long, default_value_t = 16)]
    max_retransmissions: u32,
    /// sequence numbers to drop on first transmission
    #[arg(long, value_delimiter = ',')]
    drop: Vec<u64>,
    /// sequence numbers to send with a corrupted checksum on first transmission
    #[arg(long, value_delimiter = ',')]
    corrupt: Vec<u64>,
}

impl TransferArgs {
    fn to_config(&self) -> TransferConfig {
        let mut fault_plan = FaultPlan::none();
        for &seq in &self.drop {
            fault_plan = fault_plan.drop_seq(seq);
        }
        for &seq in &self.corrupt {
            fault_plan = fault_plan.corrupt_seq(seq);
        }

        let mut config = TransferConfig::new();
        config.payload_unit_size = self.payload_unit_size;
        config.retransmission_timeout = Duration::from_millis(self.timeout_millis);
        config.max_retransmissions = if self.max_retransmissions == 0 { None } else { Some(self.max_retransmissions) };
        config.fault_plan = fault_plan;
        config
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    GoBackN,
    SelectiveRepeat,
}

impl From<Mode> for OperationMode {
    fn from(value: Mode) -> Self {
        match value {
            Mode::GoBackN => OperationMode::GoBackN,
            Mode::SelectiveRepeat => OperationMode::SelectiveRepeat,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .try_init()
        .ok();

    match args.role {
        RoleArgs::Server { addr, window_size, max_message_size, no_encryption, transfer } => {
            let mut config = ServerConfig::new();
            config.window_size = window_size;
            config.max_message_size = max_message_size;
            config.allow_encryption = !no_encryption;
            config.transfer = transfer.to_config();

            let listener = TcpListener::bind(&addr).await?;
            info!("listening on {}", addr);
            let mut session = Session::accept(&listener, config).await?;

            while let Some(message) = session.next_message().await {
                match message {
                    Ok(message) => println!("{}", message),
                    Err(e) => warn!("session ended with an error: {}", e),
                }
            }
        }
        RoleArgs::Client { addr, mode, max_message_size, caesar, secret, transfer, messages } => {
            let mut config = ClientConfig::new();
            config.operation_mode = mode.into();
            config.max_message_size = max_message_size;
            config.encryption = match (caesar, secret) {
                (Some(shift), _) => EncryptionConfig::Caesar { shift },
                (None, Some(secret)) => EncryptionConfig::aes_from_shared_secret(secret.as_bytes()),
                (None, None) => EncryptionConfig::Disabled,
            };
            config.transfer = transfer.to_config();

            let session = Session::connect(&addr, config).await?;
            for message in &messages {
                let report = session.send_message(message).await?;
                info!("sent {:?}: {} fragments, {} transmissions, retransmitted {:?}, took {:?}",
                    message, report.fragments, report.transmissions, report.retransmitted, report.elapsed);
            }
            session.close().await?;
        }
    }
    Ok(())
}
