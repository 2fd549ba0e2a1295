use clap::Parser;
use clap_derive::Parser;
use hwudp::bulk::BulkChannel;
use hwudp::bytewise::BytewiseChannel;
use hwudp::config::ChannelConfig;
use hwudp::hardware::host::HostSockets;
use hwudp::registry::SocketRegistry;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;
use tracing::{info, Level};

/// Echoes every datagram received on `port` back to its sender, running the channels on the
///  host's network stack instead of a socket chip
#[derive(Parser)]
struct Args {
    port: u16,

    /// local port for sending the replies
    #[clap(long, default_value_t = 0)]
    reply_port: u16,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let config = ChannelConfig {
        rx_packet_capacity: 1472,
        tx_packet_capacity: 1472,
        ..ChannelConfig::default_w5100()
    };

    let hardware = Arc::new(HostSockets::new(config.header_overhead));
    let registry = SocketRegistry::new(4);

    let mut receiver = BytewiseChannel::new(hardware.clone(), registry.clone(), config.clone())?;
    let mut sender = BulkChannel::new(hardware.clone(), registry.clone(), config)?;
    receiver.begin(args.port)?;
    sender.begin(args.reply_port)?;
    info!("echoing UDP datagrams on port {}", args.port);

    let mut payload = Vec::new();
    loop {
        if receiver.available()? == 0 {
            sleep(Duration::from_millis(10));
            continue;
        }

        let from = receiver.sender_address();
        payload.clear();
        while let Some(b) = receiver.read() {
            payload.push(b);
        }

        let sent = sender.send_datagram(&payload, from)?;
        info!("echoed {} bytes to {:?}", sent, from);
    }
}
