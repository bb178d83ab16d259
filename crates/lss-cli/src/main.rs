//! LSS protocol command-line tools.
//!
//! This CLI provides tools for:
//! - Decoding captured frames (any family, mesh-wrapped or bare)
//! - Computing the protocol CRC over arbitrary bytes
//! - Simulating a base station plus a fleet of nodes in-process

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lss_core::link::{FakeClock, LoopbackMedium};
use lss_core::mesh::{MeshHeader, MESH_HEADER_SIZE};
use lss_core::node::{KvStore, MemoryKvStore, NodeRuntime, SimulatedSensor};
use lss_core::station::{CommandQueue, NodeRegistry, StationConfig, StationManager};
use lss_core::wire::{
    crc16, detect_frame, AckPacket, CommandPacket, FrameKind, LegacyPacket, MultiSensorPacket,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(name = "lss")]
#[command(author, version, about = "LSS LoRa sensor network tools", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a captured frame from hex bytes
    Decode {
        /// Frame bytes as hex (spaces and 0x prefixes tolerated)
        hex: String,
    },

    /// Compute CRC-16/CCITT-FALSE over hex bytes
    Crc {
        /// Input bytes as hex
        hex: String,
    },

    /// Run an in-process station + fleet simulation
    Simulate {
        /// Number of client nodes
        #[arg(long, default_value = "3")]
        nodes: u8,

        /// Simulation steps (one second of node time each)
        #[arg(long, default_value = "120")]
        steps: u32,

        /// Telemetry interval programmed into the nodes (ms)
        #[arg(long, default_value = "10000")]
        interval: u32,

        /// Enable mesh framing on the simulated nodes
        #[arg(long)]
        mesh: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Decode { hex } => decode(&hex),
        Commands::Crc { hex } => {
            let bytes = parse_hex(&hex)?;
            println!("0x{:04X}", crc16(&bytes));
            Ok(())
        }
        Commands::Simulate {
            nodes,
            steps,
            interval,
            mesh,
        } => simulate(nodes, steps, interval, mesh),
    }
}

fn parse_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input
        .split_whitespace()
        .map(|chunk| chunk.trim_start_matches("0x"))
        .collect();
    if cleaned.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .with_context(|| format!("bad hex at offset {i}"))
        })
        .collect()
}

fn decode(hex: &str) -> Result<()> {
    let bytes = parse_hex(hex)?;

    // Mesh-wrapped frames first: their leading type byte can never be an
    // LSS sync byte
    let payload = if detect_frame(&bytes).is_none() {
        match MeshHeader::from_bytes(&bytes) {
            Some(hdr) => {
                println!("Mesh header:");
                println!("  type      {:?}", hdr.packet_type);
                println!("  source    {}", hdr.source);
                println!("  dest      {}", hdr.dest);
                println!("  next hop  {}", hdr.next_hop);
                println!("  prev hop  {}", hdr.prev_hop);
                println!("  hops      {} (ttl {})", hdr.hop_count, hdr.ttl);
                println!("  sequence  {}", hdr.sequence);
                if bytes.len() == MESH_HEADER_SIZE {
                    return Ok(());
                }
                &bytes[MESH_HEADER_SIZE..]
            }
            None => &bytes[..],
        }
    } else {
        &bytes[..]
    };

    match detect_frame(payload) {
        Some(FrameKind::MultiSensor) => {
            let pkt = MultiSensorPacket::from_bytes(payload)
                .context("multi-sensor frame failed validation")?;
            println!("Multi-sensor telemetry:");
            println!("  network   {}", pkt.network_id);
            println!("  node      {}", pkt.sensor_id);
            println!("  battery   {}%  ({})", pkt.battery_percent, power_state(pkt.power_state));
            println!("  location  {:?} / zone {:?}", pkt.location, pkt.zone);
            if pkt.last_command_seq != 0 {
                println!(
                    "  piggyback seq {} status {}",
                    pkt.last_command_seq, pkt.ack_status
                );
            }
            for value in &pkt.values {
                println!("  {:<22} {:.3} {}", value.kind.name(), value.value, value.kind.unit());
            }
        }
        Some(FrameKind::Command) => {
            let pkt =
                CommandPacket::from_bytes(payload).context("command frame failed validation")?;
            let name = pkt
                .kind()
                .map(|k| k.name())
                .unwrap_or("CMD_UNKNOWN");
            println!("Command:");
            println!("  type      {} (0x{:02X})", name, pkt.command_type);
            println!("  target    {}", pkt.target_sensor_id);
            println!("  sequence  {}", pkt.sequence_number);
            println!("  data      {} bytes: {}", pkt.data.len(), hex_string(&pkt.data));
        }
        Some(FrameKind::Ack) => {
            let pkt = AckPacket::from_bytes(payload).context("ack frame failed validation")?;
            println!("{}:", if pkt.is_success() { "ACK" } else { "NACK" });
            println!("  node      {}", pkt.sensor_id);
            println!("  sequence  {}", pkt.sequence_number);
            println!("  status    {}", pkt.status_code);
        }
        Some(FrameKind::Legacy) => {
            let pkt =
                LegacyPacket::from_bytes(payload).context("legacy frame failed validation")?;
            println!("Legacy telemetry:");
            println!("  network   {}", pkt.network_id);
            println!("  node      {}", pkt.sensor_id);
            println!("  temp      {:.2} °C / humidity {:.2} %RH", pkt.temperature, pkt.humidity);
            println!("  battery   {}%  rssi {} dBm  snr {:.1} dB", pkt.battery_percent, pkt.rssi, pkt.snr);
        }
        None => bail!("unrecognised frame ({} bytes)", payload.len()),
    }
    Ok(())
}

fn power_state(state: u8) -> &'static str {
    match state {
        0 => "discharging",
        1 => "charging",
        _ => "unknown",
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Stand up a station and `node_count` simulated nodes on a shared
/// loopback medium and let them talk.
fn simulate(node_count: u8, steps: u32, interval: u32, mesh: bool) -> Result<()> {
    if node_count == 0 || node_count > 10 {
        bail!("node count must be 1-10");
    }

    let medium = LoopbackMedium::new();
    let station = Arc::new(StationManager::new(
        StationConfig::default(),
        medium.endpoint(),
        Arc::new(CommandQueue::new()),
        Arc::new(NodeRegistry::new()),
    ));

    let mut nodes = Vec::new();
    for i in 0..node_count {
        let node_id = i + 1;
        let mut kv = MemoryKvStore::new();
        kv.put("node_id", &node_id.to_string()).unwrap();
        kv.put("tx_interval", &interval.to_string()).unwrap();
        kv.put("mesh_en", &mesh.to_string()).unwrap();
        kv.put("location", &format!("Sim site {node_id}")).unwrap();

        let mut node = NodeRuntime::new(medium.endpoint(), FakeClock::new(), kv);
        node.add_sensor(Box::new(
            SimulatedSensor::weather("sim-weather").with_drift(0.05 * node_id as f32),
        ));
        node.set_battery(100 - node_id * 7, false);
        node.start()
            .with_context(|| format!("node {node_id} failed to start"))?;
        nodes.push(node);
    }

    info!(nodes = node_count, steps, "simulation started");

    // Exercise the command path mid-run
    let ping_at = steps / 3;
    let retune_at = steps / 2;
    let mut handles = Vec::new();

    for step in 0..steps {
        for node in &mut nodes {
            node.clock_mut().advance(1000);
            node.poll()?;
        }
        while station.poll_receive() {}
        station.pump_transmit(Instant::now());

        if step == ping_at {
            for id in station.registry().online_nodes() {
                handles.push(("ping", station.queue().submit_ping(id)));
            }
        }
        if step == retune_at {
            if let Some(&id) = station.registry().online_nodes().first() {
                handles.push((
                    "set-interval",
                    station.queue().submit_set_interval(id, interval * 2),
                ));
            }
        }
    }

    println!("--- fleet after {steps} steps ---");
    for state in station.registry().all() {
        let values: Vec<String> = {
            let mut pairs: Vec<_> = state.values.iter().collect();
            pairs.sort_by_key(|(k, _)| k.to_byte());
            pairs
                .iter()
                .map(|(k, v)| format!("{}={:.2}{}", k.name(), v, k.unit()))
                .collect()
        };
        println!(
            "node {:>3}  {}  battery {:>3}%  {:<16} {}",
            state.node_id,
            if state.online { "online " } else { "offline" },
            state.battery_percent,
            state.location,
            values.join("  ")
        );
    }

    println!("--- commands ---");
    for (label, handle) in handles {
        println!("{label:<14} {:?}", station.queue().status(handle));
    }

    Ok(())
}
