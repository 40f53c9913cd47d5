//! # smc-chat
//!
//! Interactive chat over a causal multicast group.
//!
//! ```text
//! smc-chat 192.168.0.10 6001            # random id in 0..3, group 230.0.0.0:5000
//! smc-chat 192.168.0.11 6002 --id 1     # fixed id
//! RUST_LOG=smc_node=debug smc-chat ...  # clocks and matrix after every send/receive
//! ```
//!
//! Every delivered message is printed with the local time it was handed to
//! the application, which is the causal delivery time, not the arrival time.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use colored::*;
use futures::StreamExt;
use smc_node::prelude::*;
use smc_node::{NodeConfig, ProcessIdPolicy, UdpTransport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "smc-chat")]
#[command(about = "Causal multicast chat (Stablecast)")]
#[command(version)]
struct Cli {
    /// Address other members reach this process on
    ip: IpAddr,
    /// Unicast port
    port: u16,
    /// Multicast group address
    #[arg(long, default_value = "230.0.0.0")]
    group: Ipv4Addr,
    /// Multicast group port
    #[arg(long, default_value_t = 5000)]
    group_port: u16,
    /// Initial group size (clock width)
    #[arg(long, default_value_t = 3)]
    group_size: usize,
    /// Fixed process id instead of a random one
    #[arg(long)]
    id: Option<usize>,
    /// Re-send DISCOVER every N milliseconds
    #[arg(long)]
    rediscover_ms: Option<u64>,
    /// JSON node configuration; command-line address and port still apply
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn node_config(&self) -> Result<NodeConfig, NodeError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_json_file(path)?,
            None => NodeConfig {
                group_addr: self.group,
                group_port: self.group_port,
                group_size: self.group_size,
                rediscover_interval_ms: self.rediscover_ms,
                ..NodeConfig::default()
            },
        };
        config.advertise_ip = Some(self.ip);
        config.unicast_port = self.port;
        if let Some(id) = self.id {
            config.process_id = ProcessIdPolicy::Fixed(id);
        }
        config.validate()?;
        Ok(config)
    }
}

// ─── Output helpers ────────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn warn_user(text: &str) {
    println!("  {} {}", "!".bright_red(), text);
}

fn command_failed(command: &str, e: &NodeError) {
    warn!(command, error = %e, "command failed");
    warn_user(&e.to_string());
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

fn print_help() {
    println!("  {}", "Commands:".bold());
    println!("    {} <text>            Multicast to the group", "m".bright_cyan());
    println!("    {} <id> <text>       Unicast to one process", "u".bright_cyan());
    println!("    {} <text>            Defer a multicast until flush", "d".bright_cyan());
    println!("    {} <id> <text>      Defer a unicast until flush", "du".bright_cyan());
    println!("    {}                   Flush deferred messages", "f".bright_cyan());
    println!("    {}                   List known processes", "p".bright_cyan());
    println!("    {}                   Show clocks and buffers", "s".bright_cyan());
    println!("    {}                  Show clocks as JSON", "sj".bright_cyan());
    println!("    {}                   Re-send discovery probe", "r".bright_cyan());
    println!("    {}                   Help", "h".bright_cyan());
    println!("    {}                   Quit", "q".bright_cyan());
    println!();
}

fn print_status(node: &MulticastNode<UdpTransport>) {
    let snapshot = node.clocks();
    let stats = node.stats();
    step(&format!("process {}", snapshot.process_id.to_string().bright_white()));
    step(&format!("vector  {:?}", snapshot.vector));
    for (i, row) in snapshot.matrix.iter().enumerate() {
        step(&format!("row P{}  {:?}", i, row));
    }
    step(&format!(
        "pending {}  retained {}  deferred {}",
        node.pending_len(),
        node.retained_len(),
        node.deferred_len()
    ));
    step(&format!(
        "sent {}  delivered {}  buffered {}  duplicates {}  pruned {}",
        stats.sent, stats.delivered, stats.buffered, stats.duplicates, stats.pruned
    ));
}

fn parse_target(rest: &str) -> Option<(ProcessId, &str)> {
    let (id, text) = rest.split_once(' ')?;
    let id = id.parse().ok()?;
    Some((ProcessId(id), text.trim()))
}

// ─── Main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = match cli.node_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            warn_user(&e.to_string());
            std::process::exit(2);
        }
    };

    let group = format!("{}:{}", config.group_addr, config.group_port);
    let node = match MulticastNode::bind_udp(config, |m: &Message| {
        println!(
            "\n  {} {} {}",
            timestamp().dimmed(),
            format!("[{}]", m.sender).bright_magenta(),
            m.payload
        );
    })
    .await
    {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, %group, "startup failed");
            warn_user(&format!("Could not join the group: {}", e));
            std::process::exit(1);
        }
    };

    header(&format!("Stablecast chat · process {} · group {}", node.id(), group));
    print_help();

    let mut events = Box::pin(node.events());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                NodeEvent::PeerDiscovered { id, addr } => {
                    println!("\n  {} {} joined at {}", "+".bright_green(), id, addr)
                }
                NodeEvent::Buffered { id, pending } => println!(
                    "\n  {} {} held back, waiting on earlier messages ({} pending)",
                    "…".bright_yellow(),
                    id,
                    pending
                ),
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let prompt = format!("{}", "smc> ".bright_cyan().bold());
        let _ = stdout.write_all(prompt.as_bytes()).await;
        let _ = stdout.flush().await;

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "" => continue,
            "m" => match node.send_multicast(rest).await {
                Ok(id) => step(&format!("sent {} to the group", id)),
                Err(e) => command_failed(command, &e),
            },
            "u" => match parse_target(rest) {
                Some((to, text)) => match node.send_unicast(text, to).await {
                    Ok(id) => step(&format!("sent {} to {}", id, to)),
                    Err(e) => command_failed(command, &e),
                },
                None => warn_user("Usage: u <id> <text>"),
            },
            "d" => match node.defer(rest, Target::Group) {
                Ok(()) => step(&format!("deferred ({} queued)", node.deferred_len())),
                Err(e) => command_failed(command, &e),
            },
            "du" => match parse_target(rest) {
                Some((to, text)) => match node.defer(text, Target::Process(to)) {
                    Ok(()) => step(&format!("deferred ({} queued)", node.deferred_len())),
                    Err(e) => command_failed(command, &e),
                },
                None => warn_user("Usage: du <id> <text>"),
            },
            "f" => match node.flush().await {
                Ok(ids) => step(&format!("flushed {} message(s)", ids.len())),
                Err(e) => command_failed(command, &e),
            },
            "p" => {
                for (id, addr) in node.peers() {
                    let me = if id == node.id() { " (me)" } else { "" };
                    step(&format!("{} at {}{}", id, addr, me));
                }
            }
            "s" => print_status(&node),
            "sj" => match serde_json::to_string_pretty(&node.clocks()) {
                Ok(json) => println!("{}", json),
                Err(e) => warn_user(&e.to_string()),
            },
            "r" => {
                if let Err(e) = node.rediscover().await {
                    command_failed(command, &e);
                }
            }
            "h" | "help" => print_help(),
            "q" | "quit" => break,
            other => warn_user(&format!("Unknown command '{}', try h", other)),
        }
    }

    step("leaving the group");
    node.shutdown().await;
    info!(process = %node.id(), "left the group");
}
