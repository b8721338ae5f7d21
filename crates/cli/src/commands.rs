//! Command implementations.
//!
//! `check` validates a configuration file. `drill` stands up the whole
//! cluster in one process over TCP, pushes rounds of traffic through it and
//! reports whether every envelope arrived.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use corelib::{ConfigError, Envelope, MessageId, NodeId, NodeIdentity, Topology};
use serde::Serialize;
use streaming::transport::tcp;
use streaming::{NodeRuntime, TcpTransport};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{CliConfig, Command, DrillArgs};

/// Exit code of a drill that did not deliver everything.
pub const DRILL_FAILED_EXIT_CODE: i32 = 5;

/// Messages sent between pauses.
const BURST: u64 = 10;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a command, mapped to a process exit code.
#[derive(Debug)]
pub enum CommandResult {
    Checked { nodes: usize },
    Drill(DrillReport),
    ConfigRejected(ConfigError),
}

impl CommandResult {
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandResult::Checked { .. } => 0,
            CommandResult::Drill(report) if report.passed => 0,
            CommandResult::Drill(_) => DRILL_FAILED_EXIT_CODE,
            CommandResult::ConfigRejected(err) => err.exit_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrillReport {
    pub nodes: usize,
    pub mode: &'static str,
    pub rounds: usize,
    pub sent: u64,
    pub expected: u64,
    pub received: u64,
    pub failed: u64,
    pub misdelivered: u64,
    pub duplicates: u64,
    pub decode_errors: u64,
    pub received_by_node: BTreeMap<NodeId, u64>,
    pub elapsed_ms: u64,
    pub passed: bool,
}

pub fn execute(config: &CliConfig) -> anyhow::Result<CommandResult> {
    let topology = match Topology::from_file(&config.config) {
        Ok(topology) => topology,
        Err(err) => {
            error!(path = %config.config.display(), error = %err, "configuration rejected");
            return Ok(CommandResult::ConfigRejected(err));
        }
    };

    match &config.command {
        Command::Check => Ok(check(&topology)),
        Command::Drill(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting tokio runtime")?;
            let report = runtime.block_on(drill(&topology, args))?;
            print_report(&report, args.json)?;
            Ok(CommandResult::Drill(report))
        }
    }
}

fn check(topology: &Topology) -> CommandResult {
    for (id, address) in topology.iter() {
        println!("{id}\t{address}");
    }
    println!("{} nodes, configuration ok", topology.len());
    CommandResult::Checked {
        nodes: topology.len(),
    }
}

/// Envelopes a drill should deliver.
///
/// The ring skips self-addressed sends, so a single node expects nothing.
pub fn expected_deliveries(nodes: usize, rounds: usize, broadcast: bool) -> u64 {
    let nodes = nodes as u64;
    let rounds = rounds as u64;
    if broadcast {
        rounds * nodes * nodes.saturating_sub(1)
    } else if nodes > 1 {
        rounds * nodes
    } else {
        0
    }
}

/// Next node around the ring, wrapping to the first.
pub fn ring_successor(ids: &[NodeId], index: usize) -> NodeId {
    ids[(index + 1) % ids.len()]
}

/// Inbound envelopes seen during a drill.
///
/// Drill payloads name the sender, so sender, destination and message ID
/// identify one logical delivery; a repeat of that triple is a duplicate.
#[derive(Debug, Default)]
struct DeliveryTally {
    seen: HashSet<(String, NodeId, MessageId)>,
    by_node: BTreeMap<NodeId, u64>,
    received: u64,
    misdelivered: u64,
    duplicates: u64,
}

impl DeliveryTally {
    fn new(ids: &[NodeId]) -> Self {
        Self {
            by_node: ids.iter().map(|id| (*id, 0)).collect(),
            ..Self::default()
        }
    }

    fn record(&mut self, node: NodeId, envelope: &Envelope) {
        if envelope.destination() != node {
            warn!(
                node = %node,
                destination = %envelope.destination(),
                "envelope delivered to the wrong node"
            );
            self.misdelivered += 1;
            return;
        }

        let key = (
            envelope.payload().to_owned(),
            envelope.destination(),
            envelope.message_id(),
        );
        if !self.seen.insert(key) {
            warn!(
                node = %node,
                message_id = %envelope.message_id(),
                "duplicate delivery"
            );
            self.duplicates += 1;
            return;
        }

        *self.by_node.entry(node).or_default() += 1;
        self.received += 1;
    }
}

pub async fn drill(topology: &Topology, args: &DrillArgs) -> anyhow::Result<DrillReport> {
    let started = Instant::now();
    let transport = Arc::new(TcpTransport);
    let options = args.runtime_options();

    let mut identities = Vec::with_capacity(topology.len());
    let mut runtimes = Vec::with_capacity(topology.len());
    let mut sockets = Vec::with_capacity(topology.len());
    for (id, address) in topology.iter() {
        let (listener, socket) = tcp::bind(address)
            .await
            .with_context(|| format!("binding node {id} at {address}"))?;
        debug!(node = %id, local = %socket.local_addr(), "listening");
        sockets.push(socket);

        let identity = NodeIdentity::new(id, topology)?;
        runtimes.push(NodeRuntime::spawn(
            &identity,
            Arc::clone(&transport),
            listener,
            options.clone(),
        ));
        identities.push(identity);
    }

    let ids = topology.ids();
    let mut sent: u64 = 0;
    for _ in 0..args.rounds {
        for (index, identity) in identities.iter_mut().enumerate() {
            let payload = identity.id().to_string();
            let envelopes = if args.broadcast {
                identity.broadcast(payload)
            } else {
                let destination = ring_successor(ids, index);
                if destination == identity.id() {
                    continue;
                }
                vec![identity.envelope(destination, payload)]
            };

            for envelope in envelopes {
                runtimes[index].enqueue(envelope)?;
                sent += 1;
                if sent % BURST == 0 && args.delay_ms > 0 {
                    tokio::time::sleep(args.delay()).await;
                }
            }
        }
    }

    let expected = expected_deliveries(topology.len(), args.rounds, args.broadcast);
    info!(sent, expected, "traffic queued, waiting for deliveries");

    let deadline = Instant::now() + args.timeout();
    let mut tally = DeliveryTally::new(ids);
    let mut failed: u64 = 0;

    loop {
        for runtime in runtimes.iter_mut() {
            while let Some(envelope) = runtime.try_recv() {
                tally.record(runtime.id(), &envelope);
            }
            while let Some(failure) = runtime.try_failure() {
                warn!(
                    node = %runtime.id(),
                    destination = %failure.envelope.destination(),
                    error = %failure.error,
                    "delivery abandoned"
                );
                failed += 1;
            }
        }

        let settled = tally.received + tally.misdelivered + failed;
        if settled >= expected || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let mut decode_errors = 0;
    for runtime in runtimes {
        let node = runtime.id();
        match runtime.shutdown().await {
            Ok(report) => decode_errors += report.decode_errors,
            Err(err) => warn!(node = %node, error = %err, "node stopped with error"),
        }
    }
    for socket in &sockets {
        socket.shutdown();
    }

    Ok(DrillReport {
        nodes: topology.len(),
        mode: if args.broadcast { "broadcast" } else { "ring" },
        rounds: args.rounds,
        sent,
        expected,
        received: tally.received,
        failed,
        misdelivered: tally.misdelivered,
        duplicates: tally.duplicates,
        decode_errors,
        received_by_node: tally.by_node,
        elapsed_ms: started.elapsed().as_millis() as u64,
        passed: sent == expected
            && tally.received == expected
            && failed == 0
            && tally.misdelivered == 0
            && tally.duplicates == 0,
    })
}

fn print_report(report: &DrillReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if report.passed {
        println!(
            "PASS: sent: {} received: {} ({} ms)",
            report.sent, report.received, report.elapsed_ms
        );
    } else {
        println!(
            "FAIL: sent: {} received: {} failed: {} misdelivered: {} duplicates: {} expected: {}",
            report.sent,
            report.received,
            report.failed,
            report.misdelivered,
            report.duplicates,
            report.expected
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_deliveries() {
        assert_eq!(expected_deliveries(3, 20, false), 60);
        assert_eq!(expected_deliveries(3, 20, true), 120);
        assert_eq!(expected_deliveries(1, 20, false), 0);
        assert_eq!(expected_deliveries(1, 20, true), 0);
        assert_eq!(expected_deliveries(0, 5, true), 0);
    }

    #[test]
    fn test_ring_successor_wraps() {
        let ids = [NodeId(4), NodeId(7), NodeId(9)];
        assert_eq!(ring_successor(&ids, 0), NodeId(7));
        assert_eq!(ring_successor(&ids, 2), NodeId(4));
        assert_eq!(ring_successor(&ids[..1], 0), NodeId(4));
    }

    #[test]
    fn test_exit_codes() {
        let rejected = CommandResult::ConfigRejected(ConfigError::DuplicateId { id: NodeId(1) });
        assert_eq!(rejected.exit_code(), 1);
        assert!(CommandResult::Checked { nodes: 3 }.is_success());
    }

    #[test]
    fn test_tally_separates_misdelivered_and_duplicates() {
        let mut tally = DeliveryTally::new(&[NodeId(1), NodeId(2)]);
        let to_two = Envelope::new(NodeId(2), MessageId(1000), "1");

        tally.record(NodeId(2), &to_two);
        tally.record(NodeId(2), &to_two);
        tally.record(NodeId(1), &to_two);
        // Same ID from another sender is a distinct delivery
        tally.record(NodeId(2), &Envelope::new(NodeId(2), MessageId(1000), "3"));

        assert_eq!(tally.received, 2);
        assert_eq!(tally.duplicates, 1);
        assert_eq!(tally.misdelivered, 1);
        assert_eq!(tally.by_node[&NodeId(1)], 0);
        assert_eq!(tally.by_node[&NodeId(2)], 2);
    }

    #[tokio::test]
    async fn test_drill_over_loopback() {
        // Hold every placeholder listener open together so the OS hands out distinct ports.
        let reserved: Vec<_> = (0..3)
            .map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap())
            .collect();
        let ports: Vec<u16> = reserved
            .iter()
            .map(|slot| slot.local_addr().unwrap().port())
            .collect();
        drop(reserved);

        let config: String = ports
            .iter()
            .enumerate()
            .map(|(i, port)| format!("{}, tcp://127.0.0.1:{port}\n", i + 1))
            .collect();
        let topology = Topology::parse(&config).unwrap();

        let args = DrillArgs {
            rounds: 3,
            broadcast: true,
            delay_ms: 0,
            timeout_secs: 10,
            legacy_wire: false,
            max_retries: 3,
            json: false,
        };
        let report = drill(&topology, &args).await.unwrap();

        assert_eq!(report.expected, 18);
        assert!(report.passed, "{report:?}");
        assert_eq!(report.misdelivered, 0);
        assert_eq!(report.duplicates, 0);
        assert!(report.received_by_node.values().all(|n| *n == 6));
    }
}
