use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codec::{
    BincodeCodec, DispatchReport, ReceiveOutcome, ReceiverSession, SessionConfig,
    SessionRegistry, Transport, TransportError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use wire::{decode_header, MessageKind};

const SERVER: &str = "server";

#[derive(Parser)]
#[command(
    name = "demo-sim",
    version,
    about = "Deterministic lossy-link simulation of tickdiff sessions"
)]
struct Cli {
    /// Number of simulated clients.
    #[arg(long, default_value_t = 4)]
    clients: u32,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 600)]
    ticks: u32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Percentage of packets lost in each direction.
    #[arg(long, default_value_t = 5)]
    loss: u32,
    /// Percentage of packets delivered twice.
    #[arg(long, default_value_t = 1)]
    duplicate: u32,
    /// Percentage of packets held back for a few ticks.
    #[arg(long, default_value_t = 10)]
    reorder: u32,
    /// Longest hold-back for reordered packets, in ticks.
    #[arg(long, default_value_t = 3)]
    max_delay: u32,
    /// JSON session configuration; flags below override its fields.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Snapshot history per session.
    #[arg(long)]
    history: Option<usize>,
    /// Send diffs even when they are not smaller.
    #[arg(long)]
    always_diff: bool,
    /// Lag above which the server logs a warning.
    #[arg(long)]
    lag_warn: Option<u32>,
    /// Optional directory for summary.json.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Fail if the average snapshot message size exceeds this value.
    #[arg(long)]
    max_avg_bytes: Option<u64>,
    /// Fail if p95 diff message size exceeds this value.
    #[arg(long)]
    max_p95_diff_bytes: Option<u64>,
}

/// The replicated payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GameState {
    name: String,
    position: [f32; 3],
    orientation: [f32; 4],
    id: u8,
}

type ClientId = u32;

fn session_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => SessionConfig::default(),
    };
    if let Some(history) = cli.history {
        config.history = history;
    }
    if let Some(threshold) = cli.lag_warn {
        config.lag_warn_threshold = threshold;
    }
    config.always_diff |= cli.always_diff;
    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = session_config(&cli)?;
    let codec = Arc::new(BincodeCodec::<GameState>::new());
    let registry: SessionRegistry<ClientId, GameState> =
        SessionRegistry::new(Arc::clone(&codec), config.clone())
            .context("create session registry")?;

    let clients: Vec<ClientId> = (0..cli.clients).collect();
    let mut receivers = Vec::with_capacity(clients.len());
    for &client in &clients {
        let mut receiver: ReceiverSession<GameState, &'static str> =
            ReceiverSession::new(Arc::clone(&codec), config.clone())
                .with_context(|| format!("create receiver for client {client}"))?;
        receiver.subscribe(move |source, state: &GameState| {
            debug!(client, source, position = ?state.position, "state delivered");
        });
        receivers.push(receiver);
    }

    info!(
        clients = cli.clients,
        ticks = cli.ticks,
        seed = cli.seed,
        loss = cli.loss,
        reorder = cli.reorder,
        "starting simulation"
    );

    let conditions = LinkConditions {
        loss: cli.loss,
        duplicate: cli.duplicate,
        reorder: cli.reorder,
        max_delay: cli.max_delay,
    };
    let mut network = Network::new(clients.clone(), conditions, cli.seed);
    let mut world_rng = Rng::new(cli.seed ^ 0x5EED);
    let mut state = GameState {
        name: "player-1".to_string(),
        position: [0.0, 0.0, 0.0],
        orientation: [0.0, 0.0, 0.0, 1.0],
        id: 1,
    };
    let mut velocity = [1.0f32, 0.0, 0.5];
    let mut sent: HashMap<u16, GameState> = HashMap::new();
    let mut summary = Summary::new(&cli, &config);
    let mut ack_buf = Vec::new();

    for tick in 0..cli.ticks {
        network.now = tick;
        step_state(&mut state, &mut velocity, &mut world_rng, tick);
        // Every session starts at the first dispatch, so labels follow ticks.
        sent.insert(tick as u16, state.clone());

        let report = registry
            .dispatch_to_all(&network, &state)
            .with_context(|| format!("dispatch tick {tick}"))?;
        summary.push_report(&report);

        for packet in network.down.get_mut().due(tick) {
            let receiver = &mut receivers[packet.to as usize];
            let outcome = receiver
                .handle_packet(&SERVER, &packet.bytes)
                .with_context(|| format!("client {} receive", packet.to))?;
            match &outcome {
                ReceiveOutcome::Accepted { ack, value } => {
                    let expected = sent
                        .get(&ack.id.raw())
                        .with_context(|| format!("no state recorded for {}", ack.id))?;
                    if expected != value {
                        anyhow::bail!(
                            "client {} rebuilt a mismatched state at {}",
                            packet.to,
                            ack.id
                        );
                    }
                    summary.dispatched += 1;
                }
                ReceiveOutcome::Cached { .. } => summary.cached += 1,
                ReceiveOutcome::Discarded(reason) => {
                    debug!(client = packet.to, ?reason, "message discarded");
                    summary.discarded += 1;
                }
            }
            if let Some(ack) = outcome.ack() {
                ack_buf.clear();
                summary.ack_bytes_total += receiver.encode_ack(ack, &mut ack_buf) as u64;
                network.send_up(packet.to, &ack_buf);
            }
        }

        for packet in network.up.due(tick) {
            registry
                .handle_packet(&packet.to, &packet.bytes)
                .with_context(|| format!("apply ack from client {}", packet.to))?;
        }

        for client in &clients {
            if let Some(lag) = registry.lag(client) {
                summary.max_lag = summary.max_lag.max(lag);
            }
        }
    }

    summary.absorb_sizes(&network.sizes.borrow());
    summary.finalize();
    info!(
        full = summary.full_count,
        diffs = summary.diff_count,
        avg_bytes = summary.avg_bytes_per_message,
        max_lag = summary.max_lag,
        "simulation finished"
    );
    summary.assert_budgets(cli.max_avg_bytes, cli.max_p95_diff_bytes)?;

    let contents = serde_json::to_string_pretty(&summary).context("serialize summary")?;
    println!("{contents}");
    if let Some(out_dir) = &cli.out_dir {
        write_summary_json(out_dir, &contents)?;
    }
    Ok(())
}

fn init_tracing() {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter_layer)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn write_summary_json(out_dir: &Path, contents: &str) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("create output dir {}", out_dir.display()))?;
    let path = out_dir.join("summary.json");
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn step_state(state: &mut GameState, velocity: &mut [f32; 3], rng: &mut Rng, tick: u32) {
    for axis in 0..3 {
        if rng.next_u32() % 20 == 0 {
            velocity[axis] = rng.range_f32(-2.0, 2.0);
        }
        state.position[axis] = (state.position[axis] + velocity[axis]).clamp(-1000.0, 1000.0);
    }
    // Orientation only changes every few ticks.
    if tick % 8 == 0 {
        let yaw = rng.range_f32(-1.0, 1.0);
        state.orientation = [0.0, yaw, 0.0, (1.0 - yaw * yaw).sqrt()];
    }
}

#[derive(Debug, Clone, Copy)]
struct LinkConditions {
    loss: u32,
    duplicate: u32,
    reorder: u32,
    max_delay: u32,
}

struct Packet {
    deliver_at: u32,
    to: ClientId,
    bytes: Vec<u8>,
}

/// One direction of the simulated network.
struct Link {
    conditions: LinkConditions,
    in_flight: Vec<Packet>,
}

impl Link {
    fn new(conditions: LinkConditions) -> Self {
        Self {
            conditions,
            in_flight: Vec::new(),
        }
    }

    fn send(&mut self, rng: &mut Rng, now: u32, to: ClientId, bytes: &[u8]) {
        if rng.chance(self.conditions.loss) {
            return;
        }
        let copies = if rng.chance(self.conditions.duplicate) { 2 } else { 1 };
        for _ in 0..copies {
            let delay = if rng.chance(self.conditions.reorder) {
                1 + rng.next_u32() % self.conditions.max_delay.max(1)
            } else {
                0
            };
            self.in_flight.push(Packet {
                deliver_at: now + delay,
                to,
                bytes: bytes.to_vec(),
            });
        }
    }

    fn due(&mut self, now: u32) -> Vec<Packet> {
        let (due, pending): (Vec<_>, Vec<_>) = self
            .in_flight
            .drain(..)
            .partition(|packet| packet.deliver_at <= now);
        self.in_flight = pending;
        due
    }
}

#[derive(Debug, Default)]
struct Sizes {
    full: Vec<u64>,
    diff: Vec<u64>,
}

/// In-memory transport: server to client through `down`, acks through `up`.
struct Network {
    clients: Vec<ClientId>,
    down: RefCell<Link>,
    up: Link,
    rng: RefCell<Rng>,
    sizes: RefCell<Sizes>,
    now: u32,
}

impl Network {
    fn new(clients: Vec<ClientId>, conditions: LinkConditions, seed: u64) -> Self {
        Self {
            clients,
            down: RefCell::new(Link::new(conditions)),
            up: Link::new(conditions),
            rng: RefCell::new(Rng::new(seed)),
            sizes: RefCell::new(Sizes::default()),
            now: 0,
        }
    }

    fn send_up(&mut self, from: ClientId, bytes: &[u8]) {
        self.up.send(self.rng.get_mut(), self.now, from, bytes);
    }
}

impl Transport<ClientId> for Network {
    fn connections(&self) -> Vec<ClientId> {
        self.clients.clone()
    }

    fn send(&self, connection: &ClientId, bytes: &[u8]) -> Result<(), TransportError> {
        let header = decode_header(bytes)?;
        let mut sizes = self.sizes.borrow_mut();
        match header.kind {
            MessageKind::Full => sizes.full.push(bytes.len() as u64),
            MessageKind::Diff => sizes.diff.push(bytes.len() as u64),
            MessageKind::Ack => {}
        }
        self.down
            .borrow_mut()
            .send(&mut self.rng.borrow_mut(), self.now, *connection, bytes);
        Ok(())
    }
}

struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.state >> 32) as u32
    }

    fn chance(&mut self, percent: u32) -> bool {
        self.next_u32() % 100 < percent
    }

    fn range_f32(&mut self, min: f32, max: f32) -> f32 {
        let unit = (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32;
        min + (max - min) * unit
    }
}

#[derive(Debug, Serialize)]
struct Summary {
    clients: u32,
    ticks: u32,
    seed: u64,
    loss: u32,
    duplicate: u32,
    reorder: u32,
    history: usize,
    always_diff: bool,
    full_count: u64,
    diff_count: u64,
    full_bytes_total: u64,
    diff_bytes_total: u64,
    ack_bytes_total: u64,
    send_failures: u64,
    lag_warnings: u64,
    dispatched: u64,
    cached: u64,
    discarded: u64,
    max_lag: u32,
    avg_bytes_per_message: u64,
    avg_diff_bytes: u64,
    p95_diff_bytes: u64,
    #[serde(skip)]
    diff_sizes: Vec<u64>,
}

impl Summary {
    fn new(cli: &Cli, config: &SessionConfig) -> Self {
        Self {
            clients: cli.clients,
            ticks: cli.ticks,
            seed: cli.seed,
            loss: cli.loss,
            duplicate: cli.duplicate,
            reorder: cli.reorder,
            history: config.history,
            always_diff: config.always_diff,
            full_count: 0,
            diff_count: 0,
            full_bytes_total: 0,
            diff_bytes_total: 0,
            ack_bytes_total: 0,
            send_failures: 0,
            lag_warnings: 0,
            dispatched: 0,
            cached: 0,
            discarded: 0,
            max_lag: 0,
            avg_bytes_per_message: 0,
            avg_diff_bytes: 0,
            p95_diff_bytes: 0,
            diff_sizes: Vec::new(),
        }
    }

    fn push_report(&mut self, report: &DispatchReport) {
        self.full_count += report.full as u64;
        self.diff_count += report.diffs as u64;
        self.send_failures += report.failed as u64;
        self.lag_warnings += report.lagging as u64;
    }

    fn absorb_sizes(&mut self, sizes: &Sizes) {
        self.full_bytes_total = sizes.full.iter().sum();
        self.diff_bytes_total = sizes.diff.iter().sum();
        self.diff_sizes = sizes.diff.clone();
    }

    fn finalize(&mut self) {
        let messages = self.full_count + self.diff_count;
        if messages > 0 {
            self.avg_bytes_per_message = (self.full_bytes_total + self.diff_bytes_total) / messages;
        }
        if !self.diff_sizes.is_empty() {
            self.avg_diff_bytes = self.diff_bytes_total / self.diff_sizes.len() as u64;
            self.diff_sizes.sort_unstable();
            let idx = ((self.diff_sizes.len() as f64) * 0.95).ceil() as usize;
            let idx = idx.saturating_sub(1).min(self.diff_sizes.len() - 1);
            self.p95_diff_bytes = self.diff_sizes[idx];
        }
    }

    fn assert_budgets(&self, max_avg: Option<u64>, max_p95: Option<u64>) -> Result<()> {
        if let Some(max_avg) = max_avg {
            if self.avg_bytes_per_message > max_avg {
                anyhow::bail!(
                    "avg bytes per message {} exceeds budget {}",
                    self.avg_bytes_per_message,
                    max_avg
                );
            }
        }
        if let Some(max_p95) = max_p95 {
            if self.p95_diff_bytes > max_p95 {
                anyhow::bail!(
                    "p95 diff bytes {} exceeds budget {}",
                    self.p95_diff_bytes,
                    max_p95
                );
            }
        }
        Ok(())
    }
}
