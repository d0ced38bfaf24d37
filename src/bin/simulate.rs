use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use gekitotsu_race_server::config::ServerConfig;
use gekitotsu_race_server::constants::TICK_MS;
use gekitotsu_race_server::engine::{now_ms, LapProgress, RaceEngine};
use gekitotsu_race_server::rng::Rng;
use gekitotsu_race_server::server_utils::player_order_key;
use gekitotsu_race_server::types::{GameMode, PlayerStatus, Snapshot, TelemetrySample};
use serde::Serialize;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless race simulator with invariant checks")]
struct Cli {
    /// Run one scenario with this many racers instead of the default set.
    #[arg(long)]
    racers: Option<usize>,
    #[arg(long)]
    solo: bool,
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long, default_value_t = 20 * 60 * 10)]
    max_ticks: u64,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    racers: usize,
    mode: GameMode,
    seed: u32,
}

#[derive(Clone, Debug, Serialize)]
struct RacerResult {
    #[serde(rename = "playerId")]
    player_id: String,
    #[serde(rename = "finalRank")]
    final_rank: Option<u32>,
    points: i32,
    #[serde(rename = "totalPoints")]
    total_points: Option<i32>,
    lap: u32,
    #[serde(rename = "finishTime")]
    finish_time: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u32,
    racers: usize,
    mode: GameMode,
    ticks: u64,
    #[serde(rename = "allFinished")]
    all_finished: bool,
    #[serde(rename = "obstacleHits")]
    obstacle_hits: usize,
    #[serde(rename = "playerBumps")]
    player_bumps: usize,
    laps: usize,
    results: Vec<RacerResult>,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    scenarios: Vec<ScenarioResultLine>,
}

/// Per-racer state carried between steps to detect regressions.
#[derive(Clone, Debug, Default)]
struct RacerTrack {
    lap: u32,
    finished: bool,
    finish_time: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt().json().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let config = match cli.config.as_deref().map(ServerConfig::load) {
        None => ServerConfig::default(),
        Some(Ok(config)) => config,
        Some(Err(error)) => {
            error!(%error, "failed to load configuration");
            std::process::exit(2);
        }
    };

    let scenarios = resolve_scenarios(&cli);
    let started_at_ms = now_ms();
    let mut results = Vec::new();
    let mut anomaly_count = 0;

    for scenario in &scenarios {
        info!(
            scenario = %scenario.name,
            seed = scenario.seed,
            racers = scenario.racers,
            "scenario started"
        );
        let result = run_scenario(scenario, &config, cli.max_ticks);
        for anomaly in &result.anomalies {
            warn!(scenario = %scenario.name, seed = scenario.seed, %anomaly, "anomaly detected");
        }
        anomaly_count += result.anomalies.len();
        info!(
            scenario = %scenario.name,
            ticks = result.ticks,
            all_finished = result.all_finished,
            obstacle_hits = result.obstacle_hits,
            "scenario finished"
        );

        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(error) => error!(%error, "failed to serialize scenario result"),
        }
        results.push(result);
    }

    let summary = RunSummary {
        started_at_ms,
        finished_at_ms: now_ms(),
        scenario_count: results.len(),
        anomaly_count,
        scenarios: results,
    };
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            error!(path = %path.display(), %error, "summary write failed");
            std::process::exit(2);
        }
        info!(path = %path.display(), "summary written");
    }

    if anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let base_seed = cli.seed.unwrap_or_else(rand::random::<u32>);
    let mode = if cli.solo { GameMode::Solo } else { GameMode::Multi };
    if let Some(racers) = cli.racers {
        return vec![Scenario {
            name: format!("custom-{racers}"),
            racers: racers.max(1),
            mode,
            seed: base_seed,
        }];
    }

    [
        ("solo-1", 1, GameMode::Solo),
        ("duel", 2, GameMode::Multi),
        ("pack-6", 6, GameMode::Multi),
        ("crowd-16", 16, GameMode::Multi),
    ]
    .into_iter()
    .enumerate()
    .map(|(index, (name, racers, mode))| Scenario {
        name: name.to_string(),
        racers,
        mode,
        seed: base_seed.wrapping_add(index as u32),
    })
    .collect()
}

fn run_scenario(scenario: &Scenario, config: &ServerConfig, max_ticks: u64) -> ScenarioResultLine {
    let mut rng = Rng::new(scenario.seed);
    let mut engine = RaceEngine::new(config.tuning.clone(), &config.course);
    let mut racer_ids = Vec::new();
    for _ in 0..scenario.racers {
        let id = engine.connect(None);
        if let Err(error) = engine.join(&id, "sim", scenario.mode) {
            error!(%error, "simulated racer could not join");
            continue;
        }
        racer_ids.push(id);
    }
    racer_ids.sort_by_key(|id| player_order_key(id));

    let mut tracks: BTreeMap<String, RacerTrack> = racer_ids
        .iter()
        .map(|id| (id.clone(), RacerTrack::default()))
        .collect();
    let mut anomalies = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut obstacle_hits = 0;
    let mut player_bumps = 0;
    let mut laps = 0;
    let mut now = 0u64;
    let mut ticks = 0u64;

    while ticks < max_ticks {
        ticks += 1;
        now += TICK_MS;

        let mut order = racer_ids.clone();
        for idx in (1..order.len()).rev() {
            let swap_with = rng.pick_index(idx + 1);
            order.swap(idx, swap_with);
        }
        for id in &order {
            let sample = synthetic_sample(&mut rng);
            let Ok(outcome) = engine.handle_sensor(id, sample, now) else {
                continue;
            };
            obstacle_hits += outcome.obstacle_hits.len();
            player_bumps += outcome.bumped_players.len();
            if outcome.lap != LapProgress::None {
                laps += 1;
            }
        }
        engine.run_due_tasks(now);

        let snapshot = engine.build_snapshot();
        for message in collect_snapshot_anomalies(&snapshot, &engine, &mut tracks) {
            if anomaly_seen.insert(message.clone()) {
                anomalies.push(message);
            }
        }

        let all_finished = racer_ids.iter().all(|id| {
            engine
                .player(id)
                .map(|view| view.status == PlayerStatus::Finished)
                .unwrap_or(true)
        });
        if all_finished {
            break;
        }
    }

    let snapshot = engine.build_snapshot();
    let all_finished = snapshot
        .players
        .values()
        .all(|view| view.status == PlayerStatus::Finished);
    let mut results: Vec<RacerResult> = racer_ids
        .iter()
        .filter_map(|id| snapshot.players.get(id))
        .map(|view| RacerResult {
            player_id: view.id.clone(),
            final_rank: view.final_rank,
            points: view.points,
            total_points: view.total_points,
            lap: view.lap,
            finish_time: view.finish_time,
        })
        .collect();
    results.sort_by_key(|result| result.final_rank.unwrap_or(u32::MAX));

    ScenarioResultLine {
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        racers: scenario.racers,
        mode: scenario.mode,
        ticks,
        all_finished,
        obstacle_hits,
        player_bumps,
        laps,
        results,
        anomalies,
    }
}

/// Mostly gentle steering with occasional shake spikes that build charge.
fn synthetic_sample(rng: &mut Rng) -> TelemetrySample {
    let acceleration_z = if rng.bool(0.15) {
        rng.range_f32(16.0, 30.0)
    } else {
        rng.range_f32(-5.0, 5.0)
    };
    TelemetrySample {
        roll: rng.range_f32(-60.0, 60.0),
        pitch: rng.range_f32(-30.0, 30.0),
        acceleration_z,
    }
}

fn collect_snapshot_anomalies(
    snapshot: &Snapshot,
    engine: &RaceEngine,
    tracks: &mut BTreeMap<String, RacerTrack>,
) -> Vec<String> {
    let tuning = &engine.tuning;
    let mut anomalies = Vec::new();

    for (id, view) in &snapshot.players {
        if view.charge_force < 0.0 || view.charge_force > tuning.charge_max {
            anomalies.push(format!("{id}: charge out of range"));
        }
        if view.position.x.abs() > tuning.track_width_x {
            anomalies.push(format!("{id}: x outside track"));
        }
        if view.lap > tuning.max_lap {
            anomalies.push(format!("{id}: lap above max"));
        }
        if view.status == PlayerStatus::Finished && view.finish_time.is_none() {
            anomalies.push(format!("{id}: finished without finish time"));
        }

        let Some(track) = tracks.get_mut(id) else {
            continue;
        };
        if view.lap < track.lap || view.lap > track.lap + 1 {
            anomalies.push(format!("{id}: lap jumped from {} to {}", track.lap, view.lap));
        }
        let finished = view.status == PlayerStatus::Finished;
        if track.finished && !finished {
            anomalies.push(format!("{id}: status left finished"));
        }
        if track.finish_time.is_some() && track.finish_time != view.finish_time {
            anomalies.push(format!("{id}: finish time overwritten"));
        }
        track.lap = view.lap;
        track.finished = finished;
        track.finish_time = view.finish_time;
    }

    let mut ranks: Vec<u32> = snapshot.rankings.iter().map(|entry| entry.final_rank).collect();
    ranks.sort_unstable();
    let expected: Vec<u32> = (1..=snapshot.rankings.len() as u32).collect();
    if ranks != expected {
        anomalies.push("ranks are not a 1..n permutation".to_string());
    }

    anomalies
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, text)
}
