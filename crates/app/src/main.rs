use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use live_core::model::{
    ClassId, ExerciseRow, QuantityType, Scaling, SessionStatus, UserId, WorkoutDefinition,
    WorkoutId, WorkoutMetadata, WorkoutType,
};
use live_core::sequencer::Direction;
use live_core::time::format_clock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use services::{
    Clock, CoachService, HypeNotifier, LiveClientError, LiveSync, ParticipantController,
    SessionPhase, SyncConfig,
};
use storage::memory::InMemoryLiveServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simulated seconds that pass on the server clock per beat.
const BEAT_SECONDS: i64 = 5;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidWorkout { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidWorkout { raw } => write!(f, "invalid --workout value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(flag: &'static str, raw: String) -> Result<T, ArgsError> {
    raw.trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- simulate [--class-id <id>] [--participants <n>]");
    eprintln!("                               [--workout <type>] [--minutes <n>]");
    eprintln!("                               [--beat-ms <ms>] [--seed <n>]");
    eprintln!("  cargo run -p app -- config   # print the effective sync timing");
    eprintln!();
    eprintln!("Defaults for simulate:");
    eprintln!("  --class-id 1 --participants 4 --workout for_time --minutes 5");
    eprintln!("  --beat-ms 100 --seed 7");
    eprintln!();
    eprintln!("Workouts: for_time, amrap, emom, tabata, interval");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LIVE_CLASS_ID, LIVE_PARTICIPANTS, LIVE_WORKOUT, RUST_LOG");
    eprintln!("  LIVE_TICK_MS, LIVE_SESSION_POLL_MS, LIVE_PROGRESS_POLL_MS,");
    eprintln!("  LIVE_LEADERBOARD_POLL_MS, LIVE_PUSH_DEBOUNCE_MS");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Simulate,
    Config,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "simulate" => Some(Self::Simulate),
            "config" => Some(Self::Config),
            _ => None,
        }
    }
}

struct Args {
    class_id: ClassId,
    participants: u64,
    workout_type: WorkoutType,
    minutes: u32,
    beat: Duration,
    seed: u64,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut class_id = std::env::var("LIVE_CLASS_ID")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| ClassId::new(1), ClassId::new);
        let mut participants = std::env::var("LIVE_PARTICIPANTS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(4);
        let mut workout_type = std::env::var("LIVE_WORKOUT")
            .ok()
            .and_then(|value| value.parse::<WorkoutType>().ok())
            .unwrap_or(WorkoutType::ForTime);
        let mut minutes = 5;
        let mut beat = Duration::from_millis(100);
        let mut seed = 7;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--class-id" => {
                    let value = require_value(args, "--class-id")?;
                    class_id = ClassId::new(parse_number("--class-id", value)?);
                }
                "--participants" => {
                    let value = require_value(args, "--participants")?;
                    participants = parse_number("--participants", value)?;
                }
                "--workout" => {
                    let value = require_value(args, "--workout")?;
                    workout_type = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidWorkout { raw: value.clone() })?;
                }
                "--minutes" => {
                    let value = require_value(args, "--minutes")?;
                    minutes = parse_number("--minutes", value)?;
                }
                "--beat-ms" => {
                    let value = require_value(args, "--beat-ms")?;
                    beat = Duration::from_millis(parse_number("--beat-ms", value)?);
                }
                "--seed" => {
                    let value = require_value(args, "--seed")?;
                    seed = parse_number("--seed", value)?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            class_id,
            participants: participants.max(1),
            workout_type,
            minutes: minutes.max(1),
            beat,
            seed,
        })
    }
}

fn demo_workout(workout_type: WorkoutType) -> WorkoutDefinition {
    let row = |subround: u32, position: u32, name: &str, quantity: u32| ExerciseRow {
        round: 1,
        subround,
        position,
        name: name.to_owned(),
        quantity_type: QuantityType::Reps,
        quantity,
        target_reps: None,
    };
    match workout_type {
        WorkoutType::ForTime => WorkoutDefinition {
            workout_type,
            rows: vec![
                row(1, 1, "Wall Ball", 20),
                row(1, 2, "Box Jump", 15),
                row(1, 3, "Burpee", 10),
            ],
            metadata: WorkoutMetadata {
                number_of_rounds: Some(2),
                ..WorkoutMetadata::default()
            },
        },
        WorkoutType::Amrap => WorkoutDefinition {
            workout_type,
            rows: vec![
                row(1, 1, "Pull-up", 5),
                row(1, 2, "Push-up", 10),
                row(1, 3, "Air Squat", 15),
            ],
            metadata: WorkoutMetadata::default(),
        },
        WorkoutType::Emom => WorkoutDefinition {
            workout_type,
            rows: vec![
                row(1, 1, "Kettlebell Swing", 12),
                row(1, 2, "Goblet Squat", 8),
                row(2, 1, "Burpee", 8),
                row(2, 2, "Sit-up", 12),
                row(2, 3, "Plank Hold", 1),
            ],
            metadata: WorkoutMetadata {
                emom_repeats: vec![2, 2],
                ..WorkoutMetadata::default()
            },
        },
        WorkoutType::Tabata | WorkoutType::Interval => WorkoutDefinition {
            workout_type,
            rows: (1..=8)
                .map(|i| ExerciseRow {
                    round: i,
                    subround: 1,
                    position: 1,
                    name: if i % 2 == 0 { "Row" } else { "Bike" }.to_owned(),
                    quantity_type: QuantityType::Duration,
                    quantity: 20,
                    target_reps: Some(12),
                })
                .collect(),
            metadata: WorkoutMetadata::default(),
        },
    }
}

/// One beat of one simulated member: move, type reps, answer the cutoff.
async fn play_beat(
    member: &ParticipantController,
    workout_type: WorkoutType,
    rng: &mut StdRng,
    interval_step: &mut u32,
) -> Result<(), LiveClientError> {
    if member.refresh_session().await? == SessionPhase::Syncing {
        member.refresh_progress().await?;
    }
    let view = member.tick()?;
    match view.phase {
        SessionPhase::Live if workout_type.is_interval() => {
            if *interval_step < view.step_count && rng.random_bool(0.5) {
                member
                    .post_interval_score(*interval_step, rng.random_range(8..=16))
                    .await?;
                *interval_step += 1;
            }
        }
        SessionPhase::Live => {
            let moves = rng.random_range(0..=2);
            for _ in 0..moves {
                match member.advance(Direction::Forward).await {
                    Ok(report) if report.completed => break,
                    Ok(_) => {}
                    Err(LiveClientError::Sequencer(_) | LiveClientError::TimeUp) => break,
                    Err(err) => return Err(err),
                }
            }
        }
        SessionPhase::AwaitingPartial => {
            member.submit_partial(rng.random_range(0..=9)).await?;
        }
        _ => {}
    }
    member.flush_emom_marks().await?;
    Ok(())
}

async fn simulate(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let sync_config = SyncConfig::from_env()?;
    let start = Utc::now();
    let server = InMemoryLiveServer::new(Clock::fixed(start));
    let coach = CoachService::new(Arc::new(server.clone()));
    let mut rng = StdRng::seed_from_u64(args.seed);

    server.schedule_class(
        args.class_id,
        WorkoutId::new(1),
        demo_workout(args.workout_type),
        args.minutes,
    )?;
    let mut members = Vec::new();
    for n in 1..=args.participants {
        let user_id = UserId::new(n);
        server.book(args.class_id, user_id, &format!("Member {n}"))?;
        let member = ParticipantController::new(args.class_id, Arc::new(server.participant(user_id)))
            .with_clock(Clock::fixed(start));
        if rng.random_bool(0.25) {
            member.set_scaling(Scaling::Sc).await?;
        }
        members.push(Arc::new(member));
    }

    tracing::info!(
        class_id = %args.class_id,
        workout = %args.workout_type,
        participants = args.participants,
        "starting simulated class"
    );
    coach.start(args.class_id).await?;

    let watched = Arc::clone(&members[0]);
    let sync = LiveSync::spawn(Arc::clone(&watched), &server, sync_config);
    let mut hype = HypeNotifier::new(watched.user_id());
    let mut interval_steps = vec![0_u32; members.len()];
    let max_beats = i64::from(args.minutes) * 60 / BEAT_SECONDS + 24;
    let mut beats: i64 = 0;

    loop {
        server.advance_clock(BEAT_SECONDS)?;
        beats += 1;
        for (member, step) in members.iter().zip(interval_steps.iter_mut()) {
            if let Err(err) = play_beat(member, args.workout_type, &mut rng, step).await {
                tracing::warn!(user_id = %member.user_id(), error = %err, "member beat failed");
            }
        }

        let board = watched.refresh_leaderboard().await?;
        let now_ms = u64::try_from(server.now()?.saturating_sub(start.timestamp()))
            .unwrap_or(0)
            .saturating_mul(1_000);
        if let Some(message) = hype.observe(&board, now_ms, &mut rng) {
            tracing::info!(rank = message.rank, "{}", message.text);
        }

        let views: Vec<_> = members
            .iter()
            .filter_map(|member| member.view().ok())
            .collect();
        let all_done = views.iter().all(|view| view.phase == SessionPhase::Done);
        let all_finished = args.workout_type == WorkoutType::ForTime
            && views
                .iter()
                .all(|view| view.step_count > 0 && view.current_step >= view.step_count);
        let ended = views
            .iter()
            .any(|view| view.status == Some(SessionStatus::Ended));

        if all_finished && !ended {
            coach.stop(args.class_id).await?;
        }
        if all_done {
            break;
        }
        if beats > max_beats {
            tracing::warn!(beats, "simulation did not settle; stopping");
            break;
        }
        if beats % 12 == 0 {
            if let Some(view) = views.first() {
                tracing::info!(
                    clock = %format_clock(view.elapsed_seconds),
                    remaining = ?view.remaining_seconds.map(format_clock),
                    "class running"
                );
            }
        }
        tokio::time::sleep(args.beat).await;
    }

    sync.shutdown().await;

    let board = watched.refresh_leaderboard().await?;
    println!("Final leaderboard ({} {})", args.workout_type, args.class_id);
    for ranked in &board.entries {
        let entry = &ranked.entry;
        let result = match (entry.finished, entry.elapsed_seconds, entry.total_reps) {
            (true, Some(seconds), _) | (false, Some(seconds), None) => format_clock(seconds),
            (_, _, Some(reps)) => format!("{reps} reps"),
            (_, None, None) => "-".to_owned(),
        };
        println!(
            "{:>3}. {:<12} {:<3} {}",
            ranked.position, entry.display_name, entry.scaling, result
        );
    }
    if let Some(score) = watched.view()?.score {
        println!("{} scored {}", watched.user_id(), score.display());
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Simulate,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Simulate,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    match cmd {
        Command::Config => {
            let config = SyncConfig::from_env()?;
            println!("{config:#?}");
            Ok(())
        }
        Command::Simulate => {
            let mut iter = argv.into_iter();
            let args = Args::parse(&mut iter).map_err(|e| {
                eprintln!("{e}");
                print_usage();
                e
            })?;
            simulate(args).await
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app=info,services=info,storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
