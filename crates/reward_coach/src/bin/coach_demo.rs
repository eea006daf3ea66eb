//! Drives the reward controller against scripted in-process workers and
//! prints the structured log, so the shaping pipeline can be watched
//! without an emulator or a generation service.

use std::env;
use std::process;

use reward_coach::shaping::{
    CoachConfig, InProcessWorker, MilestoneSchedule, RewardController, ShapingLogKind,
    WorkerHandle,
};

#[derive(Debug, Clone, PartialEq)]
struct CliOptions {
    steps: u64,
    workers: usize,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            steps: 6_000,
            workers: 2,
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let options = match parse_options(args.iter().skip(1).map(|arg| arg.as_str())) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}");
            print_help();
            process::exit(1);
        }
    };

    let config = CoachConfig {
        milestones: MilestoneSchedule::new(vec![
            "LITTLEROOT_TOWN".to_string(),
            "BIRCH_LAB_VISITED".to_string(),
            "STARTER_CHOSEN".to_string(),
            "ROUTE_101".to_string(),
        ]),
        ..CoachConfig::default()
    };
    let mut controller = RewardController::rule_based(&config);

    let mut workers: Vec<InProcessWorker> = (0..options.workers)
        .map(|index| {
            let mut worker = InProcessWorker::new(format!("worker-{index}"));
            worker.map_id = "LITTLEROOT_TOWN".to_string();
            worker.position = (10, 10);
            worker
        })
        .collect();

    println!("workers: {}", options.workers);
    println!("steps: {}", options.steps);

    for step in 0..=options.steps {
        // Scripted play: the first worker wanders, speaks to an NPC, and
        // earns milestones; the others idle.
        if let Some(worker) = workers.first_mut() {
            worker.position.0 = 10 + ((step / 120) % 8) as i32;
            match step {
                1_020 => worker.dialogue = "Go see PROF. BIRCH outside town!".to_string(),
                2_050 => {
                    worker.milestone_count = 1;
                    worker.dialogue = "LITTLEROOT TOWN - a quiet place.".to_string();
                }
                4_080 => {
                    worker.milestone_count = 2;
                    worker.dialogue = "PROF. BIRCH: Welcome to my lab!".to_string();
                }
                _ => {}
            }
        }

        let mut refs: Vec<&mut dyn WorkerHandle> = workers
            .iter_mut()
            .map(|worker| worker as &mut dyn WorkerHandle)
            .collect();
        controller.on_step(step, &mut refs);
    }

    for entry in controller.drain_log() {
        match entry.kind {
            ShapingLogKind::MultiplierPublished {
                worker_id,
                multiplier,
                rationale,
            } => {
                if (multiplier - 1.0).abs() > f64::EPSILON {
                    println!("step={} {} x{:.2} {}", entry.step, worker_id, multiplier, rationale);
                }
            }
            other => println!("step={} {:?}", entry.step, other),
        }
    }

    let metrics = controller.metrics();
    println!(
        "cycles: objective={} proximity={} | objectives set={} completed={} | locations learned={}",
        metrics.objective_cycles,
        metrics.proximity_cycles,
        metrics.objectives_set,
        metrics.objectives_completed,
        metrics.locations_learned,
    );

    for worker in &workers {
        println!(
            "{}: multiplier={:.2} rationale={}",
            worker.id, worker.reward_multiplier, worker.reward_rationale
        );
    }
}

fn parse_options<'a>(args: impl Iterator<Item = &'a str>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg {
            "--steps" => {
                let value = args.next().ok_or("--steps requires a value")?;
                options.steps = value
                    .parse()
                    .map_err(|_| format!("invalid --steps value: {value}"))?;
            }
            "--workers" => {
                let value = args.next().ok_or("--workers requires a value")?;
                options.workers = value
                    .parse()
                    .map_err(|_| format!("invalid --workers value: {value}"))?;
            }
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(options)
}

fn print_help() {
    println!("usage: coach_demo [--steps N] [--workers N]");
    println!("  --steps N    simulation steps to run (default 6000)");
    println!("  --workers N  in-process workers to drive (default 2)");
}
