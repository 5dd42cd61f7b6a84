mod script;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, Criterion};
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use common::config::{load_config, ClassifierConfig};
use common::{Bands, DashboardConfig, MemoryStore, RemoteValue, StatusChangeLog};
use panels::Dashboard;

use script::{load_script, Injection, ScriptStep};

const SETTLE: Duration = Duration::from_millis(5);

/// Pushes every step into the store, waiting for its timestamp when `paced`.
async fn replay(
    store: &MemoryStore,
    dashboard: &Dashboard,
    steps: &[ScriptStep],
    paced: bool,
    verbose: bool,
) {
    let start = Instant::now();
    for step in steps {
        if paced {
            tokio::time::sleep_until(start + step.at).await;
        }
        match &step.injection {
            Injection::Value(value) => store.publish(&step.path, value.clone()),
            Injection::TransportError => store.inject_error(&step.path, "replayed transport error"),
        }
        if paced {
            tokio::time::sleep(SETTLE).await;
        } else {
            tokio::task::yield_now().await;
        }

        if verbose {
            print_step(dashboard, step);
        }
    }
}

fn print_step(dashboard: &Dashboard, step: &ScriptStep) {
    let injected = match &step.injection {
        Injection::Value(Some(value)) => value.to_string(),
        Injection::Value(None) => "null".to_string(),
        Injection::TransportError => "<error>".to_string(),
    };
    let channel = dashboard
        .snapshot()
        .into_iter()
        .flat_map(|w| w.channels)
        .find(|c| c.path == step.path);

    match channel {
        Some(c) => println!(
            "{:>6}ms  {:<28} {:<24} -> {}: {} ({})",
            step.at.as_millis(),
            step.path,
            injected,
            c.label,
            c.value,
            c.category
        ),
        None => println!(
            "{:>6}ms  {:<28} {:<24} -> (no panel watches this path)",
            step.at.as_millis(),
            step.path,
            injected
        ),
    }
}

fn print_summary(dashboard: &Dashboard) {
    println!("\n=== Final Panels ===");
    for widget in dashboard.snapshot() {
        let headline = widget
            .headline
            .map(|h| format!(" [{}]", h))
            .unwrap_or_default();
        println!("{}{}", widget.title, headline);
        for channel in &widget.channels {
            let alert = if channel.alert { " (!)" } else { "" };
            println!(
                "  {:<16} {:>22}  {}{}",
                channel.label, channel.value, channel.category, alert
            );
        }
    }

    println!("\n=== Status Changes ===");
    for row in dashboard.audit_entries() {
        println!(
            "  #{:<3} {:<10} {:<12} {}",
            row.id, row.widget, row.entity_key, row.rendered_status
        );
    }

    let counters = dashboard.diagnostics().snapshot();
    println!("\n=== Diagnostics ===");
    println!("Notifications: {}", counters.notifications);
    println!("Subscription errors: {}", counters.subscription_errors);
    println!("Decode failures: {}", counters.decode_failures);
    let recorder = dashboard.recorder();
    println!(
        "Commands: {} recorded, {} failed",
        recorder.get_results().len(),
        recorder.failures()
    );
}

fn benchmark_classifier(c: &mut Criterion, config: &ClassifierConfig) {
    let bands = Bands::soil_moisture(config);
    let readings: Vec<RemoteValue<f64>> = (0..=100)
        .map(|v| RemoteValue::Present(v as f64))
        .chain(std::iter::once(RemoteValue::Unknown))
        .collect();

    c.bench_function("classify_soil_moisture", |b| {
        b.iter(|| {
            for reading in &readings {
                black_box(bands.classify(black_box(reading)));
            }
        });
    });
}

fn benchmark_status_log(c: &mut Criterion, capacity: usize) {
    let statuses = ["Dry - Needs Water", "Moderate", "Moderate", "No Data", "Well Hydrated"];

    c.bench_function("status_log_record", |b| {
        b.iter(|| {
            let log = StatusChangeLog::new(capacity);
            for (i, status) in statuses.iter().cycle().take(100).enumerate() {
                let key = if i % 2 == 0 { "sensor1" } else { "sensor2" };
                black_box(log.record(key, status));
            }
        });
    });
}

fn benchmark_replay(
    c: &mut Criterion,
    rt: &Runtime,
    config: &DashboardConfig,
    steps: &[ScriptStep],
) {
    c.bench_function("replay_script", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(MemoryStore::new());
                let dashboard = Dashboard::mount(store.clone(), config);
                replay(&store, &dashboard, black_box(steps), false, false).await;
                black_box(dashboard.audit_entries());
                dashboard.unmount();
            });
        });
    });
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: replay_runner <config_file> <script.csv> [--criterion]");
        eprintln!("Example: replay_runner configs/dashboard.toml replays/sample.csv");
        eprintln!("Example: replay_runner configs/dashboard.toml replays/sample.csv --criterion");
        std::process::exit(1);
    }

    let config_path = &args[1];
    let script_path = &args[2];
    let use_criterion = args.iter().any(|a| a == "--criterion");

    let (mut config, config_error) = match load_config(config_path) {
        Ok(config) => (config, None),
        Err(e) => (DashboardConfig::default(), Some(e.to_string())),
    };

    // Logging distorts benchmark timings
    if use_criterion {
        config.enable_logging = false;
    }
    if config.enable_logging {
        init_tracing(&config.logging.level);
    }
    if let Some(error) = config_error {
        warn!(path = %config_path, %error, "config not loaded, using defaults");
    }

    let steps = match load_script(script_path) {
        Ok(steps) => steps,
        Err(e) => {
            eprintln!("Failed to load script {}: {}", script_path, e);
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    println!("========================================");
    println!("{} Replay", config.dashboard_name);
    println!("========================================");
    println!("Config: {}", config_path);
    println!("Script: {} ({} steps)", script_path, steps.len());
    if let Some(last) = steps.last() {
        println!("Duration: {:.2} seconds", last.at.as_secs_f64());
    }
    if use_criterion {
        println!("Using Criterion for statistical analysis");
        println!("Logging disabled for benchmark validity");
    }
    println!("========================================\n");

    if use_criterion {
        let mut criterion = Criterion::default()
            .sample_size(20)
            .measurement_time(Duration::from_secs(10));

        benchmark_classifier(&mut criterion, &config.classifier);
        benchmark_status_log(&mut criterion, config.status_log.capacity);
        benchmark_replay(&mut criterion, &rt, &config, &steps);

        println!("\n========================================");
        println!("Criterion statistical analysis complete!");
        println!("Check the target/criterion directory for detailed HTML reports.");
        println!("========================================");
        return;
    }

    let seed = config.seed_values().unwrap_or_else(|e| {
        warn!(error = %e, "seed values ignored");
        Vec::new()
    });

    rt.block_on(async {
        let store = Arc::new(MemoryStore::with_seed(seed));
        let dashboard = Dashboard::mount(store.clone(), &config);
        tokio::time::sleep(SETTLE).await;

        replay(&store, &dashboard, &steps, true, true).await;
        print_summary(&dashboard);

        match dashboard.save_audit_csv("replay_status_log.csv") {
            Ok(n) => println!("\n{} status changes saved to replay_status_log.csv", n),
            Err(e) => eprintln!("Failed to save status log: {}", e),
        }
        match dashboard.recorder().save_to_csv("replay_commands.csv") {
            Ok(n) => println!("{} commands saved to replay_commands.csv", n),
            Err(e) => eprintln!("Failed to save commands: {}", e),
        }

        dashboard.unmount();
    });

    println!("\n========================================");
    println!("Replay complete!");
    println!("========================================");
}
