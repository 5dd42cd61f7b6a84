mod menu;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use common::config::{load_config, DEFAULT_CONFIG_PATH};
use common::{DashboardConfig, MemoryStore};
use panels::{ActuatorCommandState, Dashboard, ToggleRequest, WidgetSnapshot};

/// How long the runtime is driven between menu interactions so pending
/// notifications and timers are processed.
const SETTLE: Duration = Duration::from_millis(20);

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let (config, config_error) = match load_config(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (DashboardConfig::default(), Some(e.to_string())),
    };

    if config.enable_logging {
        init_tracing(&config.logging.level);
    }
    if let Some(error) = config_error {
        warn!(path = %config_path, %error, "config not loaded, using defaults");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return;
        }
    };
    let _guard = runtime.enter();

    let seed = match config.seed_values() {
        Ok(seed) => seed,
        Err(e) => {
            warn!(error = %e, "seed values ignored");
            Vec::new()
        }
    };
    let store = Arc::new(MemoryStore::with_seed(seed));
    let dashboard = Dashboard::mount(store.clone(), &config);
    settle(&runtime);

    println!("===========================================");
    println!("Welcome to the {} Dashboard", dashboard.name());
    println!("===========================================");

    loop {
        menu::show_menu(dashboard.name());
        let choice = match menu::get_user_choice() {
            Some(choice) => choice,
            None => break,
        };
        settle(&runtime);

        match choice {
            Ok(1) => show_panels(&dashboard),
            Ok(2) => toggle(&runtime, &dashboard, "irrigation", "pump1"),
            Ok(3) => toggle(&runtime, &dashboard, "irrigation", "pump2"),
            Ok(4) => toggle(&runtime, &dashboard, "tank", "tank_pump"),
            Ok(5) => publish_reading(&runtime, &store, &dashboard),
            Ok(6) => show_log_and_diagnostics(&dashboard),
            Ok(7) => export_csv(&dashboard),
            Ok(8) => {
                println!("Goodbye!");
                break;
            }
            _ => println!("Invalid choice. Please select 1-8."),
        }
    }

    dashboard.unmount();
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn settle(runtime: &Runtime) {
    runtime.block_on(tokio::time::sleep(SETTLE));
}

fn show_panels(dashboard: &Dashboard) {
    for widget in dashboard.snapshot() {
        print_widget(&widget);
    }
    menu::wait_for_enter();
}

fn print_widget(widget: &WidgetSnapshot) {
    match widget.headline {
        Some(headline) => println!("\n--- {} [{}] ---", widget.title, headline),
        None => println!("\n--- {} ---", widget.title),
    }
    for channel in &widget.channels {
        let alert = if channel.alert { "  (!)" } else { "" };
        let gauge = channel
            .gauge
            .map(|fill| format!(" {}", gauge_bar(fill)))
            .unwrap_or_default();
        let command = match channel.command_state {
            Some(ActuatorCommandState::Idle) => " [ready]",
            Some(ActuatorCommandState::InFlight) => " [sending]",
            Some(ActuatorCommandState::CoolingDown) => " [cooling down]",
            None => "",
        };
        println!(
            "{:<16} {:>22}  {}{}{}{}",
            channel.label, channel.value, channel.category, gauge, command, alert
        );
    }
}

fn gauge_bar(fill: f64) -> String {
    const WIDTH: usize = 20;
    let filled = ((fill * WIDTH as f64).round() as usize).min(WIDTH);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(WIDTH - filled))
}

fn toggle(runtime: &Runtime, dashboard: &Dashboard, widget: &str, entity_key: &str) {
    match dashboard.toggle(widget, entity_key) {
        Some(ToggleRequest::Accepted(handle)) => match runtime.block_on(handle) {
            Ok(Ok(toggled)) => println!(
                "{} switched {}",
                entity_key,
                if toggled.written { "ON" } else { "OFF" }
            ),
            Ok(Err(e)) => println!("Command failed: {}", e),
            Err(e) => println!("Command task ended unexpectedly: {}", e),
        },
        Some(ToggleRequest::Rejected(state)) => {
            println!("{} is busy ({:?}), try again shortly.", entity_key, state)
        }
        Some(ToggleRequest::NoRuntime) => println!("Runtime unavailable, toggle ignored."),
        None => println!("{} cannot be toggled.", entity_key),
    }
    settle(runtime);
}

fn publish_reading(runtime: &Runtime, store: &MemoryStore, dashboard: &Dashboard) {
    println!("\nPaths:");
    for widget in dashboard.snapshot() {
        for channel in widget.channels {
            println!("- {}", channel.path);
        }
    }
    menu::prompt("Path: ");
    let Some(path) = menu::read_line() else { return };
    menu::prompt("Value (JSON, e.g. 42, true, \"DARK\", null; !error to fail): ");
    let Some(raw) = menu::read_line() else { return };

    if raw == "!error" {
        store.inject_error(&path, "simulated transport error");
    } else {
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => store.publish(&path, None),
            Ok(value) => store.publish(&path, Some(value)),
            Err(e) => {
                println!("Not valid JSON: {}", e);
                return;
            }
        }
    }
    settle(runtime);
    println!("Published to {}.", path);
}

fn show_log_and_diagnostics(dashboard: &Dashboard) {
    println!("\n=== Status Changes ===");
    let rows = dashboard.audit_entries();
    if rows.is_empty() {
        println!("No status changes recorded.");
    }
    for row in rows {
        println!(
            "{}  {:<10} {:<12} {}",
            row.timestamp.format("%H:%M:%S"),
            row.widget,
            row.entity_key,
            row.rendered_status
        );
    }

    let counters = dashboard.diagnostics().snapshot();
    println!("\n=== Diagnostics ===");
    println!("Notifications: {}", counters.notifications);
    println!("Subscription errors: {}", counters.subscription_errors);
    println!("Decode failures: {}", counters.decode_failures);
    println!(
        "Commands: {} accepted, {} rejected, {} completed, {} failed",
        counters.commands_accepted,
        counters.commands_rejected,
        counters.commands_completed,
        counters.commands_failed
    );
    menu::wait_for_enter();
}

fn export_csv(dashboard: &Dashboard) {
    match dashboard.save_audit_csv("status_log.csv") {
        Ok(n) => println!("Saved {} status changes to status_log.csv", n),
        Err(e) => println!("Failed to save status log: {}", e),
    }
    match dashboard.recorder().save_to_csv("commands.csv") {
        Ok(n) => println!("Saved {} commands to commands.csv", n),
        Err(e) => println!("Failed to save commands: {}", e),
    }
    menu::wait_for_enter();
}
