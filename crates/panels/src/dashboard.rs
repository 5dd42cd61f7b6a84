use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use common::{CommandRecorder, DashboardConfig, RemoteStore, SharedDiagnostics};

use crate::actuator::ToggleRequest;
use crate::registry::ControllerRegistry;
use crate::widget::{PanelContext, WidgetSnapshot, WidgetSpec, WidgetViewModel};

/// One row of the combined status audit, as exported to CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRow {
    pub widget: String,
    pub id: u64,
    pub entity_key: String,
    pub rendered_status: String,
    pub timestamp: DateTime<Utc>,
}

/// All six panels mounted against one store and one controller registry.
pub struct Dashboard {
    name: String,
    widgets: Vec<WidgetViewModel>,
    registry: ControllerRegistry,
    diagnostics: Arc<SharedDiagnostics>,
    recorder: CommandRecorder,
}

impl Dashboard {
    pub fn mount(store: Arc<dyn RemoteStore>, config: &DashboardConfig) -> Self {
        Self::mount_widgets(store, config, WidgetSpec::all())
    }

    pub fn mount_widgets(
        store: Arc<dyn RemoteStore>,
        config: &DashboardConfig,
        specs: Vec<WidgetSpec>,
    ) -> Self {
        let diagnostics = Arc::new(SharedDiagnostics::default());
        let recorder = CommandRecorder::new();
        let registry = ControllerRegistry::new(
            Arc::clone(&store),
            config.cooldown(),
            Arc::clone(&diagnostics),
            Some(recorder.clone()),
        );

        let ctx = PanelContext {
            store,
            registry: registry.clone(),
            diagnostics: Arc::clone(&diagnostics),
            classifier: config.classifier.clone(),
            log_capacity: config.status_log.capacity,
        };

        let widgets: Vec<_> = specs
            .into_iter()
            .map(|spec| WidgetViewModel::mount(spec, &ctx))
            .collect();

        info!(
            dashboard = %config.dashboard_name,
            widgets = widgets.len(),
            actuators = registry.len(),
            "dashboard mounted"
        );

        Self {
            name: config.dashboard_name.clone(),
            widgets,
            registry,
            diagnostics,
            recorder,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn widgets(&self) -> &[WidgetViewModel] {
        &self.widgets
    }

    pub fn widget(&self, name: &str) -> Option<&WidgetViewModel> {
        self.widgets.iter().find(|w| w.name() == name)
    }

    pub fn snapshot(&self) -> Vec<WidgetSnapshot> {
        self.widgets.iter().map(WidgetViewModel::snapshot).collect()
    }

    /// `None` when the widget or channel does not exist or is not actuated.
    pub fn toggle(&self, widget: &str, entity_key: &str) -> Option<ToggleRequest> {
        self.widget(widget)?.toggle(entity_key)
    }

    pub fn diagnostics(&self) -> &Arc<SharedDiagnostics> {
        &self.diagnostics
    }

    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    pub fn registry(&self) -> &ControllerRegistry {
        &self.registry
    }

    /// Every logged status change across widgets, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditRow> {
        let mut rows: Vec<AuditRow> = self
            .widgets
            .iter()
            .filter_map(|w| w.log().map(|log| (w.name(), log.entries())))
            .flat_map(|(widget, entries)| {
                entries.into_iter().map(move |e| AuditRow {
                    widget: widget.to_string(),
                    id: e.id,
                    entity_key: e.entity_key,
                    rendered_status: e.rendered_status,
                    timestamp: e.timestamp,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        rows
    }

    pub fn save_audit_csv(&self, filename: &str) -> Result<usize, Box<dyn Error>> {
        let rows = self.audit_entries();
        let mut wtr = csv::Writer::from_path(filename)?;
        for row in &rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(rows.len())
    }

    /// Releases every subscription. Commands already running finish on their own.
    pub fn unmount(self) {
        for widget in self.widgets {
            widget.unmount();
        }
        info!(dashboard = %self.name, "dashboard unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{paths, MemoryStore};
    use serde_json::json;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn mounts_all_panels_with_three_actuators() {
        let store = Arc::new(MemoryStore::new());
        let dashboard = Dashboard::mount(store.clone(), &DashboardConfig::default());

        let names: Vec<_> = dashboard.widgets().iter().map(|w| w.name()).collect();
        assert_eq!(names, vec!["soil", "irrigation", "tank", "light", "security", "weather"]);
        assert_eq!(dashboard.registry().len(), 3);
        assert_eq!(store.subscriber_count(paths::SOIL_PUMP_1), 1);
        assert_eq!(dashboard.name(), "Agri-Bot");
    }

    #[tokio::test(start_paused = true)]
    async fn toggles_route_by_widget_and_channel() {
        let store = Arc::new(MemoryStore::with_seed([(paths::SOIL_PUMP_2, json!(true))]));
        let dashboard = Dashboard::mount(store.clone(), &DashboardConfig::default());
        settle().await;

        assert!(dashboard.toggle("tank", "pump2").is_none());
        assert!(dashboard.toggle("weather", "temperature").is_none());

        let result = dashboard.toggle("irrigation", "pump2").unwrap().outcome().await;
        assert!(matches!(result, Some(Ok(_))));
        assert_eq!(store.writes_to(paths::SOIL_PUMP_2), vec![json!(false)]);

        let records = dashboard.recorder().get_results();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].previous, Some(true));
        assert_eq!(records[0].written, Some(false));
        assert_eq!(dashboard.diagnostics().snapshot().commands_accepted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn audit_export_covers_every_logging_widget() {
        let store = Arc::new(MemoryStore::with_seed([
            (paths::SOIL_SENSOR_1, json!(45)),
            (paths::WEATHER_TEMPERATURE, json!(20)),
        ]));
        let dashboard = Dashboard::mount(store.clone(), &DashboardConfig::default());
        settle().await;

        let rows = dashboard.audit_entries();
        assert!(rows.iter().all(|r| r.widget != "weather"));
        assert!(rows
            .iter()
            .any(|r| r.entity_key == "sensor1" && r.rendered_status == "Moderate"));

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("audit.csv");
        let written = dashboard.save_audit_csv(file.to_str().unwrap()).unwrap();
        assert_eq!(written, rows.len());

        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.starts_with("widget,id,entity_key,rendered_status,timestamp"));
    }
}
