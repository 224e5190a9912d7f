//! A host with config entries, flows, services and the integration wired up

use cdrive_config_entries::{ConfigEntries, ConfigEntry, FlowManager, Storage};
use cdrive_connected_drive::{ConnectedDrive, Executor, DOMAIN};
use cdrive_services::{ServiceRegistry, SharedServiceRegistry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::{utc, FakeFactory, MockClock, RecordingForwarder};

pub struct TestHost {
    _config_dir: TempDir,
    pub services: SharedServiceRegistry,
    pub factory: FakeFactory,
    pub forwarder: Arc<RecordingForwarder>,
    pub clock: MockClock,
    pub integration: Arc<ConnectedDrive>,
    pub flows: FlowManager,
}

impl TestHost {
    pub fn new() -> Self {
        let config_dir = TempDir::new().unwrap();
        let services: SharedServiceRegistry = Arc::new(ServiceRegistry::new());
        let factory = FakeFactory::new();
        let forwarder = RecordingForwarder::new();
        let clock = MockClock::at(utc(12, 3, 7));

        let integration = Arc::new(ConnectedDrive::with_runtime(
            services.clone(),
            Arc::new(factory.clone()),
            forwarder.clone(),
            Executor::default(),
            Arc::new(clock.clone()),
        ));

        let entries = Arc::new(ConfigEntries::new(Storage::new(config_dir.path())));
        let flows = FlowManager::new(entries);
        integration.register(&flows);

        Self {
            _config_dir: config_dir,
            services,
            factory,
            forwarder,
            clock,
            integration,
            flows,
        }
    }

    pub fn entries(&self) -> &Arc<ConfigEntries> {
        self.flows.entries()
    }

    /// Add an entry directly and set it up; returns its id
    pub async fn add_account(&self, data: HashMap<String, Value>) -> String {
        let title = data["username"].as_str().unwrap_or_default().to_string();
        let entry = self
            .entries()
            .add(ConfigEntry::new(DOMAIN, title).with_data(data))
            .await
            .unwrap();
        let _ = self.entries().setup(&entry.entry_id).await;
        entry.entry_id
    }

    pub fn domain_services(&self) -> Vec<String> {
        self.services.domain_services(DOMAIN)
    }
}

pub fn account_data(
    username: &str,
    password: &str,
    region: &str,
    read_only: bool,
) -> HashMap<String, Value> {
    HashMap::from([
        ("username".to_string(), json!(username)),
        ("password".to_string(), json!(password)),
        ("region".to_string(), json!(region)),
        ("read_only".to_string(), json!(read_only)),
    ])
}
