use std::collections::HashSet;

use thiserror::Error;

use crate::config::CheckConfig;
use crate::evaluator::{Evaluator, Outcome, ServiceOutcome, Tally};
use crate::events::{CheckEvent, EventSink, Status};
use crate::metadata::{MetadataClient, MetadataError};
use crate::state::{ContainerStates, StateError, StateStore};

pub const SERVICE_CHECK: &str = "service-state";

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub services: usize,
    pub containers: usize,
    pub tally: Tally,
}

impl CycleSummary {
    pub fn status(&self) -> Status {
        self.tally.status()
    }

    pub fn message(&self) -> String {
        self.tally.message()
    }
}

fn container_check(id: &str) -> String {
    format!("rancher-container-{id}-health_state")
}

/// Runs one polling cycle: load state, check every container of every
/// service, persist state.
///
/// State is written back even when the metadata API fails halfway, so the
/// counters already observed are not lost. Counters of containers that
/// left the topology are only dropped after a complete pass.
pub async fn run_cycle(
    config: &CheckConfig,
    client: &MetadataClient,
    store: &StateStore,
    sink: &dyn EventSink,
) -> Result<CycleSummary, RunError> {
    let mut state = store.load()?;
    if state.is_empty() {
        log::info!("No previous state in {:?}", store.path());
    }

    match check_services(config, client, sink, &mut state).await {
        Ok(summary) => {
            store.save(&state)?;
            Ok(summary)
        }
        Err(e) => {
            if let Err(save_err) = store.save(&state) {
                log::error!("Unable to persist state after failed check: {save_err}");
            }
            Err(e.into())
        }
    }
}

async fn check_services(
    config: &CheckConfig,
    client: &MetadataClient,
    sink: &dyn EventSink,
    state: &mut ContainerStates,
) -> Result<CycleSummary, MetadataError> {
    let services = client.list_services().await?;
    let mut evaluator = Evaluator::new(state);
    let mut listed = HashSet::new();
    let mut summary = CycleSummary {
        services: services.len(),
        ..Default::default()
    };

    for service in &services {
        let source = service.source();
        let monitored = service.monitored();

        for id in service.container_ids() {
            summary.containers += 1;
            listed.insert(id);
            let outcome = if monitored {
                let record = client.get_container(id).await?.found();
                evaluator.observe(id, record.as_ref())
            } else {
                evaluator.disabled()
            };

            if outcome == Outcome::Missing {
                log::warn!("Container {id} of {source} is unknown to the metadata API");
            }

            let event = CheckEvent::new(
                container_check(id),
                &source,
                outcome.status(),
                &format!("Instance {id} {}", outcome.reason()),
                &config.handlers,
            );
            sink.emit(&event).await;
        }

        let service_outcome = ServiceOutcome::of(service);
        if let ServiceOutcome::Degraded { current, scale } = service_outcome {
            log::warn!("Service {source} runs {current} of {scale} instances");
        }
        let event = CheckEvent::new(
            SERVICE_CHECK,
            &source,
            service_outcome.status(),
            &service_outcome.message(),
            &config.handlers,
        );
        sink.emit(&event).await;
    }

    evaluator.forget_unlisted(&listed);
    summary.tally = evaluator.tally();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::state::ContainerState;
    use axum::{
        Json, Router,
        extract::{Path, State},
        http::StatusCode,
        routing::get,
    };
    use serde_json::{Value, json};
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
        time::Duration,
    };

    /// In-process stand-in for the Rancher metadata API.
    #[derive(Clone, Default)]
    struct Rancher {
        services: Arc<Mutex<Value>>,
        containers: Arc<Mutex<HashMap<String, Value>>>,
    }

    impl Rancher {
        fn set_services(&self, services: Value) {
            *self.services.lock().unwrap() = services;
        }

        fn set_container(&self, id: &str, container: Value) {
            self.containers
                .lock()
                .unwrap()
                .insert(id.to_string(), container);
        }
    }

    async fn list_services(State(rancher): State<Rancher>) -> Json<Value> {
        Json(rancher.services.lock().unwrap().clone())
    }

    async fn get_container(
        State(rancher): State<Rancher>,
        Path(id): Path<String>,
    ) -> (StatusCode, Json<Value>) {
        match rancher.containers.lock().unwrap().get(&id) {
            Some(container) if container == "boom" => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"code": 500})),
            ),
            Some(container) => (StatusCode::OK, Json(container.clone())),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({"code": 404, "message": "Not found"})),
            ),
        }
    }

    struct Harness {
        rancher: Rancher,
        config: CheckConfig,
        client: MetadataClient,
        store: StateStore,
        sink: RecordingSink,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        async fn start() -> Self {
            let rancher = Rancher::default();
            rancher.set_services(json!([]));
            let app = Router::new()
                .route("/latest/services", get(list_services))
                .route("/latest/containers/{id}", get(get_container))
                .with_state(rancher.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            let dir = tempfile::tempdir().unwrap();
            let config = CheckConfig {
                api_url: format!("http://{addr}/latest"),
                state_dir: dir.path().join("state"),
                ..Default::default()
            };
            let client = MetadataClient::new(&config.api_url, Duration::from_secs(5)).unwrap();
            let store = StateStore::new(config.state_file());

            Self {
                rancher,
                config,
                client,
                store,
                sink: RecordingSink::default(),
                _dir: dir,
            }
        }

        async fn cycle(&self) -> Result<CycleSummary, RunError> {
            run_cycle(&self.config, &self.client, &self.store, &self.sink).await
        }
    }

    fn web_service(scale: u32, containers: &[&str]) -> Value {
        json!([{
            "name": "web",
            "stack_name": "shop",
            "scale": scale,
            "containers": containers,
            "metadata": {},
        }])
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let h = Harness::start().await;
        h.rancher
            .set_services(web_service(2, &["shop_web_1", "shop_web_2"]));
        h.rancher.set_container(
            "shop_web_1",
            json!({"name": "shop_web_1", "health_state": "healthy", "start_count": 1}),
        );
        h.rancher.set_container(
            "shop_web_2",
            json!({"name": "shop_web_2", "health_state": "healthy", "start_count": 1}),
        );

        let summary = h.cycle().await.unwrap();
        assert_eq!(summary.status(), Status::Ok);
        assert_eq!(summary.services, 1);
        assert_eq!(summary.containers, 2);
        assert_eq!(summary.message(), "All Rancher services instances are healthy");

        let events = h.sink.take();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.status == Status::Ok));
        assert!(events.iter().all(|e| e.source == "shop_web.rancher.internal"));
        assert_eq!(events[0].name, "rancher-container-shop_web_1-health_state");
        assert_eq!(events[0].output, "OK: Instance shop_web_1 is healthy");
        assert_eq!(events[0].handlers, vec!["default".to_string()]);
        assert_eq!(events[2].name, SERVICE_CHECK);
        assert_eq!(events[2].output, "OK: Service is healthy");

        let state = h.store.load().unwrap();
        assert_eq!(state.len(), 2);
    }

    #[tokio::test]
    async fn test_restart_between_cycles() {
        let h = Harness::start().await;
        h.rancher.set_services(web_service(1, &["shop_web_1"]));
        h.rancher.set_container(
            "shop_web_1",
            json!({"name": "shop_web_1", "health_state": "healthy", "start_count": 3}),
        );
        h.cycle().await.unwrap();
        h.sink.take();

        h.rancher.set_container(
            "shop_web_1",
            json!({"name": "shop_web_1", "health_state": "unhealthy", "start_count": 4}),
        );
        let summary = h.cycle().await.unwrap();

        let events = h.sink.take();
        assert_eq!(events[0].status, Status::Warning);
        assert_eq!(events[0].output, "WARNING: Instance shop_web_1 has restarted");
        // health was not evaluated this cycle
        assert_eq!(summary.tally.unhealthy, 0);
        assert_eq!(summary.status(), Status::Ok);
        assert_eq!(
            h.store.load().unwrap().get("shop_web_1"),
            Some(ContainerState { restart_count: 4 })
        );

        // next cycle sees the same counter and reports health again
        let summary = h.cycle().await.unwrap();
        assert_eq!(summary.status(), Status::Critical);
        assert_eq!(summary.message(), "Found 1 unhealthy instances");
        let events = h.sink.take();
        assert_eq!(events[0].output, "CRITICAL: Instance shop_web_1 is not healthy");
    }

    #[tokio::test]
    async fn test_degraded_service() {
        let h = Harness::start().await;
        h.rancher
            .set_services(web_service(3, &["shop_web_1", "shop_web_2"]));
        h.rancher
            .set_container("shop_web_1", json!({"health_state": "healthy"}));
        h.rancher
            .set_container("shop_web_2", json!({"health_state": "healthy"}));

        let summary = h.cycle().await.unwrap();
        // the scale check does not feed the tallies
        assert_eq!(summary.status(), Status::Ok);

        let events = h.sink.take();
        let service_event = events.iter().find(|e| e.name == SERVICE_CHECK).unwrap();
        assert_eq!(service_event.status, Status::Warning);
        assert!(service_event.output.contains("Current: 2 (Scale: 3)"));
    }

    #[tokio::test]
    async fn test_scale_check_is_per_service() {
        let h = Harness::start().await;
        h.rancher.set_services(json!([
            {"name": "web", "stack_name": "shop", "scale": 2, "containers": ["shop_web_1"]},
            {"name": "db", "stack_name": "shop", "scale": 1, "containers": ["shop_db_1"]},
        ]));
        h.rancher
            .set_container("shop_web_1", json!({"health_state": "healthy"}));
        h.rancher
            .set_container("shop_db_1", json!({"health_state": "healthy"}));

        h.cycle().await.unwrap();
        let events = h.sink.take();
        let service_events: Vec<_> = events.iter().filter(|e| e.name == SERVICE_CHECK).collect();
        assert_eq!(service_events.len(), 2);
        assert_eq!(service_events[0].source, "shop_web.rancher.internal");
        assert_eq!(service_events[0].status, Status::Warning);
        assert_eq!(service_events[1].source, "shop_db.rancher.internal");
        assert_eq!(service_events[1].status, Status::Ok);
    }

    #[tokio::test]
    async fn test_container_not_found() {
        let h = Harness::start().await;
        h.rancher.set_services(web_service(1, &["shop_web_1"]));

        let summary = h.cycle().await.unwrap();
        assert_eq!(summary.status(), Status::Warning);
        assert_eq!(summary.tally.missing, 1);

        let events = h.sink.take();
        assert_eq!(events[0].status, Status::Unknown);
        assert_eq!(events[0].output, "UNKNOWN: Instance shop_web_1 not found in metadata");
        assert!(h.store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmonitored_container() {
        let h = Harness::start().await;
        h.rancher.set_services(web_service(1, &["shop_web_1"]));
        h.rancher
            .set_container("shop_web_1", json!({"name": "shop_web_1", "start_count": 0}));

        let summary = h.cycle().await.unwrap();
        assert_eq!(summary.status(), Status::Warning);
        assert_eq!(summary.message(), "Found 1 instances not being monitored");
        assert_eq!(h.sink.take()[0].output, "WARNING: Instance shop_web_1 not monitored");
    }

    #[tokio::test]
    async fn test_disabled_service_is_not_queried() {
        let h = Harness::start().await;
        h.rancher.set_services(json!([{
            "name": "web",
            "stack_name": "shop",
            "scale": 1,
            "containers": ["shop_web_1"],
            "metadata": {"sensu": {"monitored": false}},
        }]));
        // would fail the cycle if the container were fetched
        h.rancher.set_container("shop_web_1", json!("boom"));

        let summary = h.cycle().await.unwrap();
        assert_eq!(summary.status(), Status::Ok);
        let events = h.sink.take();
        assert_eq!(
            events[0].output,
            "OK: Instance shop_web_1 not monitored (disabled)"
        );
        assert!(h.store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_api_failure_aborts_and_keeps_partial_state() {
        let h = Harness::start().await;
        let mut previous = ContainerStates::default();
        previous.record("shop_old_1", 5);
        h.store.save(&previous).unwrap();
        h.rancher
            .set_services(web_service(2, &["shop_web_1", "shop_web_2"]));
        h.rancher.set_container(
            "shop_web_1",
            json!({"health_state": "healthy", "start_count": 2}),
        );
        h.rancher.set_container("shop_web_2", json!("boom"));

        let res = h.cycle().await;
        assert!(
            matches!(res, Err(RunError::Metadata(MetadataError::Status { .. }))),
            "{:?}",
            res
        );

        // nothing is emitted past the failure
        let events = h.sink.take();
        assert_eq!(events.len(), 1);
        let state = h.store.load().unwrap();
        assert_eq!(
            state.get("shop_web_1"),
            Some(ContainerState { restart_count: 2 })
        );
        // an incomplete pass does not forget anything
        assert_eq!(
            state.get("shop_old_1"),
            Some(ContainerState { restart_count: 5 })
        );
    }

    #[tokio::test]
    async fn test_removed_containers_are_forgotten() {
        let h = Harness::start().await;
        h.rancher
            .set_services(web_service(2, &["shop_web_1", "shop_web_2"]));
        h.rancher.set_container(
            "shop_web_1",
            json!({"health_state": "healthy", "start_count": 1}),
        );
        h.rancher.set_container(
            "shop_web_2",
            json!({"health_state": "healthy", "start_count": 3}),
        );
        h.cycle().await.unwrap();
        assert_eq!(h.store.load().unwrap().len(), 2);

        h.rancher.set_services(web_service(2, &["shop_web_1"]));
        h.cycle().await.unwrap();

        let state = h.store.load().unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(state.get("shop_web_2"), None);
        assert_eq!(
            state.get("shop_web_1"),
            Some(ContainerState { restart_count: 1 })
        );
    }

    #[tokio::test]
    async fn test_corrupt_state_is_fatal() {
        let h = Harness::start().await;
        h.rancher.set_services(web_service(1, &["shop_web_1"]));
        std::fs::create_dir_all(&h.config.state_dir).unwrap();
        std::fs::write(h.config.state_file(), "[[[").unwrap();

        let res = h.cycle().await;
        assert!(
            matches!(res, Err(RunError::State(StateError::Corrupt { .. }))),
            "{:?}",
            res
        );
        assert!(h.sink.take().is_empty());
    }
}
