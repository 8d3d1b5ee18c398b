//! Integration tests for the async zone runner.
//!
//! Every test runs on a paused tokio clock, so timers fire instantly and in
//! order while the three loops of each zone interleave as in production.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use barnloop_core::config::{ControllerConfig, EngineConfig, ZoneConfig};
use barnloop_core::operator::{OperatorState, RunEndReason};
use barnloop_core::overrides::CommandError;
use barnloop_core::runner::{run_zones, spawn_zones};
use barnloop_core::sinks::{ChannelSink, MemoryKnowledge, SinkEvent, Sinks, TracingExecutor};
use barnloop_physics::SensorNoise;
use barnloop_types::{
    ActuatorId, ActuatorLevel, Command, CommandAction, ControlMode, Metric, ZoneId,
};

fn config(max_ticks: u64, zones: &[&str]) -> ControllerConfig {
    ControllerConfig {
        engine: EngineConfig {
            tick_interval_ms: 100,
            analysis_interval_ms: 100,
            max_ticks,
            ..EngineConfig::default()
        },
        zones: zones
            .iter()
            .map(|&id| ZoneConfig {
                id: ZoneId::from(id),
                sensors: SensorNoise::NONE,
                ..ZoneConfig::default()
            })
            .collect(),
        ..ControllerConfig::default()
    }
}

fn operator(config: &ControllerConfig) -> Arc<OperatorState> {
    Arc::new(OperatorState::new(
        config.engine.tick_interval_ms,
        config.engine.max_ticks,
    ))
}

#[tokio::test(start_paused = true)]
async fn bounded_run_stops_at_max_ticks() {
    let config = config(10, &["zone1", "zone2"]);
    let operator = operator(&config);
    let knowledge = Arc::new(MemoryKnowledge::new(1_000));
    let sinks = Sinks {
        plans: Arc::new(TracingExecutor),
        knowledge: knowledge.clone(),
    };

    let summary = run_zones(&config, &operator, &sinks).await.unwrap();

    assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
    assert_eq!(summary.zones.len(), 2);
    for zone in &summary.zones {
        assert_eq!(zone.ticks, 10);
        assert!(zone.analysis_cycles >= 1);
        assert!(zone.decision_cycles <= zone.analysis_cycles);
        assert_eq!(zone.actuators.len(), 6);
    }
    // One reading per metric per tick per zone.
    let metrics = Metric::ALL.len();
    assert_eq!(knowledge.readings().len(), 2 * 10 * metrics);
    assert_eq!(knowledge.statuses().len() % metrics, 0);
    assert!(!knowledge.statuses().is_empty());
    assert_eq!(operator.end_reason().await, Some(RunEndReason::MaxTicksReached));
}

#[tokio::test(start_paused = true)]
async fn operator_stop_ends_unbounded_run() {
    let config = config(0, &["zone1"]);
    let operator = operator(&config);
    let (sink, _rx) = ChannelSink::new();
    let sink = Arc::new(sink);
    let sinks = Sinks {
        plans: sink.clone(),
        knowledge: sink,
    };

    let runtime = spawn_zones(&config, &operator, &sinks).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    operator.request_stop();
    let summary = runtime.join(&operator).await.unwrap();

    assert_eq!(summary.end_reason, RunEndReason::OperatorStop);
    let zone = summary.zones.first().unwrap();
    assert!(zone.ticks >= 10);
}

#[tokio::test(start_paused = true)]
async fn pause_freezes_simulation() {
    let config = config(0, &["zone1"]);
    let operator = operator(&config);
    let knowledge = Arc::new(MemoryKnowledge::new(10_000));
    let sinks = Sinks {
        plans: Arc::new(TracingExecutor),
        knowledge: knowledge.clone(),
    };

    let runtime = spawn_zones(&config, &operator, &sinks).unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;
    operator.pause();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let frozen = knowledge.readings().len();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(knowledge.readings().len(), frozen);

    operator.resume();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(knowledge.readings().len() > frozen);

    operator.request_stop();
    runtime.join(&operator).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn commands_reach_the_decision_loop() {
    let config = config(0, &["zone1"]);
    let operator = operator(&config);
    let (sink, mut rx) = ChannelSink::new();
    let sink = Arc::new(sink);
    let sinks = Sinks {
        plans: sink.clone(),
        knowledge: sink,
    };

    let runtime = spawn_zones(&config, &operator, &sinks).unwrap();
    let handle = runtime.handle(&ZoneId::from("zone1")).unwrap().clone();

    handle
        .submit(Command {
            zone_id: ZoneId::from("zone1"),
            actuator_id: ActuatorId::from("fan"),
            action: CommandAction::Set,
            level: Some(75.0),
            ttl_s: 3_600,
        })
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let table = handle.actuators();
    let fan = table.get(&ActuatorId::from("fan")).unwrap();
    assert_eq!(fan.level, ActuatorLevel::Percent(75.0));
    assert_eq!(fan.mode, ControlMode::Overridden);

    let wrong_zone = handle.submit(Command {
        zone_id: ZoneId::from("zone9"),
        actuator_id: ActuatorId::from("fan"),
        action: CommandAction::Set,
        level: Some(10.0),
        ttl_s: 60,
    });
    assert!(matches!(wrong_zone, Err(CommandError::WrongZone { .. })));

    operator.request_stop();
    runtime.join(&operator).await.unwrap();

    let mut published = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SinkEvent::Published(plans) = event {
            published.extend(plans);
        }
    }
    assert!(published.iter().any(|p| {
        p.actuator_id.as_str() == "fan" && p.target_level == ActuatorLevel::Percent(75.0)
    }));
}

#[tokio::test(start_paused = true)]
async fn invalid_zone_config_spawns_nothing() {
    let mut config = config(5, &["zone1"]);
    if let Some(zone) = config.zones.first_mut() {
        zone.detector.debounce_fraction = 2.0;
    }
    let operator = operator(&config);
    let sinks = Sinks {
        plans: Arc::new(TracingExecutor),
        knowledge: Arc::new(MemoryKnowledge::new(10)),
    };
    assert!(spawn_zones(&config, &operator, &sinks).is_err());
}
