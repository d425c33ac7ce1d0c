use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{Duration, Utc};

use fencewatch::geometry::destination;
use fencewatch::{
    BatchControl, CancelToken, ConnectionState, DevicePosition, EventHub, FenceConfig, Geofence, GeofenceEngine,
    GeofenceStore, Geometry, InMemoryGeofenceStore, LatLng, LatestPositions, Subscriber, SubscriberConfig,
};

const CENTER: LatLng = LatLng::new(-33.8688, 151.2093);

struct Fleet {
    engine: GeofenceEngine,
    store: Arc<InMemoryGeofenceStore>,
    positions: Arc<LatestPositions>,
    hub: Arc<EventHub>,
}

fn fleet(devices: &[&str]) -> Fleet {
    let store = Arc::new(InMemoryGeofenceStore::new());
    store
        .upsert(Geofence::new(
            "harbour",
            Geometry::Circle {
                center: CENTER,
                radius_meters: 800.0,
            },
        ))
        .unwrap();
    for d in devices {
        store.assign(&"harbour".into(), (*d).into()).unwrap();
    }
    let positions = Arc::new(LatestPositions::new());
    let hub = Arc::new(EventHub::default());
    let engine = GeofenceEngine::new(&FenceConfig::default(), store.clone(), positions.clone(), hub.clone());
    Fleet {
        engine,
        store,
        positions,
        hub,
    }
}

fn record(fleet: &Fleet, device: &str, point: LatLng, t: chrono::DateTime<Utc>) {
    let p = DevicePosition::new(device, point.latitude, point.longitude, t);
    fleet.positions.record(p.clone()).unwrap();
    fleet.engine.process_position(&p).unwrap();
}

#[test]
fn batch_of_five_with_one_invalid_position() {
    let devices = ["dev-1", "dev-2", "dev-3", "dev-4", "dev-5"];
    let f = fleet(&devices);
    let t0 = Utc::now() - Duration::minutes(10);
    let far = destination(CENTER, 180.0, 5_000.0);
    for d in devices {
        record(&f, d, far, t0);
    }

    // Everybody moves inside; dev-3 reports garbage.
    let t1 = t0 + Duration::minutes(1);
    for d in devices {
        let p = if d == "dev-3" {
            DevicePosition::new(d, 123.0, CENTER.longitude, t1)
        } else {
            DevicePosition::new(d, CENTER.latitude, CENTER.longitude, t1)
        };
        f.positions.record(p).unwrap();
    }

    let report = f.engine.check_now(&"harbour".into()).unwrap();
    let checked: Vec<&str> = report.results.iter().map(|r| r.device_id.as_str()).collect();
    assert_eq!(checked, vec!["dev-1", "dev-2", "dev-4", "dev-5"]);
    assert!(report.results.iter().all(|r| r.events_generated == 1));
    assert_eq!(report.devices_checked, 4);
    assert_eq!(report.events_generated, 4);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].device_id.as_str(), "dev-3");
    assert!(report.errors[0].error.to_lowercase().contains("latitude"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["devicesChecked"], 4);
    assert_eq!(json["results"][0]["deviceId"], "dev-1");
    assert_eq!(json["results"][0]["eventsGenerated"], 1);
}

#[test]
fn first_manual_check_only_seeds_state() {
    let f = fleet(&["fresh"]);
    f.positions
        .record(DevicePosition::new("fresh", CENTER.latitude, CENTER.longitude, Utc::now()))
        .unwrap();
    let report = f.engine.check_now(&"harbour".into()).unwrap();
    assert_eq!(report.devices_checked, 1);
    assert_eq!(report.events_generated, 0);

    let state = f.engine.tracker().state(&"fresh".into(), &"harbour".into()).unwrap().unwrap();
    assert!(state.is_inside);
}

#[test]
fn manual_check_events_reach_subscribers() {
    let f = fleet(&["tug"]);
    let sub = Subscriber::connect(
        Arc::new(f.hub.transport()),
        SubscriberConfig {
            reconnect_delay_ms: 50,
            buffer: 16,
        },
    );
    assert!(sub.wait_for_state(ConnectionState::Open, StdDuration::from_secs(2)));

    let t0 = Utc::now() - Duration::minutes(1);
    record(&f, "tug", destination(CENTER, 0.0, 3_000.0), t0);
    f.positions
        .record(DevicePosition::new("tug", CENTER.latitude, CENTER.longitude, t0 + Duration::seconds(30)))
        .unwrap();

    let report = f.engine.check_now(&"harbour".into()).unwrap();
    assert_eq!(report.events_generated, 1);

    let event = sub.recv_timeout(StdDuration::from_secs(2)).unwrap();
    assert_eq!(event.device_id.as_str(), "tug");
    assert_eq!(event.geofence_id.as_str(), "harbour");
}

#[test]
fn cooldown_spans_manual_and_streamed_samples_on_one_clock() {
    let f = fleet(&["ferry"]);
    f.engine
        .upsert_geofence(
            Geofence::new(
                "harbour",
                Geometry::Circle {
                    center: CENTER,
                    radius_meters: 800.0,
                },
            )
            .with_cooldown_seconds(300),
        )
        .unwrap();
    let far = destination(CENTER, 90.0, 4_000.0);
    let t0 = Utc::now() - Duration::minutes(10);

    record(&f, "ferry", far, t0);
    f.positions
        .record(DevicePosition::new("ferry", CENTER.latitude, CENTER.longitude, t0 + Duration::seconds(10)))
        .unwrap();
    let result = f.engine.check_now_with(&"harbour".into(), &BatchControl::unbounded()).unwrap();
    assert_eq!(result.events_generated(), 1);
    assert_eq!(result.results[0].events[0].timestamp, t0 + Duration::seconds(10));

    let exit = f
        .engine
        .process_position(&DevicePosition::new("ferry", far.latitude, far.longitude, t0 + Duration::seconds(20)))
        .unwrap();
    assert_eq!(exit.len(), 1);

    let reentry = f
        .engine
        .process_position(&DevicePosition::new(
            "ferry",
            CENTER.latitude,
            CENTER.longitude,
            t0 + Duration::seconds(400),
        ))
        .unwrap();
    assert_eq!(reentry.len(), 1, "re-entry 390 s after the manual entry must emit");
}

#[test]
fn cancelled_batch_skips_everything_and_keeps_state() {
    let devices: Vec<String> = (0..20).map(|i| format!("bus-{i:02}")).collect();
    let refs: Vec<&str> = devices.iter().map(String::as_str).collect();
    let f = fleet(&refs);

    let token = CancelToken::new();
    token.cancel();
    let positions: Vec<DevicePosition> = refs
        .iter()
        .map(|d| DevicePosition::new(*d, CENTER.latitude, CENTER.longitude, Utc::now()))
        .collect();
    let result = f
        .engine
        .check_positions(&"harbour".into(), &positions, &BatchControl::unbounded().with_cancel(token))
        .unwrap();

    assert!(result.was_interrupted());
    assert_eq!(result.skipped.len(), 20);
    assert_eq!(result.devices_checked(), 0);
    assert!(f.engine.tracker().is_empty().unwrap());
}

#[test]
fn expired_deadline_stops_before_any_device() {
    let f = fleet(&["a", "b"]);
    let positions = vec![
        DevicePosition::new("a", CENTER.latitude, CENTER.longitude, Utc::now()),
        DevicePosition::new("b", CENTER.latitude, CENTER.longitude, Utc::now()),
    ];
    let control = BatchControl::unbounded().with_deadline(Instant::now() - StdDuration::from_millis(1));
    let result = f
        .engine
        .check_positions(&"harbour".into(), &positions, &control)
        .unwrap();
    assert_eq!(result.skipped.len(), 2);
}

#[test]
fn removed_geofence_cannot_be_checked() {
    let f = fleet(&["x"]);
    f.engine.remove_geofence(&"harbour".into()).unwrap();
    assert!(f.engine.check_now(&"harbour".into()).is_err());
    assert!(f.store.list().unwrap().is_empty());
    assert!(f.store.geofences_for_device(&"x".into()).unwrap().is_empty());
}
