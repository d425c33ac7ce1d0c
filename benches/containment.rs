use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use fencewatch::geometry::destination;
use fencewatch::{
    contains, ContainmentTracker, DevicePosition, EventHub, FenceConfig, Geofence, GeofenceEngine, GeofenceStore,
    Geometry, InMemoryGeofenceStore, IngestConfig, IngestRuntime, LatLng, LatestPositions,
};

const CENTER: LatLng = LatLng::new(19.4326, -99.1332);

fn circle() -> Geometry {
    Geometry::Circle {
        center: CENTER,
        radius_meters: 500.0,
    }
}

/// Regular polygon approximating the circle, `n` vertices.
fn ring(n: usize) -> Geometry {
    let vertices = (0..n)
        .map(|i| destination(CENTER, 360.0 * i as f64 / n as f64, 500.0))
        .collect();
    Geometry::Polygon { vertices }
}

fn bench_contains(c: &mut Criterion) {
    let inside = destination(CENTER, 30.0, 250.0);
    let outside = destination(CENTER, 30.0, 2_000.0);

    let mut group = c.benchmark_group("contains");
    group.throughput(Throughput::Elements(2));

    let geometry = circle();
    group.bench_function("circle", |b| {
        b.iter(|| {
            black_box(contains(&geometry, black_box(inside)).unwrap());
            black_box(contains(&geometry, black_box(outside)).unwrap());
        });
    });

    for n in [4usize, 64, 1024] {
        let geometry = ring(n);
        group.bench_function(format!("polygon_{n}"), |b| {
            b.iter(|| {
                black_box(contains(&geometry, black_box(inside)).unwrap());
                black_box(contains(&geometry, black_box(outside)).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker");
    group.throughput(Throughput::Elements(1));

    group.bench_function("evaluate_alternating", |b| {
        b.iter_custom(|iters| {
            // Fresh tracker per sample so state does not accumulate between samples.
            let tracker = ContainmentTracker::default();
            let fence = Geofence::new("bench", circle());
            let t0 = Utc::now();
            let inside = destination(CENTER, 0.0, 100.0);
            let outside = destination(CENTER, 0.0, 1_000.0);

            let start = Instant::now();
            for i in 0..iters {
                let p = if i % 2 == 0 { inside } else { outside };
                let at = t0 + Duration::milliseconds(i as i64);
                let pos = DevicePosition::new("dev", p.latitude, p.longitude, at);
                black_box(tracker.evaluate(&fence, &pos).unwrap());
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(64));

    group.bench_function("process_64_devices", |b| {
        b.iter_custom(|iters| {
            let store = Arc::new(InMemoryGeofenceStore::new());
            store.upsert(Geofence::new("bench", circle())).unwrap();
            let devices: Vec<String> = (0..64).map(|i| format!("dev-{i}")).collect();
            for d in &devices {
                store.assign(&"bench".into(), d.as_str().into()).unwrap();
            }
            let engine = Arc::new(GeofenceEngine::new(
                &FenceConfig::default(),
                store,
                Arc::new(LatestPositions::new()),
                Arc::new(EventHub::default()),
            ));
            let runtime = IngestRuntime::start(engine, &IngestConfig::default()).unwrap();
            let t0 = Utc::now();

            let start = Instant::now();
            for i in 0..iters {
                let at = t0 + Duration::milliseconds(i as i64);
                let p = destination(CENTER, 0.0, if i % 2 == 0 { 100.0 } else { 1_000.0 });
                let handles: Vec<_> = devices
                    .iter()
                    .map(|d| {
                        runtime
                            .submit_async(DevicePosition::new(d.as_str(), p.latitude, p.longitude, at))
                            .unwrap()
                    })
                    .collect();
                for h in handles {
                    black_box(h.join().unwrap());
                }
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(containment, bench_contains, bench_tracker, bench_ingest);
criterion_main!(containment);
