use criterion::{criterion_group, criterion_main, Criterion};
use ride_sync::models::GeoPoint;
use ride_sync::services::fare::{decode_polyline, distance_km, fare_by_distance, FareConfig};
use std::hint::black_box;

/// A long synthetic street route, encoded the way Google returns it.
fn encoded_route(points: usize) -> String {
    let coords = (0..points).map(|i| {
        let t = i as f64 / points as f64;
        // Zig-zag so consecutive deltas are not all identical
        let wobble = if i % 2 == 0 { 0.0002 } else { -0.0002 };
        geo::Coord {
            x: -79.002 - 0.05 * t + wobble,
            y: -3.676 - 0.03 * t,
        }
    });
    polyline::encode_coordinates(coords, 5).expect("Failed to encode polyline")
}

fn benchmark_polyline(c: &mut Criterion) {
    let short = encoded_route(50);
    let long = encoded_route(2_000);

    let mut group = c.benchmark_group("decode_polyline");
    group.bench_function("city_trip", |b| b.iter(|| decode_polyline(black_box(&short))));
    group.bench_function("intercity_trip", |b| {
        b.iter(|| decode_polyline(black_box(&long)))
    });
    group.finish();
}

fn benchmark_fare(c: &mut Criterion) {
    let origin = GeoPoint::new(-3.676, -79.002);
    let destination = GeoPoint::new(-2.170, -79.922);
    let config = FareConfig::default();

    c.bench_function("straight_line_fare", |b| {
        b.iter(|| {
            let km = distance_km(black_box(origin), black_box(destination));
            fare_by_distance(km, &config)
        })
    });
}

criterion_group!(benches, benchmark_polyline, benchmark_fare);
criterion_main!(benches);
