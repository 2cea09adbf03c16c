// Benchmarks for the assembled stream pipeline
// Run with: cargo bench -p gcodestream-pipeline

use criterion::{criterion_group, criterion_main, Criterion};
use gcodestream_pipeline::{split_move, PrintSession};
use gcodestream_core::PrinterMove;
use gcodestream_settings::PrinterSettings;
use glam::DVec3;

fn sample_gcode(lines: usize) -> String {
    let mut gcode = String::from("G28\nG92 X0 Y0 Z0 E0\n");
    for i in 0..lines {
        let x = (i % 200) as f64 * 0.5;
        let y = (i / 200) as f64 * 0.5;
        gcode.push_str(&format!("G1 X{} Y{} E{} F1800\n", x, y, i as f64 * 0.02));
    }
    gcode
}

fn bench_full_pipeline(c: &mut Criterion) {
    let gcode = sample_gcode(10_000);
    let settings = PrinterSettings::default();

    c.bench_function("pipeline 10k G1 lines", |b| {
        b.iter(|| {
            let session = PrintSession::from_text(&gcode, &settings).unwrap();
            let mut count = 0;
            while session.next_line().is_some() {
                count += 1;
            }
            assert!(count >= 10_000);
        });
    });
}

fn bench_ratios_and_two_extruders(c: &mut Criterion) {
    let gcode = sample_gcode(10_000);
    let mut settings = PrinterSettings::default();
    settings.extruders.count = 2;
    settings.motion.enable_line_splitting = false;

    c.bench_function("pipeline 10k lines with ratios", |b| {
        b.iter(|| {
            let session = PrintSession::from_text(&gcode, &settings).unwrap();
            session.set_feed_rate_ratio(1.25);
            session.set_extrusion_ratio(0.95);
            while session.next_line().is_some() {}
        });
    });
}

fn bench_split_move(c: &mut Criterion) {
    let start = PrinterMove::new(DVec3::ZERO, 0.0, 3000.0);
    let end = PrinterMove::new(DVec3::new(200.0, 150.0, 0.0), 12.0, 3000.0);

    c.bench_function("split 250 mm move", |b| {
        b.iter(|| split_move(&start, &end, 1.0, 0.0).len());
    });
}

criterion_group!(
    benches,
    bench_full_pipeline,
    bench_ratios_and_two_extruders,
    bench_split_move
);
criterion_main!(benches);
