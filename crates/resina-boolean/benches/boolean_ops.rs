use criterion::{black_box, criterion_group, criterion_main, Criterion};
use resina_boolean::{try_boolean, BooleanOp};
use resina_math::Vec3;
use resina_mesh::primitives::{cube, cylinder, sphere};

fn bench_cube_difference(c: &mut Criterion) {
    let block = cube(10.0, 10.0, 10.0);
    let mut drill = cylinder(1.5, 14.0, 48);
    drill.translate(&Vec3::new(5.0, 5.0, -2.0));
    c.bench_function("cube minus cylinder", |b| {
        b.iter(|| try_boolean(black_box(&block), black_box(&drill), BooleanOp::Difference))
    });
}

fn bench_sphere_union(c: &mut Criterion) {
    let a = sphere(5.0, 32);
    let mut other = sphere(5.0, 32);
    other.translate(&Vec3::new(4.0, 0.0, 0.0));
    c.bench_function("sphere union", |b| {
        b.iter(|| try_boolean(black_box(&a), black_box(&other), BooleanOp::Union))
    });
}

criterion_group!(benches, bench_cube_difference, bench_sphere_union);
criterion_main!(benches);
