use criterion::{criterion_group, criterion_main, Criterion};
use nvr_core::{Constants, GridSpec, RatePair};
use nvr_infer::{
    ForwardModel, LikelihoodModel, PosteriorGrid, PriorKind, Protocol, ProtocolConfig,
    SimulatedMeasurement,
};

fn constants() -> Constants {
    Constants::new(0.04, 0.1).unwrap()
}

fn grid_spec(n: usize) -> GridSpec {
    GridSpec {
        gamma_plus_min: 10.0,
        gamma_plus_max: 150e3,
        n_plus: n,
        gamma_minus_min: 10.0,
        gamma_minus_max: 150e3,
        n_minus: n,
    }
}

fn bench_accumulate(c: &mut Criterion) {
    let model = ForwardModel::new(constants());
    let truth = RatePair::new(30e3, 60e3);
    let (dp, dm) = model.expected_deltas(5e-6, &truth);
    let base = PosteriorGrid::new(&grid_spec(150), PriorKind::Flat).unwrap();

    c.bench_function("accumulate_150x150", |b| {
        b.iter(|| {
            let mut grid = base.clone();
            grid.accumulate(
                &model,
                LikelihoodModel::SharedBaseline,
                5e-6,
                dp,
                dm,
                1_000,
            )
            .unwrap();
            grid.posterior().unwrap()
        })
    });
}

fn bench_iteration(c: &mut Criterion) {
    let mut config = ProtocolConfig::new(constants(), grid_spec(150));
    config.readouts_per_iteration = 100_000;
    let model = ForwardModel::new(config.constants);

    c.bench_function("protocol_step_150x150", |b| {
        b.iter(|| {
            let mut protocol = Protocol::new(config.clone()).unwrap();
            let mut port = SimulatedMeasurement::new(RatePair::new(30e3, 60e3), model, 42);
            protocol.step(&mut port).unwrap().sigma_plus
        })
    });
}

criterion_group!(benches, bench_accumulate, bench_iteration);
criterion_main!(benches);
