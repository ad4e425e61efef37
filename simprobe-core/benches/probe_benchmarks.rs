use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simprobe_core::choice::ChoiceModel;
use simprobe_core::config::RdmMethod;
use simprobe_core::eval::{compute_rdm, correlate_rdms, Correlation};
use simprobe_core::partition::KFold;
use simprobe_core::probe::{LinearProbe, ProbeObjective};
use simprobe_core::{Matrix, Triplet};
use std::sync::Arc;

fn random_features(rng: &mut StdRng, n: usize, d: usize) -> Matrix {
    let data = (0..n * d).map(|_| rng.r#gen::<f64>() - 0.5).collect();
    Matrix::new(n, d, data).unwrap()
}

fn random_triplets(rng: &mut StdRng, n: usize, count: usize) -> Vec<Triplet> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let (i, j, k) = (rng.gen_range(0..n), rng.gen_range(0..n), rng.gen_range(0..n));
        if i != j && j != k && i != k {
            out.push(Triplet::new(i, j, k));
        }
    }
    out
}

fn bench_choice_model(c: &mut Criterion) {
    let model = ChoiceModel::new(0.5).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let batch: Vec<[f64; 3]> = (0..1024)
        .map(|_| [rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>()])
        .collect();

    c.bench_function("choice_loss_1024", |b| b.iter(|| model.loss(black_box(&batch))));
    c.bench_function("choice_summarize_1024", |b| {
        b.iter(|| model.summarize(black_box(&batch)))
    });
}

fn bench_probe(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let features = Arc::new(random_features(&mut rng, 500, 64));
    let triplets = random_triplets(&mut rng, 500, 256);

    for normalize in [false, true] {
        let objective = ProbeObjective {
            normalize_embeddings: normalize,
            ..Default::default()
        };
        let probe = LinearProbe::new(Arc::clone(&features), 64, 0.01, objective, &mut rng).unwrap();
        let name = if normalize {
            "probe_loss_and_gradient_normalized"
        } else {
            "probe_loss_and_gradient"
        };
        c.bench_function(name, |b| {
            b.iter(|| probe.loss_and_gradient(black_box(&triplets)).unwrap())
        });
    }
}

fn bench_partition(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let triplets = random_triplets(&mut rng, 1854, 20_000);
    let folds = KFold::new(3, 42).split(1854).unwrap();

    c.bench_function("kfold_split_1854", |b| {
        b.iter(|| KFold::new(3, 42).split(black_box(1854)).unwrap())
    });
    c.bench_function("partition_20k_triplets", |b| {
        b.iter(|| folds[0].partition(black_box(&triplets)))
    });
}

fn bench_rsa(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let a = compute_rdm(&random_features(&mut rng, 200, 32), RdmMethod::Correlation).unwrap();
    let b = compute_rdm(&random_features(&mut rng, 200, 32), RdmMethod::Correlation).unwrap();

    c.bench_function("spearman_rdm_200", |bench| {
        bench.iter(|| correlate_rdms(black_box(&a), black_box(&b), Correlation::Spearman).unwrap())
    });
}

criterion_group!(benches, bench_choice_model, bench_probe, bench_partition, bench_rsa);
criterion_main!(benches);
