use briny_train::Error;
use briny_train::backprop::BackPropagator;
use briny_train::config::SgdConfig;
use briny_train::grad::{GradientComputer, GradientReceiver, combine};
use briny_train::nn::{Activation, Cost, Dense, Flatten, Model, Sample};
use briny_train::optim::Sgd;
use briny_train::tensors::{Matrix, Tensor, TensorOps, Vector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn samples(n: usize, inputs: usize, outputs: usize, seed: u64) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let x: Vec<f32> = (0..inputs).map(|_| rng.random_range(-1.0..1.0)).collect();
            let t: Vec<f32> = (0..outputs).map(|_| rng.random_range(0.0..1.0)).collect();
            Sample::new(Vector::new(x), Vector::new(t))
        })
        .collect()
}

fn max_difference(a: &GradientReceiver, b: &GradientReceiver) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|((ia, ga), (ib, gb))| {
            assert_eq!(ia, ib);
            ga.minus(gb).unwrap().map(f32::abs).max().unwrap()
        })
        .fold(0.0, f32::max)
}

#[test]
fn test_softmax_cross_entropy_delta_is_exact() {
    let model = Model::builder([3])
        .layer(Dense::new(4, Activation::Softmax))
        .seed(3)
        .build()
        .unwrap();
    let sample = Sample::new([0.2, -0.4, 0.9], [0.0, 0.0, 1.0, 0.0]);

    let mut propagator = BackPropagator::new(&model, Cost::CrossEntropy).unwrap();
    let mut receiver = GradientReceiver::for_model(&model).unwrap();
    propagator.backpropagate(&model, &sample, &mut receiver).unwrap();

    let output = model.predict(&sample.input).unwrap();
    let bias = model.learnable()[1];
    assert_eq!(receiver.get(bias).unwrap(), &output.minus(&sample.target).unwrap());
}

#[test]
fn test_step_divides_by_actual_batch_length() {
    let build = || {
        Model::builder([2])
            .layer(
                Dense::with_parameters(
                    Matrix::from([[0.5, -0.25]]),
                    Vector::from([0.1]),
                    Activation::Linear,
                )
                .unwrap(),
            )
            .build()
            .unwrap()
    };
    let data = samples(7, 2, 1, 17);
    let learning_rate = 0.3;

    let mut model = build();
    let mut computer = GradientComputer::new(&model, Cost::MeanSquaredError, Some(1)).unwrap();
    let batch = computer.compute(&model, &data).unwrap();
    let mut expected = model.parameters().clone();
    for (id, g) in batch.gradients.iter() {
        expected
            .get_mut(id)
            .unwrap()
            .zip_assign(g, |p, g| p - g * (learning_rate / 7.0))
            .unwrap();
    }

    let config = SgdConfig::default()
        .with_learning_rate(learning_rate)
        .with_batch_size(10)
        .with_threads(1)
        .with_seed(4);
    let report = Sgd::new(config)
        .unwrap()
        .apply(&mut model, &data, Cost::MeanSquaredError)
        .unwrap();
    assert_eq!((report.batches, report.samples), (1, 7));

    for ((_, got), (_, want)) in model.parameters().iter().zip(expected.iter()) {
        let error = got.minus(want).unwrap().map(f32::abs).max().unwrap();
        assert!(error < 1e-6, "{got:?} vs {want:?}");
    }
}

#[test]
fn test_thread_count_does_not_change_gradients() {
    let model = Model::builder([6])
        .layer(Dense::new(5, Activation::ReLU))
        .layer(Dense::new(3, Activation::Logistic))
        .seed(77)
        .build()
        .unwrap();
    let data = samples(64, 6, 3, 5);

    let single = GradientComputer::new(&model, Cost::MeanSquaredError, Some(1))
        .unwrap()
        .compute(&model, &data)
        .unwrap();
    let parallel = GradientComputer::new(&model, Cost::MeanSquaredError, Some(8))
        .unwrap()
        .compute(&model, &data)
        .unwrap();

    assert_eq!(single.samples, parallel.samples);
    assert!((single.loss - parallel.loss).abs() < 1e-4);
    assert!(max_difference(&single.gradients, &parallel.gradients) < 1e-4);
}

#[test]
fn test_batch_gradient_is_sum_of_samples() {
    let model = Model::builder([2, 2])
        .layer(Flatten::new())
        .layer(Dense::new(2, Activation::Logistic))
        .seed(12)
        .build()
        .unwrap();
    let data = vec![
        Sample::new([[1.0, 0.0], [0.0, 1.0]], [1.0, 0.0]),
        Sample::new([[0.0, 1.0], [1.0, 0.0]], [0.0, 1.0]),
    ];
    let mut propagator = BackPropagator::new(&model, Cost::MeanSquaredError).unwrap();
    let mut by_hand = GradientReceiver::for_model(&model).unwrap();
    for sample in &data {
        propagator.backpropagate(&model, sample, &mut by_hand).unwrap();
    }

    let batch = GradientComputer::new(&model, Cost::MeanSquaredError, Some(2))
        .unwrap()
        .compute(&model, &data)
        .unwrap();
    assert!(max_difference(&by_hand, &batch.gradients) < 1e-6);
}

#[test]
fn test_nan_in_one_worker_is_sanitized() {
    let model = Model::builder([2])
        .layer(Dense::new(1, Activation::Linear))
        .seed(0)
        .build()
        .unwrap();
    let bias = model.learnable()[1];

    let mut clean = GradientReceiver::for_model(&model).unwrap();
    clean.deposit(bias, &Tensor::from([2.0])).unwrap();
    let mut poisoned = GradientReceiver::for_model(&model).unwrap();
    poisoned.deposit(bias, &Tensor::from([f32::NAN])).unwrap();

    let template = GradientReceiver::for_model(&model).unwrap();
    let (combined, sanitized) = combine([&clean, &poisoned], template).unwrap();
    assert_eq!(sanitized, 1);
    assert_eq!(combined.get(bias).unwrap(), &Tensor::from([0.0]));
}

#[test]
fn test_nan_sample_never_reaches_parameters() {
    let mut model = Model::builder([2])
        .layer(Dense::new(1, Activation::Linear))
        .seed(0)
        .build()
        .unwrap();
    let before = model.parameters().clone();
    let data = vec![Sample::new([f32::NAN, 1.0], [0.0])];

    let mut computer = GradientComputer::new(&model, Cost::MeanSquaredError, Some(2)).unwrap();
    let batch = computer.compute(&model, &data).unwrap();
    assert!(batch.sanitized > 0);
    assert!(batch.gradients.iter().all(|(_, g)| g.flatten().iter().all(|x| x.is_finite())));

    let mut sgd = Sgd::new(SgdConfig::default().with_threads(1).with_seed(1)).unwrap();
    sgd.apply(&mut model, &data, Cost::MeanSquaredError).unwrap();
    assert_eq!(model.parameters(), &before);
}

#[test]
fn test_mismatched_sample_fails_the_batch() {
    let model = Model::builder([3])
        .layer(Dense::new(2, Activation::Linear))
        .seed(0)
        .build()
        .unwrap();
    let mut data = samples(10, 3, 2, 9);
    data[6] = Sample::new([1.0, 2.0, 3.0], [1.0]);

    let mut computer = GradientComputer::new(&model, Cost::MeanSquaredError, Some(4)).unwrap();
    assert!(matches!(
        computer.compute(&model, &data),
        Err(Error::ShapeMismatch { .. })
    ));
    // the computer stays usable
    assert!(computer.compute(&model, &data[..6]).is_ok());
}

#[test]
fn test_step_requires_every_gradient() {
    let mut model = Model::builder([2])
        .layer(Dense::new(1, Activation::Linear))
        .seed(0)
        .build()
        .unwrap();
    let sgd = Sgd::new(SgdConfig::default().with_seed(0)).unwrap();
    assert!(matches!(
        sgd.step(&mut model, &GradientReceiver::new(), 1),
        Err(Error::UnregisteredParameter(_))
    ));
}

#[test]
fn test_training_reduces_loss() {
    let mut model = Model::builder([2])
        .layer(Dense::new(8, Activation::Logistic))
        .layer(Dense::new(2, Activation::Softmax))
        .seed(2024)
        .build()
        .unwrap();
    let data: Vec<Sample> = [(0.0_f32, 0.0_f32), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)]
        .iter()
        .map(|&(a, b)| {
            let or = if a + b > 0.0 { [0.0, 1.0] } else { [1.0, 0.0] };
            Sample::new([a, b], or)
        })
        .collect();

    let before = model.loss(&data, Cost::CrossEntropy).unwrap();
    let config = SgdConfig::default()
        .with_learning_rate(1.0)
        .with_batch_size(2)
        .with_threads(2)
        .with_seed(6);
    let reports = Sgd::new(config)
        .unwrap()
        .train(&mut model, &data, Cost::CrossEntropy, 300)
        .unwrap();
    assert_eq!(reports.len(), 300);
    assert!(reports.iter().all(|r| r.batches == 2 && r.samples == 4));

    let after = model.loss(&data, Cost::CrossEntropy).unwrap();
    assert!(after < before * 0.5, "loss went from {before} to {after}");
    for sample in &data {
        let prediction = model.predict(&sample.input).unwrap();
        let predicted = prediction.downcast::<Vector>().unwrap().argmax();
        let expected = sample.target.downcast::<Vector>().unwrap().argmax();
        assert_eq!(predicted, expected);
    }
}

#[test]
fn test_mispaired_softmax_still_trains() {
    let mut model = Model::builder([2])
        .layer(Dense::new(2, Activation::Softmax))
        .seed(1)
        .build()
        .unwrap();
    let data = vec![Sample::new([1.0, 0.0], [1.0, 0.0])];
    let mut sgd = Sgd::new(SgdConfig::default().with_threads(1).with_seed(1)).unwrap();
    let report = sgd.apply(&mut model, &data, Cost::MeanSquaredError).unwrap();
    assert_eq!(report.batches, 1);
}
