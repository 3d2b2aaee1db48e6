use briny_train::approx::rel_close;
use briny_train::backprop::BackPropagator;
use briny_train::grad::GradientReceiver;
use briny_train::nn::{Activation, Convolution, Cost, Dense, Flatten, Model, Sample};
use briny_train::ops::{Padding, PaddingMode, Stride};
use briny_train::tensors::{Matrix, Shape, Tensor, TensorOps, Vector};

/// Step for smooth models.
const H: f32 = 1e-4;
/// Step for models whose f32 loss is too coarse to resolve `H`.
const WIDE_H: f32 = 1e-3;
const REL: f64 = 1e-2;
/// Gradients whose analytic and numeric values differ by less than this pass
/// even outside `REL`. An f32 loss near 1 rounds at about 6e-8, which divided
/// by `2 * H` leaves a few 1e-4 of noise in every numeric estimate, so near-zero
/// gradients cannot meet a relative bound.
const ABS_FLOOR: f64 = 5e-4;

fn nudge(model: &mut Model, param: usize, element: usize, by: f32) {
    let id = model.learnable()[param];
    let tensor = model.parameters_mut().get_mut(id).unwrap();
    let mut k = 0;
    tensor.for_each_element_mut(&mut |x| {
        if k == element {
            *x += by;
        }
        k += 1;
    });
}

fn numeric(
    model: &mut Model,
    sample: &Sample,
    cost: Cost,
    (param, element): (usize, usize),
    h: f32,
) -> f64 {
    let batch = std::slice::from_ref(sample);
    nudge(model, param, element, h);
    let plus = f64::from(model.loss(batch, cost).unwrap());
    nudge(model, param, element, -2.0 * h);
    let minus = f64::from(model.loss(batch, cost).unwrap());
    nudge(model, param, element, h);
    (plus - minus) / (2.0 * f64::from(h))
}

fn check(mut model: Model, sample: &Sample, cost: Cost, h: f32) {
    let mut propagator = BackPropagator::new(&model, cost).unwrap();
    let mut receiver = GradientReceiver::for_model(&model).unwrap();
    propagator.backpropagate(&model, sample, &mut receiver).unwrap();

    for (param, id) in model.learnable().into_iter().enumerate() {
        let analytic = receiver.get(id).unwrap().flatten();
        for (element, &a) in analytic.iter().enumerate() {
            let a = f64::from(a);
            let n = numeric(&mut model, sample, cost, (param, element), h);
            assert!(
                rel_close(a, n, REL) || (a - n).abs() < ABS_FLOOR,
                "parameter {id} element {element}: analytic {a}, numeric {n}"
            );
        }
    }
}

#[test]
fn test_dense_logistic_mse() {
    let model = Model::builder([4])
        .layer(Dense::new(2, Activation::Logistic))
        .layer(Dense::new(1, Activation::Logistic))
        .seed(1234)
        .build()
        .unwrap();
    let sample = Sample::new([0.5, -1.0, 0.25, 2.0], [1.0]);
    check(model, &sample, Cost::MeanSquaredError, H);
}

#[test]
fn test_dense_relu_family() {
    let w = Matrix::from([
        [0.5, -0.2, 0.1],
        [-0.4, 0.3, -0.6],
        [0.2, 0.8, 0.05],
        [-0.1, -0.5, 0.7],
    ]);
    let b = Vector::from([0.1, -0.2, 0.05, 0.0]);
    let x = Vector::from([0.3, -0.7, 1.1]);

    // central differences are only valid away from the kink at zero
    let z = w.times_vector(&x).unwrap().plus(&b).unwrap();
    assert!(z.data().iter().any(|&z| z < 0.0));
    assert!(z.data().iter().all(|&z| z.abs() > 10.0 * WIDE_H), "{z:?}");

    let model = Model::builder([3])
        .layer(Dense::with_parameters(w, b, Activation::LeakyReLU).unwrap())
        .layer(
            Dense::with_parameters(
                Matrix::from([[0.3, -0.5, 0.2, 0.4], [-0.6, 0.1, 0.7, -0.3]]),
                Vector::from([0.0, 0.1]),
                Activation::Linear,
            )
            .unwrap(),
        )
        .build()
        .unwrap();
    let sample = Sample::new(x, [0.5, -0.5]);
    check(model, &sample, Cost::MeanSquaredError, WIDE_H);
}

#[test]
fn test_softmax_cross_entropy() {
    let model = Model::builder([3])
        .layer(Dense::new(4, Activation::Logistic))
        .layer(Dense::new(3, Activation::Softmax))
        .seed(8)
        .build()
        .unwrap();
    let sample = Sample::new([1.0, 0.0, -1.0], [0.0, 1.0, 0.0]);
    check(model, &sample, Cost::CrossEntropy, WIDE_H);
}

#[test]
fn test_small_convolution_model() {
    for mode in [PaddingMode::Zero, PaddingMode::Reflection] {
        let model = Model::builder([2, 5, 5])
            .layer(
                Convolution::new(2, 3, 3, Activation::Logistic)
                    .with_padding(Padding::new(mode, 1, 1))
                    .with_stride(Stride::new(2, 2)),
            )
            .layer(Flatten::new())
            .layer(Dense::new(2, Activation::Linear))
            .seed(21)
            .build()
            .unwrap();
        let shape = Shape::from([2, 5, 5]);
        let input = (0..shape.size()).map(|i| ((i * 7) % 11) as f32 / 11.0 - 0.5).collect();
        let sample = Sample::new(Tensor::from_flat(&shape, input).unwrap(), [0.3, -0.2]);
        check(model, &sample, Cost::MeanSquaredError, H);
    }
}
