//! Device vs host comparison tests.
//!
//! Every test returns early when no wgpu adapter can be acquired, so the suite
//! passes on machines without a usable GPU.

#![cfg(feature = "wgpu")]

use std::sync::Arc;

use ndbuf::prelude::*;
use ndbuf::{device_context, ArithOp, DeviceBuffer, DeviceContext, HostBuffer};

fn context() -> Option<Arc<DeviceContext>> {
    let ctx = device_context();
    if ctx.is_none() {
        eprintln!("no wgpu device available, skipping");
    }
    ctx
}

/// Deterministic values in `[-range, range]`, with no zeros so division is safe.
fn generate_test_data(size: usize, seed: u64, range: f64) -> Vec<f64> {
    let mut state = seed;
    (0..size)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let unit = ((state >> 33) as f64) / (u32::MAX as f64 / 2.0);
            let v = (unit * 2.0 - 1.0) * range;
            if v.abs() < 0.25 {
                0.25_f64.copysign(v)
            } else {
                v
            }
        })
        .collect()
}

fn pair(ctx: &Arc<DeviceContext>, values: Elements) -> (DeviceBuffer, HostBuffer) {
    let device = DeviceBuffer::from_elements_in(ctx, &values).unwrap();
    (device, HostBuffer::from_elements(values))
}

fn assert_close(actual: &[f64], expected: &[f64], rtol: f64, atol: f64, context: &str) {
    assert_eq!(actual.len(), expected.len(), "{context}: length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let diff = (a - e).abs();
        let tolerance = atol + rtol * e.abs();
        assert!(
            diff <= tolerance || (a.is_nan() && e.is_nan()),
            "{context}: mismatch at index {i}: actual={a}, expected={e}, diff={diff}"
        );
    }
}

const OPS: [ArithOp; 6] = [
    ArithOp::Add,
    ArithOp::Sub,
    ArithOp::RSub,
    ArithOp::Mul,
    ArithOp::Div,
    ArithOp::RDiv,
];

fn scalar_op<B: BufferOps + ?Sized>(buf: &mut B, op: ArithOp, value: Scalar) -> BufferResult<()> {
    match op {
        ArithOp::Add => buf.addi(value),
        ArithOp::Sub => buf.subi(value),
        ArithOp::RSub => buf.rsubi(value),
        ArithOp::Mul => buf.muli(value),
        ArithOp::Div => buf.divi(value),
        ArithOp::RDiv => buf.rdivi(value),
    }
}

fn buffer_op<B: BufferOps + ?Sized>(buf: &mut B, op: ArithOp, other: &dyn DataBuffer) -> BufferResult<()> {
    match op {
        ArithOp::Add => buf.addi_buffer(other),
        ArithOp::Sub => buf.subi_buffer(other),
        ArithOp::RSub => buf.rsubi_buffer(other),
        ArithOp::Mul => buf.muli_buffer(other),
        ArithOp::Div => buf.divi_buffer(other),
        ArithOp::RDiv => buf.rdivi_buffer(other),
    }
}

#[test]
fn test_int_arithmetic_matches_host() {
    let Some(ctx) = context() else { return };
    let a: Vec<i32> = generate_test_data(1000, 7, 1000.0).iter().map(|&v| v as i32).collect();
    let b: Vec<i32> = (0..1000).map(|i| (i % 13) - 6).collect(); // includes zeros

    for op in OPS {
        let (mut dev, mut host) = pair(&ctx, Elements::Int(a.clone()));
        scalar_op(&mut dev, op, Scalar::Int(3)).unwrap();
        scalar_op(&mut host, op, Scalar::Int(3)).unwrap();
        assert_eq!(dev.as_int().unwrap(), host.as_int().unwrap(), "{op} scalar");

        let (dev_b, host_b) = pair(&ctx, Elements::Int(b.clone()));
        buffer_op(&mut dev, op, &dev_b).unwrap();
        buffer_op(&mut host, op, &host_b).unwrap();
        assert_eq!(dev.as_int().unwrap(), host.as_int().unwrap(), "{op} buffer");
    }
}

#[test]
fn test_float_arithmetic_matches_host() {
    let Some(ctx) = context() else { return };
    let a: Vec<f32> = generate_test_data(4096, 11, 10.0).iter().map(|&v| v as f32).collect();
    let b: Vec<f32> = generate_test_data(4096, 12, 10.0).iter().map(|&v| v as f32).collect();

    for op in OPS {
        let (mut dev, mut host) = pair(&ctx, Elements::Float(a.clone()));
        scalar_op(&mut dev, op, Scalar::Float(1.5)).unwrap();
        scalar_op(&mut host, op, Scalar::Float(1.5)).unwrap();
        let (dev_b, host_b) = pair(&ctx, Elements::Float(b.clone()));
        buffer_op(&mut dev, op, &dev_b).unwrap();
        buffer_op(&mut host, op, &host_b).unwrap();
        assert_close(
            &dev.as_double().unwrap(),
            &host.as_double().unwrap(),
            1e-5,
            1e-6,
            &format!("float {op}"),
        );
    }
}

fn transform_cases() -> Vec<(&'static str, Vec<Scalar>)> {
    vec![
        ("neg", vec![]),
        ("abs", vec![]),
        ("exp", vec![]),
        ("log", vec![]),
        ("sqrt", vec![]),
        ("sigmoid", vec![]),
        ("tanh", vec![]),
        ("hard_tanh", vec![]),
        ("floor", vec![]),
        ("round", vec![]),
        ("sign", vec![]),
        ("identity", vec![]),
        ("pow", vec![Scalar::Double(2.0)]),
        ("pow", vec![Scalar::Double(3.0)]),
        ("max", vec![Scalar::Double(0.5)]),
        ("min", vec![Scalar::Double(0.5)]),
        ("stabilize", vec![Scalar::Double(2.0)]),
        ("gt", vec![Scalar::Double(0.0)]),
        ("lt", vec![Scalar::Double(0.0)]),
    ]
}

/// Positive inputs for `log` and `sqrt`, signed ones otherwise.
fn transform_input(name: &str, values: &Elements) -> Elements {
    if name == "log" || name == "sqrt" {
        let mut host = HostBuffer::from_elements(values.clone());
        host.apply(&element_wise_op("abs", &[]).unwrap()).unwrap();
        host.as_typed(values.kind()).unwrap().into_owned()
    } else {
        values.clone()
    }
}

#[test]
fn test_transforms_match_host() {
    let Some(ctx) = context() else { return };
    let values: Vec<f32> = generate_test_data(512, 3, 4.0).iter().map(|&v| v as f32).collect();
    let values = Elements::Float(values);

    for (name, args) in transform_cases() {
        let op = element_wise_op(name, &args).unwrap();
        let (mut dev, mut host) = pair(&ctx, transform_input(name, &values));
        dev.apply(&op).unwrap();
        host.apply(&op).unwrap();
        assert_close(
            &dev.as_double().unwrap(),
            &host.as_double().unwrap(),
            1e-5,
            1e-5,
            name,
        );
    }
}

#[test]
fn test_int_and_double_transforms_equal_host() {
    let Some(ctx) = context() else { return };
    let ints = Elements::Int((-60..60).chain([1000, 4096, 20, 21]).collect());
    let doubles = Elements::Double(vec![-3.5, -0.5, 0.25, 2.0, 2.5, 19.75, 100.0, 700.0]);

    for values in [ints, doubles] {
        if !ctx.supports(values.kind()) {
            continue;
        }
        for (name, args) in transform_cases() {
            let op = element_wise_op(name, &args).unwrap();
            let input = transform_input(name, &values);
            let (mut dev, mut host) = pair(&ctx, input.clone());
            dev.apply(&op).unwrap();
            host.apply(&op).unwrap();
            let expected = host.as_typed(values.kind()).unwrap().into_owned();
            assert_eq!(dev.get_range(0, values.len()).unwrap(), expected, "{name} on {}", values.kind());

            let (src, _) = pair(&ctx, input);
            let mut out = DeviceBuffer::zeros_in(&ctx, values.kind(), values.len()).unwrap();
            src.apply_into(&op, Strided::whole(values.len()), &mut out).unwrap();
            assert_eq!(out.get_range(0, values.len()).unwrap(), expected, "{name} into on {}", values.kind());
        }
    }
}

#[test]
fn test_round_near_half_matches_host() {
    let Some(ctx) = context() else { return };
    let values = Elements::Float(vec![0.49999997, -0.49999997, 2.5, -2.5, -0.5, 1.5, 8388607.5]);
    let op = element_wise_op("round", &[]).unwrap();
    let (mut dev, mut host) = pair(&ctx, values);
    dev.apply(&op).unwrap();
    host.apply(&op).unwrap();
    assert_eq!(dev.as_float().unwrap(), host.as_float().unwrap());
    assert_eq!(
        dev.as_float().unwrap(),
        vec![0.0, 0.0, 3.0, -3.0, -1.0, 2.0, 8388608.0]
    );
}

#[test]
fn test_axpy_matches_generic_add_kernel() {
    let Some(ctx) = context() else { return };
    let a: Vec<f32> = generate_test_data(3000, 21, 100.0).iter().map(|&v| v as f32).collect();
    let b: Vec<f32> = generate_test_data(3000, 22, 100.0).iter().map(|&v| v as f32).collect();
    let walk = StridedPair::new(1000, 1, 2, 3, 3);

    for subtract in [false, true] {
        let (mut inplace, _) = pair(&ctx, Elements::Float(a.clone()));
        let (generic_src, _) = pair(&ctx, Elements::Float(a.clone()));
        let (x, _) = pair(&ctx, Elements::Float(b.clone()));
        let mut generic_out = generic_src.dup().unwrap();

        // in place: the axpy path; into a result: the generic strided kernel
        if subtract {
            inplace.subi_buffer_strided(&x, walk).unwrap();
            generic_src.subi_buffer_strided_into(&x, walk, generic_out.as_mut()).unwrap();
        } else {
            inplace.addi_buffer_strided(&x, walk).unwrap();
            generic_src.addi_buffer_strided_into(&x, walk, generic_out.as_mut()).unwrap();
        }
        let lhs: Vec<u32> = inplace.as_float().unwrap().iter().map(|v| v.to_bits()).collect();
        let rhs: Vec<u32> = generic_out.as_float().unwrap().iter().map(|v| v.to_bits()).collect();
        assert_eq!(lhs, rhs, "subtract={subtract}");
    }
}

#[test]
fn test_strided_access_on_device() {
    let Some(ctx) = context() else { return };
    let mut buf = DeviceBuffer::zeros_in(&ctx, ElementKind::Float, 10).unwrap();
    buf.put_strided(Strided::new(1, 3, 3), &Elements::Float(vec![1.0, 2.0, 3.0]))
        .unwrap();
    assert_eq!(
        buf.as_float().unwrap(),
        vec![0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 0.0, 3.0, 0.0, 0.0]
    );
    assert_eq!(
        buf.get_range_strided(1, 3, 3).unwrap(),
        Elements::Float(vec![1.0, 2.0, 3.0])
    );
    assert_eq!(buf.get(4).unwrap(), Scalar::Float(2.0));
    assert!(matches!(
        buf.get_range_strided(1, 3, 4),
        Err(BufferError::Range { index: 10, len: 10 })
    ));
}

#[test]
fn test_cross_backend_operands_and_results() {
    let Some(ctx) = context() else { return };
    let (mut dev, _) = pair(&ctx, Elements::Float(vec![1.0, 2.0, 3.0, 4.0]));
    let host = HostBuffer::from_vec(vec![10.0f32, 20.0, 30.0, 40.0]);
    dev.addi_buffer(&host).unwrap();
    assert_eq!(dev.as_float().unwrap(), vec![11.0, 22.0, 33.0, 44.0]);

    let mut host_out = HostBuffer::zeros(ElementKind::Float, 4);
    host_out.assign(-1.0f32).unwrap();
    dev.muli_strided_into(2.0f32, 2, 1, &mut host_out).unwrap();
    assert_eq!(host_out.as_float().unwrap(), vec![-1.0, 44.0, -1.0, 88.0]);

    let mut dev_out = DeviceBuffer::zeros_in(&ctx, ElementKind::Float, 4).unwrap();
    host.rsubi_into(100.0f32, &mut dev_out).unwrap();
    assert_eq!(dev_out.as_float().unwrap(), vec![90.0, 80.0, 70.0, 60.0]);

    let mut wrong = DeviceBuffer::zeros_in(&ctx, ElementKind::Int, 4).unwrap();
    assert!(matches!(
        dev.addi_into(1.0f32, &mut wrong),
        Err(BufferError::KindMismatch { .. })
    ));
}

#[test]
fn test_assign_concat_on_device() {
    let Some(ctx) = context() else { return };
    let (head, _) = pair(&ctx, Elements::Float(vec![1.0, 2.0, 3.0]));
    let tail = HostBuffer::from_vec(vec![4, 5, 6, 7]);
    let mut target = DeviceBuffer::zeros_in(&ctx, ElementKind::Float, 7).unwrap();
    target.assign_concat(&[&head, &tail]).unwrap();
    assert_eq!(target.as_float().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

    let mut host_target = HostBuffer::zeros(ElementKind::Int, 4);
    host_target
        .assign_concat_strided(&[0, 1], &[2, 2], &[&head, &tail])
        .unwrap();
    assert_eq!(host_target.as_int().unwrap(), vec![1, 3, 5, 7]);

    assert_eq!(
        target.assign_concat(&[&head]).unwrap_err(),
        BufferError::ShapeMismatch { expected: 7, actual: 3 }
    );
    assert_eq!(target.get(0).unwrap(), Scalar::Float(1.0));
}

#[test]
fn test_kernels_use_buffer_kind_tag() {
    let Some(ctx) = context() else { return };
    let (mut dev, _) = pair(&ctx, Elements::Float(vec![1.0, 2.0]));
    dev.rsubi(5.0f32).unwrap();
    assert_eq!(dev.as_float().unwrap(), vec![4.0, 3.0]);
    let compiled = ctx.compiled_kernels();
    assert!(compiled.contains(&("rsub_scalar", "float")), "{compiled:?}");
}

#[test]
fn test_lifecycle() {
    let Some(ctx) = context() else { return };
    let empty = DeviceBuffer::zeros_in(&ctx, ElementKind::Float, 0).unwrap();
    assert_eq!(empty.allocation_size(), 4);
    assert!(empty.as_float().unwrap().is_empty());

    let too_many = (ctx.max_buffer_bytes() / 4 + 1) as usize;
    assert!(matches!(
        DeviceBuffer::zeros_in(&ctx, ElementKind::Float, too_many),
        Err(BufferError::Allocation(_))
    ));

    let (mut dev, _) = pair(&ctx, Elements::Int(vec![1, 2, 3]));
    let copy = dev.dup().unwrap();
    dev.addi(10).unwrap();
    assert_eq!(copy.as_int().unwrap(), vec![1, 2, 3]);
    assert_eq!(dev.as_bytes().unwrap(), Vec::<u8>::new());

    dev.destroy();
    assert!(dev.is_destroyed());
    assert_eq!(dev.get(0).unwrap_err(), BufferError::UseAfterDestroy);
    assert_eq!(dev.addi(1).unwrap_err(), BufferError::UseAfterDestroy);
    assert_eq!(dev.dup().unwrap_err(), BufferError::UseAfterDestroy);
    dev.destroy();
}

#[test]
fn test_double_support_is_reported() {
    let Some(ctx) = context() else { return };
    let result = DeviceBuffer::zeros_in(&ctx, ElementKind::Double, 4);
    if ctx.supports(ElementKind::Double) {
        let mut buf = result.unwrap();
        buf.addi(0.5).unwrap();
        assert_eq!(buf.as_double().unwrap(), vec![0.5; 4]);
    } else {
        assert!(matches!(result, Err(BufferError::Unsupported(_))));
    }
}
