//! Buffer contract tests on the host backend.
//!
//! Scenarios run through `Box<dyn DataBuffer>` from a host factory, the same
//! surface consumers get from `BufferFactory::global()`.

use ndbuf::prelude::*;
use ndbuf::{cached_op, BackendKind, ComplexF64, HostBuffer, Transform};

fn factory() -> BufferFactory {
    BufferFactory::new(BackendKind::Host)
}

fn doubles(values: &[f64]) -> Box<dyn DataBuffer> {
    factory().from_elements(Elements::Double(values.to_vec())).unwrap()
}

fn assert_close(actual: &[f64], expected: &[f64], tol: f64, context: &str) {
    assert_eq!(actual.len(), expected.len(), "{context}: length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "{context}: mismatch at index {i}: actual={a}, expected={e}"
        );
    }
}

#[test]
fn test_put_then_read_back() {
    let mut buf = doubles(&[1.0, 2.0, 3.0, 4.0]);
    buf.put(0, Scalar::Double(0.0)).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![0.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_linspace_range() {
    let buf = factory().linspace(ElementKind::Double, 1.0, 5.0, 5).unwrap();
    assert_eq!(buf.get_range(1, 3).unwrap(), Elements::Double(vec![2.0, 3.0, 4.0]));
}

#[test]
fn test_ones_add_then_sub() {
    let mut buf = factory().ones(ElementKind::Double, 5).unwrap();
    buf.addi(1.0).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![2.0; 5]);
    buf.subi(1.0).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![1.0; 5]);
}

#[test]
fn test_add_sub_restores_float_contents() {
    let values: Vec<f32> = (0..32).map(|i| i as f32 * 0.37 - 4.0).collect();
    let mut buf = factory().from_elements(Elements::Float(values.clone())).unwrap();
    buf.addi(2.75f32).unwrap();
    buf.subi(2.75f32).unwrap();
    let expected: Vec<f64> = values.iter().map(|&v| v as f64).collect();
    assert_close(&buf.as_double().unwrap(), &expected, 1e-5, "add/sub round trip");
}

#[test]
fn test_reverse_scalar_ops() {
    let mut a = doubles(&[1.0, 2.0, 4.0]);
    a.rsubi(10.0).unwrap();
    assert_eq!(a.as_double().unwrap(), vec![9.0, 8.0, 6.0]);

    let mut b = doubles(&[1.0, 2.0, 4.0]);
    b.rdivi(8.0).unwrap();
    assert_eq!(b.as_double().unwrap(), vec![8.0, 4.0, 2.0]);
}

#[test]
fn test_mul_buffer_leaves_operand_unchanged() {
    let mut a = doubles(&[1.0, 2.0, 3.0]);
    let b = doubles(&[4.0, 5.0, 6.0]);
    a.muli_buffer(b.as_ref()).unwrap();
    assert_eq!(a.as_double().unwrap(), vec![4.0, 10.0, 18.0]);
    assert_eq!(b.as_double().unwrap(), vec![4.0, 5.0, 6.0]);
}

#[test]
fn test_dup_is_independent() {
    let a = doubles(&[1.0, 2.0]);
    let mut b = a.dup().unwrap();
    assert_eq!(b.as_double().unwrap(), a.as_double().unwrap());
    b.put(1, Scalar::Double(7.0)).unwrap();
    assert_eq!(a.as_double().unwrap(), vec![1.0, 2.0]);
}

#[test]
fn test_strided_scalar_forms() {
    let mut buf = doubles(&[0.0; 6]);
    // offset 1, every second element
    buf.addi_strided(1.0, 2, 1).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);

    let mut out = factory().create(ElementKind::Double, 6).unwrap();
    out.assign(-1.0).unwrap();
    buf.muli_strided_into(3.0, 3, 0, out.as_mut()).unwrap();
    // only the walked positions of the result are written
    assert_eq!(out.as_double().unwrap(), vec![0.0, -1.0, -1.0, 3.0, -1.0, -1.0]);
    assert_eq!(buf.as_double().unwrap(), vec![0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);

    assert!(matches!(
        buf.addi_strided(1.0, 0, 0),
        Err(BufferError::UnsupportedAddressing(_))
    ));
    assert!(matches!(buf.addi_strided(1.0, 1, 7), Err(BufferError::Range { .. })));
}

#[test]
fn test_strided_binary_pairs() {
    let mut a = doubles(&[1.0, 1.0, 1.0, 1.0]);
    let b = doubles(&[10.0, 20.0, 30.0]);
    // a[1], a[3] += b[0], b[2]
    a.addi_buffer_strided(b.as_ref(), StridedPair::new(2, 1, 0, 2, 2)).unwrap();
    assert_eq!(a.as_double().unwrap(), vec![1.0, 11.0, 1.0, 31.0]);

    let err = a
        .addi_buffer_strided(b.as_ref(), StridedPair::new(2, 0, 1, 1, 2))
        .unwrap_err();
    assert_eq!(err, BufferError::Range { index: 3, len: 3 });
    // the failed call wrote nothing
    assert_eq!(a.as_double().unwrap(), vec![1.0, 11.0, 1.0, 31.0]);
}

#[test]
fn test_buffer_length_mismatch() {
    let mut a = doubles(&[1.0, 2.0]);
    let b = doubles(&[1.0, 2.0, 3.0]);
    assert_eq!(
        a.addi_buffer(b.as_ref()).unwrap_err(),
        BufferError::ShapeMismatch { expected: 2, actual: 3 }
    );
}

#[test]
fn test_result_target_checked_before_write() {
    let a = doubles(&[1.0, 2.0, 3.0]);
    let b = doubles(&[1.0, 1.0, 1.0]);

    let mut wrong_kind = factory().create(ElementKind::Float, 3).unwrap();
    assert_eq!(
        a.addi_buffer_into(b.as_ref(), wrong_kind.as_mut()).unwrap_err(),
        BufferError::KindMismatch {
            expected: ElementKind::Double,
            actual: ElementKind::Float,
        }
    );
    assert_eq!(wrong_kind.as_float().unwrap(), vec![0.0; 3]);

    let mut short = factory().create(ElementKind::Double, 2).unwrap();
    assert!(matches!(
        a.divi_into(2.0, short.as_mut()),
        Err(BufferError::ShapeMismatch { .. })
    ));

    let mut out = factory().create(ElementKind::Double, 3).unwrap();
    a.subi_buffer_into(b.as_ref(), out.as_mut()).unwrap();
    assert_eq!(out.as_double().unwrap(), vec![0.0, 1.0, 2.0]);
    assert_eq!(a.as_double().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_mixed_kind_operands_convert() {
    let mut ints = factory().from_elements(Elements::Int(vec![1, 2, 3])).unwrap();
    let floats = factory().from_elements(Elements::Float(vec![0.5, 0.5, 0.5])).unwrap();
    ints.muli_buffer(floats.as_ref()).unwrap();
    // the operand is converted to the receiver's kind first: 0.5 -> 0
    assert_eq!(ints.as_int().unwrap(), vec![0, 0, 0]);
    assert_eq!(ints.kind(), ElementKind::Int);
}

#[test]
fn test_int_arithmetic_edges() {
    let mut a = factory().from_elements(Elements::Int(vec![7, -7, i32::MAX])).unwrap();
    a.divi(2).unwrap();
    assert_eq!(a.as_int().unwrap(), vec![3, -3, i32::MAX / 2]);

    let mut b = factory().from_elements(Elements::Int(vec![i32::MAX])).unwrap();
    b.addi(1).unwrap();
    assert_eq!(b.as_int().unwrap(), vec![i32::MIN]);
}

#[test]
fn test_coercing_reads() {
    let buf = factory().from_elements(Elements::Int(vec![1, -2])).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![1.0, -2.0]);
    assert_eq!(buf.as_float().unwrap(), vec![1.0, -2.0]);
    assert_eq!(buf.get(1).unwrap(), Scalar::Int(-2));
    assert_eq!(buf.get(2).unwrap_err(), BufferError::Range { index: 2, len: 2 });
}

#[test]
fn test_complex_view() {
    let mut buf = factory().create(ElementKind::Double, 4).unwrap();
    buf.put_complex(1, ComplexF64::new(3.0, -4.0)).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![0.0, 0.0, 3.0, -4.0]);
    assert_eq!(buf.get_complex(1).unwrap(), ComplexF64::new(3.0, -4.0));
    assert!(matches!(buf.get_complex(2), Err(BufferError::Range { .. })));
}

#[test]
fn test_transforms() {
    let mut buf = doubles(&[-2.0, -0.5, 0.0, 1.5]);
    buf.apply(&element_wise_op("abs", &[]).unwrap()).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![2.0, 0.5, 0.0, 1.5]);

    buf.apply(&element_wise_op("pow", &[Scalar::Double(2.0)]).unwrap()).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![4.0, 0.25, 0.0, 2.25]);

    buf.apply_from(&element_wise_op("gt", &[Scalar::Double(1.0)]).unwrap(), 2)
        .unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![4.0, 0.25, 0.0, 1.0]);

    let mut out = factory().create(ElementKind::Double, 4).unwrap();
    buf.apply_into(
        &element_wise_op("neg", &[]).unwrap(),
        Strided::new(0, 2, 2),
        out.as_mut(),
    )
    .unwrap();
    assert_eq!(out.as_double().unwrap(), vec![-4.0, 0.0, -0.0, 0.0]);

    // a NaN bound clamps nothing
    buf.apply(&cached_op(Transform::Stabilize(f64::NAN))).unwrap();
    assert_eq!(buf.as_double().unwrap(), vec![4.0, 0.25, 0.0, 1.0]);
    assert_eq!(buf.len(), 4);
    assert_eq!(buf.kind(), ElementKind::Double);
}

#[test]
fn test_op_cache_identity() {
    let square = element_wise_op("pow", &[Scalar::Double(2.0)]).unwrap();
    let again = element_wise_op("pow", &[Scalar::Int(2)]).unwrap();
    let cube = element_wise_op("pow", &[Scalar::Double(3.0)]).unwrap();
    assert!(std::sync::Arc::ptr_eq(&square, &again));
    assert!(!std::sync::Arc::ptr_eq(&square, &cube));
    assert!(matches!(
        element_wise_op("softmax", &[]),
        Err(BufferError::InvalidArgument(_))
    ));
}

#[test]
fn test_assign_concat() {
    let a = doubles(&[1.0, 2.0]);
    let b = factory().from_elements(Elements::Int(vec![3, 4, 5])).unwrap();
    let mut target = factory().create(ElementKind::Float, 5).unwrap();
    target.assign_concat(&[a.as_ref(), b.as_ref()]).unwrap();
    assert_eq!(target.as_float().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    // a from index 1, b every other element
    let mut picked = factory().create(ElementKind::Int, 3).unwrap();
    picked
        .assign_concat_strided(&[1, 0], &[1, 2], &[a.as_ref(), b.as_ref()])
        .unwrap();
    assert_eq!(picked.as_int().unwrap(), vec![2, 3, 5]);

    let mut wrong = factory().create(ElementKind::Double, 4).unwrap();
    wrong.assign(-1.0).unwrap();
    assert_eq!(
        wrong.assign_concat(&[a.as_ref(), b.as_ref()]).unwrap_err(),
        BufferError::ShapeMismatch { expected: 4, actual: 5 }
    );
    assert_eq!(
        wrong.assign_concat_strided(&[0, 4], &[1, 1], &[a.as_ref(), b.as_ref()]).unwrap_err(),
        BufferError::Range { index: 4, len: 3 }
    );
    assert!(matches!(
        wrong.assign_concat_strided(&[0], &[1, 1], &[a.as_ref(), b.as_ref()]),
        Err(BufferError::InvalidArgument(_))
    ));
    assert_eq!(wrong.as_double().unwrap(), vec![-1.0; 4]);

    let mut empty = factory().create(ElementKind::Double, 0).unwrap();
    empty.assign_concat(&[]).unwrap();
}

#[test]
fn test_every_operation_fails_after_destroy() {
    let mut buf = doubles(&[1.0, 2.0, 3.0]);
    let other = doubles(&[1.0, 2.0, 3.0]);
    let mut out = factory().create(ElementKind::Double, 3).unwrap();
    let op = element_wise_op("exp", &[]).unwrap();
    buf.destroy();
    assert!(buf.is_destroyed());
    // a second destroy is a no-op
    buf.destroy();

    let gone = BufferError::UseAfterDestroy;
    assert_eq!(buf.get(0).unwrap_err(), gone);
    assert_eq!(buf.put(0, Scalar::Double(1.0)).unwrap_err(), gone);
    assert_eq!(buf.get_range(0, 1).unwrap_err(), gone);
    assert_eq!(buf.put_strided(Strided::whole(1), &Elements::Double(vec![1.0])).unwrap_err(), gone);
    assert_eq!(buf.set_all(&Elements::Double(vec![0.0; 3])).unwrap_err(), gone);
    assert_eq!(buf.as_typed(ElementKind::Double).unwrap_err(), gone);
    assert_eq!(buf.as_bytes().unwrap_err(), gone);
    assert_eq!(buf.assign(0.0).unwrap_err(), gone);
    assert_eq!(buf.assign_from(other.as_ref()).unwrap_err(), gone);
    assert_eq!(buf.dup().unwrap_err(), gone);
    assert_eq!(buf.flush().unwrap_err(), gone);
    assert_eq!(buf.addi(1.0).unwrap_err(), gone);
    assert_eq!(buf.rdivi_strided(1.0, 1, 0).unwrap_err(), gone);
    assert_eq!(buf.muli_into(2.0, out.as_mut()).unwrap_err(), gone);
    assert_eq!(buf.subi_buffer(other.as_ref()).unwrap_err(), gone);
    assert_eq!(buf.divi_buffer_into(other.as_ref(), out.as_mut()).unwrap_err(), gone);
    assert_eq!(buf.apply(&op).unwrap_err(), gone);
    assert_eq!(buf.apply_into(&op, Strided::whole(3), out.as_mut()).unwrap_err(), gone);
    assert_eq!(buf.get_complex(0).unwrap_err(), gone);
    assert_eq!(buf.assign_concat(&[other.as_ref()]).unwrap_err(), gone);

    // liveness is reported ahead of addressing and shape errors
    let longer = doubles(&[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(buf.addi_strided(1.0, 1, 10).unwrap_err(), gone);
    assert_eq!(buf.rsubi_strided_into(1.0, 1, 10, out.as_mut()).unwrap_err(), gone);
    assert_eq!(buf.get_range(5, 10).unwrap_err(), gone);
    assert_eq!(buf.addi_buffer(longer.as_ref()).unwrap_err(), gone);
    assert_eq!(buf.muli_buffer_into(longer.as_ref(), out.as_mut()).unwrap_err(), gone);
    assert_eq!(buf.apply_from(&op, 10).unwrap_err(), gone);

    // a destroyed operand or result target is refused too
    let mut live = doubles(&[1.0, 2.0, 3.0]);
    assert_eq!(live.addi_buffer(buf.as_ref()).unwrap_err(), gone);
    let mut short = doubles(&[1.0]);
    short.destroy();
    assert_eq!(live.subi_buffer(short.as_ref()).unwrap_err(), gone);
    assert_eq!(other.addi_into(1.0, buf.as_mut()).unwrap_err(), gone);
}

#[test]
fn test_host_buffer_concrete_surface() {
    let mut host = HostBuffer::from_vec(vec![1.0f32, 2.0, 3.0]);
    host.muli(2.0f32).unwrap();
    assert_eq!(host.as_slice::<f32>().unwrap(), &[2.0, 4.0, 6.0]);
    assert_eq!(host.as_bytes().unwrap().len(), 12);
    assert_eq!(host.backend(), BackendKind::Host);
}
