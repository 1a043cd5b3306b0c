use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use graph_rt::backend::BackendOptions;
use graph_rt::graph::builders::{add, constant, divide, exp, multiply, parameter, reshape};
use graph_rt::graph::Function;
use graph_rt::{Backend, BackendExt, ElementType, Error};
use graph_rt_backend_ref_cpu::{CpuBackend, InterpreterBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn unique_path(ext: &str) -> PathBuf {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    env::temp_dir().join(format!("graph_rt_cpu_plan_{nanos}_{seq}.{ext}"))
}

/// `reshape(exp(a) * w + a / 4, [2, 6])` with a constant weight.
fn scaled_exp_function() -> Function {
    let a = parameter(ElementType::F32, [3, 4]).unwrap();
    let weights: Vec<f32> = (0..12).map(|i| i as f32 * 0.25 - 1.0).collect();
    let w = constant([3, 4], &weights).unwrap();
    let quarter = constant([3, 4], &[4.0f32; 12]).unwrap();
    let scaled = multiply(exp(&a).unwrap(), &w).unwrap();
    let sum = add(&scaled, divide(&a, &quarter).unwrap()).unwrap();
    let out = reshape(&sum, [2, 6]).unwrap();
    Function::with_name("scaled_exp", [&out], [a]).unwrap()
}

#[test]
fn saved_plan_reloads_with_identical_outputs() -> Result<()> {
    let path = unique_path("plan");
    let backend = CpuBackend::new(BackendOptions::default());
    let function = scaled_exp_function();
    let original = backend.compile(&function)?;
    backend.save(original, &path)?;

    let restored_backend = CpuBackend::new(BackendOptions::default());
    let restored = restored_backend.load(&path)?;
    assert_eq!(
        restored_backend.parameter_descriptors(restored)?,
        function.parameter_descriptors()
    );
    assert_eq!(
        restored_backend.result_descriptors(restored)?,
        function.result_descriptors()
    );

    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..4 {
        let values: Vec<f32> = (0..12).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let input = backend.tensor_from_slice([3, 4], &values)?;
        let expected = backend.create_result_tensors(original)?;
        let actual = restored_backend.create_result_tensors(restored)?;
        backend.call_with_validate(original, &expected, &[input.clone()])?;
        restored_backend.call_with_validate(restored, &actual, &[input])?;
        assert_eq!(expected[0].snapshot(), actual[0].snapshot());
    }

    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn load_into_the_same_backend_issues_a_new_handle() -> Result<()> {
    let path = unique_path("plan");
    let backend = CpuBackend::new(BackendOptions::default());
    let original = backend.compile(&scaled_exp_function())?;
    backend.save(original, &path)?;
    let restored = backend.load(&path)?;
    assert_ne!(original, restored);

    backend.remove_compiled_function(original)?;
    let input = backend.tensor_from_slice([3, 4], &[0.5f32; 12])?;
    let outputs = backend.create_result_tensors(restored)?;
    backend.call_with_validate(restored, &outputs, &[input])?;

    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn save_of_removed_handle_fails_without_writing() {
    let path = unique_path("plan");
    let backend = CpuBackend::new(BackendOptions::default());
    let handle = backend.compile(&scaled_exp_function()).unwrap();
    backend.remove_compiled_function(handle).unwrap();

    assert_eq!(backend.save(handle, &path), Err(Error::InvalidHandle));
    assert!(!path.exists());
}

#[test]
fn damaged_archives_fail_to_load() -> Result<()> {
    let path = unique_path("plan");
    let backend = CpuBackend::new(BackendOptions::default());
    let handle = backend.compile(&scaled_exp_function())?;
    backend.save(handle, &path)?;
    let pristine = fs::read(&path)?;

    let mut flipped = pristine.clone();
    let last = flipped.len() - 1;
    flipped[last] ^= 0xFF;
    fs::write(&path, &flipped)?;
    assert!(matches!(backend.load(&path), Err(Error::LoadError { .. })));

    fs::write(&path, &pristine[..10])?;
    assert!(matches!(backend.load(&path), Err(Error::LoadError { .. })));

    let mut foreign = pristine.clone();
    foreign[..8].copy_from_slice(b"NOTAPLAN");
    fs::write(&path, &foreign)?;
    assert!(matches!(backend.load(&path), Err(Error::LoadError { .. })));

    let mut future = pristine;
    future[8..12].copy_from_slice(&99u32.to_le_bytes());
    fs::write(&path, &future)?;
    let err = backend.load(&path).unwrap_err();
    assert!(err.to_string().contains("version"), "{err}");

    fs::remove_file(&path)?;
    let missing = backend.load(&path).unwrap_err();
    assert!(matches!(missing, Error::LoadError { path: p, .. } if p == path));
    Ok(())
}

#[test]
fn interpreter_has_no_persistence() {
    let path = unique_path("plan");
    let backend = InterpreterBackend::new(BackendOptions::default());
    let handle = backend.compile(&scaled_exp_function()).unwrap();

    assert!(matches!(
        backend.save(handle, &path),
        Err(Error::SaveError { .. })
    ));
    assert!(matches!(backend.load(&path), Err(Error::LoadError { .. })));
    assert!(!path.exists());

    backend.remove_compiled_function(handle).unwrap();
    assert_eq!(backend.save(handle, &path), Err(Error::InvalidHandle));
}
