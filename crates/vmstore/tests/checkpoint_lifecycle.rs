mod fixtures;

use fixtures::{force_count, TestFixture};
use pretty_assertions::assert_eq;
use vmstore::{
    Component, MachineStateRoots, ObjectPool, StoreError, Tuple, Value,
};

#[test]
fn test_bound_stack_outlives_checkpoint() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let stack = Tuple::new(vec![Value::int(5u64), Value::int(7u64)])?;

    let first = fx.store.save_tuple(&stack, &fx.pool)?;
    let second = fx.store.save_tuple(&stack, &fx.pool)?;
    assert_eq!(first.hash, second.hash);
    assert_eq!(second.reference_count, 2);

    let pc = fx.pool.code_point(1, None, None);
    let roots = MachineStateRoots {
        static_val: fx.store.save_value(&Value::int(10u64), &fx.pool)?,
        register_val: fx.store.save_value(&Value::int(11u64), &fx.pool)?,
        data_stack: second,
        aux_stack: fx.store.save_tuple(&Tuple::empty(), &fx.pool)?,
        inbox: fx.store.save_tuple(&Tuple::empty(), &fx.pool)?,
        inbox_count: fx.store.save_value(&Value::int(0u64), &fx.pool)?,
        pending_inbox: fx.store.save_tuple(&Tuple::empty(), &fx.pool)?,
        pending_count: fx.store.save_value(&Value::int(0u64), &fx.pool)?,
        pc: fx.store.save_value(&pc, &fx.pool)?,
        status: 1,
        block_reason: b"waiting".to_vec(),
        balance_tracker: Vec::new(),
    };
    fx.store.save_machine_state(&roots, "chk1")?;
    assert_eq!(fx.store.reference_count(&stack.hash())?, Some(2));

    fx.store.delete_checkpoint("chk1")?;
    assert_eq!(fx.store.reference_count(&stack.hash())?, Some(1));
    assert!(fx.store.list_checkpoints()?.is_empty());

    let result = fx.store.delete_tuple(&stack.hash())?;
    assert!(result.is_reclaimed());

    let mut pool = ObjectPool::new();
    assert!(matches!(
        fx.store.get_tuple(&stack.hash(), &mut pool),
        Err(StoreError::NotFound(_))
    ));
    assert!(fx.store.engine().is_empty());
    Ok(())
}

#[test]
fn test_state_roundtrip() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let stack = Tuple::new(vec![Value::int(1u64), Value::int(u64::MAX)])?;
    let state = fx.state(stack, 42);

    let roots = fx.store.persist_machine_state(&state, &fx.pool, "round")?;

    let mut pool = ObjectPool::new();
    let got = fx.store.get_machine_state("round", &mut pool)?;
    assert_eq!(got.state, state);
    assert_eq!(got.roots, roots);

    let record = fx.store.get_checkpoint_record("round")?;
    assert_eq!(record.reference_count, 1);
    assert_eq!(record.roots.balance_tracker, 42u64.to_be_bytes().to_vec());
    for (component, root) in record.roots.components() {
        assert!(
            fx.store.contains(&root.hash)?,
            "{} root should be stored",
            component
        );
    }
    assert!(fx.store.verify()?.is_clean());
    Ok(())
}

#[test]
fn test_shared_subtree_conservation() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let shared = fx.pair(3, 4);
    let stack_a = Tuple::new(vec![shared.clone(), Value::int(1u64)])?;
    let stack_b = Tuple::new(vec![shared.clone(), Value::int(2u64)])?;
    let a = fx.state(stack_a, 1);
    let b = fx.state(stack_b, 2);

    fx.store.persist_machine_state(&a, &fx.pool, "a")?;
    fx.store.persist_machine_state(&b, &fx.pool, "b")?;
    assert_eq!(fx.store.reference_count(&shared.hash())?, Some(2));
    assert!(fx.store.verify()?.is_clean());

    fx.store.delete_checkpoint("a")?;
    assert_eq!(fx.store.reference_count(&shared.hash())?, Some(1));
    assert!(fx.store.verify()?.is_clean());

    let mut pool = ObjectPool::new();
    let got = fx.store.get_machine_state("b", &mut pool)?;
    assert_eq!(got.state, b);

    fx.store.delete_checkpoint("b")?;
    assert!(fx.store.engine().is_empty());
    Ok(())
}

#[test]
fn test_unshared_checkpoint_cascades_to_nothing() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let inner = fx.pair(8, 9);
    let stack = Tuple::new(vec![inner, Value::int(3u64)])?;
    let state = fx.state(stack, 5);

    fx.store.persist_machine_state(&state, &fx.pool, "solo")?;
    assert!(fx.store.stats()?.records > 0);

    fx.store.delete_checkpoint("solo")?;
    assert_eq!(fx.store.stats()?, vmstore::StoreStats::default());
    Ok(())
}

#[test]
fn test_overwrite_matches_delete_then_recreate() -> anyhow::Result<()> {
    let mut overwrite = TestFixture::new();
    let mut recreate = TestFixture::new();

    for fx in [&mut overwrite, &mut recreate] {
        let first = fx.state(Tuple::new(vec![Value::int(1u64)])?, 1);
        fx.store.persist_machine_state(&first, &fx.pool, "slot")?;
    }

    let second = overwrite.state(Tuple::new(vec![Value::int(2u64)])?, 2);
    overwrite
        .store
        .persist_machine_state(&second, &overwrite.pool, "slot")?;

    recreate.store.delete_checkpoint("slot")?;
    let second = recreate.state(Tuple::new(vec![Value::int(2u64)])?, 2);
    recreate
        .store
        .persist_machine_state(&second, &recreate.pool, "slot")?;

    assert_eq!(overwrite.store.stats()?, recreate.store.stats()?);
    assert_eq!(overwrite.objects(), recreate.objects());
    assert!(overwrite.store.verify()?.is_clean());
    Ok(())
}

#[test]
fn test_rebinding_same_roots_keeps_counts() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let state = fx.state(Tuple::new(vec![Value::int(6u64)])?, 6);

    fx.store.persist_machine_state(&state, &fx.pool, "same")?;
    let before = fx.store.stats()?;
    fx.store.persist_machine_state(&state, &fx.pool, "same")?;

    assert_eq!(fx.store.stats()?.total_references, before.total_references);
    assert!(fx.store.verify()?.is_clean());
    Ok(())
}

#[test]
fn test_checkpoints_listed_sorted() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    for name in ["zeta", "alpha", "mid"] {
        let state = fx.state(Tuple::empty(), 1);
        fx.store.persist_machine_state(&state, &fx.pool, name)?;
    }
    assert_eq!(fx.store.list_checkpoints()?, vec!["alpha", "mid", "zeta"]);
    Ok(())
}

#[test]
fn test_failed_bind_changes_nothing() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let state = fx.state(Tuple::new(vec![Value::int(1u64)])?, 1);
    fx.store.persist_machine_state(&state, &fx.pool, "keep")?;
    let before = fx.store.engine().snapshot();

    let other = fx.state(Tuple::new(vec![Value::int(2u64)])?, 2);
    fx.store.engine().fail_next_batches(1);
    assert!(matches!(
        fx.store.persist_machine_state(&other, &fx.pool, "keep"),
        Err(StoreError::StorageFault(_))
    ));
    assert_eq!(fx.store.engine().snapshot(), before);

    fx.store.engine().fail_next_batches(1);
    assert!(fx.store.delete_checkpoint("keep").is_err());
    assert_eq!(fx.store.engine().snapshot(), before);
    Ok(())
}

#[test]
fn test_underflow_aborts_checkpoint_delete() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let state = fx.state(Tuple::new(vec![Value::int(1u64)])?, 1);
    let roots = fx.store.persist_machine_state(&state, &fx.pool, "bad")?;
    force_count(&fx.store, &roots.component(Component::ProgramCounter).hash, 0);
    let before = fx.store.engine().snapshot();

    assert!(matches!(
        fx.store.delete_checkpoint("bad"),
        Err(StoreError::RefcountUnderflow(_))
    ));
    assert_eq!(fx.store.engine().snapshot(), before);
    Ok(())
}

#[test]
fn test_verify_reports_bumped_count() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let state = fx.state(Tuple::new(vec![Value::int(1u64)])?, 1);
    let roots = fx.store.persist_machine_state(&state, &fx.pool, "v")?;
    assert!(fx.store.verify()?.is_clean());

    let stack = roots.data_stack;
    force_count(&fx.store, &stack.hash, stack.reference_count + 1);

    let report = fx.store.verify()?;
    assert_eq!(
        report.findings,
        vec![vmstore::Finding::CountMismatch {
            hash: stack.hash,
            stored: stack.reference_count + 1,
            expected: u64::from(stack.reference_count),
        }]
    );
    Ok(())
}
