mod fixtures;

use fixtures::{machine_state, TestFixture};
use pretty_assertions::assert_eq;
use vmstore::{ObjectPool, Tuple, Value};

const STACK_DEPTH: u64 = 100_000;

/// A data stack of `depth` entries: each push wraps the previous stack in a
/// new 2-tuple, so nesting is as deep as the stack is long.
fn nested_stack(pool: &mut ObjectPool, depth: u64) -> Value {
    let mut top = pool.tuple(Vec::new()).unwrap();
    for i in 0..depth {
        top = pool.tuple(vec![Value::int(i), top]).unwrap();
    }
    top
}

#[test]
fn test_deep_stack_save_get_delete() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let stack = nested_stack(&mut fx.pool, STACK_DEPTH);
    let original = fx.pool.tuple_of(&stack).unwrap().clone();

    let saved = fx.store.save_value(&stack, &fx.pool)?;
    assert_eq!(saved.reference_count, 1);
    assert_eq!(fx.objects().len() as u64, STACK_DEPTH + 1);

    let mut fresh = ObjectPool::new();
    let got = fx.store.get_tuple(&saved.hash, &mut fresh)?;
    assert_eq!(got.tuple, original);
    assert_eq!(fresh.len() as u64, STACK_DEPTH + 1);

    let deleted = fx.store.delete_tuple(&saved.hash)?;
    assert!(deleted.is_reclaimed());
    assert_eq!(deleted.reclaimed as u64, STACK_DEPTH + 1);
    assert!(fx.store.engine().is_empty());
    Ok(())
}

#[test]
fn test_deep_stack_shares_its_tail() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let base = nested_stack(&mut fx.pool, STACK_DEPTH);
    let pushed = fx.pool.tuple(vec![Value::int(u64::MAX), base.clone()])?;

    fx.store.save_value(&base, &fx.pool)?;
    fx.store.save_value(&pushed, &fx.pool)?;
    // only the new top is written; the old stack gains one reference
    assert_eq!(fx.objects().len() as u64, STACK_DEPTH + 2);
    assert_eq!(fx.store.reference_count(&base.hash())?, Some(2));

    fx.store.delete_value(&pushed.hash())?;
    assert_eq!(fx.store.reference_count(&base.hash())?, Some(1));
    assert_eq!(fx.objects().len() as u64, STACK_DEPTH + 1);
    Ok(())
}

#[test]
fn test_deep_stack_checkpoint_roundtrip() -> anyhow::Result<()> {
    let mut fx = TestFixture::new();
    let stack = nested_stack(&mut fx.pool, STACK_DEPTH);
    let data_stack = fx.pool.tuple_of(&stack).unwrap().clone();
    let state = machine_state(&mut fx.pool, data_stack, 3);

    fx.store.persist_machine_state(&state, &fx.pool, "deep")?;

    let mut fresh = ObjectPool::new();
    let got = fx.store.get_machine_state("deep", &mut fresh)?;
    assert_eq!(got.state, state);
    assert_eq!(
        fresh.tuple_of(&stack).map(Tuple::hash),
        Some(stack.hash())
    );

    fx.store.delete_checkpoint("deep")?;
    assert!(fx.store.engine().is_empty());
    Ok(())
}
