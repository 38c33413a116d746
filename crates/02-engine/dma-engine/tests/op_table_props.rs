//! Random allocate/update/retire sequences against the operation table.

use std::collections::HashMap;

use dma_engine::{Descriptor, ErrorKind, OpTable, OpTag};
use proptest::collection;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Allocate(u32),
    Complete(usize, u32),
    Fail(usize),
    Retire(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..512).prop_map(Op::Allocate),
        (0usize..64, 1u32..256).prop_map(|(i, b)| Op::Complete(i, b)),
        (0usize..64).prop_map(Op::Fail),
        (0usize..64).prop_map(Op::Retire),
    ]
}

proptest! {
    #[test]
    fn live_entries_respect_capacity_and_generations(
        capacity in 1usize..16,
        ops in collection::vec(op(), 1..300),
    ) {
        let mut table = OpTable::new(capacity).unwrap();
        let mut live: Vec<OpTag> = Vec::new();
        let mut dead: Vec<OpTag> = Vec::new();
        let mut last_gen: HashMap<u16, u32> = HashMap::new();

        for op in ops {
            match op {
                Op::Allocate(len) => match table.allocate(Descriptor::read(0, 0, len, 0), 0) {
                    Ok(tag) => {
                        prop_assert!(live.len() < capacity);
                        if let Some(prev) = last_gen.get(&tag.index) {
                            prop_assert!(tag.generation > *prev, "slot reused without new generation");
                        }
                        last_gen.insert(tag.index, tag.generation);
                        live.push(tag);
                    }
                    Err(_) => prop_assert_eq!(live.len(), capacity),
                },
                Op::Complete(i, bytes) if !live.is_empty() => {
                    let tag = live[i % live.len()];
                    if table.update(tag, bytes, None).is_some() {
                        live.retain(|t| *t != tag);
                        dead.push(tag);
                    }
                }
                Op::Fail(i) if !live.is_empty() => {
                    let tag = live[i % live.len()];
                    let retired = table.update(tag, 0, Some(ErrorKind::Poisoned));
                    prop_assert!(retired.is_some());
                    live.retain(|t| *t != tag);
                    dead.push(tag);
                }
                Op::Retire(i) if !live.is_empty() => {
                    let tag = live.remove(i % live.len());
                    prop_assert!(table.retire(tag).is_some());
                    dead.push(tag);
                }
                _ => {}
            }
            prop_assert_eq!(table.live(), live.len());
            prop_assert!(table.live() <= table.capacity());
            for tag in &dead {
                prop_assert!(table.lookup(*tag).is_none());
            }
        }
    }
}
