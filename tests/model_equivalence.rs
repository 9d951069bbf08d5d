//! Property-based single-threaded equivalence against
//! `std::collections::HashMap`: any sequence of put/remove/replace on
//! distinct keys must leave the same logical mapping a reference map
//! would, and round-trip/idempotence hold for every individual op.

use std::collections::HashMap;

use conchash::ConcurrentHashMap;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Put(u8, i32),
    Remove(u8),
    Replace(u8, i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<u8>(), any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
        any::<u8>().prop_map(Op::Remove),
        (any::<u8>(), any::<i32>()).prop_map(|(k, v)| Op::Replace(k, v)),
    ]
}

proptest! {
    #[test]
    fn sequential_ops_match_reference_map(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let map: ConcurrentHashMap<u8, i32, _> = ConcurrentHashMap::new();
        let mut reference: HashMap<u8, i32> = HashMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    let prior = map.put(k, v);
                    let ref_prior = reference.insert(k, v);
                    prop_assert_eq!(prior.as_deref().copied(), ref_prior);
                }
                Op::Remove(k) => {
                    let removed = map.remove(k);
                    let ref_removed = reference.remove(&k);
                    prop_assert_eq!(removed.as_deref().copied(), ref_removed);
                }
                Op::Replace(k, v) => {
                    let replaced = map.replace(k, v);
                    let ref_replaced = if reference.contains_key(&k) {
                        reference.insert(k, v)
                    } else {
                        None
                    };
                    prop_assert_eq!(replaced.as_deref().copied(), ref_replaced);
                }
            }
        }

        prop_assert_eq!(map.len(), reference.len());
        for (k, v) in &reference {
            prop_assert_eq!(map.get(k).as_deref().copied(), Some(*v));
        }
        for k in 0..=u8::MAX {
            if !reference.contains_key(&k) {
                prop_assert_eq!(map.get(&k), None);
            }
        }
    }
}

#[test]
fn round_trip_put_then_get() {
    let map: ConcurrentHashMap<&'static str, i32, _> = ConcurrentHashMap::new();
    map.put("k", 7);
    assert_eq!(map.get(&"k").as_deref().copied(), Some(7));
    map.remove("k");
    assert_eq!(map.get(&"k"), None);
}

#[test]
fn idempotent_put_does_not_grow_size_twice() {
    let map: ConcurrentHashMap<&'static str, i32, _> = ConcurrentHashMap::new();
    map.put("k", 7);
    let size_after_first = map.len();
    map.put("k", 7);
    assert_eq!(map.len(), size_after_first);
}
