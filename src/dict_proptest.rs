#![cfg(test)]

// Property tests for Dict kept inside the crate so they can reach the rehash
// internals (`tables`, `safe_iterators`) without feature gates.

use crate::dict::{Dict, Handle};
use crate::dict_type::{DictType, StrType};
use crate::error::DictError;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    Upsert(usize, i32),
    Remove(usize),
    RemoveNoFree(usize),
    Find(usize),
    Rehash(usize),
    Expand(usize),
    Iterate,
    SafeScanRemove(usize),
    SafeScanRehash(usize, usize),
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,4}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Upsert(i, v)),
            2 => idx.clone().prop_map(OpI::Remove),
            1 => idx.clone().prop_map(OpI::RemoveNoFree),
            2 => idx.clone().prop_map(OpI::Find),
            1 => (0usize..8).prop_map(OpI::Rehash),
            1 => (0usize..200).prop_map(OpI::Expand),
            1 => Just(OpI::Iterate),
            1 => idx.clone().prop_map(OpI::SafeScanRemove),
            1 => (idx.clone(), 0usize..4).prop_map(|(i, n)| OpI::SafeScanRehash(i, n)),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Every key hashes to the same bucket.
struct Colliding;

impl DictType<String, i32> for Colliding {
    fn hash(&self, _key: &String) -> u64 {
        0
    }
    fn compare(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

// Drives one random scenario against a `HashMap` model.
// Invariants exercised across random operation sequences:
// - Duplicate inserts are rejected; upsert reports insert-vs-overwrite.
// - `find` parity with the model; live handles are stable across rehashing.
// - Removal hands back the owned pair matching the model.
// - Iteration yields each live entry exactly once, mid-rehash included.
// - A safe scan that removes one key sees every other key exactly once.
// - A safe scan interleaved with explicit rehashing, growth included, sees
//   every key exactly once.
// - Structural invariants hold after every op (`debug_check_invariants`).
fn run_scenario<T>(mut sut: Dict<String, i32, T>, pool: &[String], ops: Vec<OpI>) -> Result<(), TestCaseError>
where
    T: DictType<String, i32>,
{
    let mut model: HashMap<String, i32> = HashMap::new();
    let mut live: HashMap<String, Handle> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                match sut.insert(k.clone(), v) {
                    Ok(h) => {
                        prop_assert!(!already, "insert must fail on duplicate");
                        prop_assert!(live.insert(k.clone(), h).is_none());
                        model.insert(k, v);
                    }
                    Err(DictError::KeyExists) => prop_assert!(already),
                    Err(e) => prop_assert!(false, "unexpected insert error {e}"),
                }
            }
            OpI::Upsert(i, v) => {
                let k = pool[i].clone();
                let fresh = sut.upsert(k.clone(), v);
                prop_assert_eq!(fresh, model.insert(k.clone(), v).is_none());
                if fresh {
                    let h = sut.find(&k).expect("upserted key present");
                    live.insert(k, h);
                }
            }
            OpI::Remove(i) => {
                let k = &pool[i];
                let res = sut.remove(k);
                prop_assert_eq!(res.is_ok(), model.remove(k).is_some());
                if let Some(h) = live.remove(k) {
                    stale.push(h);
                }
            }
            OpI::RemoveNoFree(i) => {
                let k = &pool[i];
                match (sut.remove_no_free(k), model.remove(k)) {
                    (Ok((kk, vv)), Some(mv)) => {
                        prop_assert_eq!(&kk, k);
                        prop_assert_eq!(vv, mv);
                        stale.extend(live.remove(k));
                    }
                    (Err(DictError::KeyNotFound), None) => {}
                    (got, want) => prop_assert!(false, "remove_no_free {got:?} vs model {want:?}"),
                }
            }
            OpI::Find(i) => {
                let k = &pool[i];
                let found = sut.find(k);
                prop_assert_eq!(found.is_some(), model.contains_key(k));
                if let Some(h) = found {
                    prop_assert_eq!(Some(&h), live.get(k));
                    prop_assert_eq!(h.value(&sut), model.get(k));
                }
            }
            OpI::Rehash(n) => {
                let still = sut.rehash(n);
                prop_assert_eq!(still, sut.is_rehashing());
            }
            OpI::Expand(target) => {
                let was_rehashing = sut.is_rehashing();
                let res = sut.expand(target);
                prop_assert_eq!(res.is_ok(), !was_rehashing && target >= sut.len());
            }
            OpI::Iterate => {
                let keys: Vec<String> = sut.iter().map(|(_, k, _)| k.clone()).collect();
                let unique: BTreeSet<String> = keys.iter().cloned().collect();
                prop_assert_eq!(keys.len(), unique.len(), "entry yielded twice");
                let m_keys: BTreeSet<String> = model.keys().cloned().collect();
                prop_assert_eq!(unique, m_keys);
            }
            OpI::SafeScanRemove(i) => {
                let victim = &pool[i];
                let cursor = sut.rehash_index();
                let mut it = sut.safe_iterator();
                let mut seen = BTreeSet::new();
                while let Some(h) = it.next(&mut sut) {
                    let k = h.key(&sut).expect("yielded handle resolves").clone();
                    prop_assert!(seen.insert(k.clone()), "entry yielded twice");
                    prop_assert_eq!(sut.rehash_index(), cursor, "rehash advanced under safe iterator");
                    if &k == victim {
                        sut.remove(&k).expect("yielded key removable");
                    }
                }
                it.release(&mut sut);
                prop_assert_eq!(sut.safe_iterators(), 0);
                let m_keys: BTreeSet<String> = model.keys().cloned().collect();
                prop_assert_eq!(seen, m_keys);
                model.remove(victim);
                if let Some(h) = live.remove(victim) {
                    stale.push(h);
                }
            }
            OpI::SafeScanRehash(i, steps) => {
                let grow_to = (pool.len() + i) * 4;
                let mut grown = false;
                let mut it = sut.safe_iterator();
                let mut seen = BTreeSet::new();
                while let Some(h) = it.next(&mut sut) {
                    let k = h.key(&sut).expect("yielded handle resolves").clone();
                    prop_assert!(seen.insert(k), "entry yielded twice");
                    sut.rehash(steps);
                    if !grown && !sut.is_rehashing() && sut.expand(grow_to).is_ok() {
                        grown = true;
                    }
                }
                it.release(&mut sut);
                let m_keys: BTreeSet<String> = model.keys().cloned().collect();
                prop_assert_eq!(seen, m_keys);
            }
        }

        sut.debug_check_invariants();
        for &h in &stale {
            prop_assert!(h.value(&sut).is_none());
        }
        for (k, h) in &live {
            prop_assert_eq!(h.value(&sut), model.get(k));
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_scenario(Dict::with_type(StrType), &pool, ops)?;
    }
}

// Same invariants under worst-case collisions: every chain is the whole
// dictionary, so unlinking and migration walk long chains.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_scenario(Dict::with_type(Colliding), &pool, ops)?;
    }
}

// Growth disabled: tables only grow past the force ratio, so chains get long
// while rehashes are rare.
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_resizing_disabled((pool, ops) in arb_scenario()) {
        let sut: Dict<String, i32, StrType> = Dict::with_type(StrType);
        sut.policy().disable();
        run_scenario(sut, &pool, ops)?;
    }
}
