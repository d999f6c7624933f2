//! SHA-1 function fingerprints and the sorted-merge split of a module's
//! functions into "static" (body already present in a reference module) and
//! "dynamic" (new, must be emitted) partitions.

use std::cmp::Ordering;

use crate::wasm::module::Module;

/// Identifies one function body by content. Used only for reference
/// diffing; the digest depends on nothing but the raw body bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionId {
    pub hash: [u8; 20],
    /// Index into the joint function index space of the originating module.
    pub function_index: u32,
    /// Canonical type index, to catch reference functions with identical
    /// bodies at incompatible signatures.
    pub type_index: u32,
}

impl FunctionId {
    fn compare(&self, other: &FunctionId) -> Ordering {
        // Ties by digest are broken by the module's own function order, so
        // the merge and the emitted output stay deterministic.
        self.hash
            .cmp(&other.hash)
            .then(self.function_index.cmp(&other.function_index))
    }
}

/// All local functions of `module` as FunctionIds, sorted by digest.
/// The decoder must have run with fingerprinting enabled.
pub fn sorted_function_ids(module: &Module) -> Vec<FunctionId> {
    let imported = module.imported_function_count();
    let mut ids: Vec<FunctionId> = module
        .functions
        .iter()
        .enumerate()
        .map(|(i, function)| FunctionId {
            hash: function.hash.expect("decoder ran without fingerprinting"),
            function_index: imported + i as u32,
            type_index: module.canonical_type_index(function.type_index),
        })
        .collect();
    ids.sort_unstable_by(|a, b| a.compare(b));
    ids
}

#[derive(Debug, Default)]
pub struct Partition {
    /// Functions whose body exists in the reference module; the emitter may
    /// reuse the reference build's symbol instead of emitting a body.
    pub static_ids: Vec<FunctionId>,
    /// Functions not present in the reference; their bodies are emitted.
    pub dynamic_ids: Vec<FunctionId>,
}

/// Linear merge of two digest-sorted id arrays. Reference-only digests are
/// skipped. A digest match at an incompatible signature would produce a
/// miscompiled alias, so it is conservatively treated as dynamic.
pub fn split_static_dynamic(ids: &[FunctionId], reference_ids: &[FunctionId]) -> Partition {
    let mut partition = Partition::default();
    let mut a = ids.iter().peekable();
    let mut r = reference_ids.iter().peekable();

    loop {
        match (a.peek(), r.peek()) {
            (Some(id), Some(reference)) => match id.hash.cmp(&reference.hash) {
                Ordering::Less => {
                    partition.dynamic_ids.push(**id);
                    a.next();
                }
                Ordering::Greater => {
                    r.next();
                }
                Ordering::Equal => {
                    if id.type_index == reference.type_index {
                        partition.static_ids.push(**id);
                    } else {
                        partition.dynamic_ids.push(**id);
                    }
                    a.next();
                }
            },
            (Some(id), None) => {
                partition.dynamic_ids.push(**id);
                a.next();
            }
            (None, _) => return partition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::decode::tests::TestModule;
    use crate::wasm::decode::{decode, DecodeOptions};

    const FINGERPRINT: DecodeOptions = DecodeOptions { fingerprint: true, debug_info: false };

    fn ids_of(bodies: &[&[u8]]) -> Vec<FunctionId> {
        let bytes = TestModule::new().single_type(&[0x7f], &[0x7f]).bodies(bodies).build();
        // The decoded module borrows `bytes`, so compute the ids in here.
        let module = decode(&bytes, FINGERPRINT).unwrap();
        sorted_function_ids(&module)
    }

    #[test]
    fn sorted_by_digest_with_index_tiebreak() {
        let ids = ids_of(&[&[0x20, 0x00, 0x0b], &[0x41, 0x01, 0x0b], &[0x20, 0x00, 0x0b]]);
        assert!(ids.windows(2).all(|w| w[0].compare(&w[1]) != Ordering::Greater));
        // The two identical bodies sort adjacently, in index order.
        let same: Vec<_> = ids.iter().filter(|id| id.function_index != 1).collect();
        assert_eq!(same[0].hash, same[1].hash);
        assert!(same[0].function_index < same[1].function_index);
    }

    #[test]
    fn partition_is_exact() {
        let ids = ids_of(&[&[0x20, 0x00, 0x0b], &[0x41, 0x2a, 0x0b], &[0x41, 0x07, 0x0b]]);
        let reference_ids = ids_of(&[&[0x41, 0x2a, 0x0b], &[0x41, 0x63, 0x0b]]);

        let partition = split_static_dynamic(&ids, &reference_ids);

        // static ∪ dynamic covers all of the module's functions, disjointly.
        assert_eq!(partition.static_ids.len() + partition.dynamic_ids.len(), ids.len());
        for id in &partition.static_ids {
            assert!(reference_ids.iter().any(|r| r.hash == id.hash));
        }
        for id in &partition.dynamic_ids {
            assert!(!reference_ids.iter().any(|r| r.hash == id.hash));
        }
        assert_eq!(partition.static_ids.len(), 1);
        assert_eq!(partition.dynamic_ids.len(), 2);
    }

    #[test]
    fn empty_reference_makes_everything_dynamic() {
        let ids = ids_of(&[&[0x20, 0x00, 0x0b]]);
        let partition = split_static_dynamic(&ids, &[]);
        assert!(partition.static_ids.len() == 0 && partition.dynamic_ids.len() == 1);
    }
}
