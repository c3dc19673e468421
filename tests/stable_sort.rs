// tests/stable_sort.rs

use std::collections::BTreeSet;
use std::path::Path;

use proptest::prelude::*;

use fsmirror::copy::{plan_copy, CopyOptions, Operation};
use fsmirror::fs::{ListingOrder, MemoryFileSystem};

fn build_source(names: &BTreeSet<String>, order: ListingOrder) -> MemoryFileSystem {
    let fs = MemoryFileSystem::new();
    fs.add_dir("/src");
    for name in names {
        fs.add_file(format!("/src/f_{name}"), name.clone());
        fs.add_file(format!("/src/d_{name}/inner"), "inner");
        fs.add_symlink(format!("f_{name}"), format!("/src/d_{name}/link"));
    }
    fs.set_listing_order(order);
    fs
}

fn structural_plan(names: &BTreeSet<String>, order: ListingOrder, stable_sort: bool) -> Vec<Operation> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime");

    runtime.block_on(async {
        let src = build_source(names, order);
        let dst = MemoryFileSystem::new();
        let options = CopyOptions {
            stable_sort,
            ..CopyOptions::default()
        };
        plan_copy(&dst, Path::new("/out"), &src, Path::new("/src"), &options)
            .await
            .expect("plan")
            .batches
            .structural()
            .to_vec()
    })
}

fn listing_order() -> impl Strategy<Value = ListingOrder> {
    prop_oneof![
        Just(ListingOrder::Sorted),
        Just(ListingOrder::Reversed),
        (0..16usize).prop_map(ListingOrder::Rotated),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn stable_sort_plan_ignores_listing_order(
        names in proptest::collection::btree_set("[a-z]{1,6}", 1..8),
        order in listing_order(),
    ) {
        let expected = structural_plan(&names, ListingOrder::Sorted, true);
        let actual = structural_plan(&names, order, true);
        prop_assert_eq!(actual, expected);
    }
}

#[test]
fn unsorted_plan_follows_listing_order() {
    let names: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

    let copied = |ops: Vec<Operation>| -> Vec<String> {
        ops.into_iter()
            .filter_map(|op| match op {
                Operation::CopyContent { destination, .. } => {
                    Some(destination.to_string_lossy().into_owned())
                }
                _ => None,
            })
            .collect()
    };

    let sorted = copied(structural_plan(&names, ListingOrder::Sorted, false));
    let mut reversed = copied(structural_plan(&names, ListingOrder::Reversed, false));
    assert_ne!(sorted, reversed);
    reversed.reverse();
    assert_eq!(sorted, reversed);
}
