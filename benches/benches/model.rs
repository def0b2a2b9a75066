// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use understory_model::{
    Aspect, Flags, ModelError, NodeId, Phase, SchedulerConfig, Tree, UpdateContext,
};

#[derive(Clone)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        // Numerical Recipes LCG parameters.
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        (self.0 >> 32) as u32
    }

    fn gen_range_usize(&mut self, upper_exclusive: usize) -> usize {
        if upper_exclusive == 0 {
            return 0;
        }
        (self.next_u32() as usize) % upper_exclusive
    }
}

/// Does a token amount of work per sub-phase so passes are not optimized away.
#[derive(Default)]
struct Tally(u64);

impl Aspect for Tally {
    fn on_phase(
        &mut self,
        _tree: &mut Tree,
        _node: NodeId,
        phase: Phase,
        flags: Flags,
        _cx: &UpdateContext,
    ) -> Result<(), ModelError> {
        self.0 = self.0.wrapping_add(u64::from(flags.bits()) ^ phase as u64);
        Ok(())
    }
}

/// Builds a mounted tree of `n` nodes where node `i` hangs under `(i - 1) / fanout`.
fn build_tree(n: usize, fanout: usize, aspects: bool) -> (Tree, Vec<NodeId>) {
    let mut tree = Tree::with_config(SchedulerConfig::default(), understory_model::ManualClock::new());
    let mut nodes = Vec::with_capacity(n);
    nodes.push(tree.create_node());
    for i in 1..n {
        let node = tree.create_node();
        tree.append_child(nodes[(i - 1) / fanout], node, None)
            .expect("fresh nodes insert cleanly");
        nodes.push(node);
    }
    if aspects {
        for &node in &nodes {
            tree.insert_aspect(node, Tally::default(), None)
                .expect("live node");
        }
    }
    tree.mount(nodes[0]).expect("detached root mounts");
    (tree, nodes)
}

fn bench_require(c: &mut Criterion) {
    let mut group = c.benchmark_group("understory_model/require_update");
    group.sample_size(50);

    for &n in &[1_024_usize, 16_384] {
        group.bench_function(format!("leaf_bubble(n={n},fanout=4)"), |b| {
            b.iter_batched(
                || build_tree(n, 4, false),
                |(mut tree, nodes)| {
                    let leaf = *nodes.last().expect("non-empty");
                    tree.require_update(leaf, Flags::NEEDS_MUTATE, false)
                        .expect("live node");
                    black_box(tree);
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("sparse_marks_coalesce(n={n},marks=64)"), |b| {
            b.iter_batched(
                || build_tree(n, 4, false),
                |(mut tree, nodes)| {
                    let mut rng = Lcg::new(0x4D0D_E100_0000_0001);
                    for _ in 0..64 {
                        let node = nodes[rng.gen_range_usize(nodes.len())];
                        tree.require_update(node, Flags::NEEDS_AGGREGATE, false)
                            .expect("live node");
                    }
                    black_box(tree.scheduler().pending_timers());
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_passes(c: &mut Criterion) {
    let mut group = c.benchmark_group("understory_model/passes");
    group.sample_size(30);

    for &(n, marks) in &[(1_024_usize, 8_usize), (16_384, 8), (16_384, 1_024)] {
        group.bench_function(format!("analyze_sparse(n={n},marks={marks})"), |b| {
            b.iter_batched(
                || {
                    let (mut tree, nodes) = build_tree(n, 4, true);
                    let mut rng = Lcg::new(0x4D0D_E100_0000_0002);
                    for _ in 0..marks {
                        let node = nodes[rng.gen_range_usize(nodes.len())];
                        tree.require_update(node, Flags::NEEDS_MUTATE | Flags::NEEDS_CORRELATE, false)
                            .expect("live node");
                    }
                    tree
                },
                |mut tree| {
                    tree.run_analyze_pass().expect("hooks never fail");
                    black_box(tree);
                },
                BatchSize::LargeInput,
            );
        });
    }

    for &n in &[1_024_usize, 16_384] {
        group.bench_function(format!("refresh_all_dirty(n={n})"), |b| {
            b.iter_batched(
                || {
                    let (mut tree, nodes) = build_tree(n, 8, true);
                    for &node in &nodes {
                        tree.require_update(node, Flags::NEEDS_VALIDATE | Flags::NEEDS_RECONCILE, false)
                            .expect("live node");
                    }
                    tree
                },
                |mut tree| {
                    tree.run_refresh_pass().expect("hooks never fail");
                    black_box(tree);
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("clean_pass(n={n})"), |b| {
            let (mut tree, _) = build_tree(n, 4, true);
            b.iter(|| {
                tree.run_analyze_pass().expect("hooks never fail");
            });
        });
    }

    group.finish();
}

fn bench_structure(c: &mut Criterion) {
    let mut group = c.benchmark_group("understory_model/structure");
    group.sample_size(50);

    const KEYS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

    group.bench_function("keyed_churn(ops=1024)", |b| {
        b.iter_batched(
            || build_tree(256, 4, false),
            |(mut tree, nodes)| {
                let mut rng = Lcg::new(0x4D0D_E100_0000_0003);
                let parent = nodes[0];
                for _ in 0..1_024 {
                    let key = KEYS[rng.gen_range_usize(KEYS.len())];
                    if rng.next_u32() % 3 == 0 {
                        let _ = tree.remove_child_by_key(parent, key).expect("live parent");
                    } else {
                        let node = tree.create_node();
                        let _ = tree.set_child(parent, key, Some(node)).expect("fresh child");
                    }
                }
                black_box(tree);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("remount_subtree(n=4096)", |b| {
        let (mut tree, nodes) = build_tree(4_096, 4, true);
        let root = nodes[0];
        let branch = nodes[1];
        b.iter(|| {
            tree.remove_child(root, branch).expect("branch is a child");
            tree.insert_child(root, branch, None, None)
                .expect("detached branch inserts");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_require, bench_passes, bench_structure);
criterion_main!(benches);
