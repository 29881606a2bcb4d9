//! Seed scenarios with pinned command streams
//!
//! These mirror the classic scheduler scenarios: intra-block reorder,
//! two-block dependency, a four-block cycle, and the four-block rotation
//! that keeps the cache alive with partial commits. Streams are asserted
//! exactly and then replayed through the simulator as a second opinion.

use openflash_planner::prelude::*;

const BLOCK_SIZE: u32 = 0x1000;

fn planner() -> MovePlanner {
    MovePlanner::new(PlannerConfig::default()).expect("default config is valid")
}

fn plan_and_verify(moves: &[Move]) -> Plan {
    let planner = planner();
    let plan = planner.plan(moves).expect("plan");
    verify_plan(planner.layout(), moves, &plan).expect("plan reproduces the moves");
    plan
}

#[test]
fn reorder_within_a_block() {
    // S1: three fragments shuffled inside block 0.
    let moves = [
        Move::new(100, 100, 400),
        Move::new(100, 100, 100),
        Move::new(400, 200, 800),
    ];

    let plan = plan_and_verify(&moves);

    assert_eq!(
        plan.commands(),
        &[
            Command::UseBlock { block: 0 },
            Command::LoadAndFlush { block: 0 },
            Command::Copy {
                src: CopyAddr::Cache,
                src_offset: 0x64,
                length: 0x64,
                dst: CopyAddr::Block(0),
                dst_offset: 0x64,
            },
            Command::Copy {
                src: CopyAddr::Cache,
                src_offset: 0x64,
                length: 0x64,
                dst: CopyAddr::Block(0),
                dst_offset: 0x190,
            },
            Command::Copy {
                src: CopyAddr::Cache,
                src_offset: 0x190,
                length: 0xc8,
                dst: CopyAddr::Block(0),
                dst_offset: 0x320,
            },
        ]
    );
}

#[test]
fn two_block_dependency() {
    // S2: block 1 reads block 0, block 0 also rewrites itself.
    let moves = [
        Move::new(100, 100, 400),
        Move::new(100, 100, BLOCK_SIZE + 100),
    ];

    let plan = plan_and_verify(&moves);

    assert_eq!(
        plan.commands(),
        &[
            Command::Rebase {
                first_block: 0,
                last_block: 1,
            },
            Command::Erase { block: 1 },
            Command::UseBlock { block: 0 },
            Command::Copy {
                src: CopyAddr::Block(0),
                src_offset: 0x64,
                length: 0x64,
                dst: CopyAddr::Block(1),
                dst_offset: 0x64,
            },
            Command::LoadAndFlush { block: 0 },
            Command::Copy {
                src: CopyAddr::Cache,
                src_offset: 0x64,
                length: 0x64,
                dst: CopyAddr::Block(0),
                dst_offset: 0x190,
            },
        ]
    );
}

#[test]
fn four_block_cycle() {
    // S3: A -> B -> C -> D -> A, 100 bytes each. One block staged through
    // the cache, three plain erases, final copy back out of the cache.
    let moves = [
        Move::new(100, 100, BLOCK_SIZE + 200),
        Move::new(BLOCK_SIZE + 200, 100, 2 * BLOCK_SIZE + 300),
        Move::new(2 * BLOCK_SIZE + 300, 100, 3 * BLOCK_SIZE + 400),
        Move::new(3 * BLOCK_SIZE + 400, 100, 100),
    ];

    let plan = plan_and_verify(&moves);

    assert_eq!(
        plan.commands(),
        &[
            Command::Rebase {
                first_block: 0,
                last_block: 3,
            },
            Command::UseBlock { block: 0 },
            Command::LoadAndFlush { block: 0 },
            Command::UseBlock { block: 3 },
            Command::Copy {
                src: CopyAddr::Block(3),
                src_offset: 0x190,
                length: 0x64,
                dst: CopyAddr::Block(0),
                dst_offset: 0x64,
            },
            Command::Erase { block: 3 },
            Command::UseBlock { block: 2 },
            Command::Copy {
                src: CopyAddr::Block(2),
                src_offset: 0x12c,
                length: 0x64,
                dst: CopyAddr::Block(3),
                dst_offset: 0x190,
            },
            Command::Erase { block: 2 },
            Command::UseBlock { block: 1 },
            Command::Copy {
                src: CopyAddr::Block(1),
                src_offset: 0xc8,
                length: 0x64,
                dst: CopyAddr::Block(2),
                dst_offset: 0x12c,
            },
            Command::Erase { block: 1 },
            Command::Copy {
                src: CopyAddr::Cache,
                src_offset: 0x64,
                length: 0x64,
                dst: CopyAddr::Block(1),
                dst_offset: 0xc8,
            },
        ]
    );

    let stats = plan.stats();
    assert_eq!(stats.load_and_flush, 1);
    assert_eq!(stats.erases, 3);
}

#[test]
fn four_block_cycle_with_full_recovery() {
    // S4: each block keeps most of itself and takes 100 bytes from its
    // predecessor. The rotation parks self-ranges at natural offsets and
    // commits every non-pivot block with FLUSH_AND_PARTIAL_COMMIT.
    let bs = BLOCK_SIZE;
    let moves = [
        Move::new(bs, 100, bs),
        Move::new(100, 100, bs + 100),
        Move::new(bs + 200, bs - 200, bs + 200),
        Move::new(2 * bs, 100, 2 * bs),
        Move::new(bs + 100, 100, 2 * bs + 100),
        Move::new(2 * bs + 200, bs - 200, 2 * bs + 200),
        Move::new(3 * bs, 100, 3 * bs),
        Move::new(2 * bs + 100, 100, 3 * bs + 100),
        Move::new(3 * bs + 200, bs - 200, 3 * bs + 200),
        Move::new(0, 100, 0),
        Move::new(3 * bs + 100, 100, 100),
        Move::new(200, bs - 200, 200),
    ];

    let plan = plan_and_verify(&moves);

    assert_eq!(
        plan.commands(),
        &[
            Command::Rebase {
                first_block: 0,
                last_block: 3,
            },
            // Pivot: block 0 staged whole.
            Command::UseBlock { block: 0 },
            Command::LoadAndFlush { block: 0 },
            // Block 0 rewritten from cache and block 3.
            Command::Copy {
                src: CopyAddr::Cache,
                src_offset: 0x0,
                length: 0x64,
                dst: CopyAddr::Block(0),
                dst_offset: 0x0,
            },
            Command::UseBlock { block: 3 },
            Command::ChainedCopy {
                src: CopyAddr::Block(3),
                src_offset: 0x64,
                length: 0x64,
            },
            Command::ChainedCopy {
                src: CopyAddr::Cache,
                src_offset: 0xc8,
                length: 0xf38,
            },
            // Block 3: self-ranges parked, prefix committed from cache.
            Command::Copy {
                src: CopyAddr::Block(3),
                src_offset: 0x0,
                length: 0x64,
                dst: CopyAddr::Cache,
                dst_offset: 0x0,
            },
            Command::Copy {
                src: CopyAddr::Block(3),
                src_offset: 0xc8,
                length: 0xf38,
                dst: CopyAddr::Cache,
                dst_offset: 0xc8,
            },
            Command::FlushAndPartialCommit {
                block: 3,
                length: 0x64,
            },
            Command::UseBlock { block: 2 },
            Command::ChainedCopy {
                src: CopyAddr::Block(2),
                src_offset: 0x64,
                length: 0x64,
            },
            Command::ChainedCopy {
                src: CopyAddr::Cache,
                src_offset: 0xc8,
                length: 0xf38,
            },
            // Block 2, same rotation step.
            Command::Copy {
                src: CopyAddr::Block(2),
                src_offset: 0x0,
                length: 0x64,
                dst: CopyAddr::Cache,
                dst_offset: 0x0,
            },
            Command::Copy {
                src: CopyAddr::Block(2),
                src_offset: 0xc8,
                length: 0xf38,
                dst: CopyAddr::Cache,
                dst_offset: 0xc8,
            },
            Command::FlushAndPartialCommit {
                block: 2,
                length: 0x64,
            },
            Command::UseBlock { block: 1 },
            Command::ChainedCopy {
                src: CopyAddr::Block(1),
                src_offset: 0x64,
                length: 0x64,
            },
            Command::ChainedCopy {
                src: CopyAddr::Cache,
                src_offset: 0xc8,
                length: 0xf38,
            },
            // Block 1 assembles fully in the cache (the pivot's fragment is
            // still riding at its natural offset) and commits whole.
            Command::Copy {
                src: CopyAddr::Block(1),
                src_offset: 0x0,
                length: 0x64,
                dst: CopyAddr::Cache,
                dst_offset: 0x0,
            },
            Command::Copy {
                src: CopyAddr::Block(1),
                src_offset: 0xc8,
                length: 0xf38,
                dst: CopyAddr::Cache,
                dst_offset: 0xc8,
            },
            Command::FlushAndPartialCommit {
                block: 1,
                length: 0x1000,
            },
        ]
    );

    let stats = plan.stats();
    assert_eq!(stats.partial_commits, 3);
    assert_eq!(stats.load_and_flush, 1);
    assert_eq!(stats.erases, 0);
}

#[test]
fn empty_input_yields_empty_plan() {
    let plan = planner().plan(&[]).expect("empty plan");
    assert!(plan.is_empty());
}

#[test]
fn zero_length_move_is_rejected() {
    let err = planner().plan(&[Move::new(0, 0, 0x100)]).unwrap_err();
    assert_eq!(err, PlanError::ZeroLengthMove { index: 0 });
}

#[test]
fn out_of_range_move_is_rejected() {
    let err = planner()
        .plan(&[Move::new((1 << 22) - 10, 100, 0)])
        .unwrap_err();
    assert!(matches!(err, PlanError::MoveOutOfRange { index: 0, .. }));
}

#[test]
fn overlapping_destinations_are_rejected() {
    let moves = [
        Move::new(0, 0x100, 0x2000),
        Move::new(0x1000, 0x100, 0x2080),
    ];
    let err = planner().plan(&moves).unwrap_err();
    assert_eq!(
        err,
        PlanError::DestinationOverlap {
            first: 0,
            second: 1
        }
    );
}

#[test]
fn bad_geometry_is_rejected_at_construction() {
    let err = MovePlanner::new(PlannerConfig {
        block_size_bit: 7,
        flash_size_bit: 22,
    })
    .unwrap_err();
    assert_eq!(err, PlanError::BlockSizeBitOutOfRange(7));
}

#[test]
fn moves_crossing_block_boundaries_are_split() {
    // Source spans blocks 4-5, destination spans blocks 6-7.
    let moves = [Move::new(0x4f80, 0x100, 0x6fc0)];
    let plan = plan_and_verify(&moves);
    assert!(plan.commands().iter().any(|c| matches!(
        c,
        Command::Rebase {
            first_block: 4,
            last_block: 7,
        }
    )));
}

#[test]
fn pure_sink_needs_no_cache() {
    // Block 2 reads a block nobody rewrites; no staging involved.
    let moves = [Move::new(0x5000, 0x40, 0x2000)];
    let plan = plan_and_verify(&moves);
    assert_eq!(
        plan.commands(),
        &[
            Command::Rebase {
                first_block: 2,
                last_block: 5,
            },
            Command::Erase { block: 2 },
            Command::UseBlock { block: 5 },
            Command::Copy {
                src: CopyAddr::Block(5),
                src_offset: 0x0,
                length: 0x40,
                dst: CopyAddr::Block(2),
                dst_offset: 0x0,
            },
        ]
    );
}

#[test]
fn small_block_geometry() {
    let planner = MovePlanner::new(PlannerConfig {
        block_size_bit: 9,
        flash_size_bit: 16,
    })
    .expect("valid config");
    // A two-block swap with 512-byte blocks.
    let moves = [
        Move::new(0x000, 0x80, 0x200),
        Move::new(0x200, 0x80, 0x000),
    ];
    let plan = planner.plan(&moves).expect("plan");
    verify_plan(planner.layout(), &moves, &plan).expect("verify");
    assert_eq!(plan.stats().load_and_flush, 1);
}
