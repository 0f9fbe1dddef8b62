#![no_main]

use arbitrary::Arbitrary;
use buddy_arena::BuddyArena;
use libfuzzer_sys::fuzz_target;

const MAX_ORDER_SPAN: u8 = 10;

#[derive(Clone, Debug, Arbitrary)]
enum ArenaOp {
    Allocate(usize),
    Release(usize),
    ReleaseOffset(usize),
    Init,
}

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    min_order: u8,
    span: u8,
    ops: Vec<ArenaOp>,
}

fuzz_target!(|args: Args| {
    let min_order = u32::from(args.min_order % 12);
    let max_order = min_order + u32::from(args.span % MAX_ORDER_SPAN);

    let mut arena = match BuddyArena::try_new(min_order, max_order) {
        Ok(a) => a,
        Err(_) => return,
    };

    let mut outstanding = Vec::new();

    for op in args.ops {
        match op {
            ArenaOp::Allocate(size) => {
                if let Ok(offset) = arena.allocate_offset(size) {
                    outstanding.push(offset);
                }
            }

            ArenaOp::Release(raw_idx) => {
                if outstanding.is_empty() {
                    continue;
                }

                let idx = raw_idx % outstanding.len();
                let offset = outstanding.swap_remove(idx);
                arena.release_offset(offset).unwrap();
            }

            // Arbitrary offsets must be rejected unless they name a live block.
            ArenaOp::ReleaseOffset(offset) => {
                let live = outstanding.iter().position(|&o| o == offset);
                let res = arena.release_offset(offset);

                match live {
                    Some(idx) => {
                        res.unwrap();
                        outstanding.swap_remove(idx);
                    }
                    None => assert!(res.is_err()),
                }
            }

            ArenaOp::Init => {
                arena.init();
                outstanding.clear();
            }
        }

        arena.check_invariants().unwrap();
        assert_eq!(arena.free_bytes() + arena.used_bytes(), arena.total_bytes());
    }

    for offset in outstanding {
        arena.release_offset(offset).unwrap();
    }

    assert_eq!(arena.free_blocks(max_order).count(), 1);
});
