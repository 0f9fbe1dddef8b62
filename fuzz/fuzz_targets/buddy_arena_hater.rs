#![no_main]

use arbitrary::Arbitrary;
use arena_hater::{AllocatorOp, Evaluator};
use buddy_arena_hater::BuddySubject;
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    min_order: u8,
    span: u8,
    ops: Vec<AllocatorOp>,
}

fuzz_target!(|args: Args| {
    let min_order = u32::from(args.min_order % 12);
    let max_order = min_order + u32::from(args.span % 10);

    let subject = match BuddySubject::new(min_order, max_order) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut eval = Evaluator::new(subject);
    if let Err(failed) = eval.evaluate(args.ops) {
        panic!("{failed}");
    }
});
