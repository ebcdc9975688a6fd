mod common;

use common::*;
use jstructure::insn::build::*;
use jstructure::insn::{CmpOp, Offset};
use jstructure::{Insn, MapConstantPool, Options, label_jumps};
use proptest::collection::vec;
use proptest::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Step {
    Call,
    Branch(usize),
    Goto(usize),
}

// Statement `i` occupies offsets `3i..=3i + 2`; jumps target the start of a later statement.
fn method(steps: &[Step]) -> Vec<Insn> {
    let n = steps.len();
    let start = |index: usize| (3 * index) as Offset;
    let mut list: Vec<Insn> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let offset = start(i) + 2;
            let line = i as u32 + 1;
            match *step {
                Step::Call => call(offset, line, 5),
                Step::Branch(skip) => branch(
                    offset,
                    line,
                    zero(CmpOp::Eq, load(offset - 1, 1)),
                    start((i + 1 + skip).min(n)),
                ),
                Step::Goto(skip) => goto(offset, line, start((i + 1 + skip).min(n))),
            }
        })
        .collect();
    list.push(return_(start(n) + 2, n as u32 + 1));
    list
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => Just(Step::Call),
        2 => (0..6usize).prop_map(Step::Branch),
        1 => (0..6usize).prop_map(Step::Goto),
    ]
}

proptest! {
    #[test]
    fn forward_jumps_structure_cleanly(steps in vec(step(), 1..24)) {
        let output = run(&MapConstantPool::new(), method(&steps), Vec::new(), vec![parameter(1, 200)]);
        prop_assert!(!output.contains_error);
        let list = output.instructions;

        prop_assert!(offsets_increase(&list));

        let mut offsets = statement_offsets(&list);
        let count = offsets.len();
        offsets.sort_unstable();
        offsets.dedup();
        prop_assert_eq!(offsets.len(), count);

        prop_assert!(!has_raw_jumps(&list));
        let labels = label_offsets(&list);
        for target in labeled_jump_targets(&list) {
            prop_assert!(labels.contains(&target));
        }

        let mut again = list.clone();
        prop_assert!(label_jumps(&mut again, &Options::default()).is_ok());
        prop_assert_eq!(count_labels(&again), count_labels(&list));
        prop_assert_eq!(again, list);
    }
}
