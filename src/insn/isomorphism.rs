use super::Insn;

// Duplicated `finally` bodies are byte-for-byte copies emitted at different offsets, so two copies
// differ only in offsets and line numbers. Jumps inside a copy keep their relative deltas, and jumps
// leaving the copy are not expected, so comparing deltas as-is is sufficient.

/// Compares two statements ignoring offsets and line numbers.
pub fn is_isomorphic(x: &Insn, y: &Insn) -> bool {
    normalized(x) == normalized(y)
}

pub fn is_isomorphic_list(x: &[Insn], y: &[Insn]) -> bool {
    x.len() == y.len() && x.iter().zip(y).all(|(x, y)| is_isomorphic(x, y))
}

fn normalized(insn: &Insn) -> Insn {
    let mut insn = insn.clone();
    normalize(&mut insn);
    insn
}

fn normalize(insn: &mut Insn) {
    insn.offset = 0;
    insn.line = 0;
    for operand in insn.operands_mut() {
        normalize(operand);
    }
    for sequence in insn.sequences_mut() {
        for insn in sequence {
            normalize(insn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::{call, int, load, store};

    #[test]
    fn ignores_offsets_and_lines() {
        let x = store(10, 4, 2, int(9, 1));
        let y = store(40, 7, 2, int(39, 1));
        assert!(is_isomorphic(&x, &y));
        assert!(!is_isomorphic(&x, &store(40, 7, 3, int(39, 1))));
        assert!(!is_isomorphic(&x, &store(40, 7, 2, load(39, 1))));
    }

    #[test]
    fn lists_must_match_in_length() {
        let x = [call(0, 1, 5), call(3, 1, 6)];
        let y = [call(10, 2, 5)];
        assert!(!is_isomorphic_list(&x, &y));
        assert!(is_isomorphic_list(&x[..1], &y));
    }
}
