use super::{Insn, InsnKind, Jump, Offset, Slot};

impl Insn {
    /// Direct children that are not statement sequences: operands, conditions' operands, loop
    /// headers, switch keys, monitors, wrapped statements.
    pub fn operands(&self) -> Vec<&Insn> {
        use InsnKind::*;
        match &self.kind {
            Load { .. }
            | Const(_)
            | New { .. }
            | ExceptionLoad
            | ReturnAddress
            | Increment { .. }
            | Return
            | Goto { .. }
            | Jsr { .. }
            | Ret { .. } => Vec::new(),
            ArrayLoad { array, index } => vec![&**array, &**index],
            ArrayLength { array } => vec![&**array],
            GetField { object, .. } => object.iter().map(|object| &**object).collect(),
            Invoke { receiver, args, .. } => receiver
                .iter()
                .map(|receiver| &**receiver)
                .chain(args.iter())
                .collect(),
            CheckCast { value, .. }
            | DupStore { value, .. }
            | Store { value, .. }
            | Pop { value }
            | ValueReturn { value }
            | Throw { value } => vec![&**value],
            MonitorEnter { object } | MonitorExit { object } => vec![&**object],
            Binary { left, right, .. } => vec![&**left, &**right],
            PutField { object, value, .. } => object
                .iter()
                .map(|object| &**object)
                .chain([&**value])
                .collect(),
            ArrayStore {
                array,
                index,
                value,
            } => vec![&**array, &**index, &**value],
            Branch { condition, .. }
            | If { condition, .. }
            | IfElse { condition, .. } => condition.operands(),
            ConditionalJump { condition, jump } => {
                let mut operands = condition.operands();
                operands.extend(jump_operand(jump));
                operands
            }
            Jump(jump) => jump_operand(jump).into_iter().collect(),
            IfChain { arms, .. } => arms
                .iter()
                .flat_map(|arm| arm.condition.operands())
                .collect(),
            Switch(dispatch) => vec![&dispatch.key],
            Loop(loop_) => {
                let mut operands: Vec<&Insn> = loop_.init.iter().collect();
                if let Some(test) = &loop_.test {
                    operands.extend(test.operands());
                }
                operands.extend(loop_.update.iter());
                operands
            }
            ForEach(for_each) => vec![&for_each.iterable],
            SwitchBlock(switch) => vec![&switch.key],
            Try(_) => Vec::new(),
            Synchronized { monitor, .. } => vec![&**monitor],
            Labeled(statement) | Declare { statement, .. } => vec![&**statement],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Insn> {
        use InsnKind::*;
        match &mut self.kind {
            Load { .. }
            | Const(_)
            | New { .. }
            | ExceptionLoad
            | ReturnAddress
            | Increment { .. }
            | Return
            | Goto { .. }
            | Jsr { .. }
            | Ret { .. } => Vec::new(),
            ArrayLoad { array, index } => vec![&mut **array, &mut **index],
            ArrayLength { array } => vec![&mut **array],
            GetField { object, .. } => object.iter_mut().map(|object| &mut **object).collect(),
            Invoke { receiver, args, .. } => receiver
                .iter_mut()
                .map(|receiver| &mut **receiver)
                .chain(args.iter_mut())
                .collect(),
            CheckCast { value, .. }
            | DupStore { value, .. }
            | Store { value, .. }
            | Pop { value }
            | ValueReturn { value }
            | Throw { value } => vec![&mut **value],
            MonitorEnter { object } | MonitorExit { object } => vec![&mut **object],
            Binary { left, right, .. } => vec![&mut **left, &mut **right],
            PutField { object, value, .. } => object
                .iter_mut()
                .map(|object| &mut **object)
                .chain([&mut **value])
                .collect(),
            ArrayStore {
                array,
                index,
                value,
            } => vec![&mut **array, &mut **index, &mut **value],
            Branch { condition, .. }
            | If { condition, .. }
            | IfElse { condition, .. } => condition.operands_mut(),
            ConditionalJump { condition, jump } => {
                let mut operands = condition.operands_mut();
                operands.extend(jump_operand_mut(jump));
                operands
            }
            Jump(jump) => jump_operand_mut(jump).into_iter().collect(),
            IfChain { arms, .. } => arms
                .iter_mut()
                .flat_map(|arm| arm.condition.operands_mut())
                .collect(),
            Switch(dispatch) => vec![&mut dispatch.key],
            Loop(loop_) => {
                let loop_ = &mut **loop_;
                let mut operands: Vec<&mut Insn> = loop_.init.iter_mut().collect();
                if let Some(test) = &mut loop_.test {
                    operands.extend(test.operands_mut());
                }
                operands.extend(loop_.update.iter_mut());
                operands
            }
            ForEach(for_each) => vec![&mut for_each.iterable],
            SwitchBlock(switch) => vec![&mut switch.key],
            Try(_) => Vec::new(),
            Synchronized { monitor, .. } => vec![&mut **monitor],
            Labeled(statement) | Declare { statement, .. } => vec![&mut **statement],
        }
    }

    /// Nested statement sequences owned by this node, in source order.
    pub fn sequences(&self) -> Vec<&Vec<Insn>> {
        use InsnKind::*;
        match &self.kind {
            Loop(loop_) => vec![&loop_.body],
            ForEach(for_each) => vec![&for_each.body],
            If { then, .. } => vec![then],
            IfElse { then, else_, .. } => vec![then, else_],
            IfChain { arms, else_ } => arms
                .iter()
                .map(|arm| &arm.body)
                .chain(else_.iter())
                .collect(),
            SwitchBlock(switch) => switch.cases.iter().map(|case| &case.body).collect(),
            Try(try_) => core::iter::once(&try_.body)
                .chain(try_.catches.iter().map(|catch| &catch.body))
                .chain(try_.finally.iter())
                .collect(),
            Synchronized { body, .. } => vec![body],
            Labeled(statement) | Declare { statement, .. } => statement.sequences(),
            _ => Vec::new(),
        }
    }

    pub fn sequences_mut(&mut self) -> Vec<&mut Vec<Insn>> {
        use InsnKind::*;
        match &mut self.kind {
            Loop(loop_) => vec![&mut loop_.body],
            ForEach(for_each) => vec![&mut for_each.body],
            If { then, .. } => vec![then],
            IfElse { then, else_, .. } => vec![then, else_],
            IfChain { arms, else_ } => arms
                .iter_mut()
                .map(|arm| &mut arm.body)
                .chain(else_.iter_mut())
                .collect(),
            SwitchBlock(switch) => switch
                .cases
                .iter_mut()
                .map(|case| &mut case.body)
                .collect(),
            Try(try_) => {
                let try_ = &mut **try_;
                core::iter::once(&mut try_.body)
                    .chain(try_.catches.iter_mut().map(|catch| &mut catch.body))
                    .chain(try_.finally.iter_mut())
                    .collect()
            }
            Synchronized { body, .. } => vec![body],
            Labeled(statement) | Declare { statement, .. } => statement.sequences_mut(),
            _ => Vec::new(),
        }
    }

    /// Calls `f` on this node and every node below it, operands before nested sequences.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Insn)) {
        f(self);
        for operand in self.operands() {
            operand.visit(f);
        }
        if matches!(self.kind, InsnKind::Labeled(_) | InsnKind::Declare { .. }) {
            // Already reached through the wrapped statement.
            return;
        }
        for sequence in self.sequences() {
            for insn in sequence {
                insn.visit(f);
            }
        }
    }

    /// The smallest offset in this subtree, i.e. where the statement's bytecode starts.
    pub fn min_offset(&self) -> Offset {
        let mut min = self.offset;
        self.visit(&mut |insn| min = min.min(insn.offset));
        min
    }

    /// The largest offset in this subtree.
    pub fn max_offset(&self) -> Offset {
        let mut max = self.offset;
        self.visit(&mut |insn| max = max.max(insn.offset));
        max
    }

    /// Whether anything in this subtree reads or writes `slot`.
    pub fn references_slot(&self, slot: Slot) -> bool {
        let mut found = false;
        self.visit(&mut |insn| {
            found |= match insn.kind {
                InsnKind::Load { slot: s }
                | InsnKind::Store { slot: s, .. }
                | InsnKind::DupStore { slot: s, .. }
                | InsnKind::Increment { slot: s, .. }
                | InsnKind::Ret { slot: s } => s == slot,
                _ => false,
            };
        });
        found
    }

    /// Strips `Labeled`/`Declare` wrappers.
    pub fn unwrapped(&self) -> &Insn {
        match &self.kind {
            InsnKind::Labeled(statement) | InsnKind::Declare { statement, .. } => {
                statement.unwrapped()
            }
            _ => self,
        }
    }
}

fn jump_operand(jump: &Jump) -> Option<&Insn> {
    match jump {
        Jump::Return(Some(value)) => Some(value),
        _ => None,
    }
}

fn jump_operand_mut(jump: &mut Jump) -> Option<&mut Insn> {
    match jump {
        Jump::Return(Some(value)) => Some(value),
        _ => None,
    }
}

/// Calls `f` on every statement sequence in `list`, innermost sequences first, `list` itself last.
pub fn for_each_sequence_mut(list: &mut Vec<Insn>, f: &mut impl FnMut(&mut Vec<Insn>)) {
    for insn in list.iter_mut() {
        for sequence in insn.sequences_mut() {
            for_each_sequence_mut(sequence, f);
        }
    }
    f(list);
}

/// Calls `f` on every statement sequence in `list`, `list` itself first.
pub fn for_each_sequence<'a>(list: &'a [Insn], f: &mut impl FnMut(&'a [Insn])) {
    f(list);
    for insn in list {
        for sequence in insn.sequences() {
            for_each_sequence(sequence, f);
        }
    }
}

/// The index of the statement a jump to `target` lands on, or `list.len()` if it lands past the
/// end.
pub fn landing_index(list: &[Insn], target: Offset) -> usize {
    list.partition_point(|insn| insn.offset < target)
}
