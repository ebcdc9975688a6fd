mod enum_switch;
mod string_switch;

use crate::StructuringError;
use crate::context::{Context, Landing};
use crate::insn::{CaseLabel, Insn, InsnKind, Offset, SwitchBlock, SwitchCase, SwitchKind};
use crate::insn::landing_index;
use crate::structurer::Structurer;
use crate::utils::jump_targets;
use log::debug;

/// Replaces every `tableswitch`/`lookupswitch` in `list` with a `SwitchBlock`, fusing the two
/// dispatches of a string switch and unwrapping the switch map of an enum switch.
pub fn structure_switches(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
) -> Result<(), StructuringError> {
    let mut index = 0;
    while index < list.len() {
        if matches!(list[index].kind, InsnKind::Switch(_)) {
            index = structure_at(structurer, list, ctx, index)?;
        }
        index += 1;
    }
    Ok(())
}

/// A dispatch reduced to labels and absolute targets.
struct Dispatch {
    kind: SwitchKind,
    key: Insn,
    arms: Vec<(CaseLabel, Offset)>,
    default: Offset,
}

// Returns the index of the new node.
fn structure_at(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
    index: usize,
) -> Result<usize, StructuringError> {
    if structurer.options.recognize_string_switch {
        if let Some(found) = string_switch::match_string_switch(structurer.pool, list, index) {
            for &(slot, offset) in &found.temporaries {
                structurer.variables.remove(slot, offset);
            }
            debug!("string switch at {}", list[found.dispatch].offset);
            list.drain(found.first..found.dispatch);
            build_switch(structurer, list, ctx, found.first, found.dispatch_parts)?;
            return Ok(found.first);
        }
    }

    let insn = &list[index];
    let InsnKind::Switch(raw) = &insn.kind else {
        return Err(StructuringError::shape(insn.offset, "switch"));
    };
    let target = |delta: i32| {
        insn.offset
            .checked_add_signed(delta)
            .ok_or(StructuringError::UnknownJumpTarget { offset: insn.offset })
    };
    let arms = raw
        .cases
        .iter()
        .map(|&(key, delta)| Ok((CaseLabel::Int(key), target(delta)?)))
        .collect::<Result<Vec<_>, StructuringError>>()?;
    let default = target(raw.default)?;

    let enum_key = structurer
        .options
        .recognize_enum_switch
        .then(|| enum_switch::match_enum_key(structurer.pool, &raw.key))
        .flatten();
    let (kind, key) = match enum_key {
        Some((switch_map, value)) => (SwitchKind::Enum { switch_map }, value.clone()),
        None => (SwitchKind::Int, raw.key.clone()),
    };
    build_switch(structurer, list, ctx, index, Dispatch {
        kind,
        key,
        arms,
        default,
    })?;
    Ok(index)
}

fn build_switch(
    structurer: &mut Structurer<'_>,
    list: &mut Vec<Insn>,
    ctx: Context,
    index: usize,
    dispatch: Dispatch,
) -> Result<(), StructuringError> {
    let (offset, line) = (list[index].offset, list[index].line);
    if let Some(&(_, target)) = dispatch
        .arms
        .iter()
        .find(|&&(_, target)| target <= offset)
    {
        debug!("switch at {offset} jumps backwards to {target}");
        return Err(StructuringError::shape(offset, "forward case targets"));
    }
    if dispatch.default <= offset {
        return Err(StructuringError::shape(offset, "forward default target"));
    }

    // Case starts as indices, labels grouped by start.
    let mut starts: Vec<(usize, Vec<CaseLabel>)> = Vec::new();
    for (label, target) in dispatch.arms {
        let start = landing_index(list, target);
        match starts.iter_mut().find(|(index, _)| *index == start) {
            Some((_, labels)) => labels.push(label),
            None => starts.push((start, vec![label])),
        }
    }
    let default_start = landing_index(list, dispatch.default);
    let end = switch_end(list, ctx, index, &starts, default_start);
    if default_start < end {
        match starts.iter_mut().find(|(index, _)| *index == default_start) {
            Some((_, labels)) => labels.push(CaseLabel::Default),
            None => starts.push((default_start, vec![CaseLabel::Default])),
        }
    }
    starts.sort_by_key(|(index, _)| *index);
    if starts.first().is_some_and(|(start, _)| *start != index + 1) {
        return Err(StructuringError::shape(offset, "case right after the dispatch"));
    }

    let after = Landing::at(list, end, ctx.from, ctx.fallthrough.to);
    let contexts: Vec<Context> = starts
        .iter()
        .enumerate()
        .map(|(i, &(start, _))| {
            let from = Landing::at(list, start, ctx.from, ctx.fallthrough.to).from;
            let fallthrough = match starts.get(i + 1) {
                Some(&(next, _)) => Landing::at(list, next, ctx.from, ctx.fallthrough.to),
                None => after,
            };
            ctx.for_switch_case(from, fallthrough, after)
        })
        .collect();

    let mut drained: Vec<Insn> = list.drain(index..end).collect();
    let mut cases = Vec::with_capacity(starts.len());
    for (&(start, _), case_ctx) in starts.iter().zip(&contexts).rev() {
        let mut body = drained.split_off(start - index);
        structurer.structure_sequence(&mut body, *case_ctx)?;
        cases.push(body);
    }
    cases.reverse();
    let cases = starts
        .into_iter()
        .zip(cases)
        .map(|((_, labels), body)| SwitchCase { labels, body })
        .collect();

    debug!("switch at {offset} ends before {after}");
    list.insert(
        index,
        Insn::new(
            offset,
            line,
            InsnKind::SwitchBlock(Box::new(SwitchBlock {
                kind: dispatch.kind,
                key: dispatch.key,
                cases,
            })),
        ),
    );
    Ok(())
}

// The index of the first statement after the switch: the nearest `break` target past the last case
// start, else the default target if it is past every case, else the end of the sequence. Jumps from
// before the switch into the last case cut it short.
fn switch_end(
    list: &[Insn],
    ctx: Context,
    index: usize,
    starts: &[(usize, Vec<CaseLabel>)],
    default_start: usize,
) -> usize {
    let last_case = starts
        .iter()
        .map(|(start, _)| *start)
        .max()
        .unwrap_or(index);
    let last_start = last_case.max(default_start);
    let last_offset = list.get(last_start).map_or(Offset::MAX, |insn| insn.offset);

    let breaks = jump_targets(&list[index + 1..last_start.min(list.len())])
        .into_iter()
        .map(|(_, target)| target)
        .filter(|&target| target > last_offset && target <= ctx.fallthrough.to)
        .min();
    let mut end = match breaks {
        Some(target) => landing_index(list, target),
        None if default_start > last_case => default_start,
        None => list.len(),
    };

    let entered = jump_targets(&list[..index])
        .into_iter()
        .map(|(_, target)| landing_index(list, target))
        .filter(|&start| start > last_case && start < end)
        .min();
    if let Some(start) = entered {
        end = start;
    }
    end.max(last_case + 1).min(list.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::build::*;
    use crate::insn::InvokeKind;
    use crate::variables::LocalVariableTable;
    use crate::{ConstantPool, MapConstantPool, Options};

    fn structure_with(pool: &dyn ConstantPool, mut list: Vec<Insn>) -> Vec<Insn> {
        let options = Options::default();
        let mut structurer = Structurer::new(pool, &options, LocalVariableTable::new());
        let ctx = Context::method(&list);
        structure_switches(&mut structurer, &mut list, ctx).unwrap();
        list
    }

    fn only_switch(insn: &Insn) -> &SwitchBlock {
        match &insn.kind {
            InsnKind::SwitchBlock(switch) => switch,
            _ => panic!("expected a switch, got {insn}"),
        }
    }

    #[test]
    fn cases_end_at_the_break_target() {
        let list = structure_with(&MapConstantPool::new(), vec![
            switch(2, 1, load(1, 1), 15, &[(1, 5), (2, 11)]),
            call(5, 2, 5),
            goto(7, 2, 20),
            call(11, 3, 6),
            goto(13, 3, 20),
            call(15, 4, 7),
            return_(20, 5),
        ]);
        assert_eq!(list.len(), 2);
        let switch = only_switch(&list[0]);
        assert_eq!(switch.kind, SwitchKind::Int);
        let labels: Vec<_> = switch.cases.iter().map(|case| case.labels.clone()).collect();
        assert_eq!(labels, [
            vec![CaseLabel::Int(1)],
            vec![CaseLabel::Int(2)],
            vec![CaseLabel::Default]
        ]);
        assert_eq!(switch.cases[0].body, [call(5, 2, 5), goto(7, 2, 20)]);
        assert_eq!(switch.cases[2].body, [call(15, 4, 7)]);
    }

    #[test]
    fn shared_targets_and_missing_default() {
        let list = structure_with(&MapConstantPool::new(), vec![
            switch(2, 1, load(1, 1), 12, &[(1, 5), (2, 5), (3, 9)]),
            call(5, 2, 5),
            goto(7, 2, 12),
            call(9, 3, 6),
            return_(12, 4),
        ]);
        let switch = only_switch(&list[0]);
        assert_eq!(switch.cases.len(), 2);
        assert_eq!(switch.cases[0].labels, [CaseLabel::Int(1), CaseLabel::Int(2)]);
        assert_eq!(list[1], return_(12, 4));
    }

    #[test]
    fn enum_switch_unwraps_the_switch_map() {
        let pool = MapConstantPool::new()
            .with_field(30, "Foo$1", "$SwitchMap$Color", "[I")
            .with_method(31, "Color", "ordinal", "()I");
        let key = Insn::new(3, 0, InsnKind::ArrayLoad {
            array: Box::new(Insn::new(0, 0, InsnKind::GetField {
                field: 30,
                object: None,
            })),
            index: Box::new(invoke(2, InvokeKind::Virtual, 31, Some(load(1, 2)), Vec::new())),
        });
        let list = structure_with(&pool, vec![
            switch(4, 1, key, 9, &[(1, 7)]),
            call(7, 2, 5),
            return_(9, 3),
        ]);
        let switch = only_switch(&list[0]);
        assert_eq!(switch.kind, SwitchKind::Enum { switch_map: 30 });
        assert_eq!(switch.key, load(1, 2));
    }

    #[test]
    fn backward_case_is_rejected() {
        let pool = MapConstantPool::new();
        let options = Options::default();
        let mut structurer = Structurer::new(&pool, &options, LocalVariableTable::new());
        let mut list = vec![call(1, 1, 5), switch(4, 1, load(3, 1), 9, &[(1, 1)]), return_(9, 2)];
        let ctx = Context::method(&list);
        assert!(structure_switches(&mut structurer, &mut list, ctx).is_err());
    }
}
