use crate::bytecode::{Bytecode, Instr, Opcode};
use crate::lang::Value;
use crate::runtime::{RuntimeError, Vm};
use indexmap::IndexMap;
use tracing::debug;

// =============================================================================
// Peephole optimizer - constant folding via self-execution
// =============================================================================

/// Fold constant expressions in a compiled unit.
///
/// The pass never re-implements arithmetic: each foldable sequence is
/// re-executed on a fresh embedded [`Vm`] over a synthesized unit sharing
/// the constant pool, so folding semantics cannot drift from runtime
/// semantics. Detected shapes, always adjacent modulo already-inserted
/// NOPs:
///
/// - load + same-kind conversion (`I32LOAD 1; I2F` → `F64LOAD 1`)
/// - load + load + binary operator, both loads the same opcode
///   (`I32LOAD 1; I32LOAD 1; I32ADD` → `I32LOAD 2`)
///
/// A `POP` or any other instruction between producer and consumer blocks
/// the fold; this is a single-pass peephole, not data-flow analysis.
///
/// After folding, the constant pool is compacted to the still-referenced
/// string literals, surviving `STRLOAD`s are rewritten, and NOPs are
/// deleted. Idempotent: optimizing already-optimized code is a no-op.
pub fn optimize(bc: &Bytecode) -> Result<Bytecode, RuntimeError> {
    let mut instrs = bc.instrs();

    // Pre-index every string literal to its pool offset so folded strings
    // dedup against already-stored runs. The working pool keeps the old
    // content (live offsets stay valid) and grows with fold results.
    let mut pool = bc.consts.clone();
    let mut literals: IndexMap<Vec<u8>, (u64, u64)> = IndexMap::new();
    for instr in &instrs {
        if instr.op == Opcode::StrLoad {
            if let Some(bytes) = bc.const_slice(instr.operands[0], instr.operands[1]) {
                literals
                    .entry(bytes.to_vec())
                    .or_insert((instr.operands[0], instr.operands[1]));
            }
        }
    }

    let mut folds = 0usize;
    for i in 0..instrs.len() {
        // Producer/consumer pair: a load feeding a conversion of its kind.
        if let Some(source) = instrs[i].op.cast_source() {
            let Some(j) = prev_non_nop(&instrs, i) else {
                continue;
            };
            if instrs[j].op.load_kind() == Some(source) {
                let value = run_fold(&[j, i], &instrs, &pool)?;
                if let Some(folded) = load_for(&value, &mut pool, &mut literals) {
                    instrs[j] = nop();
                    instrs[i] = folded;
                    folds += 1;
                }
            }
            continue;
        }

        // Producer/producer/operator triple: two loads of the same opcode
        // feeding a binary operator.
        if instrs[i].op.is_binary() {
            let Some(j) = prev_non_nop(&instrs, i) else {
                continue;
            };
            let Some(k) = prev_non_nop(&instrs, j) else {
                continue;
            };
            if instrs[j].op.load_kind().is_some() && instrs[j].op == instrs[k].op {
                let value = run_fold(&[k, j, i], &instrs, &pool)?;
                if let Some(folded) = load_for(&value, &mut pool, &mut literals) {
                    instrs[k] = nop();
                    instrs[j] = nop();
                    instrs[i] = folded;
                    folds += 1;
                }
            }
        }
    }

    // Compact the pool to the literals still referenced, rewriting each
    // surviving STRLOAD. Insertion order of the working set decides the
    // new layout; callers must not depend on specific offsets.
    let mut compacted: Vec<u8> = Vec::new();
    let mut placed: IndexMap<Vec<u8>, (u64, u64)> = IndexMap::new();
    for instr in instrs.iter_mut() {
        if instr.op != Opcode::StrLoad {
            continue;
        }
        let start = instr.operands[0] as usize;
        let len = instr.operands[1] as usize;
        let bytes = pool
            .get(start..start + len)
            .ok_or_else(|| {
                RuntimeError::new(format!(
                    "constant pool access ({}, {}) out of range while compacting",
                    start, len
                ))
            })?
            .to_vec();
        let entry = *placed.entry(bytes.clone()).or_insert_with(|| {
            let offset = compacted.len() as u64;
            compacted.extend_from_slice(&bytes);
            compacted.push(0);
            (offset, len as u64)
        });
        instr.operands = vec![entry.0, entry.1];
    }

    // Delete NOPs back to front so removal does not shift indices that are
    // still to be visited.
    for i in (0..instrs.len()).rev() {
        if instrs[i].op == Opcode::Nop {
            instrs.remove(i);
        }
    }

    let mut out = Bytecode::new();
    out.consts = compacted;
    for instr in &instrs {
        out.emit(instr.op, &instr.operands);
    }

    if folds > 0 {
        debug!(
            folds,
            code_bytes = out.code.len(),
            const_bytes = out.consts.len(),
            "constant folding finished"
        );
    }
    Ok(out)
}

fn nop() -> Instr {
    Instr {
        offset: 0,
        op: Opcode::Nop,
        operands: Vec::new(),
    }
}

/// Nearest preceding non-NOP instruction.
fn prev_non_nop(instrs: &[Instr], from: usize) -> Option<usize> {
    instrs[..from]
        .iter()
        .rposition(|instr| instr.op != Opcode::Nop)
}

/// Execute a synthesized sub-unit on a private interpreter and pop the
/// folded value. Errors abort the whole optimization.
fn run_fold(picks: &[usize], instrs: &[Instr], pool: &[u8]) -> Result<Value, RuntimeError> {
    let mut unit = Bytecode::new();
    unit.consts = pool.to_vec();
    for &ix in picks {
        unit.emit(instrs[ix].op, &instrs[ix].operands);
    }

    let mut vm = Vm::new();
    vm.execute(&unit)?;
    vm.pop_result()
        .ok_or_else(|| RuntimeError::new("constant fold produced no value"))
}

/// Direct load instruction for a folded value, interning new strings into
/// the working pool. `None` for values with no load encoding.
fn load_for(
    value: &Value,
    pool: &mut Vec<u8>,
    literals: &mut IndexMap<Vec<u8>, (u64, u64)>,
) -> Option<Instr> {
    let (op, operands) = match value {
        Value::Int32(n) => (Opcode::I32Load, vec![*n as u32 as u64]),
        Value::Float64(n) => (Opcode::F64Load, vec![n.to_bits()]),
        Value::Bool(b) => (Opcode::BoolLoad, vec![*b as u64]),
        Value::Str(s) => {
            let entry = *literals.entry(s.as_bytes().to_vec()).or_insert_with(|| {
                let offset = pool.len() as u64;
                pool.extend_from_slice(s.as_bytes());
                pool.push(0);
                (offset, s.len() as u64)
            });
            (Opcode::StrLoad, vec![entry.0, entry.1])
        }
        _ => return None,
    };
    Some(Instr {
        offset: 0,
        op,
        operands,
    })
}
