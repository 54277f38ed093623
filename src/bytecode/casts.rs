use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::Opcode;
use crate::lang::Kind;
use std::collections::VecDeque;

// =============================================================================
// Cast lattice - kind-to-kind conversion sequences
// =============================================================================

/// Direct conversion edges the instruction set provides natively.
///
/// Note the asymmetry: bool→int32 is one instruction but bool→float64 has
/// no direct edge and must go through int32. That hole is intentional and
/// the search below fills it.
fn direct(from: Kind, to: Kind) -> Option<&'static [Opcode]> {
    use Kind::*;
    let seq: &'static [Opcode] = match (from, to) {
        (Bool, Int32) => &[Opcode::B2I],
        (Int32, Float64) => &[Opcode::I2F],
        (Int32, Str) => &[Opcode::I2S],
        (Float64, Int32) => &[Opcode::F2I],
        (Float64, Str) => &[Opcode::F2S],
        (Str, Int32) => &[Opcode::S2I],
        (Str, Float64) => &[Opcode::S2F],
        _ => return None,
    };
    Some(seq)
}

/// Find an instruction sequence converting `from` to `to`.
///
/// Identity casts are free and short-circuit the search. A missing direct
/// edge falls back to a breadth-first search over the kind graph,
/// concatenating edge sequences along the first path found. The graph has
/// at most six nodes, so the search is trivially bounded. When several
/// shortest paths exist the one found first wins; callers must not depend
/// on a particular choice.
pub fn cast(from: Kind, to: Kind) -> Result<Vec<Opcode>, CompileError> {
    if from == to {
        return Ok(Vec::new());
    }
    if let Some(seq) = direct(from, to) {
        return Ok(seq.to_vec());
    }

    let mut visited = vec![from];
    let mut queue: VecDeque<(Kind, Vec<Opcode>)> = VecDeque::new();
    queue.push_back((from, Vec::new()));

    while let Some((at, seq)) = queue.pop_front() {
        for next in Kind::CASTABLE {
            let Some(edge) = direct(at, next) else {
                continue;
            };
            if visited.contains(&next) {
                continue;
            }
            let mut path = seq.clone();
            path.extend_from_slice(edge);
            if next == to {
                return Ok(path);
            }
            visited.push(next);
            queue.push_back((next, path));
        }
    }

    Err(CompileError::no_cast_path(from, to))
}
