use crate::bytecode::{Bytecode, Opcode};
use crate::lang::value::fmt_float;
use crate::lang::{Kind, Object, Value};
use crate::runtime::runtime_error::{
    RuntimeError, const_out_of_range, kind_mismatch, slot_out_of_range, stack_underflow,
    unknown_opcode,
};

// =============================================================================
// VM - tagged stack machine with free-list heap
// =============================================================================

/// A tagged stack slot: either an inline scalar payload or a heap index.
///
/// A `Ref` mark owns its heap slot exclusively; popping the mark returns
/// the slot to the free list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mark {
    Void,
    Bool(bool),
    Int32(i32),
    Float64(f64),
    Ref { kind: Kind, slot: usize },
}

impl Mark {
    pub fn kind(self) -> Kind {
        match self {
            Mark::Void => Kind::Void,
            Mark::Bool(_) => Kind::Bool,
            Mark::Int32(_) => Kind::Int32,
            Mark::Float64(_) => Kind::Float64,
            Mark::Ref { kind, .. } => kind,
        }
    }
}

/// Append-only value store with a free-index list for reuse.
///
/// Releasing a slot only marks its index reusable; the cell's value stays
/// in place until the next allocation overwrites it. This is a free list,
/// not a collector: nothing traces reachability.
#[derive(Debug, Default)]
struct Heap {
    cells: Vec<Value>,
    free: Vec<usize>,
}

impl Heap {
    fn alloc(&mut self, value: Value) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.cells[slot] = value;
                slot
            }
            None => {
                self.cells.push(value);
                self.cells.len() - 1
            }
        }
    }

    fn get(&self, slot: usize) -> Option<&Value> {
        self.cells.get(slot)
    }

    fn get_mut(&mut self, slot: usize) -> Option<&mut Value> {
        self.cells.get_mut(slot)
    }

    fn release(&mut self, slot: usize) {
        self.free.push(slot);
    }
}

/// One activation record over one bytecode unit. Only a single frame is
/// live in the current feature set; the stack anticipates call/return.
#[derive(Debug, Clone, Copy)]
struct Frame {
    ip: usize,
    #[allow(dead_code)]
    bp: usize,
}

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_steps: Option<usize>,
    pub max_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_steps: None,
            max_stack: 10_000,
        }
    }
}

pub struct Vm {
    stack: Vec<Mark>,
    heap: Heap,
    frames: Vec<Frame>,

    /// Variable slots. Plain values owned by the VM: `SSTORE` materializes
    /// the popped value here and `SLOAD` pushes a copy, so no heap index is
    /// ever aliased between a slot and a stack mark.
    slots: Vec<Value>,

    /// Prototype parent of every object created by `OBJLOAD`.
    root: Object,

    /// Value taken by the most recent `POP` instruction. Operand pops
    /// inside opcode handlers do not touch this; it is how a host reads
    /// the result of a stack-balanced program.
    last_popped: Option<Value>,

    config: VmConfig,
    steps: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Vm {
            stack: Vec::new(),
            heap: Heap::default(),
            frames: Vec::new(),
            slots: Vec::new(),
            root: Object::new(),
            last_popped: None,
            config,
            steps: 0,
        }
    }

    #[allow(dead_code)]
    pub fn root_mut(&mut self) -> &mut Object {
        &mut self.root
    }

    #[allow(dead_code)]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Peek the stack top as a value, without popping or releasing.
    #[allow(dead_code)]
    pub fn top(&self) -> Option<Value> {
        let mark = *self.stack.last()?;
        self.read(mark).ok()
    }

    /// Pop the stack top as a value, releasing its heap slot.
    pub fn pop_result(&mut self) -> Option<Value> {
        if self.stack.is_empty() {
            return None;
        }
        self.pop_value().ok()
    }

    /// Value taken by the most recent `POP` instruction.
    pub fn last_popped(&self) -> Option<&Value> {
        self.last_popped.as_ref()
    }

    /// Execute a unit to completion. The evaluation stack, heap, and slots
    /// persist across calls so a REPL host can keep bindings alive.
    pub fn execute(&mut self, bc: &Bytecode) -> Result<(), RuntimeError> {
        self.steps = 0;
        self.frames.push(Frame {
            ip: 0,
            bp: self.stack.len(),
        });
        let result = self.run(bc);
        self.frames.clear();
        result
    }

    fn run(&mut self, bc: &Bytecode) -> Result<(), RuntimeError> {
        while let Some(frame) = self.frames.last() {
            let ip = frame.ip;
            let Some(instr) = bc.fetch(ip) else {
                if ip < bc.code.len() {
                    return Err(unknown_opcode(bc.code[ip], ip));
                }
                // Zero-width fetch at end of stream: the frame (and, as the
                // outermost, execution) terminates successfully.
                self.frames.pop();
                continue;
            };

            self.check_limits()?;
            if let Some(frame) = self.frames.last_mut() {
                frame.ip += instr.width();
            }
            self.dispatch(instr.op, &instr.operands, bc)?;
        }
        Ok(())
    }

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeError::new(format!(
                    "execution step limit exceeded ({})",
                    max
                )));
            }
        }
        if self.stack.len() > self.config.max_stack {
            return Err(RuntimeError::new(format!(
                "stack size limit exceeded ({})",
                self.config.max_stack
            )));
        }
        Ok(())
    }

    fn dispatch(&mut self, op: Opcode, operands: &[u64], bc: &Bytecode) -> Result<(), RuntimeError> {
        match op {
            Opcode::Nop => {}

            Opcode::Pop => {
                let value = self.pop_value()?;
                self.last_popped = Some(value);
            }

            // Loads
            Opcode::I32Load => self.stack.push(Mark::Int32(operands[0] as u32 as i32)),
            Opcode::F64Load => self.stack.push(Mark::Float64(f64::from_bits(operands[0]))),
            Opcode::BoolLoad => self.stack.push(Mark::Bool(operands[0] != 0)),
            Opcode::StrLoad => {
                let (offset, len) = (operands[0], operands[1]);
                let bytes = bc
                    .const_slice(offset, len)
                    .ok_or_else(|| const_out_of_range(offset, len, bc.consts.len()))?;
                let s = String::from_utf8_lossy(bytes).into_owned();
                self.push_value(Value::Str(s));
            }
            Opcode::NullLoad => self.push_value(Value::Null),
            Opcode::UndefLoad => self.stack.push(Mark::Void),

            // int32 arithmetic; right operand is popped first.
            Opcode::I32Add => {
                let b = self.pop_i32()?;
                let a = self.pop_i32()?;
                self.stack.push(Mark::Int32(a.wrapping_add(b)));
            }
            Opcode::I32Sub => {
                let b = self.pop_i32()?;
                let a = self.pop_i32()?;
                self.stack.push(Mark::Int32(a.wrapping_sub(b)));
            }
            Opcode::I32Mul => {
                let b = self.pop_i32()?;
                let a = self.pop_i32()?;
                self.stack.push(Mark::Int32(a.wrapping_mul(b)));
            }

            // float64 arithmetic
            Opcode::F64Add => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.stack.push(Mark::Float64(a + b));
            }
            Opcode::F64Sub => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.stack.push(Mark::Float64(a - b));
            }
            Opcode::F64Mul => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.stack.push(Mark::Float64(a * b));
            }
            Opcode::F64Div => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.stack.push(Mark::Float64(a / b));
            }
            Opcode::F64Rem => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.stack.push(Mark::Float64(a % b));
            }

            Opcode::StrAdd => {
                let b = self.pop_str()?;
                let mut a = self.pop_str()?;
                a.push_str(&b);
                self.push_value(Value::Str(a));
            }

            // Conversions. Parse failures degrade to NaN / 0; they are
            // never runtime errors.
            Opcode::B2I => {
                let b = self.pop_bool()?;
                self.stack.push(Mark::Int32(b as i32));
            }
            Opcode::I2F => {
                let n = self.pop_i32()?;
                self.stack.push(Mark::Float64(n as f64));
            }
            Opcode::I2S => {
                let n = self.pop_i32()?;
                self.push_value(Value::Str(n.to_string()));
            }
            Opcode::F2I => {
                let n = self.pop_f64()?;
                self.stack.push(Mark::Int32(n as i32));
            }
            Opcode::F2S => {
                let n = self.pop_f64()?;
                self.push_value(Value::Str(fmt_float(n)));
            }
            Opcode::S2I => {
                let s = self.pop_str()?;
                self.stack
                    .push(Mark::Int32(s.trim().parse::<i32>().unwrap_or(0)));
            }
            Opcode::S2F => {
                let s = self.pop_str()?;
                self.stack
                    .push(Mark::Float64(s.trim().parse::<f64>().unwrap_or(f64::NAN)));
            }

            // Variable slots
            Opcode::SLoad => {
                let slot = operands[0] as usize;
                let value = self
                    .slots
                    .get(slot)
                    .cloned()
                    .ok_or_else(|| slot_out_of_range(slot, self.slots.len()))?;
                self.push_value(value);
            }
            Opcode::SStore => {
                let slot = operands[0] as usize;
                let value = self.pop_value()?;
                if slot >= self.slots.len() {
                    self.slots.resize(slot + 1, Value::Void);
                }
                self.slots[slot] = value;
            }

            // Objects
            Opcode::ObjLoad => {
                let object = Object::with_parent(self.root.clone());
                self.push_value(Value::Object(object));
            }
            Opcode::GetProp => {
                let key = self.pop_value()?;
                let object = match self.pop_value()? {
                    Value::Object(object) => object,
                    Value::Null => {
                        return Err(RuntimeError::new("property access on null"));
                    }
                    other => return Err(kind_mismatch("object", other.kind())),
                };
                let value = object.get(&key).cloned().unwrap_or(Value::Void);
                self.push_value(value);
            }
            Opcode::SetProp => {
                let value = self.pop_value()?;
                let key = self.pop_value()?;
                let Some(Mark::Ref {
                    kind: Kind::Object,
                    slot,
                }) = self.stack.last().copied()
                else {
                    let kind = self.stack.last().map(|m| m.kind()).unwrap_or(Kind::Void);
                    return Err(kind_mismatch("object", kind));
                };
                match self.heap.get_mut(slot) {
                    Some(Value::Object(object)) => object.set(key, value),
                    _ => return Err(kind_mismatch("object", Kind::Object)),
                }
            }
        }

        Ok(())
    }

    // Stack discipline

    fn push_value(&mut self, value: Value) {
        let mark = match value {
            Value::Void => Mark::Void,
            Value::Bool(b) => Mark::Bool(b),
            Value::Int32(n) => Mark::Int32(n),
            Value::Float64(n) => Mark::Float64(n),
            reference => {
                let kind = reference.kind();
                let slot = self.heap.alloc(reference);
                Mark::Ref { kind, slot }
            }
        };
        self.stack.push(mark);
    }

    /// Pop a mark; a reference mark's heap slot goes back to the free list.
    fn pop(&mut self) -> Result<Mark, RuntimeError> {
        let mark = self.stack.pop().ok_or_else(stack_underflow)?;
        if let Mark::Ref { slot, .. } = mark {
            self.heap.release(slot);
        }
        Ok(mark)
    }

    fn read(&self, mark: Mark) -> Result<Value, RuntimeError> {
        match mark {
            Mark::Void => Ok(Value::Void),
            Mark::Bool(b) => Ok(Value::Bool(b)),
            Mark::Int32(n) => Ok(Value::Int32(n)),
            Mark::Float64(n) => Ok(Value::Float64(n)),
            Mark::Ref { slot, .. } => self
                .heap
                .get(slot)
                .cloned()
                .ok_or_else(|| RuntimeError::new(format!("dangling heap slot {}", slot))),
        }
    }

    fn pop_value(&mut self) -> Result<Value, RuntimeError> {
        // Release-then-read is safe: release only marks the index
        // reusable, and nothing allocates before the read.
        let mark = self.pop()?;
        self.read(mark)
    }

    fn pop_i32(&mut self) -> Result<i32, RuntimeError> {
        match self.pop()? {
            Mark::Int32(n) => Ok(n),
            other => Err(kind_mismatch("int32", other.kind())),
        }
    }

    fn pop_f64(&mut self) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Mark::Float64(n) => Ok(n),
            other => Err(kind_mismatch("float64", other.kind())),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Mark::Bool(b) => Ok(b),
            other => Err(kind_mismatch("bool", other.kind())),
        }
    }

    fn pop_str(&mut self) -> Result<String, RuntimeError> {
        match self.pop_value()? {
            Value::Str(s) => Ok(s),
            other => Err(kind_mismatch("string", other.kind())),
        }
    }
}
