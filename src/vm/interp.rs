use std::collections::HashMap;

use tracing::trace;

use crate::error::{ShellError, ShellResult};
use crate::heap::Heap;

use super::bytecode::{Constant, FunctionDef, Program};
use super::instruction::Opcode;

const MAX_CALL_DEPTH: usize = 256;

/// A runtime value. Strings and lists are accounted against the owning
/// core's heap when created.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Int(int) => *int != 0,
            Value::Float(float) => *float != 0.0,
            Value::Str(text) => !text.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn as_number(&self) -> ShellResult<f64> {
        match self {
            Value::Int(int) => Ok(*int as f64),
            Value::Float(float) => Ok(*float),
            other => Err(ShellError::runtime(format!(
                "expected a number, found {other:?}"
            ))),
        }
    }
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(flag) => flag.to_string(),
        Value::Int(int) => int.to_string(),
        Value::Float(float) => float.to_string(),
        Value::Str(text) => text.clone(),
        Value::List(items) => {
            let parts: Vec<String> = items.iter().map(value_to_string).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

pub type BuiltinFn = fn(&Heap, &[Value]) -> ShellResult<Value>;

/// Builtin function registry, constructed once per core and shared across
/// every task the core runs.
#[derive(Debug)]
pub struct Builtins {
    table: HashMap<&'static str, BuiltinFn>,
}

impl Builtins {
    pub fn standard() -> Self {
        let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();
        table.insert("print", builtin_print);
        table.insert("println", builtin_println);
        table.insert("len", builtin_len);
        table.insert("str", builtin_str);
        table.insert("exit", builtin_exit);
        Self { table }
    }

    fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.table.get(name).copied()
    }
}

fn builtin_print(_heap: &Heap, args: &[Value]) -> ShellResult<Value> {
    let payload = args.first().map(value_to_string).unwrap_or_default();
    print!("{payload}");
    Ok(Value::Null)
}

fn builtin_println(_heap: &Heap, args: &[Value]) -> ShellResult<Value> {
    let payload = args.first().map(value_to_string).unwrap_or_default();
    println!("{payload}");
    Ok(Value::Null)
}

fn builtin_len(_heap: &Heap, args: &[Value]) -> ShellResult<Value> {
    match args.first() {
        Some(Value::Str(text)) => Ok(Value::Int(text.len() as i64)),
        Some(Value::List(items)) => Ok(Value::Int(items.len() as i64)),
        other => Err(ShellError::runtime(format!(
            "len expects a string or list, found {other:?}"
        ))),
    }
}

fn builtin_str(heap: &Heap, args: &[Value]) -> ShellResult<Value> {
    let text = args.first().map(value_to_string).unwrap_or_default();
    heap.alloc(text.len());
    Ok(Value::Str(text))
}

/// Terminates the running task with the given status.
fn builtin_exit(_heap: &Heap, args: &[Value]) -> ShellResult<Value> {
    let code = match args.first() {
        Some(Value::Int(code)) => *code as i32,
        None => 0,
        other => {
            return Err(ShellError::runtime(format!(
                "exit expects an integer status, found {other:?}"
            )))
        }
    };
    Err(ShellError::Exit(code))
}

/// Stack interpreter for one program. Created per task; borrows the
/// owning core's heap and builtin registry.
pub struct Vm<'a> {
    program: &'a Program,
    heap: &'a Heap,
    builtins: &'a Builtins,
    stack: Vec<Value>,
    depth: usize,
    trace: bool,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program, heap: &'a Heap, builtins: &'a Builtins, trace: bool) -> Self {
        Self {
            program,
            heap,
            builtins,
            stack: Vec::new(),
            depth: 0,
            trace,
        }
    }

    pub fn execute(&mut self) -> ShellResult<Value> {
        let entry = self
            .program
            .functions
            .get(self.program.entry)
            .ok_or_else(|| ShellError::runtime("invalid entry function index"))?;
        if entry.arity != 0 {
            return Err(ShellError::runtime(format!(
                "entry function '{}' expects {} arguments",
                entry.name, entry.arity
            )));
        }
        self.call_function(self.program.entry, &[])
    }

    fn call_function(&mut self, function_index: usize, args: &[Value]) -> ShellResult<Value> {
        let function = self
            .program
            .functions
            .get(function_index)
            .ok_or_else(|| ShellError::runtime("invalid function index"))?;
        if args.len() != function.arity as usize {
            return Err(ShellError::runtime(format!(
                "function '{}' expects {} arguments, received {}",
                function.name,
                function.arity,
                args.len()
            )));
        }
        if self.depth == MAX_CALL_DEPTH {
            return Err(ShellError::runtime(format!(
                "call depth limit of {MAX_CALL_DEPTH} exceeded"
            )));
        }
        self.depth += 1;
        let result = self.run_function(function.clone(), args);
        self.depth -= 1;
        result
    }

    fn run_function(&mut self, function: FunctionDef, args: &[Value]) -> ShellResult<Value> {
        let mut locals = vec![Value::Null; function.locals as usize];
        for (index, arg) in args.iter().enumerate() {
            if let Some(slot) = locals.get_mut(index) {
                *slot = arg.clone();
            }
        }

        let mut ip = 0usize;
        while ip < function.instructions.len() {
            let instruction = &function.instructions[ip];
            if self.trace {
                trace!(function = %function.name, ip, opcode = ?instruction.opcode, "step");
            }
            match instruction.opcode {
                Opcode::Nop => {}
                Opcode::LoadConst => {
                    let value = self.load_constant(instruction.operand_a as usize);
                    self.stack.push(value);
                }
                Opcode::LoadLocal => {
                    let value = locals
                        .get(instruction.operand_a as usize)
                        .cloned()
                        .unwrap_or(Value::Null);
                    self.stack.push(value);
                }
                Opcode::StoreLocal => {
                    let value = self.pop();
                    if let Some(slot) = locals.get_mut(instruction.operand_a as usize) {
                        *slot = value;
                    }
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let value = self.arithmetic(instruction.opcode, lhs, rhs)?;
                    self.stack.push(value);
                }
                Opcode::Neg => {
                    let value = self.pop();
                    self.stack.push(negate(value)?);
                }
                Opcode::Not => {
                    let value = self.pop();
                    self.stack.push(Value::Bool(!value.is_truthy()));
                }
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Jump => {
                    ip = instruction.operand_a as usize;
                    continue;
                }
                Opcode::JumpIfFalse => {
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        ip = instruction.operand_a as usize;
                        continue;
                    }
                }
                Opcode::Equal
                | Opcode::NotEqual
                | Opcode::Less
                | Opcode::LessEqual
                | Opcode::Greater
                | Opcode::GreaterEqual => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.stack.push(compare(instruction.opcode, lhs, rhs)?);
                }
                Opcode::And => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.stack
                        .push(Value::Bool(lhs.is_truthy() && rhs.is_truthy()));
                }
                Opcode::Or => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.stack
                        .push(Value::Bool(lhs.is_truthy() || rhs.is_truthy()));
                }
                Opcode::MakeList => {
                    let count = instruction.operand_a as usize;
                    if count > self.stack.len() {
                        return Err(ShellError::runtime("stack underflow while building list"));
                    }
                    let start = self.stack.len() - count;
                    let items: Vec<Value> = self.stack.drain(start..).collect();
                    self.heap
                        .alloc(items.len() * std::mem::size_of::<Value>());
                    self.stack.push(Value::List(items));
                }
                Opcode::Call => {
                    let callee = instruction.operand_a as usize;
                    let args = self.pop_args(instruction.operand_b as usize)?;
                    let result = self.call_function(callee, &args)?;
                    self.stack.push(result);
                }
                Opcode::CallBuiltin => {
                    let name_index = instruction.operand_a as usize;
                    let args = self.pop_args(instruction.operand_b as usize)?;
                    let name = match self.program.constants.get(name_index) {
                        Some(Constant::Str(name)) => name.clone(),
                        _ => {
                            return Err(ShellError::runtime(format!(
                                "builtin call expects a string constant at index {name_index}"
                            )))
                        }
                    };
                    let builtin = self.builtins.get(&name).ok_or_else(|| {
                        ShellError::runtime(format!("unknown builtin function '{name}'"))
                    })?;
                    let result = builtin(self.heap, &args)?;
                    self.stack.push(result);
                }
                Opcode::Return => {
                    return Ok(self.pop());
                }
            }
            ip += 1;
        }
        Ok(Value::Null)
    }

    fn load_constant(&self, index: usize) -> Value {
        match self.program.constants.get(index) {
            Some(Constant::Null) | None => Value::Null,
            Some(Constant::Bool(flag)) => Value::Bool(*flag),
            Some(Constant::Int(int)) => Value::Int(*int),
            Some(Constant::Float(float)) => Value::Float(*float),
            Some(Constant::Str(text)) => {
                self.heap.alloc(text.len());
                Value::Str(text.clone())
            }
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Null)
    }

    fn pop_args(&mut self, count: usize) -> ShellResult<Vec<Value>> {
        if count > self.stack.len() {
            return Err(ShellError::runtime("stack underflow in call"));
        }
        let start = self.stack.len() - count;
        Ok(self.stack.drain(start..).collect())
    }

    fn arithmetic(&self, opcode: Opcode, lhs: Value, rhs: Value) -> ShellResult<Value> {
        match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => integer_arithmetic(opcode, a, b),
            (Value::Float(a), Value::Float(b)) => float_arithmetic(opcode, a, b),
            (Value::Int(a), Value::Float(b)) => float_arithmetic(opcode, a as f64, b),
            (Value::Float(a), Value::Int(b)) => float_arithmetic(opcode, a, b as f64),
            (Value::Str(a), Value::Str(b)) if opcode == Opcode::Add => {
                let joined = format!("{a}{b}");
                self.heap.alloc(joined.len());
                Ok(Value::Str(joined))
            }
            other => Err(ShellError::runtime(format!(
                "unsupported operands for arithmetic: {other:?}"
            ))),
        }
    }
}

fn integer_arithmetic(opcode: Opcode, lhs: i64, rhs: i64) -> ShellResult<Value> {
    use Opcode::*;
    match opcode {
        Add => Ok(Value::Int(lhs.wrapping_add(rhs))),
        Sub => Ok(Value::Int(lhs.wrapping_sub(rhs))),
        Mul => Ok(Value::Int(lhs.wrapping_mul(rhs))),
        Div => {
            if rhs == 0 {
                Err(ShellError::runtime("integer division by zero"))
            } else {
                Ok(Value::Int(lhs.wrapping_div(rhs)))
            }
        }
        Mod => {
            if rhs == 0 {
                Err(ShellError::runtime("integer modulo by zero"))
            } else {
                Ok(Value::Int(lhs.wrapping_rem(rhs)))
            }
        }
        _ => Err(ShellError::runtime("unsupported integer opcode")),
    }
}

fn float_arithmetic(opcode: Opcode, lhs: f64, rhs: f64) -> ShellResult<Value> {
    use Opcode::*;
    match opcode {
        Add => Ok(Value::Float(lhs + rhs)),
        Sub => Ok(Value::Float(lhs - rhs)),
        Mul => Ok(Value::Float(lhs * rhs)),
        Div => Ok(Value::Float(lhs / rhs)),
        Mod => Ok(Value::Float(lhs % rhs)),
        _ => Err(ShellError::runtime("unsupported float opcode")),
    }
}

fn negate(value: Value) -> ShellResult<Value> {
    match value {
        Value::Int(int) => int
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ShellError::runtime("integer overflow in negation")),
        Value::Float(float) => Ok(Value::Float(-float)),
        other => Err(ShellError::runtime(format!(
            "negation not supported for {other:?}"
        ))),
    }
}

fn compare(opcode: Opcode, lhs: Value, rhs: Value) -> ShellResult<Value> {
    use Opcode::*;
    match opcode {
        Equal => Ok(Value::Bool(lhs == rhs)),
        NotEqual => Ok(Value::Bool(lhs != rhs)),
        Less | LessEqual | Greater | GreaterEqual => {
            let lhs = lhs.as_number()?;
            let rhs = rhs.as_number()?;
            let result = match opcode {
                Less => lhs < rhs,
                LessEqual => lhs <= rhs,
                Greater => lhs > rhs,
                GreaterEqual => lhs >= rhs,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        _ => Err(ShellError::runtime("unsupported comparison opcode")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::vm::assemble;

    fn run(source: &str) -> ShellResult<Value> {
        let program = assemble(source).expect("assemble");
        let heap = Heap::new(0, HeapConfig::default()).expect("heap");
        let builtins = Builtins::standard();
        let scope = heap.enter();
        let result = Vm::new(&program, &heap, &builtins, false).execute();
        drop(scope);
        result
    }

    #[test]
    fn evaluates_arithmetic() {
        let value = run(r#"
            .constants
                int 6
                int 7
            .end
            .function main 0 0
                load_const 0
                load_const 1
                mul
                return
            .end
        "#)
        .expect("run");
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn loops_with_labels() {
        // Sum 1..=5 with a countdown loop.
        let value = run(r#"
            .constants
                int 5
                int 1
                int 0
            .end
            .function main 0 2
                load_const 0
                store_local 0   ; n = 5
                load_const 2
                store_local 1   ; acc = 0
            loop:
                load_local 0
                jump_if_false done
                load_local 1
                load_local 0
                add
                store_local 1
                load_local 0
                load_const 1
                sub
                store_local 0
                jump loop
            done:
                load_local 1
                return
            .end
        "#)
        .expect("run");
        assert_eq!(value, Value::Int(15));
    }

    #[test]
    fn calls_user_functions() {
        let value = run(r#"
            .constants
                int 10
                int 32
            .end
            .function add2 2 2
                load_local 0
                load_local 1
                add
                return
            .end
            .function main 0 0
                load_const 0
                load_const 1
                call add2 2
                return
            .end
        "#)
        .expect("run");
        assert_eq!(value, Value::Int(42));
    }

    #[test]
    fn exit_builtin_carries_status() {
        let error = run(r#"
            .constants
                string "exit"
                int 3
            .end
            .function main 0 0
                load_const 1
                call_builtin 0 1
                return
            .end
        "#)
        .unwrap_err();
        assert!(matches!(error, ShellError::Exit(3)));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let error = run(r#"
            .constants
                int 1
                int 0
            .end
            .function main 0 0
                load_const 0
                load_const 1
                div
                return
            .end
        "#)
        .unwrap_err();
        assert!(matches!(error, ShellError::Runtime(_)));
    }

    #[test]
    fn string_concat_allocates_on_heap() {
        let program = assemble(
            r#"
            .constants
                string "foo"
                string "bar"
            .end
            .function main 0 0
                load_const 0
                load_const 1
                add
                return
            .end
        "#,
        )
        .expect("assemble");
        let heap = Heap::new(0, HeapConfig::default()).expect("heap");
        let builtins = Builtins::standard();
        let scope = heap.enter();
        let value = Vm::new(&program, &heap, &builtins, false)
            .execute()
            .expect("run");
        drop(scope);
        assert_eq!(value, Value::Str("foobar".into()));
        // Two constants plus the concatenation result.
        assert_eq!(heap.stats().total_allocated, 3 + 3 + 6);
    }

    #[test]
    fn unbounded_recursion_is_cut_off() {
        let error = run(r#"
            .function main 0 0
                call main 0
                return
            .end
        "#)
        .unwrap_err();
        assert!(error.to_string().contains("call depth"));
    }
}
