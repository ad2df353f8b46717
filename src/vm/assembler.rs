//! Textual Cinder assembly.
//!
//! A program is a `.constants` section followed by one or more
//! `.function <name> <arity> <locals>` blocks, each terminated by `.end`.
//! Labels (`name:`) may precede instructions and are resolved to
//! instruction offsets within the enclosing function. `;` and `#` start a
//! comment. The entry function is `main` unless `.entry <name>` says
//! otherwise.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{ShellError, ShellResult};

use super::bytecode::{Constant, FunctionDef, Program};
use super::instruction::{Instruction, Opcode};

static MNEMONICS: Lazy<HashMap<&'static str, Opcode>> = Lazy::new(|| {
    use Opcode::*;
    HashMap::from([
        ("nop", Nop),
        ("load_const", LoadConst),
        ("load_local", LoadLocal),
        ("store_local", StoreLocal),
        ("add", Add),
        ("sub", Sub),
        ("mul", Mul),
        ("div", Div),
        ("mod", Mod),
        ("neg", Neg),
        ("not", Not),
        ("pop", Pop),
        ("jump", Jump),
        ("jump_if_false", JumpIfFalse),
        ("eq", Equal),
        ("ne", NotEqual),
        ("lt", Less),
        ("le", LessEqual),
        ("gt", Greater),
        ("ge", GreaterEqual),
        ("and", And),
        ("or", Or),
        ("make_list", MakeList),
        ("call", Call),
        ("call_builtin", CallBuiltin),
        ("return", Return),
    ])
});

#[derive(Debug)]
enum Line {
    Label(String, usize),
    Instruction(String, Vec<String>, usize),
}

#[derive(Debug)]
struct FunctionBuilder {
    name: String,
    arity: u16,
    locals: u16,
    body: Vec<Line>,
}

fn err(line: usize, message: impl Into<String>) -> ShellError {
    ShellError::Assembly {
        line,
        message: message.into(),
    }
}

/// Assemble Cinder textual assembly into a program.
pub fn assemble(source: &str) -> ShellResult<Program> {
    let mut constants = Vec::new();
    let mut builders: Vec<FunctionBuilder> = Vec::new();
    let mut entry_name = "main".to_string();
    let mut in_constants = false;
    let mut current: Option<FunctionBuilder> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(builder) = current.as_mut() {
            if line == ".end" {
                if let Some(finished) = current.take() {
                    builders.push(finished);
                }
                continue;
            }
            if let Some(label) = line.strip_suffix(':') {
                builder.body.push(Line::Label(label.trim().into(), line_no));
            } else {
                let mut parts = line.split_whitespace();
                let mnemonic = parts
                    .next()
                    .ok_or_else(|| err(line_no, "missing opcode"))?
                    .to_string();
                let operands = parts.map(str::to_string).collect();
                builder
                    .body
                    .push(Line::Instruction(mnemonic, operands, line_no));
            }
            continue;
        }

        if in_constants {
            if line == ".end" {
                in_constants = false;
                continue;
            }
            constants.push(parse_constant(&line, line_no)?);
            continue;
        }

        if line == ".constants" {
            in_constants = true;
            continue;
        }

        if let Some(rest) = line.strip_prefix(".function") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(err(line_no, "expected .function <name> <arity> <locals>"));
            }
            let arity = parse_u16(parts[1], line_no)?;
            let locals = parse_u16(parts[2], line_no)?;
            if locals < arity {
                return Err(err(line_no, "locals count must cover the arguments"));
            }
            current = Some(FunctionBuilder {
                name: parts[0].into(),
                arity,
                locals,
                body: Vec::new(),
            });
            continue;
        }

        if let Some(rest) = line.strip_prefix(".entry") {
            entry_name = rest.trim().to_string();
            if entry_name.is_empty() {
                return Err(err(line_no, "expected .entry <name>"));
            }
            continue;
        }

        return Err(err(line_no, format!("unexpected directive {line}")));
    }

    if in_constants {
        return Err(err(0, "unterminated .constants block"));
    }
    if current.is_some() {
        return Err(err(0, "unterminated .function block"));
    }
    if builders.is_empty() {
        return Err(err(0, "program defines no functions"));
    }

    let mut function_map = HashMap::new();
    for (index, builder) in builders.iter().enumerate() {
        if function_map
            .insert(builder.name.clone(), index as u32)
            .is_some()
        {
            return Err(err(0, format!("duplicate function {}", builder.name)));
        }
    }

    let entry = *function_map
        .get(&entry_name)
        .ok_or_else(|| err(0, format!("entry function {entry_name} is not defined")))?
        as usize;

    let mut functions = Vec::with_capacity(builders.len());
    for builder in &builders {
        functions.push(finalize_function(builder, &function_map)?);
    }

    Ok(Program {
        version: Program::VERSION,
        constants,
        functions,
        entry,
    })
}

fn finalize_function(
    builder: &FunctionBuilder,
    function_map: &HashMap<String, u32>,
) -> ShellResult<FunctionDef> {
    let mut label_map = HashMap::new();
    let mut offset = 0u32;
    for entry in &builder.body {
        match entry {
            Line::Label(name, line) => {
                if label_map.insert(name.clone(), offset).is_some() {
                    return Err(err(*line, format!("duplicate label {name}")));
                }
            }
            Line::Instruction(..) => offset += 1,
        }
    }

    let mut instructions = Vec::new();
    for entry in &builder.body {
        let Line::Instruction(mnemonic, operands, line) = entry else {
            continue;
        };
        let opcode = *MNEMONICS
            .get(mnemonic.as_str())
            .ok_or_else(|| err(*line, format!("unknown opcode {mnemonic}")))?;
        let expected = operand_count(opcode);
        if operands.len() != expected {
            return Err(err(
                *line,
                format!(
                    "{mnemonic} expects {expected} operand(s), found {}",
                    operands.len()
                ),
            ));
        }
        let instruction = match opcode {
            Opcode::LoadConst | Opcode::LoadLocal | Opcode::StoreLocal | Opcode::MakeList => {
                Instruction::new(opcode, parse_u32(&operands[0], *line)?, 0)
            }
            Opcode::Jump | Opcode::JumpIfFalse => {
                let target = *label_map
                    .get(operands[0].as_str())
                    .ok_or_else(|| err(*line, format!("unknown label {}", operands[0])))?;
                Instruction::new(opcode, target, 0)
            }
            Opcode::Call => {
                let target = *function_map
                    .get(operands[0].as_str())
                    .ok_or_else(|| err(*line, format!("unknown function {}", operands[0])))?;
                Instruction::new(opcode, target, parse_u32(&operands[1], *line)?)
            }
            Opcode::CallBuiltin => Instruction::new(
                opcode,
                parse_u32(&operands[0], *line)?,
                parse_u32(&operands[1], *line)?,
            ),
            _ => Instruction::simple(opcode),
        };
        instructions.push(instruction);
    }

    Ok(FunctionDef {
        name: builder.name.clone(),
        arity: builder.arity,
        locals: builder.locals,
        instructions,
    })
}

fn operand_count(opcode: Opcode) -> usize {
    use Opcode::*;
    match opcode {
        LoadConst | LoadLocal | StoreLocal | MakeList | Jump | JumpIfFalse => 1,
        Call | CallBuiltin => 2,
        _ => 0,
    }
}

fn parse_constant(line: &str, line_no: usize) -> ShellResult<Constant> {
    let mut parts = line.split_whitespace();
    let kind = parts
        .next()
        .ok_or_else(|| err(line_no, "invalid constant declaration"))?;
    match kind {
        "string" => {
            let rest = parts.collect::<Vec<_>>().join(" ");
            Ok(Constant::Str(parse_string_literal(&rest, line_no)?))
        }
        "int" => {
            let value = single_operand(&mut parts, line_no)?;
            value
                .parse::<i64>()
                .map(Constant::Int)
                .map_err(|_| err(line_no, format!("invalid integer literal {value}")))
        }
        "float" => {
            let value = single_operand(&mut parts, line_no)?;
            value
                .parse::<f64>()
                .map(Constant::Float)
                .map_err(|_| err(line_no, format!("invalid float literal {value}")))
        }
        "bool" => {
            let value = single_operand(&mut parts, line_no)?;
            match value {
                "true" => Ok(Constant::Bool(true)),
                "false" => Ok(Constant::Bool(false)),
                other => Err(err(line_no, format!("invalid bool literal {other}"))),
            }
        }
        "null" => {
            if parts.next().is_some() {
                return Err(err(line_no, "unexpected tokens after null constant"));
            }
            Ok(Constant::Null)
        }
        other => Err(err(line_no, format!("unknown constant type {other}"))),
    }
}

fn single_operand<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    line_no: usize,
) -> ShellResult<&'a str> {
    let value = parts
        .next()
        .ok_or_else(|| err(line_no, "missing constant value"))?;
    if parts.next().is_some() {
        return Err(err(line_no, "unexpected tokens after constant value"));
    }
    Ok(value)
}

fn parse_string_literal(value: &str, line_no: usize) -> ShellResult<String> {
    let trimmed = value.trim();
    if trimmed.len() < 2 || !trimmed.starts_with('"') || !trimmed.ends_with('"') {
        return Err(err(line_no, "string constants must be double-quoted"));
    }
    let inner = &trimmed[1..trimmed.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(err(
                    line_no,
                    format!("unknown escape sequence \\{}", other.unwrap_or_default()),
                ))
            }
        }
    }
    Ok(out)
}

fn parse_u16(value: &str, line_no: usize) -> ShellResult<u16> {
    value
        .parse::<u16>()
        .map_err(|_| err(line_no, format!("invalid number {value}")))
}

fn parse_u32(value: &str, line_no: usize) -> ShellResult<u32> {
    value
        .parse::<u32>()
        .map_err(|_| err(line_no, format!("invalid number {value}")))
}

fn strip_comment(line: &str) -> &str {
    match line.find([';', '#']) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_minimal_program() {
        let program = assemble(
            r#"
            .constants
                int 41
                int 1
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
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.entry, 0);
        assert_eq!(program.functions[0].instructions.len(), 4);
    }

    #[test]
    fn resolves_labels_and_calls() {
        let program = assemble(
            r#"
            .constants
                int 3
                int 1
            .end
            .function dec 1 1   ; n -> n - 1
                load_local 0
                load_const 1
                sub
                return
            .end
            .function main 0 1
                load_const 0
                store_local 0
            loop:
                load_local 0
                jump_if_false done
                load_local 0
                call dec 1
                store_local 0
                jump loop
            done:
                load_local 0
                return
            .end
            "#,
        )
        .expect("assemble");
        assert_eq!(program.entry, 1);
        let main = &program.functions[1];
        // jump_if_false targets the instruction after the loop body
        let jump = main
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::JumpIfFalse)
            .expect("conditional jump");
        assert_eq!(jump.operand_a, 8);
        let call = main
            .instructions
            .iter()
            .find(|i| i.opcode == Opcode::Call)
            .expect("call");
        assert_eq!(call.operand_a, 0);
        assert_eq!(call.operand_b, 1);
    }

    #[test]
    fn string_constants_support_escapes() {
        let program = assemble(
            r#"
            .constants
                string "line\n\"quoted\""
            .end
            .function main 0 0
                return
            .end
            "#,
        )
        .expect("assemble");
        assert_eq!(
            program.constants[0],
            Constant::Str("line\n\"quoted\"".into())
        );
    }

    #[test]
    fn missing_entry_is_an_error() {
        let source = r#"
            .function helper 0 0
                return
            .end
        "#;
        assert!(assemble(source).is_err());
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let source = r#"
            .function main 0 0
                frobnicate
            .end
        "#;
        let error = assemble(source).unwrap_err();
        assert!(error.to_string().contains("frobnicate"));
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let source = r#"
            .function main 0 0
            here:
            here:
                return
            .end
        "#;
        assert!(assemble(source).is_err());
    }
}
