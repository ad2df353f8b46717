use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{ShellError, ShellResult};

use super::instruction::Instruction;

/// One loaded Cinder program: constant pool, functions and the entry
/// function index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub version: u16,
    pub constants: Vec<Constant>,
    pub functions: Vec<FunctionDef>,
    pub entry: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub arity: u16,
    pub locals: u16,
    pub instructions: Vec<Instruction>,
}

impl Program {
    pub const MAGIC: &'static [u8; 4] = b"CNDR";
    pub const VERSION: u16 = 1;

    pub fn encode<W: Write>(&self, mut writer: W) -> ShellResult<()> {
        writer.write_all(Self::MAGIC).map_err(io_err)?;
        writer
            .write_all(&Self::VERSION.to_le_bytes())
            .map_err(io_err)?;
        let entry = u64::try_from(self.entry)
            .map_err(|_| ShellError::Bytecode("entry index overflow".into()))?;
        writer.write_all(&entry.to_le_bytes()).map_err(io_err)?;

        writer
            .write_all(&(self.constants.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        for constant in &self.constants {
            encode_constant(constant, &mut writer)?;
        }

        writer
            .write_all(&(self.functions.len() as u32).to_le_bytes())
            .map_err(io_err)?;
        for function in &self.functions {
            let name_bytes = function.name.as_bytes();
            writer
                .write_all(&(name_bytes.len() as u32).to_le_bytes())
                .map_err(io_err)?;
            writer.write_all(name_bytes).map_err(io_err)?;
            writer
                .write_all(&function.arity.to_le_bytes())
                .map_err(io_err)?;
            writer
                .write_all(&function.locals.to_le_bytes())
                .map_err(io_err)?;
            writer
                .write_all(&(function.instructions.len() as u32).to_le_bytes())
                .map_err(io_err)?;
            for inst in &function.instructions {
                let encoded = bincode::serialize(inst)
                    .map_err(|err| ShellError::Bytecode(err.to_string()))?;
                writer
                    .write_all(&(encoded.len() as u32).to_le_bytes())
                    .map_err(io_err)?;
                writer.write_all(&encoded).map_err(io_err)?;
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> ShellResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn decode<R: Read>(mut reader: R) -> ShellResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if &magic != Self::MAGIC {
            return Err(ShellError::InvalidMagic);
        }

        let mut version_bytes = [0u8; 2];
        reader.read_exact(&mut version_bytes).map_err(io_err)?;
        let version = u16::from_le_bytes(version_bytes);
        if version != Self::VERSION {
            return Err(ShellError::UnsupportedVersion(version));
        }

        let mut entry_bytes = [0u8; 8];
        reader.read_exact(&mut entry_bytes).map_err(io_err)?;
        let entry = u64::from_le_bytes(entry_bytes) as usize;

        let constants = read_vec(&mut reader, decode_constant)?;

        let functions = read_vec(&mut reader, |r| {
            let name_len = read_len(r)?;
            let mut name_buf = vec![0u8; name_len];
            r.read_exact(&mut name_buf).map_err(io_err)?;
            let name = String::from_utf8(name_buf)
                .map_err(|err| ShellError::Bytecode(err.to_string()))?;

            let mut arity_bytes = [0u8; 2];
            r.read_exact(&mut arity_bytes).map_err(io_err)?;
            let arity = u16::from_le_bytes(arity_bytes);

            let mut locals_bytes = [0u8; 2];
            r.read_exact(&mut locals_bytes).map_err(io_err)?;
            let locals = u16::from_le_bytes(locals_bytes);

            let instructions = read_vec(r, |r| {
                let inst_len = read_len(r)?;
                let mut buf = vec![0u8; inst_len];
                r.read_exact(&mut buf).map_err(io_err)?;
                bincode::deserialize(&buf).map_err(|err| ShellError::Bytecode(err.to_string()))
            })?;

            Ok(FunctionDef {
                name,
                arity,
                locals,
                instructions,
            })
        })?;

        if entry >= functions.len() {
            return Err(ShellError::Bytecode(format!(
                "entry index {entry} out of range ({} functions)",
                functions.len()
            )));
        }

        Ok(Program {
            version,
            constants,
            functions,
            entry,
        })
    }
}

fn io_err(err: std::io::Error) -> ShellError {
    ShellError::Bytecode(err.to_string())
}

fn read_u32<R: Read>(reader: &mut R) -> ShellResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(io_err)?;
    Ok(u32::from_le_bytes(buf))
}

// Upper bound on any length prefix, checked before allocating for it.
const MAX_SEGMENT_LEN: usize = 1 << 24;

fn read_len<R: Read>(reader: &mut R) -> ShellResult<usize> {
    let len = read_u32(reader)? as usize;
    if len > MAX_SEGMENT_LEN {
        return Err(ShellError::Bytecode(format!(
            "length prefix {len} exceeds the {MAX_SEGMENT_LEN} byte limit"
        )));
    }
    Ok(len)
}

fn read_vec<R: Read, T, F>(reader: &mut R, mut f: F) -> ShellResult<Vec<T>>
where
    F: FnMut(&mut R) -> ShellResult<T>,
{
    let len = read_len(reader)?;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(f(reader)?);
    }
    Ok(values)
}

fn encode_constant<W: Write>(constant: &Constant, writer: &mut W) -> ShellResult<()> {
    match constant {
        Constant::Null => writer.write_all(&[0]).map_err(io_err)?,
        Constant::Bool(value) => {
            writer.write_all(&[1]).map_err(io_err)?;
            writer.write_all(&[*value as u8]).map_err(io_err)?;
        }
        Constant::Int(value) => {
            writer.write_all(&[2]).map_err(io_err)?;
            writer.write_all(&value.to_le_bytes()).map_err(io_err)?;
        }
        Constant::Float(value) => {
            writer.write_all(&[3]).map_err(io_err)?;
            writer.write_all(&value.to_le_bytes()).map_err(io_err)?;
        }
        Constant::Str(value) => {
            writer.write_all(&[4]).map_err(io_err)?;
            let bytes = value.as_bytes();
            writer
                .write_all(&(bytes.len() as u32).to_le_bytes())
                .map_err(io_err)?;
            writer.write_all(bytes).map_err(io_err)?;
        }
    }
    Ok(())
}

fn decode_constant<R: Read>(reader: &mut R) -> ShellResult<Constant> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag).map_err(io_err)?;
    match tag[0] {
        0 => Ok(Constant::Null),
        1 => {
            let mut buf = [0u8; 1];
            reader.read_exact(&mut buf).map_err(io_err)?;
            Ok(Constant::Bool(buf[0] != 0))
        }
        2 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf).map_err(io_err)?;
            Ok(Constant::Int(i64::from_le_bytes(buf)))
        }
        3 => {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf).map_err(io_err)?;
            Ok(Constant::Float(f64::from_le_bytes(buf)))
        }
        4 => {
            let len = read_len(reader)?;
            let mut buf = vec![0u8; len];
            reader.read_exact(&mut buf).map_err(io_err)?;
            let string =
                String::from_utf8(buf).map_err(|err| ShellError::Bytecode(err.to_string()))?;
            Ok(Constant::Str(string))
        }
        other => Err(ShellError::Bytecode(format!("unknown constant tag {other}"))),
    }
}
