//! Script expressions: a flat token stream with infix operators, read
//! straight out of the program bytes.

use gob_formats::ByteReader;
use log::warn;
use rand::Rng;
use rand_pcg::Pcg32;

use crate::error::{EngineError, Result};
use crate::variables::Variables;

pub mod token {
    pub const NEG: u8 = 1;
    pub const ADD: u8 = 2;
    pub const SUB: u8 = 3;
    pub const BITOR: u8 = 4;
    pub const MUL: u8 = 5;
    pub const DIV: u8 = 6;
    pub const MOD: u8 = 7;
    pub const BITAND: u8 = 8;
    pub const BEGIN_EXPR: u8 = 9;
    pub const END_EXPR: u8 = 10;
    pub const NOT: u8 = 11;
    pub const END_MARKER: u8 = 12;
    pub const ARRAY_INT8: u8 = 16;
    pub const VAR_INT16: u8 = 17;
    pub const VAR_INT8: u8 = 18;
    pub const IMM_INT32: u8 = 19;
    pub const IMM_INT16: u8 = 20;
    pub const IMM_INT8: u8 = 21;
    pub const IMM_STR: u8 = 22;
    pub const VAR_INT32: u8 = 23;
    pub const VAR_INT32_AS_INT16: u8 = 24;
    pub const VAR_STR: u8 = 25;
    pub const ARRAY_INT32: u8 = 26;
    pub const ARRAY_INT16: u8 = 27;
    pub const ARRAY_STR: u8 = 28;
    pub const FUNC: u8 = 29;
    pub const OR: u8 = 30;
    pub const AND: u8 = 31;
    pub const LESS: u8 = 32;
    pub const LEQ: u8 = 33;
    pub const GREATER: u8 = 34;
    pub const GEQ: u8 = 35;
    pub const EQ: u8 = 36;
    pub const NEQ: u8 = 37;
}

pub mod func {
    pub const SQRT1: u8 = 0;
    pub const SQRT2: u8 = 1;
    pub const SQR: u8 = 5;
    pub const SQRT3: u8 = 6;
    pub const ABS: u8 = 7;
    pub const RAND: u8 = 10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Int8,
    Int16,
    Int32,
    Int32AsInt16,
    Str,
}

/// A resolved variable reference: how to access it and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef {
    pub kind: VarKind,
    pub offset: usize,
}

impl VarRef {
    pub fn read(&self, vars: &Variables) -> Value {
        match self.kind {
            VarKind::Int8 => Value::Int(vars.read_u8(self.offset) as i32),
            VarKind::Int16 | VarKind::Int32AsInt16 => Value::Int(vars.read_i16(self.offset) as i32),
            VarKind::Int32 => Value::Int(vars.read_i32(self.offset)),
            VarKind::Str => Value::Str(vars.read_str(self.offset)),
        }
    }

    /// Stores `value` with the width of the reference. Integers written to
    /// a string variable are formatted in decimal.
    pub fn write(&self, vars: &mut Variables, value: &Value) {
        match self.kind {
            VarKind::Int8 => vars.write_u8(self.offset, value.as_int() as u8),
            VarKind::Int16 | VarKind::Int32AsInt16 => {
                vars.write_u16(self.offset, value.as_int() as u16)
            }
            VarKind::Int32 => vars.write_u32(self.offset, value.as_int() as u32),
            VarKind::Str => vars.write_str(self.offset, &value.to_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Str(Vec<u8>),
}

impl Value {
    /// Strings convert through their leading decimal digits.
    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(value) => *value,
            Value::Str(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                let trimmed = text.trim_start();
                let end = trimmed
                    .char_indices()
                    .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
                    .map(|(i, _)| i)
                    .unwrap_or(trimmed.len());
                trimmed[..end].parse().unwrap_or(0)
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Int(value) => value.to_string().into_bytes(),
            Value::Str(bytes) => bytes.clone(),
        }
    }

    pub fn is_true(&self) -> bool {
        match self {
            Value::Int(value) => *value != 0,
            Value::Str(bytes) => !bytes.is_empty(),
        }
    }
}

fn flag(value: bool) -> Value {
    Value::Int(value as i32)
}

/// Evaluates expressions starting at a program offset. The caller reads
/// `position()` afterwards to continue past the consumed bytes.
pub struct ExprReader<'a> {
    reader: ByteReader<'a>,
    vars: &'a Variables,
    rng: &'a mut Pcg32,
    string_stride: usize,
}

impl<'a> ExprReader<'a> {
    pub fn new(
        code: &'a [u8],
        pos: usize,
        vars: &'a Variables,
        rng: &'a mut Pcg32,
        anim_data_size: u16,
    ) -> Self {
        ExprReader {
            reader: ByteReader::at(code, pos),
            vars,
            rng,
            string_stride: (anim_data_size as usize * 4).max(1),
        }
    }

    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// A complete expression closed by the end marker.
    pub fn eval_expr(&mut self) -> Result<Value> {
        self.expr_until(token::END_MARKER)
    }

    pub fn eval_value(&mut self) -> Result<i32> {
        Ok(self.eval_expr()?.as_int())
    }

    pub fn eval_bool(&mut self) -> Result<bool> {
        Ok(self.eval_expr()?.is_true())
    }

    /// Reads a variable operand (type token plus address) without
    /// dereferencing it.
    pub fn var_ref(&mut self) -> Result<VarRef> {
        let start = self.position();
        let kind_token = self.reader.u8()?;
        let kind = match kind_token {
            token::VAR_INT8 | token::ARRAY_INT8 => VarKind::Int8,
            token::VAR_INT16 | token::ARRAY_INT16 => VarKind::Int16,
            token::VAR_INT32 | token::ARRAY_INT32 => VarKind::Int32,
            token::VAR_INT32_AS_INT16 => VarKind::Int32AsInt16,
            token::VAR_STR | token::ARRAY_STR => VarKind::Str,
            other => {
                return Err(EngineError::malformed(
                    start,
                    format!("token {other} is not a variable"),
                ))
            }
        };
        let base = self.reader.u16_le()? as usize * 4;
        let is_array = matches!(
            kind_token,
            token::ARRAY_INT8 | token::ARRAY_INT16 | token::ARRAY_INT32 | token::ARRAY_STR
        );
        if !is_array {
            return Ok(VarRef { kind, offset: base });
        }

        let dims = self.reader.u8()? as usize;
        let sizes = self.reader.bytes(dims)?.to_vec();
        let mut element = 0usize;
        for size in sizes {
            let index = self.eval_value()?.max(0) as usize;
            element = element * size as usize + index;
        }
        let offset = match kind {
            VarKind::Int8 => base + element,
            VarKind::Int16 | VarKind::Int32AsInt16 => base + element * 2,
            VarKind::Int32 => base + element * 4,
            VarKind::Str => base + element * self.string_stride,
        };
        Ok(VarRef { kind, offset })
    }

    fn expect(&mut self, end: u8) -> Result<()> {
        let at = self.position();
        let found = self.reader.u8()?;
        if found != end {
            return Err(EngineError::malformed(
                at,
                format!("expected token {end}, found {found}"),
            ));
        }
        Ok(())
    }

    fn expr_until(&mut self, end: u8) -> Result<Value> {
        let value = self.or_expr()?;
        self.expect(end)?;
        Ok(value)
    }

    fn peek(&self) -> Result<u8> {
        Ok(self.reader.peek_u8()?)
    }

    fn or_expr(&mut self) -> Result<Value> {
        let mut left = self.and_expr()?;
        while self.peek()? == token::OR {
            self.reader.skip(1)?;
            let right = self.and_expr()?;
            left = flag(left.is_true() || right.is_true());
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Value> {
        let mut left = self.cmp_expr()?;
        while self.peek()? == token::AND {
            self.reader.skip(1)?;
            let right = self.cmp_expr()?;
            left = flag(left.is_true() && right.is_true());
        }
        Ok(left)
    }

    fn cmp_expr(&mut self) -> Result<Value> {
        let mut left = self.add_expr()?;
        loop {
            let op = self.peek()?;
            if !(token::LESS..=token::NEQ).contains(&op) {
                return Ok(left);
            }
            self.reader.skip(1)?;
            let right = self.add_expr()?;
            let ordering = match (&left, &right) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                _ => left.as_int().cmp(&right.as_int()),
            };
            left = flag(match op {
                token::LESS => ordering.is_lt(),
                token::LEQ => ordering.is_le(),
                token::GREATER => ordering.is_gt(),
                token::GEQ => ordering.is_ge(),
                token::EQ => ordering.is_eq(),
                _ => ordering.is_ne(),
            });
        }
    }

    fn add_expr(&mut self) -> Result<Value> {
        let mut left = self.mul_expr()?;
        loop {
            let op = self.peek()?;
            if !matches!(op, token::ADD | token::SUB | token::BITOR) {
                return Ok(left);
            }
            self.reader.skip(1)?;
            let right = self.mul_expr()?;
            left = match (op, left, right) {
                (token::ADD, Value::Str(mut a), b @ Value::Str(_)) => {
                    a.extend_from_slice(&b.to_bytes());
                    Value::Str(a)
                }
                (token::ADD, a, b) => Value::Int(a.as_int().wrapping_add(b.as_int())),
                (token::SUB, a, b) => Value::Int(a.as_int().wrapping_sub(b.as_int())),
                (_, a, b) => Value::Int(a.as_int() | b.as_int()),
            };
        }
    }

    fn mul_expr(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        loop {
            let op = self.peek()?;
            if !matches!(op, token::MUL | token::DIV | token::MOD | token::BITAND) {
                return Ok(left);
            }
            let at = self.position();
            self.reader.skip(1)?;
            let a = left.as_int();
            let b = self.unary()?.as_int();
            left = Value::Int(match op {
                token::MUL => a.wrapping_mul(b),
                token::BITAND => a & b,
                _ if b == 0 => {
                    warn!("division by zero in expression at {at:#06x}");
                    0
                }
                token::DIV => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            });
        }
    }

    fn unary(&mut self) -> Result<Value> {
        match self.peek()? {
            token::NEG => {
                self.reader.skip(1)?;
                Ok(Value::Int(self.unary()?.as_int().wrapping_neg()))
            }
            token::NOT => {
                self.reader.skip(1)?;
                Ok(flag(!self.unary()?.is_true()))
            }
            token::BEGIN_EXPR => {
                self.reader.skip(1)?;
                self.expr_until(token::END_EXPR)
            }
            _ => self.operand(),
        }
    }

    fn operand(&mut self) -> Result<Value> {
        let start = self.position();
        match self.peek()? {
            token::IMM_INT32 => {
                self.reader.skip(1)?;
                Ok(Value::Int(self.reader.i32_le()?))
            }
            token::IMM_INT16 => {
                self.reader.skip(1)?;
                Ok(Value::Int(self.reader.i16_le()? as i32))
            }
            token::IMM_INT8 => {
                self.reader.skip(1)?;
                Ok(Value::Int(self.reader.i8()? as i32))
            }
            token::IMM_STR => {
                self.reader.skip(1)?;
                Ok(Value::Str(self.reader.cstr()?.to_vec()))
            }
            token::FUNC => {
                self.reader.skip(1)?;
                let id = self.reader.u8()?;
                let arg = self.expr_until(token::END_EXPR)?.as_int();
                self.call(id, arg, start)
            }
            token::ARRAY_INT8..=token::VAR_INT8
            | token::VAR_INT32..=token::ARRAY_STR => {
                let var = self.var_ref()?;
                Ok(var.read(self.vars))
            }
            other => Err(EngineError::malformed(
                start,
                format!("unexpected expression token {other}"),
            )),
        }
    }

    fn call(&mut self, id: u8, arg: i32, at: usize) -> Result<Value> {
        let value = match id {
            func::SQRT1 | func::SQRT2 | func::SQRT3 => {
                if arg <= 0 {
                    0
                } else {
                    (arg as f64).sqrt() as i32
                }
            }
            func::SQR => arg.wrapping_mul(arg),
            func::ABS => arg.wrapping_abs(),
            func::RAND => {
                if arg <= 0 {
                    0
                } else {
                    self.rng.random_range(0..arg)
                }
            }
            other => {
                return Err(EngineError::malformed(
                    at,
                    format!("unknown expression function {other}"),
                ))
            }
        };
        Ok(Value::Int(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn eval(code: &[u8], vars: &Variables) -> (Value, usize) {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut reader = ExprReader::new(code, 0, vars, &mut rng, 1);
        let value = reader.eval_expr().unwrap();
        (value, reader.position())
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let vars = Variables::new(4);
        // 2 + 3 * 4
        let code = [
            token::IMM_INT8, 2, token::ADD, token::IMM_INT8, 3, token::MUL, token::IMM_INT8, 4,
            token::END_MARKER, 0xAA,
        ];
        let (value, pos) = eval(&code, &vars);
        assert_eq!(value, Value::Int(14));
        assert_eq!(pos, code.len() - 1);
    }

    #[test]
    fn parentheses_and_comparisons() {
        let mut vars = Variables::new(4);
        vars.set_var(2, 5);
        // (var2 - 1) * 2 == 8 && !0
        let code = [
            token::BEGIN_EXPR, token::VAR_INT32, 2, 0, token::SUB, token::IMM_INT8, 1,
            token::END_EXPR, token::MUL, token::IMM_INT8, 2, token::EQ, token::IMM_INT16, 8, 0,
            token::AND, token::NOT, token::IMM_INT8, 0, token::END_MARKER,
        ];
        assert_eq!(eval(&code, &vars).0, Value::Int(1));
    }

    #[test]
    fn division_by_zero_yields_zero() {
        let vars = Variables::new(1);
        let code = [token::IMM_INT8, 9, token::DIV, token::IMM_INT8, 0, token::END_MARKER];
        assert_eq!(eval(&code, &vars).0, Value::Int(0));
    }

    #[test]
    fn arrays_index_by_element_width() {
        let mut vars = Variables::new(16);
        vars.set_var(5, 77);
        // int32 array at var 3, one dimension of 4, element 2 -> var 5
        let code = [token::ARRAY_INT32, 3, 0, 1, 4, token::IMM_INT8, 2, token::END_MARKER, token::END_MARKER];
        assert_eq!(eval(&code, &vars).0, Value::Int(77));
    }

    #[test]
    fn strings_concatenate_and_compare() {
        let mut vars = Variables::new(8);
        vars.write_str(4, b"AB");
        let code = [
            token::VAR_STR, 1, 0, token::ADD, token::IMM_STR, b'C', 0, token::EQ, token::IMM_STR,
            b'A', b'B', b'C', 0, token::END_MARKER,
        ];
        assert_eq!(eval(&code, &vars).0, Value::Int(1));
    }

    #[test]
    fn functions_take_a_closed_argument() {
        let vars = Variables::new(1);
        let code = [
            token::FUNC, func::ABS, token::NEG, token::IMM_INT8, 7, token::END_EXPR, token::ADD,
            token::FUNC, func::SQRT1, token::IMM_INT8, 16, token::END_EXPR, token::END_MARKER,
        ];
        assert_eq!(eval(&code, &vars).0, Value::Int(11));

        let code = [token::FUNC, func::RAND, token::IMM_INT8, 5, token::END_EXPR, token::END_MARKER];
        let Value::Int(roll) = eval(&code, &vars).0 else {
            panic!("rand returned a string");
        };
        assert!((0..5).contains(&roll));
    }

    #[test]
    fn unknown_tokens_are_reported_with_their_offset() {
        let vars = Variables::new(1);
        let mut rng = Pcg32::seed_from_u64(1);
        let code = [token::IMM_INT8, 1, token::ADD, 99, token::END_MARKER];
        let err = ExprReader::new(&code, 0, &vars, &mut rng, 1)
            .eval_expr()
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedProgram { offset: 3, .. }));
    }
}
