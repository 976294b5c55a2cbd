//! Per-opcode forward type propagation.
//!
//! One dispatch per instruction per block visit: read the popped values'
//! types and constants, write the pushed value's. Every rule only moves
//! types up the lattice, so revisits converge. Compile-time evaluation
//! happens here whenever all inputs are constant; the conversion
//! semantics follow ECMA-262 (`ToNumber`, `ToInt32`, `ToUint32`,
//! `ToBoolean`).

use crate::binder::Binder;
use crate::error::{BodyError, BodyResult, VerifyKind};
use crate::ir::{Const, DataType, Inst, Opcode, Payload, Value};
use crate::settings::IntegerMode;
use avmlift_environ::Builtin;

/// ECMA-262 ToInt32.
pub(crate) fn to_int32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    let mut m = x.trunc() % 4294967296.0;
    if m < 0.0 {
        m += 4294967296.0;
    }
    (m as u32) as i32
}

/// ECMA-262 ToUint32.
pub(crate) fn to_uint32(x: f64) -> u32 {
    to_int32(x) as u32
}

impl<'a> Binder<'a> {
    pub(crate) fn value_ty(&self, v: Value) -> DataType {
        self.graph.values[v].ty
    }

    pub(crate) fn value_const(&self, v: Value) -> Option<Const> {
        self.graph.values[v].constant
    }

    /// ECMA ToNumber over a constant; `None` when the constant is not
    /// foldable to a number.
    pub(crate) fn const_to_number(&self, k: Const) -> Option<f64> {
        match k {
            Const::Int(v) => Some(v as f64),
            Const::Uint(v) => Some(v as f64),
            Const::Double(v) => Some(v),
            Const::Bool(v) => Some(v as u8 as f64),
            Const::Null => Some(0.0),
            Const::Undefined => Some(f64::NAN),
            Const::Str(index) => {
                let s = self.pool.string(index)?;
                let t = s.trim();
                if t.is_empty() {
                    Some(0.0)
                } else if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                    i64::from_str_radix(hex, 16).ok().map(|v| v as f64)
                } else {
                    Some(t.parse::<f64>().unwrap_or(f64::NAN))
                }
            }
            _ => None,
        }
    }

    /// ECMA ToBoolean over a constant.
    pub(crate) fn const_to_boolean(&self, k: Const) -> Option<bool> {
        match k {
            Const::Bool(v) => Some(v),
            Const::Int(v) => Some(v != 0),
            Const::Uint(v) => Some(v != 0),
            Const::Double(v) => Some(v != 0.0 && !v.is_nan()),
            Const::Null | Const::Undefined => Some(false),
            Const::Str(index) => self.pool.string(index).map(|s| !s.is_empty()),
            Const::Ns(_) | Const::Class(_) | Const::Method(_) => Some(true),
        }
    }

    fn pool_missing(&self, inst: Inst) -> BodyError {
        BodyError::verify(self.graph.insts[inst].offset, VerifyKind::AbcCorrupt)
    }

    /// One forward-propagation step for `inst`.
    pub(crate) fn dispatch(&mut self, inst: Inst) -> BodyResult<()> {
        use Opcode::*;
        let opcode = self.graph.insts[inst].opcode;
        let payload = self.graph.insts[inst].payload;
        match opcode {
            // Literals.
            PushByte | PushShort => {
                if let Payload::Imm { value } = payload {
                    self.set_out_const(inst, DataType::Int, Const::Int(value));
                }
            }
            PushInt => {
                let index = pool_index(payload);
                let v = self.pool.int(index).ok_or_else(|| self.pool_missing(inst))?;
                self.set_out_const(inst, DataType::Int, Const::Int(v));
            }
            PushUint => {
                let index = pool_index(payload);
                let v = self.pool.uint(index).ok_or_else(|| self.pool_missing(inst))?;
                self.set_out_const(inst, DataType::Uint, Const::Uint(v));
            }
            PushDouble => {
                let index = pool_index(payload);
                let v = self
                    .pool
                    .double(index)
                    .ok_or_else(|| self.pool_missing(inst))?;
                self.set_out_const(inst, DataType::Number, Const::Double(v));
            }
            PushString => {
                let index = pool_index(payload);
                self.pool
                    .string(index)
                    .ok_or_else(|| self.pool_missing(inst))?;
                self.set_out_const(inst, DataType::String, Const::Str(index));
            }
            PushNamespace => {
                let index = pool_index(payload);
                self.pool
                    .namespace(index)
                    .ok_or_else(|| self.pool_missing(inst))?;
                self.set_out_const(inst, DataType::Namespace, Const::Ns(index));
            }
            PushTrue => self.set_out_const(inst, DataType::Bool, Const::Bool(true)),
            PushFalse => self.set_out_const(inst, DataType::Bool, Const::Bool(false)),
            PushNaN => self.set_out_const(inst, DataType::Number, Const::Double(f64::NAN)),
            PushNull => self.set_out_const(inst, DataType::Null, Const::Null),
            PushUndefined => self.set_out_const(inst, DataType::Undefined, Const::Undefined),

            // Conversions.
            ConvertI => self.convert_int(inst, DataType::Int),
            ConvertU => self.convert_int(inst, DataType::Uint),
            ConvertD => {
                let input = self.graph.popped(inst)[0];
                match self.value_const(input).and_then(|k| self.const_to_number(k)) {
                    Some(n) => self.set_out_const(inst, DataType::Number, Const::Double(n)),
                    None => self.set_out(inst, DataType::Number),
                }
            }
            ConvertB => {
                let input = self.graph.popped(inst)[0];
                match self.value_const(input).and_then(|k| self.const_to_boolean(k)) {
                    Some(b) => self.set_out_const(inst, DataType::Bool, Const::Bool(b)),
                    None => self.set_out(inst, DataType::Bool),
                }
            }
            ConvertS | CoerceS | EscXElem | EscXAttr => {
                let input = self.graph.popped(inst)[0];
                match self.value_const(input) {
                    Some(Const::Str(index)) => {
                        self.set_out_const(inst, DataType::String, Const::Str(index))
                    }
                    _ => self.set_out(inst, DataType::String),
                }
            }
            ConvertO | CoerceO => {
                let input = self.graph.popped(inst)[0];
                let ty = match self.value_ty(input) {
                    DataType::Unknown => DataType::Unknown,
                    t if t.is_primitive() => self
                        .env
                        .class_to_type(self.env.registry.builtin(Builtin::Object)),
                    t => t,
                };
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
            CoerceA => {
                let input = self.graph.popped(inst)[0];
                let ty = self.value_ty(input);
                let konst = self.value_const(input);
                let in_flags = self.graph.values[input].flags;
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    let non_final_class = self
                        .env
                        .type_class(ty)
                        .map_or(false, |c| !self.env.registry.class(c).flags.is_final());
                    let data = &mut self.graph.values[out];
                    data.constant = konst;
                    if in_flags.is_not_null() {
                        data.flags.set_not_null();
                    }
                    // A non-final static class means a namespace-set
                    // lookup may bind differently on a subclass; defer
                    // those lookups to runtime.
                    if in_flags.is_late_name_binding() || non_final_class {
                        data.flags.set_late_name_binding();
                    }
                }
            }
            Coerce => self.coerce_multiname(inst)?,
            AsType => {
                let index = name_index(payload);
                let mn = self
                    .pool
                    .multiname(index)
                    .ok_or_else(|| self.pool_missing(inst))?;
                let ty = match self.env.registry.class_for_multiname(mn) {
                    Some(c) => DataType::Object(c),
                    None => DataType::Any,
                };
                self.set_out(inst, ty);
            }
            AsTypeLate => {
                let class_v = self.graph.popped(inst)[1];
                let ty = match self.value_ty(class_v) {
                    DataType::Class(c) => DataType::Object(c),
                    _ => DataType::Any,
                };
                self.set_out(inst, ty);
            }

            // Unary arithmetic.
            Negate => self.unary_number(inst, |n| -n),
            Increment => self.unary_number(inst, |n| n + 1.0),
            Decrement => self.unary_number(inst, |n| n - 1.0),
            NegateI => self.unary_int(inst, |n| n.wrapping_neg()),
            IncrementI => self.unary_int(inst, |n| n.wrapping_add(1)),
            DecrementI => self.unary_int(inst, |n| n.wrapping_sub(1)),
            BitNot => self.unary_int(inst, |n| !n),
            Not => {
                let input = self.graph.popped(inst)[0];
                match self.value_const(input).and_then(|k| self.const_to_boolean(k)) {
                    Some(b) => self.set_out_const(inst, DataType::Bool, Const::Bool(!b)),
                    None => self.set_out(inst, DataType::Bool),
                }
            }
            TypeOf => self.set_out(inst, DataType::String),

            // Binary arithmetic.
            Add => self.add(inst),
            Subtract => self.binary_number(inst, |a, b| a - b),
            Multiply => self.binary_number(inst, |a, b| a * b),
            Divide => self.binary_divide(inst),
            Modulo => self.binary_modulo(inst),
            AddI => self.binary_int(inst, |a, b| a.wrapping_add(b)),
            SubtractI => self.binary_int(inst, |a, b| a.wrapping_sub(b)),
            MultiplyI => self.binary_int(inst, |a, b| a.wrapping_mul(b)),
            Lshift => self.binary_shift(inst, DataType::Int, |a, b| {
                Const::Int(to_int32(a) << (to_uint32(b) & 31))
            }),
            Rshift => self.binary_shift(inst, DataType::Int, |a, b| {
                Const::Int(to_int32(a) >> (to_uint32(b) & 31))
            }),
            Urshift => self.binary_shift(inst, DataType::Uint, |a, b| {
                Const::Uint(to_uint32(a) >> (to_uint32(b) & 31))
            }),
            BitAnd => self.binary_int(inst, |a, b| a & b),
            BitOr => self.binary_int(inst, |a, b| a | b),
            BitXor => self.binary_int(inst, |a, b| a ^ b),

            // Comparisons and type tests.
            Equals | StrictEquals | LessThan | LessEquals | GreaterThan | GreaterEquals => {
                self.compare(inst, opcode)
            }
            InstanceOf | IsTypeLate | In | HasNext => self.set_out(inst, DataType::Bool),
            IsType => self.set_out(inst, DataType::Bool),
            HasNext2 => {
                let (ov, iv) = match payload {
                    Payload::TwoLocals {
                        object_value,
                        index_value,
                        ..
                    } => (object_value.expand(), index_value.expand()),
                    _ => (None, None),
                };
                if let Some(v) = ov {
                    self.graph.values[v].ty = DataType::Any;
                }
                if let Some(v) = iv {
                    self.graph.values[v].ty = DataType::Int;
                }
                self.set_out(inst, DataType::Bool);
            }
            NextName | NextValue => self.set_out(inst, DataType::Any),

            // Locals. Reads and plain writes are transparent; only the
            // arithmetic forms produce values.
            Kill => {
                if let Some(out) = self.out(inst) {
                    let data = &mut self.graph.values[out];
                    data.ty = DataType::Undefined;
                    data.constant = Some(Const::Undefined);
                }
            }
            IncLocal | DecLocal => self.set_out(inst, DataType::Number),
            IncLocalI | DecLocalI => self.set_out(inst, DataType::Int),

            // Scope and globals.
            GetGlobalScope => {
                self.set_out(inst, DataType::Global);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
            NewActivation | NewCatch => {
                let ty = self
                    .env
                    .class_to_type(self.env.registry.builtin(Builtin::Object));
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
            NewObject => {
                let ty = self
                    .env
                    .class_to_type(self.env.registry.builtin(Builtin::Object));
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
            NewArray => {
                let ty = self
                    .env
                    .class_to_type(self.env.registry.builtin(Builtin::Array));
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
            NewFunction => self.new_function(inst),
            NewClass => self.new_class(inst)?,
            ApplyType => self.apply_type(inst),

            // The default-XML-namespace ops need the method flag.
            Dxns | DxnsLate => {
                if !self.method.flags.set_dxns() {
                    return Err(BodyError::Type {
                        offset: self.graph.insts[inst].offset,
                        message: "dxns in a method without SET_DXNS".into(),
                    });
                }
            }

            // Property and call resolution.
            GetProperty | SetProperty | InitProperty | DeleteProperty | GetDescendants => {
                self.resolve_property_access(inst)?
            }
            CallProperty | CallPropLex | CallPropVoid | ConstructProp => {
                self.resolve_call_property(inst)?
            }
            FindProperty | FindPropStrict | FindDef => self.resolve_find(inst)?,
            GetLex => self.resolve_get_lex(inst)?,
            GetSuper | SetSuper | CallSuper | CallSuperVoid => self.resolve_super(inst)?,
            Construct | ConstructSuper => self.resolve_construct(inst)?,
            Call => self.resolve_call(inst),
            CallMethod | CallStatic => self.resolve_call_index(inst),
            GetSlot | SetSlot | GetGlobalSlot | SetGlobalSlot => self.resolve_slot(inst)?,

            // Everything else neither pushes nor needs checks here.
            _ => {}
        }
        Ok(())
    }

    fn convert_int(&mut self, inst: Inst, ty: DataType) {
        let input = self.graph.popped(inst)[0];
        match self.value_const(input).and_then(|k| self.const_to_number(k)) {
            Some(n) => {
                let k = if ty == DataType::Int {
                    Const::Int(to_int32(n))
                } else {
                    Const::Uint(to_uint32(n))
                };
                self.set_out_const(inst, ty, k);
            }
            None => self.set_out(inst, ty),
        }
    }

    /// `coerce <multiname>`: a primitive target rewrites to the matching
    /// convert opcode and re-dispatches; anything else is a class
    /// coercion.
    fn coerce_multiname(&mut self, inst: Inst) -> BodyResult<()> {
        let index = name_index(self.graph.insts[inst].payload);
        let mn = self
            .pool
            .multiname(index)
            .ok_or_else(|| self.pool_missing(inst))?;
        let class = self.env.registry.class_for_multiname(mn);
        let Some(class) = class else {
            self.set_out(inst, DataType::Any);
            return Ok(());
        };
        let b = |builtin| self.env.registry.builtin(builtin) == Some(class);
        let rewritten = if b(Builtin::Int) {
            Some(Opcode::ConvertI)
        } else if b(Builtin::Uint) {
            Some(Opcode::ConvertU)
        } else if b(Builtin::Number) {
            Some(Opcode::ConvertD)
        } else if b(Builtin::Boolean) {
            Some(Opcode::ConvertB)
        } else if b(Builtin::String) {
            Some(Opcode::CoerceS)
        } else {
            None
        };
        if let Some(op) = rewritten {
            self.graph.insts[inst].opcode = op;
            return self.dispatch(inst);
        }
        let input = self.graph.popped(inst)[0];
        let ty = match self.value_ty(input) {
            DataType::Null => DataType::Null,
            DataType::Unknown => DataType::Unknown,
            _ => DataType::Object(class),
        };
        self.set_out(inst, ty);
        Ok(())
    }

    fn unary_number(&mut self, inst: Inst, f: impl Fn(f64) -> f64) {
        let input = self.graph.popped(inst)[0];
        match self.value_const(input).and_then(|k| self.const_to_number(k)) {
            Some(n) => self.set_out_const(inst, DataType::Number, Const::Double(f(n))),
            None => self.set_out(inst, DataType::Number),
        }
    }

    fn unary_int(&mut self, inst: Inst, f: impl Fn(i32) -> i32) {
        let input = self.graph.popped(inst)[0];
        match self.value_const(input).and_then(|k| self.const_to_number(k)) {
            Some(n) => self.set_out_const(inst, DataType::Int, Const::Int(f(to_int32(n)))),
            None => self.set_out(inst, DataType::Int),
        }
    }

    fn operand_tys(&self, inst: Inst) -> (Value, Value, DataType, DataType) {
        let popped = self.graph.popped(inst);
        let (a, b) = (popped[0], popped[1]);
        (a, b, self.value_ty(a), self.value_ty(b))
    }

    fn both_numbers(&self, a: Value, b: Value) -> Option<(f64, f64)> {
        let ka = self.value_const(a)?;
        let kb = self.value_const(b)?;
        Some((self.const_to_number(ka)?, self.const_to_number(kb)?))
    }

    /// Result type of an integer-capable binary op, honouring the
    /// integer-arithmetic mode.
    fn integer_result(&self, ta: DataType, tb: DataType, modulo: bool) -> Option<DataType> {
        if !(ta.is_integer() && ta == tb) {
            return None;
        }
        match self.options.integer_mode {
            IntegerMode::Aggressive => Some(ta),
            IntegerMode::Default if modulo => Some(ta),
            _ => None,
        }
    }

    fn add(&mut self, inst: Inst) {
        let (a, b, ta, tb) = self.operand_tys(inst);
        if ta == DataType::Unknown || tb == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return;
        }
        let numericish = |t: DataType| {
            t.is_numeric() || matches!(t, DataType::Bool | DataType::Null | DataType::Undefined)
        };
        if numericish(ta) && numericish(tb) {
            let result = self
                .integer_result(ta, tb, false)
                .unwrap_or(DataType::Number);
            if let Some((x, y)) = self.both_numbers(a, b) {
                let k = match result {
                    DataType::Int => Const::Int(to_int32(x + y)),
                    DataType::Uint => Const::Uint(to_uint32(x + y)),
                    _ => Const::Double(x + y),
                };
                self.set_out_const(inst, result, k);
            } else {
                self.set_out(inst, result);
            }
            return;
        }
        if ta == DataType::String || tb == DataType::String {
            self.set_out(inst, DataType::String);
            if let Some(out) = self.out(inst) {
                self.graph.values[out].flags.set_not_null();
            }
            return;
        }
        let root = self
            .env
            .class_to_type(self.env.registry.builtin(Builtin::Object));
        self.set_out(inst, root);
    }

    fn binary_number(&mut self, inst: Inst, f: impl Fn(f64, f64) -> f64) {
        let (a, b, ta, tb) = self.operand_tys(inst);
        if ta == DataType::Unknown || tb == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return;
        }
        let result = self
            .integer_result(ta, tb, false)
            .unwrap_or(DataType::Number);
        if let Some((x, y)) = self.both_numbers(a, b) {
            let n = f(x, y);
            let k = match result {
                DataType::Int => Const::Int(to_int32(n)),
                DataType::Uint => Const::Uint(to_uint32(n)),
                _ => Const::Double(n),
            };
            self.set_out_const(inst, result, k);
        } else {
            self.set_out(inst, result);
        }
    }

    fn binary_divide(&mut self, inst: Inst) {
        let (a, b, ta, tb) = self.operand_tys(inst);
        if ta == DataType::Unknown || tb == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return;
        }
        match self.both_numbers(a, b) {
            Some((x, y)) => self.set_out_const(inst, DataType::Number, Const::Double(x / y)),
            None => self.set_out(inst, DataType::Number),
        }
    }

    fn binary_modulo(&mut self, inst: Inst) {
        let (a, b, ta, tb) = self.operand_tys(inst);
        if ta == DataType::Unknown || tb == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return;
        }
        let result = self.integer_result(ta, tb, true).unwrap_or(DataType::Number);
        if let Some((x, y)) = self.both_numbers(a, b) {
            let n = x % y;
            let k = match result {
                DataType::Int => Const::Int(to_int32(n)),
                DataType::Uint => Const::Uint(to_uint32(n)),
                _ => Const::Double(n),
            };
            self.set_out_const(inst, result, k);
        } else {
            self.set_out(inst, result);
        }
    }

    fn binary_int(&mut self, inst: Inst, f: impl Fn(i32, i32) -> i32) {
        let popped = self.graph.popped(inst);
        let (a, b) = (popped[0], popped[1]);
        match self.both_numbers(a, b) {
            Some((x, y)) => self.set_out_const(
                inst,
                DataType::Int,
                Const::Int(f(to_int32(x), to_int32(y))),
            ),
            None => self.set_out(inst, DataType::Int),
        }
    }

    fn binary_shift(&mut self, inst: Inst, ty: DataType, f: impl Fn(f64, f64) -> Const) {
        let popped = self.graph.popped(inst);
        let (a, b) = (popped[0], popped[1]);
        match self.both_numbers(a, b) {
            Some((x, y)) => self.set_out_const(inst, ty, f(x, y)),
            None => self.set_out(inst, ty),
        }
    }

    fn compare(&mut self, inst: Inst, opcode: Opcode) {
        let popped = self.graph.popped(inst);
        let (a, b) = (popped[0], popped[1]);
        let folded = self.fold_compare(a, b, opcode);
        match folded {
            Some(v) => self.set_out_const(inst, DataType::Bool, Const::Bool(v)),
            None => self.set_out(inst, DataType::Bool),
        }
    }

    fn fold_compare(&self, a: Value, b: Value, opcode: Opcode) -> Option<bool> {
        use Opcode::*;
        let ka = self.value_const(a)?;
        let kb = self.value_const(b)?;
        // String-to-string comparisons are ordinal; everything else
        // folds through ToNumber when both sides are comparable
        // primitives.
        if let (Const::Str(x), Const::Str(y)) = (ka, kb) {
            let x = self.pool.string(x)?;
            let y = self.pool.string(y)?;
            return Some(match opcode {
                Equals | StrictEquals => x == y,
                LessThan => x < y,
                LessEquals => x <= y,
                GreaterThan => x > y,
                GreaterEquals => x >= y,
                _ => return None,
            });
        }
        if matches!(opcode, StrictEquals) {
            // Strict equality folds only for same-kind primitives.
            let same_kind = core::mem::discriminant(&ka) == core::mem::discriminant(&kb)
                || (ka.as_number().is_some() && kb.as_number().is_some());
            if !same_kind {
                return Some(false);
            }
        }
        let x = self.const_to_number(ka)?;
        let y = self.const_to_number(kb)?;
        Some(match opcode {
            Equals | StrictEquals => x == y,
            LessThan => x < y,
            LessEquals => x <= y,
            GreaterThan => x > y,
            GreaterEquals => x >= y,
            _ => return None,
        })
    }
}

fn pool_index(payload: Payload) -> u32 {
    match payload {
        Payload::Pool { index } => index,
        _ => 0,
    }
}

fn name_index(payload: Payload) -> u32 {
    match payload {
        Payload::Name { index, .. } | Payload::CallName { index, .. } => index,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_conversions() {
        assert_eq!(to_int32(0.0), 0);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
        assert_eq!(to_int32(4294967296.0), 0);
        assert_eq!(to_int32(2147483648.0), -2147483648);
        assert_eq!(to_int32(-4294967295.0), 1);
        assert_eq!(to_uint32(-1.0), 4294967295);
    }
}
