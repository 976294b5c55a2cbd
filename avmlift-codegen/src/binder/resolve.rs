//! Property resolution.
//!
//! Binds multiname accesses to traits, index accessors, intrinsics, or
//! defers them to runtime. Each access instruction owns one
//! `ResolvedProperty` record, allocated on first visit and re-filled
//! when the receiver's type changes; a revisit with the same receiver
//! type and no runtime name components returns on the fast path without
//! touching the trait tables.

use crate::binder::Binder;
use crate::error::{BodyError, BodyResult, VerifyKind};
use crate::ir::{
    Const, DataType, Inst, Intrinsic, Opcode, Payload, PropKind, PropLocation, PropRef, Value,
};
use avmlift_environ::{Builtin, ClassId, Multiname, Namespace, TraitDesc, TraitKind};
use smallvec::SmallVec;

/// The compile-time components of one multiname use.
struct NameParts {
    /// Compile-time or folded local name.
    name: Option<Box<str>>,
    /// Candidate namespaces (compile-time, or the folded runtime one).
    nss: SmallVec<[Namespace; 2]>,
    /// The runtime namespace argument, when present.
    rt_ns: Option<Value>,
    /// The runtime name argument, when present.
    rt_name: Option<Value>,
    /// A runtime component survived folding; the lookup cannot be fully
    /// static.
    runtime: bool,
    /// Namespace candidates come from a namespace set.
    from_ns_set: bool,
}

/// Outcome of searching one receiver's trait tables.
enum Lookup {
    Found {
        owner: ClassId,
        is_static: bool,
        desc: TraitDesc,
    },
    GlobalFound {
        desc: TraitDesc,
    },
    NotFound,
    Runtime,
}

impl<'a> Binder<'a> {
    /// The instruction's resolution record, allocated on first visit.
    fn prop_for(&mut self, inst: Inst) -> PropRef {
        if let Some(p) = self.graph.insts[inst].payload.prop() {
            return p;
        }
        let p = self.graph.make_prop();
        self.graph.insts[inst].payload.set_prop(p);
        p
    }

    fn multiname_at(&self, inst: Inst) -> BodyResult<&Multiname> {
        let data = &self.graph.insts[inst];
        let index = data.payload.multiname_index().unwrap_or(0);
        self.pool.multiname(index).ok_or(BodyError::Verify {
            offset: data.offset,
            kind: VerifyKind::InvalidMultiname { index },
        })
    }

    /// Extract the compile-time name components, folding
    /// constant single-use runtime arguments.
    ///
    /// `base` is the index of the first runtime name argument in the
    /// popped list (after the receiver, if the opcode has one).
    fn name_parts(&mut self, inst: Inst, base: usize) -> BodyResult<NameParts> {
        let mn = self.multiname_at(inst)?.clone();
        let popped = self.graph.popped(inst);
        let mut at = base;
        let mut parts = NameParts {
            name: mn.local_name().map(Box::from),
            nss: mn.ns_candidates().iter().cloned().collect(),
            rt_ns: None,
            rt_name: None,
            runtime: false,
            from_ns_set: matches!(
                mn,
                Multiname::Multiname { .. } | Multiname::MultinameL { .. }
            ),
        };
        // Opcodes that pop no name arguments cannot legally carry a
        // runtime-component multiname.
        let bad_name = || {
            let data = &self.graph.insts[inst];
            BodyError::Verify {
                offset: data.offset,
                kind: VerifyKind::InvalidMultiname {
                    index: data.payload.multiname_index().unwrap_or(0),
                },
            }
        };
        if mn.has_runtime_ns() {
            let v = *popped.get(at).ok_or_else(bad_name)?;
            at += 1;
            parts.rt_ns = Some(v);
            match self.value_const(v) {
                Some(Const::Ns(index)) if self.graph.use_count(v) == 1 => {
                    if let Some(ns) = self.pool.namespace(index) {
                        parts.nss.push(ns.clone());
                    } else {
                        parts.runtime = true;
                    }
                }
                _ => parts.runtime = true,
            }
        }
        if mn.has_runtime_name() {
            let v = *popped.get(at).ok_or_else(bad_name)?;
            parts.rt_name = Some(v);
            match self.value_const(v) {
                Some(Const::Str(index)) if self.graph.use_count(v) == 1 => {
                    match self.pool.string(index) {
                        Some(s) => parts.name = Some(s.into()),
                        None => parts.runtime = true,
                    }
                }
                _ => parts.runtime = true,
            }
        }
        Ok(parts)
    }

    /// Search the receiver type's trait tables.
    fn lookup_on_type(&self, ty: DataType, name: &str, nss: &[Namespace]) -> Lookup {
        match ty {
            DataType::Any | DataType::Null | DataType::Undefined | DataType::Unknown => {
                Lookup::Runtime
            }
            DataType::Global => match self.env.registry.global_trait(name, nss) {
                Some(desc) => Lookup::GlobalFound { desc: desc.clone() },
                // The global object is dynamic; misses go to runtime
                // machinery either way.
                None => Lookup::NotFound,
            },
            DataType::Class(c) => match self.env.registry.lookup_trait(c, name, nss, true) {
                Some(desc) => Lookup::Found {
                    owner: c,
                    is_static: true,
                    desc: desc.clone(),
                },
                None => Lookup::NotFound,
            },
            _ => {
                let Some(c) = self.env.type_class(ty) else {
                    return Lookup::Runtime;
                };
                match self.env.registry.lookup_trait(c, name, nss, false) {
                    Some(desc) => Lookup::Found {
                        owner: c,
                        is_static: false,
                        desc: desc.clone(),
                    },
                    None => Lookup::NotFound,
                }
            }
        }
    }

    /// The type read through a trait.
    fn trait_value_type(&self, desc: &TraitDesc) -> DataType {
        match &desc.kind {
            TraitKind::Slot { ty, .. } | TraitKind::Const { ty, .. } => self.env.class_to_type(*ty),
            TraitKind::Getter { method } => self
                .env
                .class_to_type(self.env.registry.method_sig(*method).ret),
            TraitKind::Method { .. } | TraitKind::Function { .. } => self
                .env
                .class_to_type(self.env.registry.builtin(Builtin::Function)),
            TraitKind::Setter { .. } => DataType::Any,
            TraitKind::Class { class } => DataType::Class(*class),
        }
    }

    fn mark_runtime(&mut self, p: PropRef, obj_ty: DataType) {
        let prop = &mut self.graph.props[p];
        prop.reset();
        prop.kind = PropKind::Runtime;
        prop.value_ty = DataType::Any;
        prop.seen_ty = obj_ty;
    }

    /// get/set/init/delete/descendants through a multiname.
    pub(crate) fn resolve_property_access(&mut self, inst: Inst) -> BodyResult<()> {
        let opcode = self.graph.insts[inst].opcode;
        let obj = self.graph.popped(inst)[0];
        let obj_ty = self.value_ty(obj);
        if obj_ty == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return Ok(());
        }
        let p = self.prop_for(inst);
        let mn_static = self.multiname_at(inst)?.runtime_arg_count() == 0;
        if mn_static && self.graph.props[p].kind != PropKind::Unresolved
            && self.graph.props[p].seen_ty == obj_ty
        {
            // Fast path: same receiver type, nothing runtime-supplied.
            let ty = self.out_type_for_access(opcode, p);
            self.set_out(inst, ty);
            return Ok(());
        }

        // A getproperty directly on the object a findproperty produced
        // reuses its resolution instead of searching again.
        if mn_static && self.copy_find_resolution(inst, obj, p) {
            let ty = self.out_type_for_access(opcode, p);
            self.set_out(inst, ty);
            return Ok(());
        }

        if opcode == Opcode::GetDescendants {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, DataType::Any);
            return Ok(());
        }

        let parts = self.name_parts(inst, 1)?;

        // A numeric runtime name against an index-accessible
        // class becomes an index access.
        if let Some(rt_name) = parts.rt_name {
            let index_ty = self.value_ty(rt_name);
            if index_ty.is_numeric() {
                if let Some(c) = self.env.type_class(obj_ty) {
                    if let Some(access) = self.env.registry.class(c).index_access {
                        let writable_enough = !matches!(
                            opcode,
                            Opcode::SetProperty | Opcode::InitProperty
                        ) || access.writable;
                        if writable_enough {
                            let element = self.env.class_to_type(access.element);
                            let prop = &mut self.graph.props[p];
                            prop.reset();
                            prop.kind = PropKind::Index;
                            prop.owner = c.into();
                            prop.index_access = Some(access);
                            prop.value_ty = element;
                            prop.seen_ty = obj_ty;
                            self.set_out(inst, self.out_type_for_access(opcode, p));
                            return Ok(());
                        }
                    }
                }
            }
        }

        if parts.runtime
            || (parts.from_ns_set
                && self.graph.values[obj].flags.is_late_name_binding())
        {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, self.out_type_for_access(opcode, p));
            return Ok(());
        }
        let Some(name) = parts.name.clone() else {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, self.out_type_for_access(opcode, p));
            return Ok(());
        };

        match self.lookup_on_type(obj_ty, &name, &parts.nss) {
            Lookup::Found {
                owner,
                is_static,
                desc,
            } => {
                let value_ty = self.trait_value_type(&desc);
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = PropKind::Trait;
                prop.owner = owner.into();
                prop.is_static = is_static;
                prop.trait_desc = Some(desc);
                prop.value_ty = value_ty;
                prop.seen_ty = obj_ty;
                self.record_folded(p, &parts);
            }
            Lookup::GlobalFound { desc } => {
                let value_ty = self.trait_value_type(&desc);
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = PropKind::Trait;
                prop.location = PropLocation::Global;
                prop.trait_desc = Some(desc);
                prop.value_ty = value_ty;
                prop.seen_ty = obj_ty;
                self.record_folded(p, &parts);
            }
            Lookup::NotFound | Lookup::Runtime => {
                self.mark_runtime(p, obj_ty);
            }
        }
        self.set_out(inst, self.out_type_for_access(opcode, p));
        Ok(())
    }

    fn record_folded(&mut self, p: PropRef, parts: &NameParts) {
        let prop = &mut self.graph.props[p];
        if parts.rt_ns.is_some() && !parts.runtime {
            prop.folded_ns = parts.nss.last().cloned();
        }
        if parts.rt_name.is_some() && !parts.runtime {
            prop.folded_name = parts.name.clone();
        }
    }

    fn out_type_for_access(&self, opcode: Opcode, p: PropRef) -> DataType {
        match opcode {
            Opcode::GetProperty => self.graph.props[p].value_ty,
            Opcode::DeleteProperty => DataType::Bool,
            Opcode::GetDescendants => DataType::Any,
            // Stores push nothing.
            _ => DataType::Any,
        }
    }

    /// Resolution cache reuse: `obj` was pushed by a
    /// findproperty with the same multiname whose resolution already
    /// bound a trait.
    fn copy_find_resolution(&mut self, inst: Inst, obj: Value, p: PropRef) -> bool {
        let Some(def) = self.graph.values[obj].def.expand() else {
            return false;
        };
        let def_data = &self.graph.insts[def];
        if !matches!(
            def_data.opcode,
            Opcode::FindProperty | Opcode::FindPropStrict
        ) {
            return false;
        }
        if def_data.payload.multiname_index() != self.graph.insts[inst].payload.multiname_index() {
            return false;
        }
        let Some(find_prop) = def_data.payload.prop() else {
            return false;
        };
        if self.graph.props[find_prop].kind != PropKind::Trait {
            return false;
        }
        let src = self.graph.props[find_prop].clone();
        let obj_ty = self.value_ty(obj);
        let dst = &mut self.graph.props[p];
        *dst = src;
        dst.location = PropLocation::Target;
        dst.value_ty = match &dst.trait_desc {
            Some(_) => dst.value_ty,
            None => DataType::Any,
        };
        dst.seen_ty = obj_ty;
        // The find recorded the scope object's type as its result; the
        // read produces the trait's type instead.
        if let Some(desc) = dst.trait_desc.clone() {
            let ty = self.trait_value_type(&desc);
            self.graph.props[p].value_ty = ty;
        }
        true
    }

    /// Calls through a multiname: callproperty, callproplex,
    /// callpropvoid, constructprop.
    pub(crate) fn resolve_call_property(&mut self, inst: Inst) -> BodyResult<()> {
        let opcode = self.graph.insts[inst].opcode;
        let argc = self.graph.insts[inst].payload.argc().unwrap_or(0) as usize;
        let popped = self.graph.popped(inst);
        let obj = popped[0];
        let args: SmallVec<[Value; 4]> = popped[popped.len() - argc..].iter().copied().collect();
        let obj_ty = self.value_ty(obj);
        if obj_ty == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return Ok(());
        }
        let p = self.prop_for(inst);
        let mn_static = self.multiname_at(inst)?.runtime_arg_count() == 0;
        if mn_static
            && self.graph.props[p].kind != PropKind::Unresolved
            && self.graph.props[p].seen_ty == obj_ty
        {
            let ty = self.call_out_type(opcode, p);
            self.set_out(inst, ty);
            return Ok(());
        }

        let parts = self.name_parts(inst, 1)?;
        if parts.runtime
            || (parts.from_ns_set && self.graph.values[obj].flags.is_late_name_binding())
        {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, DataType::Any);
            return Ok(());
        }
        let Some(name) = parts.name.clone() else {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, DataType::Any);
            return Ok(());
        };

        match self.lookup_on_type(obj_ty, &name, &parts.nss) {
            Lookup::Found {
                owner,
                is_static,
                desc,
            } => {
                self.bind_call_trait(inst, p, obj_ty, owner, is_static, desc, &args, opcode)?;
                self.record_folded(p, &parts);
            }
            Lookup::GlobalFound { desc } => {
                self.bind_call_trait(
                    inst,
                    p,
                    obj_ty,
                    self.env
                        .registry
                        .builtin(Builtin::Object)
                        .expect("global traits imply a root object class"),
                    false,
                    desc,
                    &args,
                    opcode,
                )?;
                self.graph.props[p].location = PropLocation::Global;
                self.record_folded(p, &parts);
            }
            Lookup::NotFound | Lookup::Runtime => {
                self.mark_runtime(p, obj_ty);
            }
        }
        let ty = self.call_out_type(opcode, p);
        self.set_out(inst, ty);
        Ok(())
    }

    fn call_out_type(&self, opcode: Opcode, p: PropRef) -> DataType {
        match opcode {
            Opcode::CallPropVoid | Opcode::CallSuperVoid => DataType::Any,
            _ => self.graph.props[p].value_ty,
        }
    }

    /// Bind one resolved trait as a call or construct target.
    #[allow(clippy::too_many_arguments)]
    fn bind_call_trait(
        &mut self,
        inst: Inst,
        p: PropRef,
        obj_ty: DataType,
        owner: ClassId,
        is_static: bool,
        desc: TraitDesc,
        args: &[Value],
        opcode: Opcode,
    ) -> BodyResult<()> {
        let construct = opcode == Opcode::ConstructProp;
        match (&desc.kind, construct) {
            (TraitKind::Class { class }, true) => {
                let class = *class;
                self.bind_constructor(p, obj_ty, class, args.len() as u32);
            }
            (TraitKind::Class { class }, false) => {
                // Calling a class object is a conversion/cast.
                let class = *class;
                self.bind_class_call(inst, p, obj_ty, class, args)?;
            }
            (TraitKind::Method { method } | TraitKind::Function { method }, false) => {
                let method = *method;
                let sig = self.env.registry.method_sig(method).clone();
                if let Some((intrinsic, ty)) =
                    self.recognise_intrinsic(owner, is_static, &desc.name, args)
                {
                    let prop = &mut self.graph.props[p];
                    prop.reset();
                    prop.kind = PropKind::Intrinsic;
                    prop.owner = owner.into();
                    prop.is_static = is_static;
                    prop.trait_desc = Some(desc);
                    prop.intrinsic = Some(intrinsic);
                    prop.value_ty = ty;
                    prop.seen_ty = obj_ty;
                    return Ok(());
                }
                let (kind, value_ty) = if sig.accepts_argc(args.len() as u32) {
                    (PropKind::Trait, self.env.class_to_type(sig.ret))
                } else {
                    (PropKind::TraitRtInvoke, DataType::Any)
                };
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = kind;
                prop.owner = owner.into();
                prop.is_static = is_static;
                prop.trait_desc = Some(desc);
                prop.value_ty = value_ty;
                prop.seen_ty = obj_ty;
            }
            _ => {
                // A field or accessor holds the callee; the dispatch
                // itself happens at runtime, but the trait stays bound.
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = PropKind::TraitRtInvoke;
                prop.owner = owner.into();
                prop.is_static = is_static;
                prop.trait_desc = Some(desc);
                prop.value_ty = DataType::Any;
                prop.seen_ty = obj_ty;
            }
        }
        Ok(())
    }

    /// `Class(x)` with one argument is a conversion; a primitive target
    /// folds constants and gets an intrinsic tag.
    fn bind_class_call(
        &mut self,
        inst: Inst,
        p: PropRef,
        obj_ty: DataType,
        class: ClassId,
        args: &[Value],
    ) -> BodyResult<()> {
        if args.len() != 1 {
            let prop = &mut self.graph.props[p];
            prop.reset();
            prop.kind = PropKind::TraitRtInvoke;
            prop.owner = class.into();
            prop.value_ty = DataType::Any;
            prop.seen_ty = obj_ty;
            return Ok(());
        }
        let b = |builtin| self.env.registry.builtin(builtin) == Some(class);
        let (intrinsic, ty) = if b(Builtin::Int) {
            (Intrinsic::ConvertInt, DataType::Int)
        } else if b(Builtin::Uint) {
            (Intrinsic::ConvertUint, DataType::Uint)
        } else if b(Builtin::Number) {
            (Intrinsic::ConvertNumber, DataType::Number)
        } else if b(Builtin::String) {
            (Intrinsic::ConvertString, DataType::String)
        } else if b(Builtin::Boolean) {
            (Intrinsic::ConvertBool, DataType::Bool)
        } else {
            // A cast through any other class keeps the class type.
            let prop = &mut self.graph.props[p];
            prop.reset();
            prop.kind = PropKind::Intrinsic;
            prop.owner = class.into();
            prop.intrinsic = Some(Intrinsic::ClassCast);
            prop.value_ty = DataType::Object(class);
            prop.seen_ty = obj_ty;
            return Ok(());
        };
        let prop = &mut self.graph.props[p];
        prop.reset();
        prop.kind = PropKind::Intrinsic;
        prop.owner = class.into();
        prop.intrinsic = Some(intrinsic);
        prop.value_ty = ty;
        prop.seen_ty = obj_ty;
        // Constant argument: evaluate the conversion now.
        let arg = args[0];
        if let Some(k) = self.value_const(arg) {
            match ty {
                DataType::Int => {
                    if let Some(n) = self.const_to_number(k) {
                        self.set_out_const(
                            inst,
                            ty,
                            Const::Int(crate::binder::dispatch::to_int32(n)),
                        );
                    }
                }
                DataType::Uint => {
                    if let Some(n) = self.const_to_number(k) {
                        self.set_out_const(
                            inst,
                            ty,
                            Const::Uint(crate::binder::dispatch::to_uint32(n)),
                        );
                    }
                }
                DataType::Number => {
                    if let Some(n) = self.const_to_number(k) {
                        self.set_out_const(inst, ty, Const::Double(n));
                    }
                }
                DataType::Bool => {
                    if let Some(v) = self.const_to_boolean(k) {
                        self.set_out_const(inst, ty, Const::Bool(v));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn bind_constructor(&mut self, p: PropRef, obj_ty: DataType, class: ClassId, argc: u32) {
        let data = self.env.registry.class(class);
        let kind = match &data.constructor {
            Some(sig) if sig.accepts_argc(argc) => PropKind::Trait,
            Some(_) => PropKind::TraitRtInvoke,
            None => PropKind::Runtime,
        };
        let value_ty = DataType::Object(class);
        let prop = &mut self.graph.props[p];
        prop.reset();
        prop.kind = kind;
        prop.owner = class.into();
        prop.value_ty = value_ty;
        prop.seen_ty = obj_ty;
    }

    /// The intrinsic recognition table.
    fn recognise_intrinsic(
        &self,
        owner: ClassId,
        is_static: bool,
        name: &str,
        args: &[Value],
    ) -> Option<(Intrinsic, DataType)> {
        let b = |builtin| self.env.registry.builtin(builtin) == Some(owner);
        let arg_is_int = |i: usize| {
            args.get(i)
                .map_or(false, |&v| self.value_ty(v) == DataType::Int)
        };
        if b(Builtin::Math) && is_static && args.len() == 2 && arg_is_int(0) && arg_is_int(1) {
            match name {
                "min" => return Some((Intrinsic::MathMinInt, DataType::Int)),
                "max" => return Some((Intrinsic::MathMaxInt, DataType::Int)),
                _ => {}
            }
        }
        if b(Builtin::String) && !is_static && args.len() == 1 && arg_is_int(0) {
            match name {
                "charAt" => return Some((Intrinsic::StringCharAt, DataType::String)),
                "charCodeAt" => return Some((Intrinsic::StringCharCodeAt, DataType::Number)),
                _ => {}
            }
        }
        if b(Builtin::Array) && !is_static && args.len() == 1 && name == "push" {
            return Some((Intrinsic::ArrayPushOne, DataType::Uint));
        }
        None
    }

    /// findproperty / findpropstrict / finddef: walk the method's scope
    /// stack, then the captured scope stack, then the globals.
    pub(crate) fn resolve_find(&mut self, inst: Inst) -> BodyResult<()> {
        let opcode = self.graph.insts[inst].opcode;
        let p = self.prop_for(inst);
        let parts = self.name_parts(inst, 0)?;
        if parts.runtime {
            self.mark_runtime(p, DataType::Any);
            self.set_out(inst, DataType::Any);
            return Ok(());
        }
        let Some(name) = parts.name.clone() else {
            self.mark_runtime(p, DataType::Any);
            self.set_out(inst, DataType::Any);
            return Ok(());
        };

        // The method's own scope stack, top to bottom.
        let scope: Vec<Value> = self.scope.clone();
        for (depth, &sv) in scope.iter().enumerate().rev() {
            let sv_ty = self.value_ty(sv);
            if self.graph.values[sv].flags.is_with_scope() && self.scope_may_be_dynamic(sv_ty) {
                self.mark_runtime(p, DataType::Any);
                self.set_out(inst, DataType::Any);
                return Ok(());
            }
            if parts.from_ns_set && self.graph.values[sv].flags.is_late_name_binding() {
                self.mark_runtime(p, DataType::Any);
                self.set_out(inst, DataType::Any);
                return Ok(());
            }
            if let Lookup::Found {
                owner,
                is_static,
                desc,
            } = self.lookup_on_type(sv_ty, &name, &parts.nss)
            {
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = PropKind::Trait;
                prop.location = PropLocation::Scope(depth as u32);
                prop.owner = owner.into();
                prop.is_static = is_static;
                prop.trait_desc = Some(desc);
                prop.value_ty = sv_ty;
                prop.seen_ty = sv_ty;
                self.set_out(inst, sv_ty);
                return Ok(());
            }
        }

        // The captured scope stack, innermost first.
        for (index, entry) in self.method.captured_scope.iter().enumerate().rev() {
            let entry_ty = if entry.global {
                DataType::Global
            } else {
                self.env.class_to_type(entry.class)
            };
            if entry.with && self.scope_may_be_dynamic(entry_ty) {
                self.mark_runtime(p, DataType::Any);
                self.set_out(inst, DataType::Any);
                return Ok(());
            }
            let found = match self.lookup_on_type(entry_ty, &name, &parts.nss) {
                Lookup::Found { desc, .. } | Lookup::GlobalFound { desc } => Some(desc),
                _ => None,
            };
            if let Some(desc) = found {
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = PropKind::Trait;
                prop.location = PropLocation::CapturedScope(index as u32);
                prop.trait_desc = Some(desc);
                prop.value_ty = entry_ty;
                prop.seen_ty = entry_ty;
                self.set_out(inst, entry_ty);
                return Ok(());
            }
        }

        // The application-domain globals.
        if let Some(desc) = self.env.registry.global_trait(&name, &parts.nss) {
            let desc = desc.clone();
            let prop = &mut self.graph.props[p];
            prop.reset();
            prop.kind = PropKind::Trait;
            prop.location = PropLocation::Global;
            prop.trait_desc = Some(desc);
            prop.value_ty = DataType::Global;
            prop.seen_ty = DataType::Global;
            self.set_out(inst, DataType::Global);
            return Ok(());
        }

        // Unresolved: findpropstrict raises its reference error at
        // runtime; plain findproperty falls back to the global object.
        self.mark_runtime(p, DataType::Any);
        let ty = match opcode {
            Opcode::FindProperty | Opcode::FindDef => DataType::Global,
            _ => DataType::Any,
        };
        self.set_out(inst, ty);
        Ok(())
    }

    fn scope_may_be_dynamic(&self, ty: DataType) -> bool {
        match self.env.type_class(ty) {
            Some(c) => {
                let flags = self.env.registry.class(c).flags;
                flags.is_dynamic() || !flags.is_final()
            }
            None => true,
        }
    }

    /// getlex = findpropstrict + getproperty, fused. Runtime name
    /// components are not expressible here.
    pub(crate) fn resolve_get_lex(&mut self, inst: Inst) -> BodyResult<()> {
        let mn = self.multiname_at(inst)?;
        if mn.runtime_arg_count() != 0 {
            let data = &self.graph.insts[inst];
            return Err(BodyError::Verify {
                offset: data.offset,
                kind: VerifyKind::InvalidMultiname {
                    index: data.payload.multiname_index().unwrap_or(0),
                },
            });
        }
        self.resolve_find(inst)?;
        let p = self.prop_for(inst);
        let prop = &self.graph.props[p];
        if prop.kind == PropKind::Trait {
            if let Some(desc) = prop.trait_desc.clone() {
                let ty = self.trait_value_type(&desc);
                self.graph.props[p].value_ty = ty;
                self.set_out(inst, ty);
                if matches!(desc.kind, TraitKind::Class { .. }) {
                    if let TraitKind::Class { class } = desc.kind {
                        if let Some(out) = self.out(inst) {
                            let data = &mut self.graph.values[out];
                            data.constant = Some(Const::Class(class));
                            data.flags.set_not_null();
                        }
                    }
                }
                return Ok(());
            }
        }
        self.set_out(inst, DataType::Any);
        Ok(())
    }

    /// Super accesses bind against the parent of the method's class.
    pub(crate) fn resolve_super(&mut self, inst: Inst) -> BodyResult<()> {
        let offset = self.graph.insts[inst].offset;
        let parent = self
            .method
            .this_class
            .and_then(|c| self.env.registry.class(c).parent)
            .ok_or(BodyError::Verify {
                offset,
                kind: VerifyKind::IllegalSuper,
            })?;
        let opcode = self.graph.insts[inst].opcode;
        let p = self.prop_for(inst);
        let parts = self.name_parts(inst, 1)?;
        let obj_ty = DataType::Object(parent);
        if parts.runtime {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, DataType::Any);
            return Ok(());
        }
        let Some(name) = parts.name.clone() else {
            self.mark_runtime(p, obj_ty);
            self.set_out(inst, DataType::Any);
            return Ok(());
        };
        match self.env.registry.lookup_trait(parent, &name, &parts.nss, false) {
            Some(desc) => {
                let desc = desc.clone();
                let value_ty = match opcode {
                    Opcode::GetSuper => self.trait_value_type(&desc),
                    Opcode::CallSuper => match &desc.kind {
                        TraitKind::Method { method } => self
                            .env
                            .class_to_type(self.env.registry.method_sig(*method).ret),
                        _ => DataType::Any,
                    },
                    _ => DataType::Any,
                };
                let prop = &mut self.graph.props[p];
                prop.reset();
                prop.kind = PropKind::Trait;
                prop.owner = parent.into();
                prop.trait_desc = Some(desc);
                prop.value_ty = value_ty;
                prop.seen_ty = obj_ty;
                self.set_out(inst, value_ty);
            }
            None => {
                self.mark_runtime(p, obj_ty);
                self.set_out(inst, DataType::Any);
            }
        }
        Ok(())
    }

    /// construct / constructsuper.
    pub(crate) fn resolve_construct(&mut self, inst: Inst) -> BodyResult<()> {
        let opcode = self.graph.insts[inst].opcode;
        let argc = self.graph.insts[inst].payload.argc().unwrap_or(0);
        if opcode == Opcode::ConstructSuper {
            let offset = self.graph.insts[inst].offset;
            self.method
                .this_class
                .and_then(|c| self.env.registry.class(c).parent)
                .ok_or(BodyError::Verify {
                    offset,
                    kind: VerifyKind::IllegalSuper,
                })?;
            return Ok(());
        }
        let obj = self.graph.popped(inst)[0];
        let obj_ty = self.value_ty(obj);
        if obj_ty == DataType::Unknown {
            self.set_out(inst, DataType::Unknown);
            return Ok(());
        }
        let p = self.prop_for(inst);
        match obj_ty {
            DataType::Class(c) => {
                self.bind_constructor(p, obj_ty, c, argc);
                let ty = self.graph.props[p].value_ty;
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
            _ => {
                self.mark_runtime(p, obj_ty);
                self.set_out(inst, DataType::Any);
            }
        }
        Ok(())
    }

    /// Calling a value: only a known closure gives a static return
    /// type.
    pub(crate) fn resolve_call(&mut self, inst: Inst) {
        let func = self.graph.popped(inst)[0];
        let ty = match self.value_ty(func) {
            DataType::Function(m) => self.env.class_to_type(self.env.registry.method_sig(m).ret),
            DataType::Unknown => DataType::Unknown,
            _ => DataType::Any,
        };
        self.set_out(inst, ty);
    }

    /// callstatic / callmethod.
    pub(crate) fn resolve_call_index(&mut self, inst: Inst) {
        let opcode = self.graph.insts[inst].opcode;
        let index = match self.graph.insts[inst].payload {
            Payload::CallIndex { index, .. } => index,
            _ => 0,
        };
        let ty = if opcode == Opcode::CallStatic {
            match self.env.registry.method_for_method_info(index) {
                Some(m) => self.env.class_to_type(self.env.registry.method_sig(m).ret),
                None => DataType::Any,
            }
        } else {
            DataType::Any
        };
        self.set_out(inst, ty);
    }

    /// Slot accesses mandate early binding.
    pub(crate) fn resolve_slot(&mut self, inst: Inst) -> BodyResult<()> {
        let opcode = self.graph.insts[inst].opcode;
        let offset = self.graph.insts[inst].offset;
        let slot_id = match self.graph.insts[inst].payload {
            Payload::Slot { index } => index,
            _ => 0,
        };
        match opcode {
            Opcode::GetSlot | Opcode::SetSlot => {
                let obj = self.graph.popped(inst)[0];
                let obj_ty = self.value_ty(obj);
                if obj_ty == DataType::Unknown {
                    self.set_out(inst, DataType::Unknown);
                    return Ok(());
                }
                let Some(c) = self.env.type_class(obj_ty) else {
                    return Err(BodyError::Reference {
                        offset,
                        message: format!("slot {slot_id} on a receiver with no slot table").into(),
                    });
                };
                match self.find_slot_trait(c, slot_id) {
                    Some(ty) => {
                        if opcode == Opcode::GetSlot {
                            self.set_out(inst, ty);
                        }
                    }
                    None => {
                        return Err(BodyError::Reference {
                            offset,
                            message: format!(
                                "no slot {slot_id} on {}",
                                self.env.registry.class(c).name
                            )
                            .into(),
                        })
                    }
                }
            }
            _ => {
                // Global slot tables are host-defined; leave the access
                // to runtime machinery.
                if opcode == Opcode::GetGlobalSlot {
                    self.set_out(inst, DataType::Any);
                }
            }
        }
        Ok(())
    }

    fn find_slot_trait(&self, class: ClassId, slot_id: u32) -> Option<DataType> {
        let mut cur = Some(class);
        while let Some(id) = cur {
            let c = self.env.registry.class(id);
            for t in &c.instance_traits {
                match t.kind {
                    TraitKind::Slot { slot_id: s, ty } | TraitKind::Const { slot_id: s, ty }
                        if s == slot_id && s != 0 =>
                    {
                        return Some(self.env.class_to_type(ty));
                    }
                    _ => {}
                }
            }
            cur = c.parent;
        }
        None
    }

    /// `applytype`: `Vector.<int>` and friends get their specialised
    /// classes; anything else is left dynamic.
    pub(crate) fn apply_type(&mut self, inst: Inst) {
        let popped = self.graph.popped(inst);
        let base = popped[0];
        let specialised = (|| {
            let Some(Const::Class(base_class)) = self.value_const(base) else {
                return None;
            };
            if self.env.registry.builtin(Builtin::Vector) != Some(base_class)
                || popped.len() != 2
            {
                return None;
            }
            let Some(Const::Class(arg)) = self.value_const(popped[1]) else {
                return None;
            };
            let b = |builtin| self.env.registry.builtin(builtin);
            if b(Builtin::Int) == Some(arg) {
                b(Builtin::VectorInt)
            } else if b(Builtin::Uint) == Some(arg) {
                b(Builtin::VectorUint)
            } else if b(Builtin::Number) == Some(arg) {
                b(Builtin::VectorNumber)
            } else {
                None
            }
        })();
        match specialised {
            Some(c) => self.set_out_const(inst, DataType::Class(c), Const::Class(c)),
            None => self.set_out(inst, DataType::Any),
        }
    }

    /// `newclass`: the base on the stack must be a class or null.
    pub(crate) fn new_class(&mut self, inst: Inst) -> BodyResult<()> {
        let base = self.graph.popped(inst)[0];
        let base_ty = self.value_ty(base);
        match base_ty {
            DataType::Unknown
            | DataType::Any
            | DataType::Class(_)
            | DataType::Null
            | DataType::Object(_) => {}
            _ => {
                return Err(BodyError::Verify {
                    offset: self.graph.insts[inst].offset,
                    kind: VerifyKind::IllegalNewclassBase,
                })
            }
        }
        let index = match self.graph.insts[inst].payload {
            Payload::ClassInfo { index } => index,
            _ => 0,
        };
        match self.env.registry.class_for_class_info(index) {
            Some(c) => self.set_out_const(inst, DataType::Class(c), Const::Class(c)),
            None => self.set_out(inst, DataType::Any),
        }
        Ok(())
    }

    /// `newfunction`: a known method gives a typed closure.
    pub(crate) fn new_function(&mut self, inst: Inst) {
        let index = match self.graph.insts[inst].payload {
            Payload::MethodInfo { index } => index,
            _ => 0,
        };
        match self.env.registry.method_for_method_info(index) {
            Some(m) => self.set_out_const(inst, DataType::Function(m), Const::Method(m)),
            None => {
                let ty = self
                    .env
                    .class_to_type(self.env.registry.builtin(Builtin::Function));
                self.set_out(inst, ty);
                if let Some(out) = self.out(inst) {
                    self.graph.values[out].flags.set_not_null();
                }
            }
        }
    }
}
