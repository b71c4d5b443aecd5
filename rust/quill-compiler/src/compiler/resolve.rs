//! Semantic resolution: name binding, typing, capture analysis, implicit
//! returns, constant folding, and varargs-wrapper synthesis.
//!
//! The resolver mutates the parsed unit in place. Function bodies and
//! variable initialisers are taken out of their arena slots while being
//! resolved and put back afterwards, so arena access never aliases the AST
//! being walked.

use crate::compiler::ast::*;
use crate::compiler::constfold;
use crate::compiler::error::{CompileError, ErrorKind};
use crate::compiler::parser::{ident_expr, synth};
use crate::compiler::tokens::{Span, Token, TokenType};
use indexmap::IndexMap;
use quill_core::{
    names, BuiltinRegistry, ClassDescriptor, ClassId, ClassMap, CompileContext,
    FunctionDescriptor, PackageRegistry, Type, TypeKind, Value,
};
use std::collections::HashMap;

struct Scope {
    vars: IndexMap<String, VarId>,
    is_resolving_params: bool,
    is_function_body: bool,
    /// Statements queued for insertion ahead of the one being resolved
    /// (regex capture-array declarations).
    inserts: Vec<Stmt>,
}

impl Scope {
    fn new() -> Self {
        Scope {
            vars: IndexMap::new(),
            is_resolving_params: false,
            is_function_body: false,
            inserts: Vec::new(),
        }
    }
}

struct Frame {
    fun: FunId,
    blocks: Vec<Scope>,
    loop_depth: usize,
}

pub struct Resolver<'a> {
    ctx: &'a mut CompileContext,
    builtins: &'a dyn BuiltinRegistry,
    packages: &'a dyn PackageRegistry,
    unit: &'a mut ParsedUnit,
    classes: ClassMap,
    errors: Vec<CompileError>,
    class_stack: Vec<ClassId>,
    frames: Vec<Frame>,
    /// Explicit imports: simple or aliased name to class.
    imports: HashMap<String, ClassId>,
    /// Top-level classes of this unit by simple name.
    local_classes: HashMap<String, ClassId>,
    /// Scope variables that stand for declared functions.
    fun_of_var: HashMap<VarId, FunId>,
    /// Lazily created VarDecls for caller-supplied globals.
    global_vars: HashMap<String, VarId>,
    init_funs: HashMap<ClassId, FunId>,
    script_class_id: Option<ClassId>,
    condition_depth: usize,
    recover_next_block: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(
        unit: &'a mut ParsedUnit,
        ctx: &'a mut CompileContext,
        builtins: &'a dyn BuiltinRegistry,
        packages: &'a dyn PackageRegistry,
    ) -> Self {
        Resolver {
            ctx,
            builtins,
            packages,
            unit,
            classes: ClassMap::new(),
            errors: Vec::new(),
            class_stack: Vec::new(),
            frames: Vec::new(),
            imports: HashMap::new(),
            local_classes: HashMap::new(),
            fun_of_var: HashMap::new(),
            global_vars: HashMap::new(),
            init_funs: HashMap::new(),
            script_class_id: None,
            condition_depth: 0,
            recover_next_block: false,
        }
    }

    /// Run resolution over the whole unit. On success the class map holds
    /// every descriptor the back end needs.
    pub fn resolve(mut self) -> Result<ClassMap, Vec<CompileError>> {
        self.process_imports();

        // Phase 1: register every class so forward type references have a
        // descriptor slot to point at.
        let mut script_class = std::mem::replace(
            &mut self.unit.script_class,
            placeholder_class(),
        );
        self.register_class(&mut script_class, None, false);
        self.script_class_id = script_class.class_id;

        // Phase 2: populate members (field types, method descriptors,
        // bases) now that every class name resolves.
        self.populate_class(&mut script_class);

        // Phase 3: resolve bodies. Classes first (they cannot capture
        // script locals), then the script main.
        for inner in &mut script_class.inner_classes {
            self.resolve_class_body(inner);
        }
        let main = *script_class.methods.first().expect("script main");
        self.recover_next_block = true;
        if let Err(e) = self.resolve_function(main) {
            self.errors.push(e);
        }
        self.unit.script_class = script_class;

        if self.errors.is_empty() {
            Ok(self.classes)
        } else {
            Err(self.errors)
        }
    }

    // ── Imports ────────────────────────────────────────────────────────

    fn process_imports(&mut self) {
        let main = self.unit.script_main();
        let Some(body) = &self.unit.fun(main).body else {
            return;
        };
        let StmtKind::Block(block) = &body.kind else {
            return;
        };
        let mut found = Vec::new();
        for stmt in &block.stmts {
            if let StmtKind::Import { path, alias } = &stmt.kind {
                found.push((path.clone(), alias.clone()));
            }
        }
        for (path, alias) in found {
            match self.lookup_package_class(&path) {
                Some(id) => {
                    let name = alias
                        .map(|t| t.chars)
                        .unwrap_or_else(|| path.last().unwrap().chars.clone());
                    self.imports.insert(name, id);
                }
                None => {
                    let full: Vec<&str> = path.iter().map(|t| t.text()).collect();
                    self.errors.push(CompileError::new(
                        ErrorKind::UnknownClass(full.join(".")),
                        path[0].span,
                    ));
                }
            }
        }
    }

    /// Resolve a dotted path against the package registry alone.
    fn lookup_package_class(&mut self, path: &[Token]) -> Option<ClassId> {
        for split in (0..path.len()).rev() {
            let package_name: Vec<&str> = path[..split].iter().map(|t| t.text()).collect();
            let package_name = package_name.join(".");
            let Some(pkg) = self.packages.package(&package_name) else {
                continue;
            };
            let Some(descriptor) = pkg.class(path[split].text()) else {
                continue;
            };
            let mut id = self.intern_external(descriptor);
            let mut ok = true;
            for seg in &path[split + 1..] {
                match self.classes.get(id).inner_classes.get(seg.text()) {
                    Some(inner) => id = *inner,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                return Some(id);
            }
        }
        None
    }

    fn intern_external(&mut self, descriptor: ClassDescriptor) -> ClassId {
        if let Some(id) = self.classes.lookup(&descriptor.qualified_name) {
            return id;
        }
        self.classes.alloc(descriptor)
    }

    // ── Class registration and population ──────────────────────────────

    fn register_class(&mut self, decl: &mut ClassDecl, outer: Option<ClassId>, top_level: bool) {
        let name = decl.name.text().to_string();
        let qualified = match outer {
            Some(o) => format!("{}.{}", self.classes.get(o).qualified_name, name),
            None if decl.package_name.is_empty() => {
                format!("{}.{}", self.ctx.package_prefix, name)
            }
            None => format!(
                "{}.{}.{}",
                self.ctx.package_prefix, decl.package_name, name
            ),
        };
        if self.classes.lookup(&qualified).is_some() {
            self.errors.push(CompileError::new(
                ErrorKind::DuplicateName(name.clone()),
                decl.name.span,
            ));
            return;
        }
        let descriptor = ClassDescriptor::new(name.clone(), decl.package_name.clone(), qualified);
        let id = self.classes.alloc(descriptor);
        decl.class_id = Some(id);
        if let Some(o) = outer {
            self.classes
                .get_mut(o)
                .inner_classes
                .insert(name.clone(), id);
        }
        if top_level {
            // Top-level classes are addressable by simple name.
            self.local_classes.entry(name).or_insert(id);
        }
        for inner in &mut decl.inner_classes {
            // Children of the script class are the script's top-level
            // classes.
            self.register_class(inner, Some(id), decl.is_script_class);
        }
    }

    fn populate_class(&mut self, decl: &mut ClassDecl) {
        let Some(id) = decl.class_id else { return };
        self.class_stack.push(id);

        if let Some(base_ref) = decl.base.clone() {
            match self.resolve_type_ref(&base_ref) {
                Ok(t) => match t.class_id() {
                    Some(base_id) => self.classes.get_mut(id).base = Some(base_id),
                    None => self.errors.push(CompileError::new(
                        ErrorKind::UnknownClass(format!("{}", t)),
                        base_ref.span,
                    )),
                },
                Err(e) => self.errors.push(e),
            }
        }

        // Fields.
        for field_id in decl.fields.clone() {
            let var = self.unit.var(field_id);
            let name = var.name.text().to_string();
            let span = var.name.span;
            let has_default = matches!(
                &var.initialiser,
                Some(e) if !matches!(e.kind, ExprKind::DefaultValue { .. })
            );
            let declared = var.declared_type.clone();
            let ty = match declared {
                Some(tr) => match self.resolve_type_ref(&tr) {
                    Ok(t) => t,
                    Err(e) => {
                        self.errors.push(e);
                        Type::ANY
                    }
                },
                None => Type::ANY,
            };
            if self.builtins.lookup_method(&Type::ANY, &name).is_some() {
                self.errors
                    .push(CompileError::new(ErrorKind::ClashesWithBuiltin(name.clone()), span));
                continue;
            }
            let desc = self.classes.get_mut(id);
            if desc.fields.contains_key(&name) || desc.methods.contains_key(&name) {
                self.errors
                    .push(CompileError::new(ErrorKind::DuplicateName(name.clone()), span));
                continue;
            }
            desc.fields.insert(name.clone(), ty);
            if has_default {
                desc.optional_fields.insert(name.clone());
            }
            let var = self.unit.var_mut(field_id);
            var.is_field = true;
            var.ty = Some(ty);
            var.is_defined = true;
            // Fields without an initialiser start at the default value of
            // their type; the init method stores it.
            if var.initialiser.is_none() {
                var.initialiser =
                    Some(Expr::new(ExprKind::DefaultValue { of: ty }, span));
            }
        }

        // Methods.
        for fid in decl.methods.clone() {
            let fun_name = self.unit.fun(fid).given_name.clone();
            let span = self.unit.fun(fid).span;
            if !decl.is_script_class {
                if self.builtins.lookup_method(&Type::ANY, &fun_name).is_some() {
                    self.errors.push(CompileError::new(
                        ErrorKind::ClashesWithBuiltin(fun_name.clone()),
                        span,
                    ));
                    continue;
                }
                let desc = self.classes.get(id);
                if desc.fields.contains_key(&fun_name) || desc.methods.contains_key(&fun_name) {
                    self.errors.push(CompileError::new(
                        ErrorKind::DuplicateName(fun_name.clone()),
                        span,
                    ));
                    continue;
                }
            }
            match self.build_descriptor(fid, Some(id)) {
                Ok(descriptor) => {
                    self.unit.fun_mut(fid).descriptor = Some(descriptor.clone());
                    self.classes.get_mut(id).methods.insert(fun_name, descriptor);
                }
                Err(e) => self.errors.push(e),
            }
        }

        // Synthesised init-method descriptor: one parameter per field, the
        // ones without defaults mandatory.
        if !decl.is_script_class {
            let desc = self.classes.get(id);
            let mut init = FunctionDescriptor::new(names::INIT_METHOD, Type::instance(id));
            init.is_init_method = true;
            init.param_count = desc.fields.len();
            init.param_names = desc.fields.keys().cloned().collect();
            init.param_types = desc.fields.values().copied().collect();
            init.mandatory_params = desc
                .fields
                .keys()
                .filter(|k| !desc.optional_fields.contains(*k))
                .cloned()
                .collect();
            init.mandatory_count = init.mandatory_params.len();
            init.wrapper_method = Some(init.wrapper_name());
            self.classes.get_mut(id).init_method = Some(init);

            let mut init_fun = Function::new(
                names::INIT_METHOD,
                TypeRef::builtin(Type::instance(id), decl.span),
                decl.span,
            );
            init_fun.is_init_method = true;
            // One parameter per field, in field order. An explicit field
            // initialiser becomes the parameter default; fields without
            // one keep a mandatory parameter (the synthesised default
            // value is what the init method stores, not a call default).
            for field_id in decl.fields.clone() {
                let (name_tok, field_ty, field_span, default) = {
                    let field = self.unit.var(field_id);
                    let default = match &field.initialiser {
                        Some(e) if !matches!(e.kind, ExprKind::DefaultValue { .. }) => {
                            Some(e.clone())
                        }
                        _ => None,
                    };
                    (
                        field.name.clone(),
                        field.ty.unwrap_or(Type::ANY),
                        field.span,
                        default,
                    )
                };
                let mut p = VarDecl::new(name_tok);
                p.declared_type = Some(TypeRef::builtin(field_ty, field_span));
                p.is_param = true;
                p.initialiser = default;
                let pid = alloc_var(self.unit, p);
                init_fun.params.push(pid);
            }
            let init_id = alloc_fun(self.unit, init_fun);
            self.init_funs.insert(id, init_id);
        }

        for inner in &mut decl.inner_classes {
            self.populate_class(inner);
        }
        self.class_stack.pop();
    }

    fn build_descriptor(
        &mut self,
        fid: FunId,
        class: Option<ClassId>,
    ) -> Result<FunctionDescriptor, CompileError> {
        let fun = self.unit.fun(fid);
        let name = fun.given_name.clone();
        let return_ref = fun.return_type.clone();
        let params = fun.params.clone();
        let is_static = fun.is_static;
        let is_wrapper = fun.is_wrapper;
        let is_init_method = fun.is_init_method;
        let return_type = self.resolve_type_ref(&return_ref)?;

        let mut desc = FunctionDescriptor::new(name, return_type);
        desc.is_static = is_static;
        desc.is_wrapper = is_wrapper;
        desc.is_init_method = is_init_method;
        desc.param_count = params.len();
        for pid in params {
            let var = self.unit.var(pid);
            let pname = var.name.text().to_string();
            let mandatory = var.initialiser.is_none();
            let tr = var.declared_type.clone();
            let ty = match tr {
                Some(tr) => self.resolve_type_ref(&tr)?,
                None => Type::ANY,
            };
            self.unit.var_mut(pid).ty.get_or_insert(ty);
            desc.param_names.push(pname.clone());
            desc.param_types.push(ty);
            if mandatory {
                desc.mandatory_params.insert(pname);
                desc.mandatory_count += 1;
            }
        }
        if let Some(cid) = class {
            desc.implementing_class = Some(self.classes.get(cid).qualified_name.clone());
            desc.implementing_method = Some(desc.name.clone());
        }
        if !is_wrapper {
            desc.wrapper_method = Some(desc.wrapper_name());
        }
        Ok(desc)
    }

    fn resolve_class_body(&mut self, decl: &mut ClassDecl) {
        let Some(id) = decl.class_id else { return };
        self.class_stack.push(id);

        // Field initialisers resolve in the context of the init method.
        if let Some(&init_fun) = self.init_funs.get(&id) {
            self.frames.push(Frame {
                fun: init_fun,
                blocks: vec![Scope::new()],
                loop_depth: 0,
            });
            for field_id in decl.fields.clone() {
                if let Err(e) = self.resolve_field_initialiser(field_id) {
                    self.errors.push(e);
                }
            }
            self.frames.pop();
            // The init method goes through the same wrapper machinery as
            // every other method.
            if let Err(e) = self.resolve_function(init_fun) {
                self.errors.push(e);
            }
        }

        for fid in decl.methods.clone() {
            if let Err(e) = self.resolve_function(fid) {
                self.errors.push(e);
            }
        }
        for inner in &mut decl.inner_classes {
            self.resolve_class_body(inner);
        }
        self.class_stack.pop();
    }

    fn resolve_field_initialiser(&mut self, field_id: VarId) -> Result<(), CompileError> {
        let Some(mut init) = self.unit.var_mut(field_id).initialiser.take() else {
            return Ok(());
        };
        let result = self.resolve_expr(&mut init);
        let field_ty = self.unit.var(field_id).ty.unwrap_or(Type::ANY);
        if result.is_ok() {
            let got = init.result_type();
            if !self.classes.convertible(&got, &field_ty) {
                let e = CompileError::new(
                    ErrorKind::IncompatibleTypes {
                        from: got.to_string(),
                        to: field_ty.to_string(),
                    },
                    init.span,
                );
                self.unit.var_mut(field_id).initialiser = Some(init);
                return Err(e);
            }
        }
        self.unit.var_mut(field_id).initialiser = Some(init);
        result
    }

    // ── Types ──────────────────────────────────────────────────────────

    fn resolve_type_ref(&mut self, tr: &TypeRef) -> Result<Type, CompileError> {
        match &tr.kind {
            TypeRefKind::Builtin(t) => Ok(*t),
            TypeRefKind::Path(path) => {
                let id = self.resolve_class_path(path)?;
                Ok(Type::instance(id))
            }
        }
    }

    /// Type references of form `p.k.g.C.Inner` resolve against the
    /// enclosing class chain, then top-level classes, then imports, then
    /// the package registry.
    fn resolve_class_path(&mut self, path: &[Token]) -> Result<ClassId, CompileError> {
        let first = path[0].text();
        let mut resolved: Option<ClassId> = None;

        for &cid in self.class_stack.iter().rev() {
            if self.classes.get(cid).name == first {
                resolved = Some(cid);
                break;
            }
            if let Some(&inner) = self.classes.get(cid).inner_classes.get(first) {
                resolved = Some(inner);
                break;
            }
        }
        if resolved.is_none() {
            resolved = self.local_classes.get(first).copied();
        }
        if resolved.is_none() {
            resolved = self.imports.get(first).copied();
        }
        if let Some(mut id) = resolved {
            for seg in &path[1..] {
                match self.classes.get(id).inner_classes.get(seg.text()) {
                    Some(&inner) => id = inner,
                    None => {
                        return Err(CompileError::new(
                            ErrorKind::UnknownClass(seg.text().to_string()),
                            seg.span,
                        ))
                    }
                }
            }
            return Ok(id);
        }
        if let Some(id) = self.lookup_package_class(path) {
            return Ok(id);
        }
        let full: Vec<&str> = path.iter().map(|t| t.text()).collect();
        Err(CompileError::new(
            ErrorKind::UnknownClass(full.join(".")),
            path[0].span,
        ))
    }

    // ── Scopes and variables ───────────────────────────────────────────

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active function frame")
    }

    fn scope(&mut self) -> &mut Scope {
        self.frame().blocks.last_mut().expect("no active scope")
    }

    fn current_fun(&self) -> FunId {
        self.frames.last().expect("no active function frame").fun
    }

    /// Insert the variable into the current block with the `UNDEFINED`
    /// sentinel state. A local may shadow a field but not another local of
    /// the same function.
    fn declare(&mut self, id: VarId) -> Result<(), CompileError> {
        let name = self.unit.var(id).name.text().to_string();
        let span = self.unit.var(id).span;
        let frame = self.frames.last().expect("no active function frame");
        for scope in &frame.blocks {
            if scope.vars.contains_key(&name) {
                return Err(CompileError::new(ErrorKind::AlreadyDeclared(name), span));
            }
        }
        let fun = frame.fun;
        {
            let var = self.unit.var_mut(id);
            var.owner = Some(fun);
            var.is_defined = false;
            var.ty.get_or_insert(Type::UNDEFINED);
        }
        self.scope().vars.insert(name, id);
        Ok(())
    }

    /// Transition a declared variable to its final, referencable form.
    fn define(&mut self, id: VarId) {
        let level = self.frames.len();
        let is_script_top = {
            let frame = self.frames.last().expect("frame");
            self.unit.fun(frame.fun).is_script_main
                && frame.blocks.last().map(|s| s.is_function_body).unwrap_or(false)
        };
        let var = self.unit.var_mut(id);
        var.is_defined = true;
        var.nesting_level = level;
        if var.ty == Some(Type::UNDEFINED) {
            var.ty = Some(Type::ANY);
        }
        // Under REPL mode, top-level declarations bind into the shared
        // globals map of the context.
        if is_script_top && self.ctx.repl_mode {
            var.is_global = true;
            let name = var.name.text().to_string();
            let ty = var.ty.unwrap_or(Type::ANY);
            self.ctx.globals.insert(name.clone(), ty);
            self.global_vars.insert(name, id);
        }
    }

    /// Resolve a name to a variable, promoting captured locals to heap
    /// locals and threading forwarders through every function between the
    /// declaration and the use.
    fn lookup_var(&mut self, name: &str, span: Span) -> Result<VarId, CompileError> {
        let mut found: Option<(usize, VarId, bool)> = None;
        'outer: for (fi, frame) in self.frames.iter().enumerate().rev() {
            for scope in frame.blocks.iter().rev() {
                if let Some(&id) = scope.vars.get(name) {
                    found = Some((fi, id, scope.is_resolving_params));
                    break 'outer;
                }
            }
        }
        let Some((decl_frame, id, in_params)) = found else {
            return Err(CompileError::new(
                ErrorKind::UndeclaredVariable(name.to_string()),
                span,
            ));
        };

        let var = self.unit.var(id);
        if !var.is_defined {
            // Covers both a direct self-reference and a closure in the
            // initialiser capturing the variable being declared.
            return Err(CompileError::new(ErrorKind::SelfReferenceInInitialiser, span));
        }
        if decl_frame == self.frames.len() - 1 || var.is_global || var.is_field {
            return Ok(id);
        }
        self.capture(name, id, decl_frame, in_params, span)
    }

    /// The variable declared in `decl_frame` is referenced from a nested
    /// function: flag it as a heap local and build the forwarder chain.
    fn capture(
        &mut self,
        name: &str,
        decl: VarId,
        decl_frame: usize,
        owner_resolving_params: bool,
        span: Span,
    ) -> Result<VarId, CompileError> {
        // A forward-referenced function may not capture a variable that was
        // not yet declared at the time of the reference.
        let decl_offset = self.unit.var(decl).span.start;
        for frame in &self.frames[decl_frame + 1..] {
            let fun = self.unit.fun(frame.fun);
            if let Some(early) = fun.earliest_forward_ref {
                if decl_offset > early.start {
                    return Err(CompileError::new(
                        ErrorKind::ForwardCaptureReference {
                            function: fun.given_name.clone(),
                            variable: name.to_string(),
                        },
                        early,
                    ));
                }
            }
        }

        {
            let var = self.unit.var_mut(decl);
            var.is_heap_local = true;
            if owner_resolving_params && var.is_param {
                var.is_passed_as_heap_local = true;
            }
        }
        let original = self.unit.var(decl).original_var.unwrap_or(decl);
        let boxed_ty = self
            .unit
            .var(decl)
            .ty
            .unwrap_or(Type::ANY)
            .boxed();
        let name_tok = self.unit.var(decl).name.clone();

        let mut parent = decl;
        let mut result = decl;
        let frame_funs: Vec<FunId> = self.frames[decl_frame + 1..]
            .iter()
            .map(|f| f.fun)
            .collect();
        for (i, fun_id) in frame_funs.iter().enumerate() {
            let existing = self.unit.fun(*fun_id).heap_local_params.get(name).copied();
            let fwd = match existing {
                Some(fwd) => fwd,
                None => {
                    let mut v = VarDecl::new(name_tok.clone());
                    v.is_param = true;
                    v.is_heap_local = true;
                    v.is_defined = true;
                    v.owner = Some(*fun_id);
                    v.ty = Some(boxed_ty);
                    v.nesting_level = decl_frame + 1 + i;
                    v.original_var = Some(original);
                    v.span = span;
                    let vid = alloc_var(self.unit, v);
                    self.unit
                        .fun_mut(*fun_id)
                        .heap_local_params
                        .insert(name.to_string(), vid);
                    vid
                }
            };
            self.unit.var_mut(fwd).parent_var = Some(parent);
            parent = fwd;
            result = fwd;
        }
        Ok(result)
    }

    /// Find or create the `$@` matcher slot for the current function; a
    /// new declaration is queued for insertion ahead of the statement being
    /// resolved. Closures never reuse the enclosing function's slot.
    fn capture_arr_var(&mut self, span: Span) -> VarId {
        let frame = self.frames.last().expect("frame");
        for scope in frame.blocks.iter().rev() {
            if let Some(&id) = scope.vars.get(names::CAPTURE_ARR) {
                return id;
            }
        }
        let fun = frame.fun;
        let tok = synth(TokenType::Identifier, names::CAPTURE_ARR, span);
        let mut v = VarDecl::new(tok);
        v.ty = Some(Type::MATCHER);
        v.is_defined = true;
        v.owner = Some(fun);
        v.nesting_level = self.frames.len();
        let id = alloc_var(self.unit, v);
        let scope = self.scope();
        scope.vars.insert(names::CAPTURE_ARR.to_string(), id);
        scope.inserts.push(Stmt::new(StmtKind::VarDecl(id), span));
        id
    }

    // ── Functions ──────────────────────────────────────────────────────

    fn resolve_function(&mut self, fid: FunId) -> Result<(), CompileError> {
        if self.unit.fun(fid).resolved || self.unit.fun(fid).demoted {
            return Ok(());
        }
        self.unit.fun_mut(fid).resolved = true;

        if self.unit.fun(fid).descriptor.is_none() {
            let descriptor = self.build_descriptor(fid, self.class_stack.last().copied())?;
            self.unit.fun_mut(fid).descriptor = Some(descriptor);
        }

        self.frames.push(Frame {
            fun: fid,
            blocks: Vec::new(),
            loop_depth: 0,
        });
        let result = self.resolve_function_inner(fid);
        self.frames.pop();
        result?;

        // Every user function gets a varargs wrapper, synthesised as a
        // sibling so it can forward the function's heap locals.
        if !self.unit.fun(fid).is_wrapper && self.unit.fun(fid).wrapper.is_none() {
            let wid = self.build_wrapper(fid)?;
            self.unit.fun_mut(fid).wrapper = Some(wid);
            self.resolve_function(wid)?;
        }
        Ok(())
    }

    fn resolve_function_inner(&mut self, fid: FunId) -> Result<(), CompileError> {
        let mut params_scope = Scope::new();
        params_scope.is_resolving_params = true;
        self.frame().blocks.push(params_scope);

        for pid in self.unit.fun(fid).params.clone() {
            self.declare(pid)?;
            let declared = match self.unit.var(pid).declared_type.clone() {
                Some(tr) => Some(self.resolve_type_ref(&tr)?),
                None => None,
            };
            if let Some(mut init) = self.unit.var_mut(pid).initialiser.take() {
                let r = self.resolve_expr(&mut init);
                self.unit.var_mut(pid).initialiser = Some(init);
                r?;
            }
            self.unit.var_mut(pid).ty = Some(declared.unwrap_or(Type::ANY));
            self.define(pid);
        }
        self.scope().is_resolving_params = false;

        let return_type = self
            .unit
            .fun(fid)
            .descriptor
            .as_ref()
            .map(|d| d.return_type)
            .unwrap_or(Type::ANY);
        let mut body = match self.unit.fun_mut(fid).body.take() {
            Some(b) => b,
            None => {
                self.frame().blocks.pop();
                return Ok(());
            }
        };

        // A regex in a parameter initialiser allocates its matcher slot
        // ahead of the body.
        let leaked = std::mem::take(&mut self.scope().inserts);
        if !leaked.is_empty() {
            if let StmtKind::Block(block) = &mut body.kind {
                for (i, stmt) in leaked.into_iter().enumerate() {
                    block.stmts.insert(i, stmt);
                }
            }
        }

        // Turn the last statement on every reachable control path into an
        // explicit return of the declared type.
        let er = self.explicit_return(&mut body, return_type);
        let result = er.and_then(|_| {
            if let StmtKind::Block(block) = &mut body.kind {
                self.resolve_block_scoped(block, true)
            } else {
                self.resolve_stmt(&mut body)
            }
        });
        self.unit.fun_mut(fid).body = Some(body);
        self.frame().blocks.pop();
        result
    }

    // ── Implicit return synthesis ──────────────────────────────────────

    fn explicit_return(&mut self, stmt: &mut Stmt, ret: Type) -> Result<(), CompileError> {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Return(_) | StmtKind::ThrowError(_) => Ok(()),
            StmtKind::Block(block) => match block.stmts.last_mut() {
                Some(last) => self.explicit_return(last, ret),
                None => {
                    if ret.is_primitive() {
                        return Err(CompileError::new(
                            ErrorKind::MissingReturn(ret.to_string()),
                            span,
                        ));
                    }
                    block.stmts.push(return_null_stmt(span));
                    Ok(())
                }
            },
            StmtKind::Stmts(stmts) => match stmts.last_mut() {
                Some(last) => self.explicit_return(last, ret),
                None => {
                    if ret.is_primitive() {
                        return Err(CompileError::new(
                            ErrorKind::MissingReturn(ret.to_string()),
                            span,
                        ));
                    }
                    stmts.push(return_null_stmt(span));
                    Ok(())
                }
            },
            StmtKind::If { then_stmt, else_stmt, .. } => {
                self.explicit_return(then_stmt, ret)?;
                match else_stmt {
                    Some(e) => self.explicit_return(e, ret),
                    None => {
                        if ret.is_primitive() {
                            return Err(CompileError::new(
                                ErrorKind::MissingReturn(ret.to_string()),
                                span,
                            ));
                        }
                        *else_stmt = Some(Box::new(return_null_stmt(span)));
                        Ok(())
                    }
                }
            }
            StmtKind::ExprStmt(expr) => {
                expr.is_result_used = true;
                let inner = std::mem::replace(
                    expr.as_mut(),
                    Expr::new(ExprKind::Noop, span),
                );
                stmt.kind = StmtKind::Return(Box::new(return_expr(inner, span)));
                Ok(())
            }
            StmtKind::VarDecl(id) => {
                // The declaration stays; its value is returned.
                let name = self.unit.var(*id).name.clone();
                let original = std::mem::replace(&mut stmt.kind, StmtKind::Stmts(Vec::new()));
                let decl_stmt = Stmt::new(original, span);
                let ret_stmt = Stmt::new(
                    StmtKind::Return(Box::new(return_expr(ident_expr(name), span))),
                    span,
                );
                stmt.kind = StmtKind::Stmts(vec![decl_stmt, ret_stmt]);
                Ok(())
            }
            StmtKind::FunDecl(fid) => {
                // Return the method handle of the declared function.
                let fid = *fid;
                let original = std::mem::replace(&mut stmt.kind, StmtKind::Stmts(Vec::new()));
                let decl_stmt = Stmt::new(original, span);
                let handle = Expr::new(ExprKind::FunDecl(fid), span);
                let ret_stmt =
                    Stmt::new(StmtKind::Return(Box::new(return_expr(handle, span))), span);
                stmt.kind = StmtKind::Stmts(vec![decl_stmt, ret_stmt]);
                Ok(())
            }
            _ => {
                // Statements that cannot be expressions.
                if ret.is_primitive() {
                    return Err(CompileError::new(
                        ErrorKind::MissingReturn(ret.to_string()),
                        span,
                    ));
                }
                let original = std::mem::replace(&mut stmt.kind, StmtKind::Stmts(Vec::new()));
                let orig_stmt = Stmt::new(original, span);
                stmt.kind = StmtKind::Stmts(vec![orig_stmt, return_null_stmt(span)]);
                Ok(())
            }
        }
    }

    // ── Statements ─────────────────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &mut Stmt) -> Result<(), CompileError> {
        match &mut stmt.kind {
            StmtKind::Block(block) => self.resolve_block_scoped(block, false),
            StmtKind::Stmts(stmts) => {
                for s in stmts {
                    self.resolve_stmt(s)?;
                }
                Ok(())
            }
            StmtKind::VarDecl(id) => self.resolve_var_decl(*id),
            StmtKind::FunDecl(fid) => {
                let fid = *fid;
                self.resolve_function(fid)
            }
            StmtKind::ExprStmt(expr) => self.resolve_expr(expr),
            StmtKind::If { cond, then_stmt, else_stmt } => {
                self.resolve_condition(cond)?;
                self.resolve_stmt(then_stmt)?;
                if let Some(e) = else_stmt {
                    self.resolve_stmt(e)?;
                }
                Ok(())
            }
            StmtKind::While { cond, body, updates } => {
                self.resolve_condition(cond)?;
                self.frame().loop_depth += 1;
                let r = self.resolve_stmt(body).and_then(|_| match updates {
                    Some(u) => self.resolve_stmt(u),
                    None => Ok(()),
                });
                self.frame().loop_depth -= 1;
                r
            }
            StmtKind::Return(expr) => self.resolve_expr(expr),
            StmtKind::Break | StmtKind::Continue => {
                if self.frame().loop_depth == 0 {
                    return Err(CompileError::new(ErrorKind::BreakOutsideLoop, stmt.span));
                }
                Ok(())
            }
            StmtKind::ThrowError(expr) => self.resolve_expr(expr),
            StmtKind::Import { .. } => Ok(()),
            StmtKind::ClassDecl(_) => Ok(()),
        }
    }

    fn resolve_block_scoped(
        &mut self,
        block: &mut Block,
        is_function_body: bool,
    ) -> Result<(), CompileError> {
        let mut scope = Scope::new();
        scope.is_function_body = is_function_body;
        self.frame().blocks.push(scope);
        let result = self.resolve_block_stmts(block);
        let scope = self.frame().blocks.pop().expect("scope");
        block.variables = scope.vars;
        result
    }

    fn resolve_block_stmts(&mut self, block: &mut Block) -> Result<(), CompileError> {
        let recover = std::mem::take(&mut self.recover_next_block);

        // Functions declared in this block are visible before their
        // declaration statement.
        for fid in block.function_decls.clone() {
            if self.unit.fun(fid).demoted {
                continue;
            }
            let name_tok = match &self.unit.fun(fid).name {
                Some(t) => t.clone(),
                None => continue,
            };
            // Build the descriptor eagerly so forward calls type-check.
            if self.unit.fun(fid).descriptor.is_none() {
                match self.build_descriptor(fid, self.class_stack.last().copied()) {
                    Ok(d) => self.unit.fun_mut(fid).descriptor = Some(d),
                    Err(e) => {
                        if recover {
                            self.errors.push(e);
                        } else {
                            return Err(e);
                        }
                        continue;
                    }
                }
            }
            let mut v = VarDecl::new(name_tok.clone());
            v.ty = Some(Type::FUNCTION);
            v.is_defined = true;
            v.is_final = true;
            let vid = alloc_var(self.unit, v);
            self.fun_of_var.insert(vid, fid);
            if let Err(e) = self.declare(vid) {
                if recover {
                    self.errors.push(e);
                } else {
                    return Err(e);
                }
                continue;
            }
            self.unit.var_mut(vid).is_defined = true;
            self.define(vid);
        }

        let mut i = 0;
        while i < block.stmts.len() {
            let result = self.resolve_stmt(&mut block.stmts[i]);
            match result {
                Ok(()) => {}
                Err(e) if recover => self.errors.push(e),
                Err(e) => return Err(e),
            }
            // Queued capture-array declarations insert ahead of the
            // statement that needed them.
            let inserts = std::mem::take(&mut self.scope().inserts);
            for stmt in inserts {
                block.stmts.insert(i, stmt);
                i += 1;
            }
            // Anything after an unconditional return or throw in the same
            // block is unreachable.
            if matches!(
                block.stmts[i].kind,
                StmtKind::Return(_) | StmtKind::ThrowError(_)
            ) && i + 1 < block.stmts.len()
            {
                let e = CompileError::new(
                    ErrorKind::UnreachableStatement,
                    block.stmts[i + 1].span,
                );
                if recover {
                    self.errors.push(e);
                    break;
                }
                return Err(e);
            }
            i += 1;
        }
        Ok(())
    }

    fn resolve_var_decl(&mut self, id: VarId) -> Result<(), CompileError> {
        // Synthesised matcher slots arrive fully resolved.
        if self.unit.var(id).name.text() == names::CAPTURE_ARR {
            return Ok(());
        }
        self.declare(id)?;
        let declared = match self.unit.var(id).declared_type.clone() {
            Some(tr) => Some(self.resolve_type_ref(&tr)?),
            None => None,
        };
        let init_ty = if let Some(mut init) = self.unit.var_mut(id).initialiser.take() {
            init.is_result_used = true;
            let r = self.resolve_expr(&mut init);
            let ty = init.result_type();
            self.unit.var_mut(id).initialiser = Some(init);
            r?;
            Some(ty)
        } else {
            None
        };
        let ty = declared.unwrap_or_else(|| init_ty.unwrap_or(Type::ANY));
        if let (Some(d), Some(i)) = (declared, init_ty) {
            if !self.classes.convertible(&i, &d) {
                let span = self.unit.var(id).span;
                return Err(CompileError::new(
                    ErrorKind::IncompatibleTypes { from: i.to_string(), to: d.to_string() },
                    span,
                ));
            }
        }
        self.unit.var_mut(id).ty = Some(ty);
        self.define(id);
        Ok(())
    }

    fn resolve_condition(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        self.condition_depth += 1;
        let r = self.resolve_expr(expr);
        self.condition_depth -= 1;
        r
    }

    // ── Expressions ────────────────────────────────────────────────────

    #[allow(clippy::too_many_lines)]
    fn resolve_expr(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        match &mut expr.kind {
            ExprKind::Literal(v) => {
                expr.ty = Some(match v {
                    Value::Null => Type::ANY,
                    ref other => quill_core::Type::of_value(other),
                });
                expr.is_const = true;
                expr.const_value = Some(v.clone());
                Ok(())
            }
            ExprKind::TypeLiteral(tr) => {
                let tr = tr.clone();
                let t = self.resolve_type_ref(&tr)?;
                expr.ty = Some(t);
                Ok(())
            }
            ExprKind::Identifier { name, .. } => {
                let name = name.clone();
                self.resolve_identifier(expr, &name, false)
            }
            ExprKind::ListLiteral(elements) => {
                for e in elements {
                    self.resolve_expr(e)?;
                }
                expr.ty = Some(Type::LIST);
                Ok(())
            }
            ExprKind::MapLiteral { entries, .. } => {
                for (k, v) in entries {
                    self.resolve_expr(k)?;
                    self.resolve_expr(v)?;
                }
                expr.ty = Some(Type::MAP);
                Ok(())
            }
            ExprKind::ExprString { parts } => {
                for p in parts {
                    self.resolve_expr(p)?;
                }
                expr.ty = Some(Type::STRING);
                Ok(())
            }
            ExprKind::Binary { .. } => self.resolve_binary(expr),
            ExprKind::Ternary { cond, if_true, if_false } => {
                self.condition_depth += 1;
                let r = self.resolve_expr(cond);
                self.condition_depth -= 1;
                r?;
                self.resolve_expr(if_true)?;
                self.resolve_expr(if_false)?;
                let a = if_true.result_type();
                let b = if_false.result_type();
                if !self.classes.convertible(&a, &b) && !self.classes.convertible(&b, &a) {
                    return Err(CompileError::new(
                        ErrorKind::IncompatibleTypes { from: a.to_string(), to: b.to_string() },
                        span,
                    ));
                }
                expr.ty = Some(join_types(&a, &b));
                Ok(())
            }
            ExprKind::PrefixUnary { op, expr: operand } => {
                let op = op.clone();
                if op.kind == TokenType::Bang {
                    self.condition_depth += 1;
                    let r = self.resolve_expr(operand);
                    self.condition_depth -= 1;
                    r?;
                } else {
                    self.resolve_expr(operand)?;
                }
                let oty = operand.result_type();
                let ty = match op.kind {
                    TokenType::Bang => Type::BOOLEAN,
                    TokenType::Minus | TokenType::Plus => {
                        if !oty.is_numeric() && !oty.is_any() {
                            return Err(CompileError::new(
                                ErrorKind::BadOperandType {
                                    op: op.chars.clone(),
                                    ty: oty.to_string(),
                                },
                                op.span,
                            ));
                        }
                        oty.unboxed()
                    }
                    TokenType::Tilde => {
                        if !oty.is_integral() && !oty.is_any() {
                            return Err(CompileError::new(
                                ErrorKind::BadOperandType {
                                    op: op.chars.clone(),
                                    ty: oty.to_string(),
                                },
                                op.span,
                            ));
                        }
                        oty.unboxed()
                    }
                    _ => Type::ANY,
                };
                expr.ty = Some(ty);
                if self.ctx.evaluate_const_exprs && operand.is_const {
                    if let Some(v) = constfold::fold_unary(&op, operand)? {
                        constfold::apply(expr, v, span);
                    }
                }
                Ok(())
            }
            ExprKind::PostfixUnary { expr: operand, .. } => {
                self.resolve_expr(operand)?;
                expr.ty = Some(operand.result_type());
                Ok(())
            }
            ExprKind::Call { .. } => self.resolve_call(expr),
            ExprKind::MethodCall { .. } => self.resolve_method_call(expr),
            ExprKind::VarAssign { var, expr: value, .. } => {
                let var_expr: &mut Expr = var;
                let name = match &var_expr.kind {
                    ExprKind::Identifier { name, .. } => name.clone(),
                    _ => {
                        return Err(CompileError::new(ErrorKind::InvalidLValue, var_expr.span))
                    }
                };
                self.resolve_identifier(var_expr, &name, false)?;
                self.check_assignable(var_expr)?;
                value.is_result_used = true;
                self.resolve_expr(value)?;
                let target = var_expr.result_type();
                let got = value.result_type();
                if !self.classes.convertible(&got, &target) {
                    return Err(CompileError::new(
                        ErrorKind::IncompatibleTypes {
                            from: got.to_string(),
                            to: target.to_string(),
                        },
                        value.span,
                    ));
                }
                expr.ty = Some(target);
                Ok(())
            }
            ExprKind::VarOpAssign { var, expr: value, .. } => {
                let var_expr: &mut Expr = var;
                let name = match &var_expr.kind {
                    ExprKind::Identifier { name, .. } => name.clone(),
                    _ => {
                        return Err(CompileError::new(ErrorKind::InvalidLValue, var_expr.span))
                    }
                };
                self.resolve_identifier(var_expr, &name, false)?;
                self.check_assignable(var_expr)?;
                let target = var_expr.result_type();
                self.resolve_op_assign_value(value, target)?;
                expr.ty = Some(target);
                Ok(())
            }
            ExprKind::FieldAssign { parent, access_op, field, expr: value, .. } => {
                let access = access_op.clone();
                self.resolve_expr(parent)?;
                self.resolve_expr(field)?;
                value.is_result_used = true;
                self.resolve_expr(value)?;
                let ty = self.field_access_type(parent, &access, field, true)?;
                expr.ty = Some(if ty.is_any() { value.result_type().boxed() } else { ty });
                Ok(())
            }
            ExprKind::FieldOpAssign { parent, access_op, field, expr: value, .. } => {
                let access = access_op.clone();
                self.resolve_expr(parent)?;
                self.resolve_expr(field)?;
                let target = self.field_access_type(parent, &access, field, true)?;
                self.resolve_op_assign_value(value, target)?;
                expr.ty = Some(target);
                Ok(())
            }
            ExprKind::RegexMatch { .. } => self.resolve_regex_match(expr),
            ExprKind::RegexSubst { .. } => self.resolve_regex_subst(expr),
            ExprKind::FunDecl(fid) => {
                let fid = *fid;
                self.resolve_function(fid)?;
                expr.ty = Some(Type::FUNCTION);
                Ok(())
            }
            ExprKind::Closure(fid) => {
                let fid = *fid;
                self.resolve_function(fid)?;
                expr.ty = Some(Type::FUNCTION);
                Ok(())
            }
            ExprKind::Noop => {
                expr.ty.get_or_insert(Type::ANY);
                Ok(())
            }
            ExprKind::ReturnExpr { expr: value, return_type } => {
                value.is_result_used = true;
                self.resolve_expr(value)?;
                let fun_ret = self
                    .unit
                    .fun(self.current_fun())
                    .descriptor
                    .as_ref()
                    .map(|d| d.return_type)
                    .unwrap_or(Type::ANY);
                let got = value.result_type();
                if !self.classes.convertible(&got, &fun_ret) {
                    return Err(CompileError::new(
                        ErrorKind::IncompatibleTypes {
                            from: got.to_string(),
                            to: fun_ret.to_string(),
                        },
                        value.span,
                    ));
                }
                if fun_ret.is_primitive() && matches!(value.const_value, Some(Value::Null)) {
                    return Err(CompileError::new(
                        ErrorKind::MissingReturn(fun_ret.to_string()),
                        value.span,
                    ));
                }
                *return_type = Some(fun_ret);
                expr.ty = Some(fun_ret);
                Ok(())
            }
            ExprKind::BreakExpr | ExprKind::ContinueExpr => {
                if self.frame().loop_depth == 0 {
                    return Err(CompileError::new(ErrorKind::BreakOutsideLoop, span));
                }
                expr.ty = Some(Type::ANY);
                Ok(())
            }
            ExprKind::InstanceOf { expr: operand, .. } => {
                self.resolve_expr(operand)?;
                expr.ty = Some(Type::BOOLEAN);
                Ok(())
            }
            ExprKind::Cast { target, expr: operand } => {
                let target = target.clone();
                self.resolve_expr(operand)?;
                let t = self.resolve_type_ref(&target)?;
                let from = operand.result_type();
                // Explicit casts additionally allow the string conversions.
                let string_cast = from.kind == TypeKind::String
                    || t.kind == TypeKind::String;
                if !self.classes.convertible(&from, &t) && !string_cast {
                    return Err(CompileError::new(
                        ErrorKind::IncompatibleTypes {
                            from: from.to_string(),
                            to: t.to_string(),
                        },
                        span,
                    ));
                }
                expr.ty = Some(t);
                Ok(())
            }
            ExprKind::InvokeNew { .. } => self.resolve_invoke_new(expr),
            ExprKind::InvokeInit { class_id, args } => {
                let class_id = *class_id;
                for a in args {
                    self.resolve_expr(a)?;
                }
                expr.ty = Some(Type::instance(class_id));
                Ok(())
            }
            ExprKind::InvokeFunction { fun, args } => {
                let fun = *fun;
                for a in args.iter_mut() {
                    a.is_result_used = true;
                    self.resolve_expr(a)?;
                }
                // Forward the invoked function's captures through the
                // current function.
                let heap_names: Vec<String> =
                    self.unit.fun(fun).heap_local_params.keys().cloned().collect();
                for hname in heap_names {
                    self.lookup_var(&hname, span)?;
                }
                let ret = self
                    .unit
                    .fun(fun)
                    .descriptor
                    .as_ref()
                    .map(|d| d.return_type)
                    .unwrap_or(Type::ANY);
                expr.ty = Some(ret);
                Ok(())
            }
            ExprKind::InvokeUtility { method, args } => {
                let ty = utility_return_type(method);
                for a in args {
                    self.resolve_expr(a)?;
                }
                expr.ty = Some(ty);
                Ok(())
            }
            ExprKind::ClassPath { path, class_id } => {
                let path = path.clone();
                let id = self.resolve_class_path(&path)?;
                *class_id = Some(id);
                expr.ty = Some(Type::class(id));
                Ok(())
            }
            ExprKind::DefaultValue { of } => {
                expr.ty = Some(*of);
                Ok(())
            }
            ExprKind::ArrayLength { array } => {
                self.resolve_expr(array)?;
                expr.ty = Some(Type::INT);
                Ok(())
            }
            ExprKind::ArrayGet { array, index } => {
                self.resolve_expr(array)?;
                self.resolve_expr(index)?;
                let elem = match array.result_type().kind {
                    TypeKind::LongArr => Type::LONG,
                    TypeKind::StringArr => Type::STRING,
                    TypeKind::Matcher => Type::STRING.boxed(),
                    _ => Type::ANY,
                };
                expr.ty = Some(elem);
                Ok(())
            }
            ExprKind::LoadParamValue { var } => {
                let ty = self.unit.var(*var).ty.unwrap_or(Type::ANY);
                expr.ty = Some(ty);
                Ok(())
            }
            ExprKind::ConvertTo { expr: operand, target, .. } => {
                let target = *target;
                self.resolve_expr(operand)?;
                expr.ty = Some(target);
                Ok(())
            }
            ExprKind::CastTo { expr: operand, target } => {
                let target = *target;
                self.resolve_expr(operand)?;
                expr.ty = Some(target);
                Ok(())
            }
            ExprKind::BlockExpr(stmt) => {
                self.resolve_stmt(stmt)?;
                expr.ty = Some(Type::ANY);
                Ok(())
            }
            ExprKind::Print { expr: operand, .. } => {
                operand.is_result_used = true;
                self.resolve_expr(operand)?;
                expr.ty = Some(Type::ANY);
                Ok(())
            }
        }
    }

    /// Resolve the synthesised `Noop <op> rhs` binary of an op-assign.
    fn resolve_op_assign_value(
        &mut self,
        value: &mut Expr,
        target: Type,
    ) -> Result<(), CompileError> {
        value.is_result_used = true;
        if let ExprKind::Binary { lhs, rhs, op, .. } = &mut value.kind {
            if matches!(lhs.kind, ExprKind::Noop) {
                lhs.ty = Some(target);
            }
            rhs.is_result_used = true;
            self.resolve_expr(rhs)?;
            let rty = rhs.result_type();
            let ty = binary_result_type(&op.kind, &target, &rty)
                .ok_or_else(|| CompileError::new(
                    ErrorKind::BadOperandType { op: op.chars.clone(), ty: rty.to_string() },
                    op.span,
                ))?;
            value.ty = Some(ty);
            return Ok(());
        }
        self.resolve_expr(value)
    }

    fn check_assignable(&mut self, var_expr: &Expr) -> Result<(), CompileError> {
        if let ExprKind::Identifier { name, var: Some(id) } = &var_expr.kind {
            if self.unit.var(*id).is_final {
                return Err(CompileError::new(
                    ErrorKind::AssignToConst(name.text().to_string()),
                    var_expr.span,
                ));
            }
        }
        Ok(())
    }

    // ── Identifier resolution ──────────────────────────────────────────

    fn resolve_identifier(
        &mut self,
        expr: &mut Expr,
        name_tok: &Token,
        call_target: bool,
    ) -> Result<(), CompileError> {
        let name = name_tok.text().to_string();
        let span = name_tok.span;

        if name == names::THIS || name == names::SUPER {
            return self.resolve_this_super(expr, &name, span);
        }

        // `$n` capture reads become indexed reads of the `$@` matcher.
        if let Some(group) = name.strip_prefix('$').and_then(|d| d.parse::<i64>().ok()) {
            let arr = self.find_capture_arr(span)?;
            let mut arr_ident = ident_expr(synth(TokenType::Identifier, names::CAPTURE_ARR, span));
            arr_ident.ty = Some(Type::MATCHER);
            arr_ident.kind = ExprKind::Identifier {
                name: synth(TokenType::Identifier, names::CAPTURE_ARR, span),
                var: Some(arr),
            };
            expr.kind = ExprKind::ArrayGet {
                array: Box::new(arr_ident),
                index: Box::new(Expr::literal(Value::Int(group as i32), span)),
            };
            expr.ty = Some(Type::STRING.boxed());
            return Ok(());
        }

        if !self.frames.is_empty() {
            match self.lookup_var(&name, span) {
                Ok(id) => {
                    // A call through a not-yet-resolved function is a
                    // forward reference; remember where, for capture
                    // checks. A capture returns a forwarder, so follow the
                    // chain back to the declaring variable.
                    if call_target {
                        let root = self.unit.var(id).original_var.unwrap_or(id);
                        if let Some(&fid) = self.fun_of_var.get(&root) {
                            let fun = self.unit.fun_mut(fid);
                            if !fun.resolved && fun.earliest_forward_ref.is_none() {
                                fun.earliest_forward_ref = Some(span);
                            }
                        }
                    }
                    let ty = self.unit.var(id).ty.unwrap_or(Type::ANY);
                    expr.kind = ExprKind::Identifier { name: name_tok.clone(), var: Some(id) };
                    expr.ty = Some(ty);
                    return Ok(());
                }
                Err(e)
                    if !matches!(e.kind, ErrorKind::UndeclaredVariable(_)) =>
                {
                    return Err(e)
                }
                Err(_) => {}
            }
        }

        // Fields and methods of the enclosing class chain.
        if let Some(&cid) = self.class_stack.last() {
            if let Some(ty) = self.classes.field(cid, &name) {
                expr.ty = Some(ty);
                return Ok(());
            }
            if self.classes.method(cid, &name).is_some() {
                expr.ty = Some(Type::FUNCTION);
                return Ok(());
            }
        }

        // A bare identifier can name a class.
        if self.local_classes.contains_key(&name) || self.imports.contains_key(&name) {
            let path = vec![name_tok.clone()];
            let id = self.resolve_class_path(&path)?;
            expr.kind = ExprKind::ClassPath { path, class_id: Some(id) };
            expr.ty = Some(Type::class(id));
            return Ok(());
        }

        // Builtin global functions.
        if self.builtins.lookup_function(&name).is_some() {
            expr.ty = Some(Type::FUNCTION);
            return Ok(());
        }

        // Caller-supplied globals.
        if let Some(ty) = self.ctx.globals.get(&name).copied() {
            let id = match self.global_vars.get(&name) {
                Some(&id) => id,
                None => {
                    let mut v = VarDecl::new(name_tok.clone());
                    v.is_global = true;
                    v.is_defined = true;
                    v.ty = Some(ty);
                    let id = alloc_var(self.unit, v);
                    self.global_vars.insert(name.clone(), id);
                    id
                }
            };
            expr.kind = ExprKind::Identifier { name: name_tok.clone(), var: Some(id) };
            expr.ty = Some(ty);
            return Ok(());
        }

        Err(CompileError::new(ErrorKind::UndeclaredVariable(name), span))
    }

    fn resolve_this_super(
        &mut self,
        expr: &mut Expr,
        name: &str,
        span: Span,
    ) -> Result<(), CompileError> {
        let in_static = !self.frames.is_empty()
            && self.unit.fun(self.current_fun()).is_static;
        if in_static {
            return Err(CompileError::new(ErrorKind::ThisInStaticFunction, span));
        }
        let cid = self.class_stack.last().copied().or(self.script_class_id);
        let Some(cid) = cid else {
            return Err(CompileError::new(
                ErrorKind::UndeclaredVariable(name.to_string()),
                span,
            ));
        };
        if name == names::SUPER {
            let Some(base) = self.classes.get(cid).base else {
                return Err(CompileError::new(
                    ErrorKind::UndeclaredVariable(names::SUPER.to_string()),
                    span,
                ));
            };
            expr.ty = Some(Type::instance(base));
        } else {
            expr.ty = Some(Type::instance(cid));
        }
        Ok(())
    }

    /// Find the `$@` slot for a capture-variable read; unlike
    /// `capture_arr_var`, absence is an error rather than an allocation.
    fn find_capture_arr(&mut self, span: Span) -> Result<VarId, CompileError> {
        let Some(frame) = self.frames.last() else {
            return Err(CompileError::new(ErrorKind::CaptureOutsideRegex, span));
        };
        for scope in frame.blocks.iter().rev() {
            if let Some(&id) = scope.vars.get(names::CAPTURE_ARR) {
                return Ok(id);
            }
        }
        Err(CompileError::new(ErrorKind::CaptureOutsideRegex, span))
    }

    // ── Binary and field access ────────────────────────────────────────

    fn resolve_binary(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        let ExprKind::Binary { lhs, op, rhs, .. } = &mut expr.kind else {
            unreachable!()
        };
        let op = op.clone();

        if op.kind.is_field_access() {
            self.resolve_expr(lhs)?;
            self.resolve_expr(rhs)?;
            let ty = self.field_access_type(lhs, &op, rhs, false)?;
            expr.ty = Some(ty);
            return Ok(());
        }

        if matches!(op.kind, TokenType::AmpersandAmpersand | TokenType::PipePipe) {
            self.condition_depth += 1;
            let r = self.resolve_expr(lhs).and_then(|_| self.resolve_expr(rhs));
            self.condition_depth -= 1;
            r?;
        } else if matches!(
            op.kind,
            TokenType::Instanceof | TokenType::BangInstanceof | TokenType::As
        ) {
            self.resolve_expr(lhs)?;
            self.resolve_expr(rhs)?;
        } else {
            self.resolve_expr(lhs)?;
            self.resolve_expr(rhs)?;
        }

        let lty = lhs.result_type();
        let rty = rhs.result_type();
        let ty = match op.kind {
            TokenType::Instanceof | TokenType::BangInstanceof => Type::BOOLEAN,
            TokenType::As => {
                let target = rhs.result_type();
                if !self.classes.convertible(&lty, &target)
                    && !(lty.kind == TypeKind::String && target.is_numeric())
                    && target.kind != TypeKind::String
                    && !(lty.kind == TypeKind::Map && target.class_id().is_some())
                {
                    return Err(CompileError::new(
                        ErrorKind::IncompatibleTypes {
                            from: lty.to_string(),
                            to: target.to_string(),
                        },
                        span,
                    ));
                }
                target
            }
            _ => binary_result_type(&op.kind, &lty, &rty).ok_or_else(|| {
                let bad = if lty.is_numeric() || lty.is_any() { &rty } else { &lty };
                CompileError::new(
                    ErrorKind::BadOperandType { op: op.chars.clone(), ty: bad.to_string() },
                    op.span,
                )
            })?,
        };
        expr.ty = Some(ty);

        if self.ctx.evaluate_const_exprs {
            if let Some(v) = constfold::fold_binary(&op, lhs, rhs, self.ctx.max_scale)? {
                constfold::apply(expr, v, span);
            }
        }
        Ok(())
    }

    /// Type of a field access `parent op field`, looking through class
    /// descriptors, builtin methods, and the container kinds.
    fn field_access_type(
        &mut self,
        parent: &Expr,
        op: &Token,
        field: &Expr,
        assigning: bool,
    ) -> Result<Type, CompileError> {
        let pty = parent.result_type();
        let indexed = matches!(op.kind, TokenType::LeftSquare | TokenType::QuestionSquare);
        let field_name = match &field.kind {
            ExprKind::Literal(Value::Str(s)) => Some(s.clone()),
            _ => None,
        };

        if pty.kind == TypeKind::String {
            if indexed {
                if assigning {
                    return Err(CompileError::new(
                        ErrorKind::StringElementAssign,
                        field.span,
                    ));
                }
                return Ok(Type::STRING);
            }
            if let Some(name) = &field_name {
                if self.builtins.lookup_method(&pty, name).is_some() {
                    return Ok(Type::FUNCTION);
                }
            }
            return Err(CompileError::new(
                ErrorKind::InvalidFieldAccess(pty.to_string()),
                field.span,
            ));
        }

        match pty.kind {
            TypeKind::Instance(cid) => {
                if let Some(name) = &field_name {
                    if let Some(t) = self.classes.field(cid, name) {
                        return Ok(t);
                    }
                    if self.classes.method(cid, name).is_some() {
                        return Ok(Type::FUNCTION);
                    }
                    if self.builtins.lookup_method(&pty, name).is_some() {
                        return Ok(Type::FUNCTION);
                    }
                    return Err(CompileError::new(
                        ErrorKind::NoSuchField {
                            name: name.clone(),
                            class: self.classes.get(cid).name.clone(),
                        },
                        field.span,
                    ));
                }
                Ok(Type::ANY)
            }
            TypeKind::Class(cid) => {
                if let Some(name) = &field_name {
                    if let Some(&inner) = self.classes.get(cid).inner_classes.get(name) {
                        return Ok(Type::class(inner));
                    }
                    if let Some(m) = self.classes.method(cid, name) {
                        if !m.is_static {
                            return Err(CompileError::new(
                                ErrorKind::StaticAccessToNonStatic(name.clone()),
                                field.span,
                            ));
                        }
                        return Ok(Type::FUNCTION);
                    }
                    return Err(CompileError::new(
                        ErrorKind::NoSuchField {
                            name: name.clone(),
                            class: self.classes.get(cid).name.clone(),
                        },
                        field.span,
                    ));
                }
                Ok(Type::ANY)
            }
            TypeKind::Map | TypeKind::Any => {
                if let Some(name) = &field_name {
                    if !indexed && self.builtins.lookup_method(&pty, name).is_some() {
                        return Ok(Type::FUNCTION);
                    }
                }
                Ok(Type::ANY)
            }
            TypeKind::List => {
                if !indexed {
                    if let Some(name) = &field_name {
                        if self.builtins.lookup_method(&pty, name).is_some() {
                            return Ok(Type::FUNCTION);
                        }
                    }
                    return Err(CompileError::new(
                        ErrorKind::InvalidFieldAccess(pty.to_string()),
                        field.span,
                    ));
                }
                Ok(Type::ANY)
            }
            TypeKind::ObjectArr => Ok(Type::ANY),
            TypeKind::LongArr => Ok(Type::LONG),
            TypeKind::StringArr => Ok(Type::STRING),
            _ => {
                if let Some(name) = &field_name {
                    if !indexed && self.builtins.lookup_method(&pty, name).is_some() {
                        return Ok(Type::FUNCTION);
                    }
                }
                Err(CompileError::new(
                    ErrorKind::InvalidFieldAccess(pty.to_string()),
                    field.span,
                ))
            }
        }
    }

    // ── Calls ──────────────────────────────────────────────────────────

    fn resolve_call(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        let ExprKind::Call { callee, args } = &mut expr.kind else {
            unreachable!()
        };
        for a in args.iter_mut() {
            a.is_result_used = true;
            self.resolve_expr(a)?;
        }
        let known_fun;
        match &mut callee.kind {
            ExprKind::Identifier { name, .. } => {
                let name = name.clone();
                self.resolve_identifier(callee, &name, true)?;
                let resolved_var = match &callee.kind {
                    ExprKind::Identifier { var, .. } => *var,
                    _ => None,
                };
                known_fun = resolved_var.and_then(|id| {
                    let root = self.unit.var(id).original_var.unwrap_or(id);
                    self.fun_of_var.get(&root).copied()
                });
                // Builtin functions type through their descriptor, but a
                // local declaration of the same name shadows them.
                if known_fun.is_none() && resolved_var.is_none() {
                    if let Some(desc) = self.builtins.lookup_function(name.text()) {
                        let desc = desc.clone();
                        self.check_args(&desc, args, span)?;
                        expr.ty = Some(desc.return_type);
                        return Ok(());
                    }
                }
            }
            _ => {
                self.resolve_expr(callee)?;
                known_fun = None;
            }
        }

        let cty = callee.result_type();
        if let Some(fid) = known_fun {
            let desc = self.unit.fun(fid).descriptor.clone();
            if let Some(desc) = desc {
                self.check_args(&desc, args, span)?;
                expr.ty = Some(desc.return_type);
                return Ok(());
            }
            expr.ty = Some(Type::ANY);
            return Ok(());
        }
        if cty.kind == TypeKind::Function || cty.is_any() {
            expr.ty = Some(Type::ANY);
            return Ok(());
        }
        Err(CompileError::new(ErrorKind::NotCallable(cty.to_string()), span))
    }

    /// Argument checks at a direct call site with a known function.
    fn check_args(
        &mut self,
        desc: &FunctionDescriptor,
        args: &[Expr],
        span: Span,
    ) -> Result<(), CompileError> {
        // A single named-args map dispatches by name.
        if args.len() == 1 {
            if let ExprKind::MapLiteral { entries, is_named_args: true } = &args[0].kind {
                let mut seen = Vec::new();
                for (k, _) in entries {
                    if let ExprKind::Literal(Value::Str(key)) = &k.kind {
                        if !desc.param_names.iter().any(|p| p == key) {
                            return Err(CompileError::new(
                                ErrorKind::NoSuchParameter(key.clone()),
                                k.span,
                            ));
                        }
                        seen.push(key.clone());
                    }
                }
                for mandatory in &desc.mandatory_params {
                    if !seen.contains(mandatory) {
                        return Err(CompileError::new(
                            ErrorKind::MissingMandatoryArgument(mandatory.clone()),
                            span,
                        ));
                    }
                }
                return Ok(());
            }
            // A single list argument is distributed over the parameters at
            // runtime; counts cannot be checked here.
            if args[0].result_type().kind == TypeKind::List && desc.param_count != 1 {
                return Ok(());
            }
        }
        if args.len() > desc.param_count {
            return Err(CompileError::new(
                ErrorKind::TooManyArguments { expected: desc.param_count, got: args.len() },
                span,
            ));
        }
        if args.len() < desc.mandatory_count {
            let missing = desc
                .param_names
                .iter()
                .skip(args.len())
                .find(|p| desc.mandatory_params.contains(*p))
                .cloned()
                .unwrap_or_default();
            return Err(CompileError::new(
                ErrorKind::MissingMandatoryArgument(missing),
                span,
            ));
        }
        for (i, arg) in args.iter().enumerate() {
            let pty = desc.param_types.get(i).copied().unwrap_or(Type::ANY);
            let aty = arg.result_type();
            if !self.classes.convertible(&aty, &pty) {
                return Err(CompileError::new(
                    ErrorKind::IncompatibleTypes {
                        from: aty.to_string(),
                        to: pty.to_string(),
                    },
                    arg.span,
                ));
            }
        }
        Ok(())
    }

    fn resolve_method_call(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        let ExprKind::MethodCall { parent, name, name_span, args, descriptor, .. } =
            &mut expr.kind
        else {
            unreachable!()
        };
        self.resolve_expr(parent)?;
        for a in args.iter_mut() {
            a.is_result_used = true;
            self.resolve_expr(a)?;
        }
        let pty = parent.result_type();
        let name = name.clone();
        let name_span = *name_span;

        match pty.kind {
            TypeKind::Instance(cid) => {
                if let Some(m) = self.classes.method(cid, &name).cloned() {
                    self.check_args(&m, args, span)?;
                    *descriptor = Some(m.clone());
                    expr.ty = Some(m.return_type);
                    return Ok(());
                }
                if let Some(t) = self.classes.field(cid, &name) {
                    // Calling a field that holds a function value.
                    if t.kind == TypeKind::Function || t.is_any() {
                        expr.ty = Some(Type::ANY);
                        return Ok(());
                    }
                    return Err(CompileError::new(
                        ErrorKind::NotCallable(t.to_string()),
                        name_span,
                    ));
                }
                if let Some(m) = self.builtins.lookup_method(&pty, &name).cloned() {
                    self.check_args(&m, args, span)?;
                    *descriptor = Some(m.clone());
                    expr.ty = Some(m.return_type);
                    return Ok(());
                }
                Err(CompileError::new(
                    ErrorKind::NoSuchMethod { name, ty: pty.to_string() },
                    name_span,
                ))
            }
            TypeKind::Class(cid) => {
                if let Some(m) = self.classes.method(cid, &name).cloned() {
                    if !m.is_static {
                        return Err(CompileError::new(
                            ErrorKind::StaticAccessToNonStatic(name),
                            name_span,
                        ));
                    }
                    self.check_args(&m, args, span)?;
                    *descriptor = Some(m.clone());
                    expr.ty = Some(m.return_type);
                    return Ok(());
                }
                Err(CompileError::new(
                    ErrorKind::NoSuchMethod { name, ty: pty.to_string() },
                    name_span,
                ))
            }
            TypeKind::Any | TypeKind::Map => {
                if let Some(m) = self.builtins.lookup_method(&pty, &name).cloned() {
                    self.check_args(&m, args, span)?;
                    *descriptor = Some(m.clone());
                    expr.ty = Some(m.return_type);
                    return Ok(());
                }
                // Dynamic dispatch at runtime.
                expr.ty = Some(Type::ANY);
                Ok(())
            }
            _ => {
                if let Some(m) = self.builtins.lookup_method(&pty, &name).cloned() {
                    self.check_args(&m, args, span)?;
                    *descriptor = Some(m.clone());
                    expr.ty = Some(m.return_type);
                    return Ok(());
                }
                Err(CompileError::new(
                    ErrorKind::NoSuchMethod { name, ty: pty.to_string() },
                    name_span,
                ))
            }
        }
    }

    fn resolve_invoke_new(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        let ExprKind::InvokeNew { class, args } = &mut expr.kind else {
            unreachable!()
        };
        let class = class.clone();
        for a in args.iter_mut() {
            a.is_result_used = true;
            self.resolve_expr(a)?;
        }
        let t = self.resolve_type_ref(&class)?;
        let Some(cid) = t.class_id() else {
            return Err(CompileError::new(
                ErrorKind::UnknownClass(format!("{}", t)),
                class.span,
            ));
        };
        if let Some(init) = self.classes.get(cid).init_method.clone() {
            self.check_args(&init, args, span)?;
        }
        // Rewrite to the resolved construction form.
        let args = std::mem::take(args);
        expr.kind = ExprKind::InvokeInit { class_id: cid, args };
        expr.ty = Some(Type::instance(cid));
        Ok(())
    }

    // ── Regex ──────────────────────────────────────────────────────────

    fn resolve_regex_match(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        let ExprKind::RegexMatch { lhs, pattern, modifiers, implicit_it_match, capture_var, .. } =
            &mut expr.kind
        else {
            unreachable!()
        };
        // A bare `/str/` with no modifiers outside a boolean context is
        // just a string.
        if *implicit_it_match && modifiers.is_empty() && self.condition_depth == 0 {
            let mut inner = std::mem::replace(
                pattern.as_mut(),
                Expr::new(ExprKind::Noop, span),
            );
            self.resolve_expr(&mut inner)?;
            *expr = inner;
            expr.span = span;
            return Ok(());
        }
        self.resolve_expr(lhs)?;
        pattern.is_result_used = true;
        self.resolve_expr(pattern)?;
        let cv = self.capture_arr_var(span);
        let ExprKind::RegexMatch { capture_var, .. } = &mut expr.kind else {
            unreachable!()
        };
        *capture_var = Some(cv);
        expr.ty = Some(Type::BOOLEAN);
        Ok(())
    }

    fn resolve_regex_subst(&mut self, expr: &mut Expr) -> Result<(), CompileError> {
        let span = expr.span;
        let ExprKind::RegexSubst { lhs, op, pattern, replacement, .. } = &mut expr.kind else {
            unreachable!()
        };
        // The behaviour of a substitution in an assertion position is
        // undefined; reject it.
        if op.kind == TokenType::BangMatchRegex {
            return Err(CompileError::new(ErrorKind::SubstInAssertion, op.span));
        }
        self.resolve_expr(lhs)?;
        pattern.is_result_used = true;
        self.resolve_expr(pattern)?;
        replacement.is_result_used = true;
        self.resolve_expr(replacement)?;
        let cv = self.capture_arr_var(span);
        let ExprKind::RegexSubst { capture_var, .. } = &mut expr.kind else {
            unreachable!()
        };
        *capture_var = Some(cv);
        expr.ty = Some(Type::STRING);
        Ok(())
    }

    // ── Wrapper synthesis ──────────────────────────────────────────────

    /// Build the varargs wrapper for a resolved function: fixed signature
    /// `(source, offset, args) -> def`, default filling, named-argument
    /// dispatch, and a direct invocation of the wrapped function.
    fn build_wrapper(&mut self, fid: FunId) -> Result<FunId, CompileError> {
        let span = self.unit.fun(fid).span;
        let real_name = self.unit.fun(fid).given_name.clone();
        let real_params = self.unit.fun(fid).params.clone();
        let is_init = self.unit.fun(fid).is_init_method;
        let desc = self
            .unit
            .fun(fid)
            .descriptor
            .clone()
            .expect("wrapped function has a descriptor");

        let src_id = self.wrapper_param(SRC_PARAM, Type::STRING, span);
        let off_id = self.wrapper_param(OFFSET_PARAM, Type::INT, span);
        let args_id = self.wrapper_param(ARGS_PARAM, Type::OBJECT_ARR, span);

        let mut stmts: Vec<Stmt> = Vec::new();

        // int argCount = args.length
        let count_id = self.synth_local(
            ARG_COUNT,
            Type::INT,
            Expr::new(
                ExprKind::ArrayLength { array: Box::new(name_ref(ARGS_PARAM, span)) },
                span,
            ),
            span,
        );
        stmts.push(Stmt::new(StmtKind::VarDecl(count_id), span));

        // boolean isObjArr = true
        let obj_arr_id =
            self.synth_local(IS_OBJ_ARR, Type::BOOLEAN, Expr::literal(Value::Bool(true), span), span);
        stmts.push(Stmt::new(StmtKind::VarDecl(obj_arr_id), span));

        // Map mapCopy = null
        let map_copy_id =
            self.synth_local(MAP_COPY, Type::MAP, Expr::literal(Value::Null, span), span);
        stmts.push(Stmt::new(StmtKind::VarDecl(map_copy_id), span));

        let first_accepts_list = desc
            .param_types
            .first()
            .map(|t| matches!(t.kind, TypeKind::List | TypeKind::Any))
            .unwrap_or(true);

        // Unpack a sole list argument over the parameters.
        if !first_accepts_list {
            let cond = and(
                eq(name_ref(ARG_COUNT, span), Expr::literal(Value::Int(1), span), span),
                instance_of(arg_get(0, span), Type::LIST, span),
                span,
            );
            let unpack = vec![
                assign_stmt(
                    ARGS_PARAM,
                    Expr::new(
                        ExprKind::InvokeUtility {
                            method: "listToObjectArray".to_string(),
                            args: vec![arg_get(0, span)],
                        },
                        span,
                    ),
                    span,
                ),
                assign_stmt(
                    ARG_COUNT,
                    Expr::new(
                        ExprKind::ArrayLength { array: Box::new(name_ref(ARGS_PARAM, span)) },
                        span,
                    ),
                    span,
                ),
            ];
            stmts.push(if_stmt(cond, unpack, span));
        }

        // A sole map argument switches to named-argument binding.
        {
            let cond = and(
                eq(name_ref(ARG_COUNT, span), Expr::literal(Value::Int(1), span), span),
                instance_of(arg_get(0, span), Type::MAP, span),
                span,
            );
            let named = vec![
                assign_stmt(
                    MAP_COPY,
                    Expr::new(
                        ExprKind::InvokeUtility {
                            method: "copyNamedArgs".to_string(),
                            args: vec![arg_get(0, span)],
                        },
                        span,
                    ),
                    span,
                ),
                assign_stmt(IS_OBJ_ARR, Expr::literal(Value::Bool(false), span), span),
            ];
            stmts.push(if_stmt(cond, named, span));
        }

        // Mandatory / maximum argument-count checks for positional calls.
        {
            let too_few = and(
                name_ref(IS_OBJ_ARR, span),
                cmp(
                    TokenType::LessThan,
                    name_ref(ARG_COUNT, span),
                    Expr::literal(Value::Int(desc.mandatory_count as i32), span),
                    span,
                ),
                span,
            );
            stmts.push(if_stmt(
                too_few,
                vec![Stmt::new(
                    StmtKind::ThrowError(Box::new(Expr::literal(
                        Value::Str("missing mandatory arguments".to_string()),
                        span,
                    ))),
                    span,
                )],
                span,
            ));
            let too_many = and(
                name_ref(IS_OBJ_ARR, span),
                cmp(
                    TokenType::GreaterThan,
                    name_ref(ARG_COUNT, span),
                    Expr::literal(Value::Int(desc.param_count as i32), span),
                    span,
                ),
                span,
            );
            stmts.push(if_stmt(
                too_many,
                vec![Stmt::new(
                    StmtKind::ThrowError(Box::new(Expr::literal(
                        Value::Str("too many arguments".to_string()),
                        span,
                    ))),
                    span,
                )],
                span,
            ));
        }

        // Bind each declared parameter in order.
        let mut bind_ids = Vec::new();
        for (i, pid) in real_params.iter().enumerate() {
            let pname = self.unit.var(*pid).name.text().to_string();
            let ptype = desc.param_types.get(i).copied().unwrap_or(Type::ANY);
            let default = self.unit.var(*pid).initialiser.clone();

            let positional_present = cmp(
                TokenType::GreaterThan,
                name_ref(ARG_COUNT, span),
                Expr::literal(Value::Int(i as i32), span),
                span,
            );
            let from_array = Expr::new(
                ExprKind::CastTo { expr: Box::new(arg_get(i as i32, span)), target: ptype },
                span,
            );
            let positional = match &default {
                Some(d) => ternary(positional_present, from_array, d.clone(), span),
                None => from_array,
            };
            let named = match &default {
                Some(d) => Expr::new(
                    ExprKind::InvokeUtility {
                        method: "namedArgOrDefault".to_string(),
                        args: vec![
                            name_ref(MAP_COPY, span),
                            Expr::literal(Value::Str(pname.clone()), span),
                            d.clone(),
                        ],
                    },
                    span,
                ),
                None => Expr::new(
                    ExprKind::InvokeUtility {
                        method: "removeOrThrow".to_string(),
                        args: vec![
                            name_ref(MAP_COPY, span),
                            Expr::literal(Value::Str(pname.clone()), span),
                        ],
                    },
                    span,
                ),
            };
            let value = ternary(name_ref(IS_OBJ_ARR, span), positional, named, span);
            let bind_id = self.synth_local(&pname, ptype.boxed(), value, span);
            stmts.push(Stmt::new(StmtKind::VarDecl(bind_id), span));
            bind_ids.push(bind_id);
        }

        // Reject named arguments that matched no parameter.
        {
            let cond = Expr::new(
                ExprKind::PrefixUnary {
                    op: synth(TokenType::Bang, "!", span),
                    expr: Box::new(name_ref(IS_OBJ_ARR, span)),
                },
                span,
            );
            let check = Expr::new(
                ExprKind::InvokeUtility {
                    method: "checkForExtraArgs".to_string(),
                    args: vec![name_ref(MAP_COPY, span)],
                },
                span,
            );
            let mut check_stmt = check;
            check_stmt.is_result_used = false;
            stmts.push(if_stmt(
                cond,
                vec![Stmt::new(StmtKind::ExprStmt(Box::new(check_stmt)), span)],
                span,
            ));
        }

        // Embed the real function so its heap locals flow through the
        // wrapper, then invoke it with the bound values. The construction
        // wrapper instead returns the instance itself: the bound values
        // are what the init method stores into the fields.
        stmts.push(Stmt::new(StmtKind::FunDecl(fid), span));
        if is_init {
            let this_ref = ident_expr(synth(TokenType::Identifier, names::THIS, span));
            stmts.push(Stmt::new(
                StmtKind::Return(Box::new(return_expr(this_ref, span))),
                span,
            ));
        } else {
            let call_args: Vec<Expr> = real_params
                .iter()
                .zip(bind_ids.iter())
                .map(|(pid, bind)| {
                    let passed_boxed = self.unit.var(*pid).is_passed_as_heap_local;
                    let load = Expr::new(ExprKind::LoadParamValue { var: *bind }, span);
                    if passed_boxed {
                        Expr::new(
                            ExprKind::ConvertTo {
                                expr: Box::new(load),
                                target: Type::HEAPLOCAL,
                                coercion: "toHeapLocal".to_string(),
                            },
                            span,
                        )
                    } else {
                        load
                    }
                })
                .collect();
            let invoke =
                Expr::new(ExprKind::InvokeFunction { fun: fid, args: call_args }, span);
            stmts.push(Stmt::new(
                StmtKind::Return(Box::new(return_expr(invoke, span))),
                span,
            ));
        }

        let mut body = Block::new(stmts);
        body.function_decls = vec![fid];
        let body_stmt = Stmt::new(StmtKind::Block(Box::new(body)), span);

        let mut wrapper = Function::new(
            format!("{}{}", real_name, names::WRAPPER_SUFFIX),
            TypeRef::builtin(Type::ANY, span),
            span,
        );
        wrapper.is_wrapper = true;
        wrapper.is_static = self.unit.fun(fid).is_static;
        wrapper.params = vec![src_id, off_id, args_id];
        wrapper.body = Some(body_stmt);
        let wid = alloc_fun(self.unit, wrapper);

        if let Some(d) = &mut self.unit.fun_mut(fid).descriptor {
            d.wrapper_method = Some(format!("{}{}", real_name, names::WRAPPER_SUFFIX));
        }
        Ok(wid)
    }

    fn wrapper_param(&mut self, name: &str, ty: Type, span: Span) -> VarId {
        let tok = synth(TokenType::Identifier, name, span);
        let mut v = VarDecl::new(tok);
        v.declared_type = Some(TypeRef::builtin(ty, span));
        v.is_param = true;
        v.span = span;
        alloc_var(self.unit, v)
    }

    fn synth_local(&mut self, name: &str, ty: Type, init: Expr, span: Span) -> VarId {
        let tok = synth(TokenType::Identifier, name, span);
        let mut v = VarDecl::new(tok);
        v.declared_type = Some(TypeRef::builtin(ty, span));
        v.initialiser = Some(init);
        v.span = span;
        alloc_var(self.unit, v)
    }
}

// ── Wrapper AST helpers ────────────────────────────────────────────────

const SRC_PARAM: &str = "_$j$source";
const OFFSET_PARAM: &str = "_$j$offset";
const ARGS_PARAM: &str = "_$j$args";
const ARG_COUNT: &str = "_$j$argCount";
const IS_OBJ_ARR: &str = "_$j$isObjArr";
const MAP_COPY: &str = "_$j$mapCopy";

fn name_ref(name: &str, span: Span) -> Expr {
    ident_expr(synth(TokenType::Identifier, name, span))
}

fn arg_get(index: i32, span: Span) -> Expr {
    Expr::new(
        ExprKind::ArrayGet {
            array: Box::new(name_ref(ARGS_PARAM, span)),
            index: Box::new(Expr::literal(Value::Int(index), span)),
        },
        span,
    )
}

fn instance_of(expr: Expr, target: Type, span: Span) -> Expr {
    Expr::new(
        ExprKind::InstanceOf { expr: Box::new(expr), target, negated: false },
        span,
    )
}

fn eq(lhs: Expr, rhs: Expr, span: Span) -> Expr {
    cmp(TokenType::EqualEqual, lhs, rhs, span)
}

fn cmp(op: TokenType, lhs: Expr, rhs: Expr, span: Span) -> Expr {
    let chars = op.to_string();
    Expr::new(
        ExprKind::Binary {
            lhs: Box::new(lhs),
            op: synth(op, &chars, span),
            rhs: Box::new(rhs),
            original_operator: None,
            create_if_missing: false,
        },
        span,
    )
}

fn and(lhs: Expr, rhs: Expr, span: Span) -> Expr {
    cmp(TokenType::AmpersandAmpersand, lhs, rhs, span)
}

fn ternary(cond: Expr, if_true: Expr, if_false: Expr, span: Span) -> Expr {
    Expr::new(
        ExprKind::Ternary {
            cond: Box::new(cond),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        },
        span,
    )
}

fn if_stmt(cond: Expr, then_stmts: Vec<Stmt>, span: Span) -> Stmt {
    Stmt::new(
        StmtKind::If {
            cond: Box::new(cond),
            then_stmt: Box::new(Stmt::block(then_stmts, span)),
            else_stmt: None,
        },
        span,
    )
}

fn assign_stmt(name: &str, value: Expr, span: Span) -> Stmt {
    let mut assign = Expr::new(
        ExprKind::VarAssign {
            var: Box::new(name_ref(name, span)),
            op: synth(TokenType::Equal, "=", span),
            expr: Box::new(value),
        },
        span,
    );
    assign.is_result_used = false;
    Stmt::new(StmtKind::ExprStmt(Box::new(assign)), span)
}

fn return_expr(value: Expr, span: Span) -> Expr {
    Expr::new(
        ExprKind::ReturnExpr { expr: Box::new(value), return_type: None },
        span,
    )
}

fn return_null_stmt(span: Span) -> Stmt {
    Stmt::new(
        StmtKind::Return(Box::new(return_expr(Expr::literal(Value::Null, span), span))),
        span,
    )
}

fn placeholder_class() -> ClassDecl {
    ClassDecl {
        name: synth(TokenType::Identifier, "", Span::dummy()),
        package_name: String::new(),
        base: None,
        fields: Vec::new(),
        methods: Vec::new(),
        inner_classes: Vec::new(),
        is_script_class: true,
        class_id: None,
        span: Span::dummy(),
    }
}

fn alloc_var(unit: &mut ParsedUnit, var: VarDecl) -> VarId {
    let id = VarId(unit.vars.len() as u32);
    unit.vars.push(var);
    id
}

fn alloc_fun(unit: &mut ParsedUnit, fun: Function) -> FunId {
    let id = FunId(unit.funs.len() as u32);
    unit.funs.push(fun);
    id
}

/// Result-type rule for the ordinary binary operators. `None` means the
/// operand types are unacceptable for the operator.
fn binary_result_type(op: &TokenType, lhs: &Type, rhs: &Type) -> Option<Type> {
    use TokenType::*;
    match op {
        Plus => match (lhs.kind, rhs.kind) {
            // `+` on string is concatenation, on list append, on map merge.
            (TypeKind::String, _) | (_, TypeKind::String) => Some(Type::STRING),
            (TypeKind::List, _) => Some(Type::LIST),
            (TypeKind::Map, TypeKind::Map) | (TypeKind::Map, TypeKind::Any) => Some(Type::MAP),
            (TypeKind::Any, _) | (_, TypeKind::Any) => Some(Type::ANY),
            _ => Type::numeric_join(lhs, rhs),
        },
        Minus => match (lhs.kind, rhs.kind) {
            // `-` on map is difference.
            (TypeKind::Map, TypeKind::Map) | (TypeKind::Map, TypeKind::Any) => Some(Type::MAP),
            (TypeKind::Any, _) | (_, TypeKind::Any) => Some(Type::ANY),
            _ => Type::numeric_join(lhs, rhs),
        },
        Star => match (lhs.kind, rhs.kind) {
            // `*` on string is repetition.
            (TypeKind::String, _) if rhs.is_integral() || rhs.is_any() => Some(Type::STRING),
            (TypeKind::Any, _) | (_, TypeKind::Any) => Some(Type::ANY),
            _ => Type::numeric_join(lhs, rhs),
        },
        Slash | Percent => match (lhs.kind, rhs.kind) {
            (TypeKind::Any, _) | (_, TypeKind::Any) => Some(Type::ANY),
            _ => Type::numeric_join(lhs, rhs),
        },
        DoubleLess => match (lhs.kind, rhs.kind) {
            // `<<` on list is element push.
            (TypeKind::List, _) => Some(Type::LIST),
            (TypeKind::Any, _) => Some(Type::ANY),
            _ if lhs.is_integral() && (rhs.is_integral() || rhs.is_any()) => {
                Some(lhs.unboxed())
            }
            _ => None,
        },
        DoubleGreater | TripleGreater => {
            if (lhs.is_integral() || lhs.is_any()) && (rhs.is_integral() || rhs.is_any()) {
                Some(if lhs.is_any() { Type::ANY } else { lhs.unboxed() })
            } else {
                None
            }
        }
        Ampersand | Pipe | Caret => {
            if (lhs.is_integral() || lhs.is_any()) && (rhs.is_integral() || rhs.is_any()) {
                if lhs.is_any() || rhs.is_any() {
                    Some(Type::ANY)
                } else {
                    Type::numeric_join(lhs, rhs)
                }
            } else {
                None
            }
        }
        EqualEqual | BangEqual | In | BangIn => Some(Type::BOOLEAN),
        LessThan | LessThanEqual | GreaterThan | GreaterThanEqual => {
            let comparable = |t: &Type| {
                t.is_numeric() || t.is_any() || matches!(t.kind, TypeKind::String | TypeKind::Boolean)
            };
            if comparable(lhs) && comparable(rhs) {
                Some(Type::BOOLEAN)
            } else {
                None
            }
        }
        Compare => Some(Type::INT),
        AmpersandAmpersand | PipePipe => Some(Type::BOOLEAN),
        QuestionColon => Some(join_types(lhs, rhs)),
        _ => Some(Type::ANY),
    }
}

/// Join for ternary/elvis results.
fn join_types(a: &Type, b: &Type) -> Type {
    if a.kind == b.kind {
        if a.is_boxed != b.is_boxed {
            return a.boxed();
        }
        return *a;
    }
    if let Some(j) = Type::numeric_join(a, b) {
        return j;
    }
    Type::ANY
}

/// Static types of the runtime utility helpers the wrapper calls into.
fn utility_return_type(method: &str) -> Type {
    match method {
        "listToObjectArray" => Type::OBJECT_ARR,
        "copyNamedArgs" => Type::MAP,
        _ => Type::ANY,
    }
}
