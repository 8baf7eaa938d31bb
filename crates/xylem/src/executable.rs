//! The compiled form of a stylesheet or query: one expression arena
//! holding every analyzed tree, plus the runtime tables (templates,
//! modes, keys, globals) the evaluator resolves against. An
//! [`Executable`] is immutable once built and shared across invocations
//! behind an `Arc`; per-invocation state lives on the controller.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bindery::{self, SlotManager};
use crate::error::{Error, ErrorCode};
use crate::expr::optimize::{KeyHint, OptimizeEnv, optimize};
use crate::expr::simplify::simplify;
use crate::expr::typecheck::type_check;
use crate::expr::{BindingScope, ExprArena, ExprId, ExprKind, UNALLOCATED};
use crate::key::{KeyDefinition, KeyDefinitionSet};
use crate::model::QName;
use crate::pattern::Pattern;
use crate::props::{Dependency, StaticProperty};
use crate::rule::{Mode, Template, TemplateId};

/// A global variable declaration. `slot` indexes the bindery, and
/// `slot_count` is the frame size its initializer needs.
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: QName,
    pub slot: i32,
    pub select: ExprId,
    pub slot_count: usize,
}

#[derive(Debug)]
pub struct Executable {
    arena: ExprArena,
    templates: Vec<Template>,
    templates_by_name: HashMap<QName, TemplateId>,
    modes: HashMap<Option<QName>, Mode>,
    keys: HashMap<QName, Arc<KeyDefinitionSet>>,
    globals: Vec<GlobalVariable>,
    entries: Vec<EntryPoint>,
}

/// A compiled top-level expression with the frame size it needs.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    pub body: ExprId,
    pub slot_count: usize,
}

impl Executable {
    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    pub fn global_slot_count(&self) -> usize {
        self.globals.len()
    }

    pub fn global_by_slot(&self, slot: i32) -> Result<&GlobalVariable, Error> {
        let i = bindery::check_slot(slot, self.globals.len())?;
        Ok(&self.globals[i])
    }

    pub fn template(&self, id: TemplateId) -> Result<&Template, Error> {
        self.templates.get(id.0).ok_or_else(|| {
            Error::pipeline(
                ErrorCode::Unknown,
                format!("template id {} is not part of this executable", id.0),
            )
        })
    }

    pub fn template_named(&self, name: &QName) -> Result<(TemplateId, &Template), Error> {
        match self.templates_by_name.get(name) {
            Some(&id) => Ok((id, &self.templates[id.0])),
            None => Err(Error::dynamic(
                ErrorCode::XTSE0650,
                format!("there is no template named {name}"),
            )),
        }
    }

    pub fn mode(&self, name: Option<&QName>) -> Option<&Mode> {
        self.modes.get(&name.cloned())
    }

    pub fn key_sets(&self) -> &HashMap<QName, Arc<KeyDefinitionSet>> {
        &self.keys
    }

    /// Top-level expression registered with [`ExecutableBuilder::declare_expression`].
    pub fn entry(&self, index: usize) -> Result<EntryPoint, Error> {
        self.entries.get(index).copied().ok_or_else(|| {
            Error::pipeline(
                ErrorCode::Unknown,
                format!("entry expression {index} is not part of this executable"),
            )
        })
    }
}

struct TemplateDecl {
    name: Option<QName>,
    params: Vec<QName>,
    body: ExprId,
}

struct RuleDecl {
    mode: Option<QName>,
    pattern: Pattern,
    template: TemplateId,
    precedence: i32,
    priority: Option<f64>,
}

struct KeyDecl {
    name: QName,
    pattern: Pattern,
    use_expr: ExprId,
    collation_uri: Option<String>,
}

/// Accumulates declarations, then runs the static analysis pipeline over
/// every root expression and allocates variable slots.
pub struct ExecutableBuilder {
    arena: ExprArena,
    globals: Vec<(QName, ExprId)>,
    keys: Vec<KeyDecl>,
    templates: Vec<TemplateDecl>,
    rules: Vec<RuleDecl>,
    entries: Vec<ExprId>,
}

impl Default for ExecutableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableBuilder {
    pub fn new() -> Self {
        Self {
            arena: ExprArena::new(),
            globals: Vec::new(),
            keys: Vec::new(),
            templates: Vec::new(),
            rules: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Expressions are built directly into the builder's arena.
    pub fn arena_mut(&mut self) -> &mut ExprArena {
        &mut self.arena
    }

    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    /// Declare a global variable. Slots are handed out in declaration
    /// order; references by name are resolved during `compile`.
    pub fn declare_global(&mut self, name: QName, select: ExprId) -> i32 {
        let slot = self.globals.len() as i32;
        self.globals.push((name, select));
        slot
    }

    pub fn declare_key(&mut self, name: QName, pattern: Pattern, use_expr: ExprId) {
        self.keys.push(KeyDecl {
            name,
            pattern,
            use_expr,
            collation_uri: None,
        });
    }

    pub fn declare_key_with_collation(
        &mut self,
        name: QName,
        pattern: Pattern,
        use_expr: ExprId,
        collation_uri: String,
    ) {
        self.keys.push(KeyDecl {
            name,
            pattern,
            use_expr,
            collation_uri: Some(collation_uri),
        });
    }

    /// Declare a template. Parameters occupy the first slots of the
    /// template's frame, in the order given.
    pub fn declare_template(
        &mut self,
        name: Option<QName>,
        params: Vec<QName>,
        body: ExprId,
    ) -> TemplateId {
        let id = TemplateId(self.templates.len());
        self.templates.push(TemplateDecl { name, params, body });
        id
    }

    /// Parameter slot of a previously declared template, for building
    /// call-template instructions.
    pub fn param_slot(&self, template: TemplateId, param: &QName) -> Option<i32> {
        self.templates
            .get(template.0)?
            .params
            .iter()
            .position(|p| p == param)
            .map(|i| i as i32)
    }

    /// Register a template as a rule in a mode's chain.
    pub fn add_rule(
        &mut self,
        mode: Option<QName>,
        pattern: Pattern,
        template: TemplateId,
        precedence: i32,
        priority: Option<f64>,
    ) {
        self.rules.push(RuleDecl {
            mode,
            pattern,
            template,
            precedence,
            priority,
        });
    }

    /// Register a free-standing query expression; the returned index is
    /// passed to [`Executable::entry`].
    pub fn declare_expression(&mut self, expr: ExprId) -> usize {
        self.entries.push(expr);
        self.entries.len() - 1
    }

    pub fn compile(mut self) -> Result<Executable, Error> {
        let global_slots: HashMap<QName, i32> = self
            .globals
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i as i32))
            .collect();

        // Key use expressions are analyzed first so the optimizer can
        // compare user expressions against them structurally. The key
        // rewrite itself is withheld from the use expressions.
        let no_keys = OptimizeEnv::default();
        for decl in &mut self.keys {
            decl.use_expr =
                analyze_root(&mut self.arena, decl.use_expr, &no_keys, &global_slots, &[])?
                    .body;
        }
        let env = OptimizeEnv {
            keys: self
                .keys
                .iter()
                .filter_map(|decl| {
                    decl.pattern.terminal_test().map(|test| KeyHint {
                        name: decl.name.clone(),
                        match_test: test.clone(),
                        use_expr: decl.use_expr,
                    })
                })
                .collect(),
        };

        let mut globals = Vec::with_capacity(self.globals.len());
        for (i, (name, select)) in self.globals.iter().enumerate() {
            let compiled = analyze_root(&mut self.arena, *select, &env, &global_slots, &[])?;
            globals.push(GlobalVariable {
                name: name.clone(),
                slot: i as i32,
                select: compiled.body,
                slot_count: compiled.slot_count,
            });
        }

        let mut templates = Vec::with_capacity(self.templates.len());
        let mut templates_by_name = HashMap::new();
        for (i, decl) in self.templates.iter().enumerate() {
            let compiled =
                analyze_root(&mut self.arena, decl.body, &env, &global_slots, &decl.params)?;
            if let Some(name) = &decl.name {
                if templates_by_name
                    .insert(name.clone(), TemplateId(i))
                    .is_some()
                {
                    return Err(Error::static_err(
                        ErrorCode::XTSE0650,
                        format!("duplicate template name {name}"),
                    ));
                }
            }
            templates.push(Template {
                name: decl.name.clone(),
                body: compiled.body,
                slot_count: compiled.slot_count,
            });
        }

        let mut entries = Vec::with_capacity(self.entries.len());
        for &expr in &self.entries {
            let compiled = analyze_root(&mut self.arena, expr, &env, &global_slots, &[])?;
            entries.push(EntryPoint {
                body: compiled.body,
                slot_count: compiled.slot_count,
            });
        }

        // Every call-template target must exist, statically.
        let mut roots: Vec<ExprId> = Vec::new();
        roots.extend(templates.iter().map(|t| t.body));
        roots.extend(globals.iter().map(|g| g.select));
        roots.extend(entries.iter().map(|e| e.body));
        for root in roots {
            check_template_calls(&self.arena, root, &templates_by_name)?;
        }

        let mut modes: HashMap<Option<QName>, Mode> = HashMap::new();
        for rule in &self.rules {
            modes.entry(rule.mode.clone()).or_default().add_rule(
                rule.pattern.clone(),
                rule.template,
                rule.precedence,
                rule.priority,
            );
        }

        let mut keys: HashMap<QName, Arc<KeyDefinitionSet>> = HashMap::new();
        let mut grouped: HashMap<QName, (Vec<KeyDefinition>, Option<String>, bool)> =
            HashMap::new();
        for decl in self.keys {
            // A use expression touching global state makes the whole set
            // non-reusable across invocations.
            let reusable = !self
                .arena
                .props(decl.use_expr)
                .deps
                .contains(Dependency::GLOBAL_VARIABLES);
            let entry = grouped
                .entry(decl.name)
                .or_insert_with(|| (Vec::new(), decl.collation_uri, true));
            entry.0.push(KeyDefinition {
                pattern: decl.pattern,
                use_expr: decl.use_expr,
            });
            entry.2 &= reusable;
        }
        for (name, (definitions, collation_uri, reusable)) in grouped {
            debug!(key = %name, reusable, definitions = definitions.len(), "compiled key");
            keys.insert(
                name.clone(),
                Arc::new(KeyDefinitionSet {
                    name,
                    definitions,
                    reusable,
                    collation_uri,
                }),
            );
        }

        Ok(Executable {
            arena: self.arena,
            templates,
            templates_by_name,
            modes,
            keys,
            globals,
            entries,
        })
    }
}

struct CompiledRoot {
    body: ExprId,
    slot_count: usize,
}

/// The full static pipeline for one root: simplify, type-check, optimize,
/// restore document order at the top if needed, then allocate slots.
fn analyze_root(
    arena: &mut ExprArena,
    id: ExprId,
    env: &OptimizeEnv,
    globals: &HashMap<QName, i32>,
    params: &[QName],
) -> Result<CompiledRoot, Error> {
    let id = simplify(arena, id)?;
    let id = type_check(arena, id)?;
    let mut names: Vec<QName> = params.to_vec();
    resolve_scopes(arena, id, &mut names, globals)?;
    let id = optimize(arena, id, env)?;
    let id = ensure_document_order(arena, id);

    let mut slots = SlotManager::default();
    let mut scope: Vec<(QName, i32)> = Vec::new();
    for param in params {
        let slot = slots.allocate(param.clone());
        scope.push((param.clone(), slot));
    }
    allocate_slots(arena, id, &mut slots, &mut scope, globals)?;
    Ok(CompiledRoot {
        body: id,
        slot_count: slots.slot_count(),
    })
}

/// A root expression delivers document order. Paths already carry their
/// wrapper from the optimizer; this covers bare reverse-axis steps and
/// other unordered node expressions at the top of a tree.
fn ensure_document_order(arena: &mut ExprArena, id: ExprId) -> ExprId {
    let props = arena.props(id);
    if !props.item_type.is_statically_nodes()
        || props.special.contains(StaticProperty::ORDERED_NODESET)
    {
        return id;
    }
    let reverse = props
        .special
        .contains(StaticProperty::REVERSE_DOCUMENT_ORDER);
    let wrapper = if reverse {
        arena.alloc(ExprKind::ReverseOrder(id))
    } else {
        arena.alloc(ExprKind::DocOrderSort(id))
    };
    arena.compute_props(wrapper);
    wrapper
}

/// Depth-first slot allocation. Lets allocate a fresh slot scoped to
/// their body; variable references resolve innermost-first, then fall
/// back to the global table.
/// Classify variable references before optimization runs. A name bound by
/// an enclosing `let` or a parameter is local; anything else must name a
/// declared global, which gets its bindery slot here. The promotion offer
/// reads these dependency bits, so classification cannot wait for local
/// slot allocation.
fn resolve_scopes(
    arena: &mut ExprArena,
    id: ExprId,
    scope: &mut Vec<QName>,
    globals: &HashMap<QName, i32>,
) -> Result<(), Error> {
    match arena.kind(id).clone() {
        ExprKind::Let {
            name, value, body, ..
        } => {
            resolve_scopes(arena, value, scope, globals)?;
            scope.push(name);
            resolve_scopes(arena, body, scope, globals)?;
            scope.pop();
        }
        ExprKind::VarRef { name, binding } => {
            if binding.slot == UNALLOCATED && !scope.iter().any(|n| *n == name) {
                let Some(&slot) = globals.get(&name) else {
                    return Err(Error::static_err(
                        ErrorCode::XPST0008,
                        format!("variable ${name} has not been declared"),
                    ));
                };
                if let ExprKind::VarRef { binding, .. } = arena.kind_mut(id) {
                    binding.scope = BindingScope::Global;
                    binding.slot = slot;
                }
            }
        }
        _ => {
            for child in arena.children(id) {
                resolve_scopes(arena, child, scope, globals)?;
            }
        }
    }
    arena.compute_props(id);
    Ok(())
}

fn allocate_slots(
    arena: &mut ExprArena,
    id: ExprId,
    slots: &mut SlotManager,
    scope: &mut Vec<(QName, i32)>,
    globals: &HashMap<QName, i32>,
) -> Result<(), Error> {
    match arena.kind(id).clone() {
        ExprKind::Let {
            name, value, body, ..
        } => {
            allocate_slots(arena, value, slots, scope, globals)?;
            let slot = slots.allocate(name.clone());
            if let ExprKind::Let { slot: s, .. } = arena.kind_mut(id) {
                *s = slot;
            }
            scope.push((name, slot));
            allocate_slots(arena, body, slots, scope, globals)?;
            scope.pop();
        }
        ExprKind::VarRef { name, binding } => {
            if binding.slot == UNALLOCATED {
                let resolved = scope
                    .iter()
                    .rev()
                    .find(|(n, _)| *n == name)
                    .map(|&(_, slot)| (BindingScope::Local, slot))
                    .or_else(|| globals.get(&name).map(|&slot| (BindingScope::Global, slot)));
                let Some((bscope, slot)) = resolved else {
                    return Err(Error::static_err(
                        ErrorCode::XPST0008,
                        format!("variable ${name} has not been declared"),
                    ));
                };
                if let ExprKind::VarRef { binding, .. } = arena.kind_mut(id) {
                    binding.scope = bscope;
                    binding.slot = slot;
                }
            }
        }
        _ => {
            for child in arena.children(id) {
                allocate_slots(arena, child, slots, scope, globals)?;
            }
        }
    }
    Ok(())
}

fn check_template_calls(
    arena: &ExprArena,
    id: ExprId,
    by_name: &HashMap<QName, TemplateId>,
) -> Result<(), Error> {
    if let ExprKind::CallTemplate { name, .. } = arena.kind(id) {
        if !by_name.contains_key(name) {
            return Err(Error::static_err(
                ErrorCode::XTSE0650,
                format!("call to undeclared template {name}"),
            ));
        }
    }
    for child in arena.children(id) {
        check_template_calls(arena, child, by_name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Binding, NodeTest};
    use crate::item::AtomicValue;

    #[test]
    fn let_and_varref_get_matching_slots() {
        let mut b = ExecutableBuilder::new();
        let arena = b.arena_mut();
        let value = arena.literal(AtomicValue::Integer(1));
        let var = QName::local_name("x");
        let body = arena.alloc(ExprKind::VarRef {
            name: var.clone(),
            binding: Binding::unallocated(BindingScope::Local),
        });
        let let_expr = arena.alloc(ExprKind::Let {
            name: var,
            slot: UNALLOCATED,
            value,
            body,
        });
        let entry = b.declare_expression(let_expr);
        let exec = b.compile().unwrap();
        let compiled = exec.entry(entry).unwrap();
        assert_eq!(compiled.slot_count, 1);
        let ExprKind::Let { slot, body, .. } = exec.arena().kind(compiled.body) else {
            panic!("let survived analysis");
        };
        assert_eq!(*slot, 0);
        let ExprKind::VarRef { binding, .. } = exec.arena().kind(*body) else {
            panic!("var ref survived analysis");
        };
        assert_eq!(binding.slot, 0);
        assert_eq!(binding.scope, BindingScope::Local);
    }

    #[test]
    fn undeclared_variable_is_a_static_error() {
        let mut b = ExecutableBuilder::new();
        let var = b.arena_mut().alloc(ExprKind::VarRef {
            name: QName::local_name("missing"),
            binding: Binding::unallocated(BindingScope::Local),
        });
        b.declare_expression(var);
        let err = b.compile().unwrap_err();
        assert_eq!(err.code, ErrorCode::XPST0008);
    }

    #[test]
    fn call_to_unknown_template_is_rejected() {
        let mut b = ExecutableBuilder::new();
        let call = b.arena_mut().alloc(ExprKind::CallTemplate {
            name: QName::local_name("nowhere"),
            tail: false,
            params: Vec::new(),
        });
        b.declare_expression(call);
        let err = b.compile().unwrap_err();
        assert_eq!(err.code, ErrorCode::XTSE0650);
    }

    #[test]
    fn reverse_axis_root_gets_reversal_wrapper() {
        let mut b = ExecutableBuilder::new();
        let step = b.arena_mut().alloc(ExprKind::AxisStep {
            axis: crate::expr::Axis::Ancestor,
            test: NodeTest::AnyNode,
        });
        let entry = b.declare_expression(step);
        let exec = b.compile().unwrap();
        let compiled = exec.entry(entry).unwrap();
        assert!(matches!(
            exec.arena().kind(compiled.body),
            ExprKind::ReverseOrder(_)
        ));
    }
}
