//! Dereferencing: replace `$ref` nodes with the content they point at.
//!
//! Cycles are found before any replacement by splitting the local reference
//! graph into strongly connected components; every member of a cycle is
//! recorded in a [`CircularRefRegistry`]. What happens at a cycle is decided by
//! the [`CircularPolicy`]: under `Expand` a cycle unrolls once, and a member met
//! again while expanding its own cycle keeps its `$ref` node.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::discriminator::{build_discriminator_one_of, find_discriminator_children};
use crate::error::DereferenceError;
use crate::pointer;
use crate::resolver;
use crate::types::{
    child_position, map_ref_target, ref_target, CircularObserver, CircularPolicy,
    DereferenceOptions, Position, SpecKind, REF_NAME_KEY,
};

/// Pointers visited along the current resolution chain, in visit order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    chain: Vec<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pointer: &str) -> bool {
        self.chain.iter().any(|p| p == pointer)
    }

    pub fn push(&mut self, pointer: impl Into<String>) {
        self.chain.push(pointer.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.chain.pop()
    }

    /// The innermost pointer of the chain.
    pub fn last(&self) -> Option<&str> {
        self.chain.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.chain.iter().map(String::as_str)
    }
}

/// Pointers found to be part of a cycle, each recorded once, in detection order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircularRefRegistry {
    pointers: Vec<String>,
}

impl CircularRefRegistry {
    /// Record a pointer. Returns false if it was already known.
    pub fn insert(&mut self, pointer: &str) -> bool {
        if self.contains(pointer) {
            return false;
        }
        self.pointers.push(pointer.to_string());
        true
    }

    pub fn contains(&self, pointer: &str) -> bool {
        self.pointers.iter().any(|p| p == pointer)
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.pointers.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.pointers
    }
}

/// Stateful dereferencer; owns the circular registry for one invocation.
pub struct Dereferencer {
    policy: CircularPolicy,
    external: bool,
    on_circular: Option<CircularObserver>,
    circular: CircularRefRegistry,
}

impl Dereferencer {
    pub fn new(options: &DereferenceOptions) -> Self {
        Self {
            policy: options.dereference.circular,
            external: options.resolve.external,
            on_circular: options.dereference.on_circular.clone(),
            circular: CircularRefRegistry::default(),
        }
    }

    /// Circular pointers seen so far.
    pub fn circular_refs(&self) -> &CircularRefRegistry {
        &self.circular
    }

    pub fn into_circular_refs(self) -> CircularRefRegistry {
        self.circular
    }

    /// Dereference a single node.
    ///
    /// Non-reference values are returned unchanged, as are references when no
    /// `document` is available. A reference already on the `seen` chain is a
    /// cycle: the node is returned as-is and its pointer recorded. Otherwise the
    /// pointer is followed (through chains of references) and the target is
    /// returned with `x-readme-ref-name` set to the last pointer segment. A pointer
    /// that cannot be resolved leaves the node unchanged.
    ///
    /// Only the node itself is replaced; references nested in the result are not
    /// followed.
    pub fn dereference_one(
        &mut self,
        value: &Value,
        document: Option<&Value>,
        seen: &mut SeenSet,
    ) -> Value {
        let Some(target) = ref_target(value) else {
            return value.clone();
        };
        let Some(document) = document else {
            return value.clone();
        };

        if seen.contains(target) {
            self.register(target);
            return value.clone();
        }
        seen.push(target);

        match resolver::resolve(target, document) {
            Ok(resolved) if ref_target(resolved).is_some() => {
                self.dereference_one(resolved, Some(document), seen)
            }
            Ok(resolved) => annotate(resolved.clone(), target),
            Err(err) => {
                debug!(pointer = target, error = %err, "leaving unresolvable $ref in place");
                value.clone()
            }
        }
    }

    /// Dereference every reference in `document`, in place.
    ///
    /// Targets are looked up in a snapshot of the document taken before any
    /// replacement, so results never depend on traversal order. Cycle members
    /// are found up front and registered in discovery order.
    ///
    /// # Errors
    ///
    /// Returns `DereferenceError::Circular` when the policy is
    /// [`CircularPolicy::Fatal`] and the document has a cycle. The document is
    /// left untouched then.
    pub fn dereference_document(&mut self, document: &mut Value) -> Result<(), DereferenceError> {
        let root = document.clone();
        let cycles = CycleIndex::build(&root);
        for member in cycles.iter() {
            self.register(member);
        }

        if self.policy == CircularPolicy::Fatal {
            if let Some(member) = cycles.iter().next() {
                return Err(DereferenceError::Circular {
                    pointer: member.to_string(),
                });
            }
        }

        let mut walk = Walk {
            root: &root,
            cycles: &cycles,
            policy: self.policy,
            external: self.external,
            chain: SeenSet::new(),
            memo: HashMap::new(),
        };
        walk.walk(document, Position::Keyword);
        Ok(())
    }

    fn register(&mut self, pointer: &str) {
        if self.circular.insert(pointer) {
            debug!(pointer, "circular $ref detected");
            if let Some(observer) = &self.on_circular {
                observer(pointer);
            }
        }
    }
}

struct Walk<'a> {
    root: &'a Value,
    cycles: &'a CycleIndex,
    policy: CircularPolicy,
    external: bool,
    chain: SeenSet,
    memo: HashMap<String, Option<Value>>,
}

impl Walk<'_> {
    fn walk(&mut self, value: &mut Value, position: Position) {
        match value {
            Value::Object(map) => {
                if position == Position::Keyword {
                    if let Some(target) = map_ref_target(map).map(str::to_owned) {
                        if let Some(replacement) = self.expand(&target) {
                            *value = replacement;
                        }
                        return;
                    }
                }
                for (key, child) in map.iter_mut() {
                    let child_pos = child_position(position, key, child);
                    self.walk(child, child_pos);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.walk(item, position);
                }
            }
            _ => {}
        }
    }

    /// Expand one reference. None keeps the `$ref` node.
    ///
    /// A cycle member met while already expanding a member of the same cycle
    /// is a boundary, so every cycle unrolls once and each expansion depends
    /// only on its pointer.
    fn expand(&mut self, target: &str) -> Option<Value> {
        if !pointer::is_local(target) {
            if self.external {
                debug!(reference = target, "external $ref left for the bundler");
            }
            return None;
        }

        if let Some(component) = self.cycles.component(target) {
            if self.policy == CircularPolicy::Ignore {
                return None;
            }
            let current = self.chain.last().and_then(|p| self.cycles.component(p));
            if current == Some(component) {
                return None;
            }
        }

        if let Some(cached) = self.memo.get(target) {
            return cached.clone();
        }

        let resolved = match resolver::resolve(target, self.root) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(pointer = target, error = %err, "leaving unresolvable $ref in place");
                return None;
            }
        };
        let is_alias = ref_target(resolved).is_some();
        let mut content = resolved.clone();

        self.chain.push(target);
        self.walk(&mut content, Position::Keyword);
        self.chain.pop();

        let expanded = if is_alias {
            // An alias takes the name of the component it finally lands on,
            // and stays put when it lands on a cycle boundary
            match ref_target(&content) {
                Some(next) if self.cycles.contains(next) => None,
                _ => Some(content),
            }
        } else {
            Some(annotate(content, target))
        };
        self.memo.insert(target.to_string(), expanded.clone());
        expanded
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    index: usize,
    lowlink: usize,
    on_stack: bool,
}

/// Strongly connected components of a document's local reference graph.
///
/// Nodes are resolvable local pointers; edges run from a pointer to every
/// `$ref` in its content. A pointer is a cycle member when its component has
/// more than one pointer or it refers to itself.
#[derive(Debug, Default)]
struct CycleIndex {
    components: HashMap<String, usize>,
    discovered: Vec<String>,
}

impl CycleIndex {
    fn build(root: &Value) -> Self {
        let mut tarjan = Tarjan {
            root,
            states: HashMap::new(),
            stack: Vec::new(),
            next_index: 0,
            index: CycleIndex::default(),
        };
        for target in local_refs(root) {
            if !tarjan.states.contains_key(target) {
                tarjan.visit(target);
            }
        }

        let Tarjan { states, mut index, .. } = tarjan;
        index
            .discovered
            .sort_by_key(|p| states.get(p).map_or(usize::MAX, |s| s.index));
        index
    }

    fn component(&self, pointer: &str) -> Option<usize> {
        self.components.get(pointer).copied()
    }

    fn contains(&self, pointer: &str) -> bool {
        self.components.contains_key(pointer)
    }

    /// Cycle members in discovery order.
    fn iter(&self) -> impl Iterator<Item = &str> {
        self.discovered.iter().map(String::as_str)
    }
}

struct Tarjan<'a> {
    root: &'a Value,
    states: HashMap<String, NodeState>,
    stack: Vec<String>,
    next_index: usize,
    index: CycleIndex,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, pointer: &str) {
        let Ok(content) = resolver::resolve(pointer, self.root) else {
            return;
        };
        let index = self.next_index;
        self.next_index += 1;
        self.states.insert(
            pointer.to_string(),
            NodeState {
                index,
                lowlink: index,
                on_stack: true,
            },
        );
        self.stack.push(pointer.to_string());

        let mut self_loop = false;
        for target in local_refs(content) {
            self_loop |= target == pointer;
            let reached = match self.states.get(target) {
                None => {
                    self.visit(target);
                    self.states.get(target).map(|s| s.lowlink)
                }
                Some(state) if state.on_stack => Some(state.index),
                Some(_) => None,
            };
            if let (Some(reached), Some(state)) = (reached, self.states.get_mut(pointer)) {
                state.lowlink = state.lowlink.min(reached);
            }
        }

        let Some(&state) = self.states.get(pointer) else {
            return;
        };
        if state.lowlink != state.index {
            return;
        }

        let mut members = Vec::new();
        while let Some(member) = self.stack.pop() {
            if let Some(s) = self.states.get_mut(&member) {
                s.on_stack = false;
            }
            let done = member == pointer;
            members.push(member);
            if done {
                break;
            }
        }
        if members.len() > 1 || self_loop {
            let id = self.index.discovered.len();
            for member in members {
                self.index.components.insert(member.clone(), id);
                self.index.discovered.push(member);
            }
        }
    }
}

/// Local `$ref` targets reachable from `value` without crossing another `$ref`.
fn local_refs(value: &Value) -> Vec<&str> {
    fn collect<'v>(value: &'v Value, position: Position, out: &mut Vec<&'v str>) {
        match value {
            Value::Object(map) => {
                if position == Position::Keyword {
                    if let Some(target) = map_ref_target(map) {
                        if pointer::is_local(target) {
                            out.push(target);
                        }
                        return;
                    }
                }
                for (key, child) in map {
                    collect(child, child_position(position, key, child), out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect(item, position, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    collect(value, Position::Keyword, &mut out);
    out
}

fn annotate(mut content: Value, target: &str) -> Value {
    if let (Value::Object(map), Some(name)) = (&mut content, pointer::last_segment(target)) {
        map.insert(REF_NAME_KEY.to_string(), Value::String(name));
    }
    content
}

/// Dereference a whole document in place and report its circular pointers.
///
/// For OpenAPI documents the discriminator `oneOf` synthesis runs around the
/// walk unless disabled in `options`.
///
/// # Errors
///
/// Returns `DereferenceError::Circular` when a cycle is found and the policy is
/// [`CircularPolicy::Fatal`]. The document is left untouched then.
pub fn dereference(
    document: &mut Value,
    options: &DereferenceOptions,
) -> Result<CircularRefRegistry, DereferenceError> {
    let discriminators = (options.discriminator_one_of
        && SpecKind::detect(document) == SpecKind::OpenApi)
        .then(|| find_discriminator_children(document));

    let mut dereferencer = Dereferencer::new(options);
    dereferencer.dereference_document(document)?;

    if let Some(map) = discriminators {
        build_discriminator_one_of(document, &map);
    }
    Ok(dereferencer.into_circular_refs())
}

/// List the circular pointers of a document without modifying it.
///
/// Runs in time linear in the number of references.
pub fn find_circular_refs(document: &Value) -> CircularRefRegistry {
    let mut registry = CircularRefRegistry::default();
    for member in CycleIndex::build(document).iter() {
        registry.insert(member);
    }
    registry
}
