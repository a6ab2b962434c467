//! Sea-of-Nodes graph structure.
//!
//! The graph provides:
//! - **Arena-based storage**: node ids are allocation-ordered and never reused
//! - **Use-def chains**: every def knows its users, with one entry per edge
//! - **Start and Root**: control enters at `Start`; all terminators hang off `Root`
//!
//! Dead nodes stay in the arena with [`NodeFlags::DEAD`] set and all their
//! input edges disconnected. [`Graph::unique`] is the index the next node
//! will receive, which callers capture before a transformation to recognize
//! the nodes it created.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::{Arena, SecondaryMap};
use super::node::{AssertionPredicateType, BranchProfile, Node, NodeAttrs, NodeFlags, NodeId};
use super::operators::{
    ArithOp, BoolTest, CmpKind, ControlOp, DeoptReason, IfKind, LoopKind, OpaqueOp, Operator,
    ParmKind, Width,
};
use super::types::{TypeInt, ValueType};

/// Control successors or predecessors of a CFG node.
pub type CfgList = SmallVec<[NodeId; 4]>;

// =============================================================================
// Graph Structure
// =============================================================================

/// A Sea-of-Nodes graph.
#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,

    /// For each node, the nodes using it. A user appears once per edge.
    uses: SecondaryMap<Node, Vec<NodeId>>,

    /// The start node (control entry).
    pub start: NodeId,

    /// Collects `Return`, `Halt` and `UncommonTrap` terminators.
    pub root: NodeId,

    /// Number of nodes not marked dead.
    live: usize,

    int_cons: FxHashMap<i32, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Arena::with_capacity(256),
            uses: SecondaryMap::new(),
            start: NodeId::INVALID,
            root: NodeId::INVALID,
            live: 0,
            int_cons: FxHashMap::default(),
        };
        graph.start = graph.add_node(Operator::Control(ControlOp::Start), &[]);
        graph.root = graph.add_node(Operator::Control(ControlOp::Root), &[NodeId::INVALID]);
        graph
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Mutable access to a node's attributes, flags and type.
    ///
    /// Inputs must be edited through [`Graph::replace_input`] and friends so
    /// the use lists stay consistent.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn op(&self, id: NodeId) -> Operator {
        self.nodes[id].op
    }

    #[inline]
    pub fn input(&self, id: NodeId, i: usize) -> NodeId {
        self.nodes[id].input(i)
    }

    #[inline]
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].inputs
    }

    #[inline]
    pub fn req(&self, id: NodeId) -> usize {
        self.nodes[id].req()
    }

    /// All nodes ever created, dead ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index the next created node will receive.
    #[inline]
    pub fn unique(&self) -> u32 {
        self.nodes.next_id().index()
    }

    #[inline]
    pub fn live_nodes(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_dead(&self, id: NodeId) -> bool {
        !id.is_valid() || self.nodes[id].is_dead()
    }

    #[inline]
    pub fn is_cfg(&self, id: NodeId) -> bool {
        id.is_valid() && self.nodes[id].is_cfg()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().filter(|(_, n)| !n.is_dead())
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn set_flag(&mut self, id: NodeId, flag: NodeFlags, on: bool) {
        self.nodes[id].flags.set(flag, on);
    }

    pub fn set_type(&mut self, id: NodeId, ty: ValueType) {
        self.nodes[id].ty = ty;
    }

    pub fn set_attrs(&mut self, id: NodeId, attrs: NodeAttrs) {
        self.nodes[id].attrs = attrs;
    }

    // =========================================================================
    // Use Chains
    // =========================================================================

    #[inline]
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id)
    }

    /// Number of use edges.
    #[inline]
    pub fn outcnt(&self, id: NodeId) -> usize {
        self.uses.get(id).len()
    }

    /// The only user, if there is exactly one use edge.
    pub fn unique_out(&self, id: NodeId) -> Option<NodeId> {
        match self.uses(id) {
            [only] => Some(*only),
            _ => None,
        }
    }

    fn add_use(&mut self, def: NodeId, user: NodeId) {
        if def.is_valid() {
            self.uses.get_mut(def).push(user);
        }
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        if !def.is_valid() {
            return;
        }
        let uses = self.uses.get_mut(def);
        if let Some(pos) = uses.iter().position(|&u| u == user) {
            uses.swap_remove(pos);
        }
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId]) -> NodeId {
        let id = self.nodes.alloc(Node::new(op, inputs));
        for &input in inputs {
            self.add_use(input, id);
        }
        self.live += 1;
        id
    }

    pub fn add_node_typed(&mut self, op: Operator, inputs: &[NodeId], ty: ValueType) -> NodeId {
        let id = self.add_node(op, inputs);
        self.nodes[id].ty = ty;
        id
    }

    /// Copy a node with the same inputs. The copy starts out live and useful.
    pub fn clone_node(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes[id].clone();
        node.flags.remove(NodeFlags::DEAD | NodeFlags::USELESS);
        let inputs = node.inputs.clone();
        let clone = self.nodes.alloc(node);
        for input in inputs {
            self.add_use(input, clone);
        }
        self.live += 1;
        clone
    }

    // =========================================================================
    // Node Modification
    // =========================================================================

    /// Set input `index` of `node`, growing the input list if needed.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let old = self.nodes[node].input(index);
        if old == new_input && index < self.nodes[node].req() {
            return;
        }
        self.remove_use(old, node);
        let inputs = &mut self.nodes[node].inputs;
        if index >= inputs.len() {
            inputs.resize(index + 1, NodeId::INVALID);
        }
        inputs[index] = new_input;
        self.add_use(new_input, node);
    }

    /// Append an input. Returns its index.
    pub fn add_input(&mut self, node: NodeId, input: NodeId) -> usize {
        self.nodes[node].inputs.push(input);
        self.add_use(input, node);
        self.nodes[node].req() - 1
    }

    /// Remove input `index`, shifting later inputs down.
    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        let old = self.nodes[node].inputs.remove(index);
        self.remove_use(old, node);
    }

    /// Rewire every use of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) {
        self.replace_uses_where(old, new, |_| true);
    }

    /// Rewire the uses of `old` to `new`, skipping edges from `except`.
    pub fn replace_uses_except(&mut self, old: NodeId, new: NodeId, except: NodeId) {
        self.replace_uses_where(old, new, |user| user != except);
    }

    fn replace_uses_where(&mut self, old: NodeId, new: NodeId, keep: impl Fn(NodeId) -> bool) {
        if old == new {
            return;
        }
        let mut users: Vec<NodeId> = self.uses(old).to_vec();
        users.sort_unstable();
        users.dedup();
        for user in users.into_iter().filter(|&u| keep(u)) {
            for i in 0..self.nodes[user].req() {
                if self.nodes[user].inputs[i] == old {
                    self.replace_input(user, i, new);
                }
            }
        }
    }

    /// Mark a node dead and disconnect its inputs.
    ///
    /// Remaining users of the node are left pointing at it; callers either
    /// rewire them first or kill them too.
    pub fn kill(&mut self, id: NodeId) {
        if self.nodes[id].is_dead() {
            return;
        }
        let inputs = std::mem::take(&mut self.nodes[id].inputs);
        for input in inputs {
            self.remove_use(input, id);
        }
        if let Operator::ConI(v) = self.nodes[id].op {
            if self.int_cons.get(&v) == Some(&id) {
                self.int_cons.remove(&v);
            }
        }
        self.nodes[id].flags.insert(NodeFlags::DEAD);
        self.live -= 1;
    }

    // =========================================================================
    // Control Structure
    // =========================================================================

    /// Control predecessors of a CFG node.
    pub fn cfg_preds(&self, id: NodeId) -> CfgList {
        let node = &self.nodes[id];
        if node.op.is_region_like() {
            node.inputs[1..]
                .iter()
                .copied()
                .filter(|&p| p.is_valid() && self.is_cfg(p))
                .collect()
        } else {
            node.input(0).valid().into_iter().collect()
        }
    }

    /// Control successors of a CFG node.
    ///
    /// The `Root` node is not a successor; terminators have no successors.
    pub fn cfg_succs(&self, id: NodeId) -> CfgList {
        let mut succs = CfgList::new();
        for &user in self.uses(id) {
            let node = &self.nodes[user];
            if !node.is_cfg() || node.is_dead() || user == self.root || succs.contains(&user) {
                continue;
            }
            let is_ctrl_edge = if node.op.is_region_like() {
                node.inputs[1..].contains(&id)
            } else {
                node.input(0) == id
            };
            if is_ctrl_edge {
                succs.push(user);
            }
        }
        succs
    }

    /// The only control successor, if there is exactly one.
    pub fn unique_ctrl_out(&self, id: NodeId) -> Option<NodeId> {
        match self.cfg_succs(id).as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The true or false projection of an `If`.
    pub fn proj_out(&self, iff: NodeId, on_true: bool) -> Option<NodeId> {
        let wanted = if on_true {
            ControlOp::IfTrue
        } else {
            ControlOp::IfFalse
        };
        self.uses(iff)
            .iter()
            .copied()
            .find(|&u| self.nodes[u].op == Operator::Control(wanted) && !self.is_dead(u))
    }

    /// The sibling of an `If` projection.
    pub fn other_proj(&self, proj: NodeId) -> Option<NodeId> {
        match self.nodes[proj].op {
            Operator::Control(ControlOp::IfTrue) => self.proj_out(self.input(proj, 0), false),
            Operator::Control(ControlOp::IfFalse) => self.proj_out(self.input(proj, 0), true),
            _ => None,
        }
    }

    #[inline]
    pub fn is_if_true(&self, id: NodeId) -> bool {
        self.nodes[id].op == Operator::Control(ControlOp::IfTrue)
    }

    // =========================================================================
    // Constants
    // =========================================================================

    /// Shared int constant node.
    pub fn con_i(&mut self, value: i32) -> NodeId {
        if let Some(&id) = self.int_cons.get(&value) {
            return id;
        }
        let id = self.add_node(Operator::ConI(value), &[NodeId::INVALID]);
        self.int_cons.insert(value, id);
        id
    }

    pub fn con_l(&mut self, value: i64) -> NodeId {
        self.add_node(Operator::ConL(value), &[NodeId::INVALID])
    }

    /// Constant value of an int node, if it is one.
    pub fn find_int_con(&self, id: NodeId) -> Option<i32> {
        if !id.is_valid() {
            return None;
        }
        self.nodes[id].op.con_i()
    }

    // =========================================================================
    // Control Constructors
    // =========================================================================

    pub fn region(&mut self, preds: &[NodeId]) -> NodeId {
        let mut inputs = vec![NodeId::INVALID];
        inputs.extend_from_slice(preds);
        self.add_node(Operator::Control(ControlOp::Region), &inputs)
    }

    /// Loop head with the given entry and backedge. The backedge may be
    /// `INVALID` until the loop body is built.
    pub fn loop_node(&mut self, kind: LoopKind, entry: NodeId, backedge: NodeId) -> NodeId {
        self.add_node(
            Operator::Control(ControlOp::Loop(kind)),
            &[NodeId::INVALID, entry, backedge],
        )
    }

    pub fn if_node(
        &mut self,
        kind: IfKind,
        ctrl: NodeId,
        cond: NodeId,
        profile: BranchProfile,
    ) -> NodeId {
        let iff = self.add_node(Operator::Control(ControlOp::If(kind)), &[ctrl, cond]);
        self.nodes[iff].attrs = NodeAttrs::Branch(profile);
        iff
    }

    pub fn if_true(&mut self, iff: NodeId) -> NodeId {
        self.add_node(Operator::Control(ControlOp::IfTrue), &[iff])
    }

    pub fn if_false(&mut self, iff: NodeId) -> NodeId {
        self.add_node(Operator::Control(ControlOp::IfFalse), &[iff])
    }

    /// A Parse Predicate with both projections and an uncommon trap on the
    /// false side. Returns `(if, true_proj)`.
    pub fn parse_predicate(&mut self, ctrl: NodeId, reason: DeoptReason) -> (NodeId, NodeId) {
        let one = self.con_i(1);
        let iff = self.if_node(IfKind::ParsePredicate(reason), ctrl, one, BranchProfile::ALWAYS);
        let success = self.if_true(iff);
        let fail = self.if_false(iff);
        let frame = self.frame_ptr();
        self.uncommon_trap(fail, reason, frame);
        (iff, success)
    }

    pub fn template_assertion_predicate(
        &mut self,
        ctrl: NodeId,
        init_bool: NodeId,
        last_bool: NodeId,
        init_value_if: IfKind,
        last_value_if: IfKind,
    ) -> NodeId {
        let id = self.add_node(
            Operator::Control(ControlOp::TemplateAssertionPredicate),
            &[ctrl, init_bool, last_bool],
        );
        self.nodes[id].attrs = NodeAttrs::Template {
            init_value_if,
            last_value_if,
        };
        id
    }

    /// Mark an `If` as an Initialized Assertion Predicate.
    pub fn set_assertion_predicate_type(&mut self, iff: NodeId, ty: AssertionPredicateType) {
        self.nodes[iff].attrs = NodeAttrs::InitializedAssertion(ty);
    }

    pub fn safepoint(&mut self, ctrl: NodeId) -> NodeId {
        self.add_node(Operator::Control(ControlOp::SafePoint), &[ctrl])
    }

    /// Register a terminator with `Root`.
    pub fn add_to_root(&mut self, term: NodeId) {
        let root = self.root;
        self.add_input(root, term);
    }

    pub fn halt(&mut self, ctrl: NodeId, frame: NodeId) -> NodeId {
        let halt = self.add_node(Operator::Control(ControlOp::Halt), &[ctrl, frame]);
        self.add_to_root(halt);
        halt
    }

    pub fn uncommon_trap(&mut self, ctrl: NodeId, reason: DeoptReason, frame: NodeId) -> NodeId {
        let trap = self.add_node(
            Operator::Control(ControlOp::UncommonTrap(reason)),
            &[ctrl, frame],
        );
        self.add_to_root(trap);
        trap
    }

    pub fn ret(&mut self, ctrl: NodeId, value: NodeId) -> NodeId {
        let ret = self.add_node(Operator::Control(ControlOp::Return), &[ctrl, value]);
        self.add_to_root(ret);
        ret
    }

    // =========================================================================
    // Data Constructors
    // =========================================================================

    pub fn parm(&mut self, kind: ParmKind) -> NodeId {
        let start = self.start;
        self.add_node(Operator::Parm(kind), &[start])
    }

    pub fn frame_ptr(&mut self) -> NodeId {
        self.parm(ParmKind::FramePtr)
    }

    pub fn phi(&mut self, region: NodeId, values: &[NodeId], ty: ValueType) -> NodeId {
        let mut inputs = vec![region];
        inputs.extend_from_slice(values);
        self.add_node_typed(Operator::Phi, &inputs, ty)
    }

    pub fn arith(&mut self, op: ArithOp, width: Width, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Arith(op, width), &[NodeId::INVALID, lhs, rhs])
    }

    pub fn add_i(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Add, Width::Int, lhs, rhs)
    }

    pub fn sub_i(&mut self, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.arith(ArithOp::Sub, Width::Int, lhs, rhs)
    }

    pub fn cmp(&mut self, kind: CmpKind, width: Width, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Cmp(kind, width), &[NodeId::INVALID, lhs, rhs])
    }

    pub fn bool(&mut self, test: BoolTest, cmp: NodeId) -> NodeId {
        self.add_node(Operator::Bool(test), &[NodeId::INVALID, cmp])
    }

    pub fn conv_i2l(&mut self, value: NodeId) -> NodeId {
        self.add_node(Operator::ConvI2L, &[NodeId::INVALID, value])
    }

    pub fn cast_ii(&mut self, value: NodeId, ty: TypeInt) -> NodeId {
        self.add_node(Operator::CastII(ty), &[NodeId::INVALID, value])
    }

    pub fn opaque(&mut self, op: OpaqueOp, value: NodeId) -> NodeId {
        self.add_node(Operator::Opaque(op), &[NodeId::INVALID, value])
    }

    pub fn check_cast_pp(&mut self, ctrl: NodeId, value: NodeId) -> NodeId {
        self.add_node(Operator::CheckCastPP, &[ctrl, value])
    }

    pub fn load(&mut self, ctrl: NodeId, addr: NodeId) -> NodeId {
        self.add_node(Operator::Load, &[ctrl, addr])
    }

    pub fn store(&mut self, ctrl: NodeId, addr: NodeId, value: NodeId) -> NodeId {
        self.add_node(Operator::Store, &[ctrl, addr, value])
    }

    // =========================================================================
    // Iteration & Verification
    // =========================================================================

    /// Verify use-def consistency for live nodes.
    pub fn verify(&self) -> Result<(), String> {
        for (id, node) in self.iter() {
            for (i, &input) in node.inputs.iter().enumerate() {
                if !input.is_valid() {
                    continue;
                }
                if self.nodes[input].is_dead() {
                    return Err(format!("{} {id:?} input {i} is dead node {input:?}", node.op));
                }
                let edges = node.inputs.iter().filter(|&&x| x == input).count();
                let uses = self.uses(input).iter().filter(|&&u| u == id).count();
                if edges != uses {
                    return Err(format!(
                        "{} {id:?} has {edges} edges from {input:?} but {uses} use entries",
                        node.op
                    ));
                }
            }
            if node.op.is_if_proj() && !self.nodes[node.input(0)].op.is_if() {
                return Err(format!("projection {id:?} does not hang off an If"));
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} live nodes):", self.live)?;
        for (id, node) in self.iter() {
            write!(f, "  {id:?}: {} {:?}", node.op, node.inputs.as_slice())?;
            if node.is_useless() {
                f.write_str(" useless")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
