//! The abstract syntax tree produced by the parser.
//!
//! The tree is a uniform tagged structure: every node carries an [`AstKind`]
//! tag, an optional textual value (identifier, operator lexeme, literal text,
//! function name), an ordered child list, and the source line it came from.
//! Child positions are semantic per kind and documented on the enum variants.
//!
//! Nodes live in a single arena owned by [`Ast`] and are addressed by dense
//! [`NodeId`]s. Later passes (symbol table, CFG) refer back to subtrees by id
//! instead of holding pointers, and annotate nodes in place through
//! [`Ast::set_error`] / [`Ast::set_data_type`].

use strum::{Display, IntoStaticStr};

/// Index of a node in the AST arena.
///
/// Uses `u32` to keep CFG nodes and symbol back-references small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(index.try_into().expect("AST too large"))
    }

    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Node tags. Where children are position-sensitive the layout is listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum AstKind {
    /// Children: top-level `FunctionDef` and `VarDeclaration` nodes.
    Program,
    /// Children: `[FunctionSignature, body-statement]`.
    FunctionDef,
    /// Value: function name. Children: `[params?, return-TypeRef?]`.
    FunctionSignature,
    /// Value: parameter name. Children: `[TypeRef]`, possibly followed by
    /// chained `ArgDef` siblings (see the symbol-table builder).
    ArgDef,
    /// Children: `ArgDef` nodes, one per parameter.
    ArgList,
    /// Value: base type name, or `"array"` with children
    /// `[size-IntLiteral, element-TypeRef]`.
    TypeRef,
    /// Children: `[Identifier | IdList, TypeRef]`.
    VarDeclaration,
    StatementBlock,
    StatementList,
    /// Children: `[cond, then, else?]`.
    If,
    /// Children: `[cond, body]`.
    While,
    /// Children: `[body, until-expr]`.
    Repeat,
    Break,
    Continue,
    /// Children: `[expr?]`.
    Return,
    /// Children: `[expr]`.
    ExprStatement,
    /// Value: operator lexeme. Children: `[lhs, rhs]`.
    BinaryExpr,
    /// Value: operator lexeme. Children: `[operand]`.
    UnaryExpr,
    /// Value: function name. Children: `[function-Identifier, ArgList]`.
    CallExpr,
    /// Children: `[base, index-expr]`.
    IndexExpr,
    /// Children: `[lhs, rhs]`. The lhs is an `Identifier` or `IndexExpr`.
    Assignment,
    /// Same layout as `Assignment` with an `IndexExpr` lhs. The parser emits
    /// plain `Assignment`; this tag is accepted wherever `Assignment` is.
    IndexedAssignment,
    /// Children: `[Identifier]`.
    AddrOf,
    /// Children: `[address-expr]`.
    Deref,
    /// Children: `[object, member-Identifier]`.
    MemberAccess,
    /// Value: the name.
    Identifier,
    /// Value: the literal text (decimal or `0x` hex).
    IntLiteral,
    StringLiteral,
    /// Value: `"true"` or `"false"`.
    BoolLiteral,
    /// Value: the quoted literal, e.g. `'a'` or `'\n'`.
    CharLiteral,
    FloatLiteral,
    /// Children: `Identifier` nodes.
    IdList,
    /// Children: `VarDeclaration` nodes.
    VarDeclList,
    ArrayLiteral,
    ArrayType,
}

/// A single AST node.
///
/// `has_error` / `error_message` and `data_type` are annotation slots filled
/// in by the semantic and CFG passes; the parser leaves them empty.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: AstKind,
    pub value: Option<String>,
    pub children: Vec<NodeId>,
    pub line: u32,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub data_type: Option<String>,
}

/// Arena holding every node of one parsed program.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<AstNode>,
    root: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new node and returns its id.
    pub fn add(&mut self, kind: AstKind, value: Option<String>, line: u32) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(AstNode {
            kind,
            value,
            children: Vec::new(),
            line,
            has_error: false,
            error_message: None,
            data_type: None,
        });
        id
    }

    /// Appends `child` to `parent`'s child list and returns `parent`.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> NodeId {
        self.nodes[parent.index()].children.push(child);
        parent
    }

    /// Marks the program root. Set once by the parser.
    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    /// The `Program` node, if the parser produced one.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> AstKind {
        self.nodes[id.index()].kind
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.index()].value.as_deref()
    }

    pub fn line(&self, id: NodeId) -> u32 {
        self.nodes[id.index()].line
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    /// The `i`-th child, if present.
    pub fn child(&self, id: NodeId, i: usize) -> Option<NodeId> {
        self.nodes[id.index()].children.get(i).copied()
    }

    pub fn has_error(&self, id: NodeId) -> bool {
        self.nodes[id.index()].has_error
    }

    pub fn error_message(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.index()].error_message.as_deref()
    }

    /// Flags `id` as semantically invalid. The first message sticks; later
    /// passes re-checking the same node must not overwrite the original
    /// diagnostic.
    pub fn set_error(&mut self, id: NodeId, message: impl Into<String>) {
        let node = &mut self.nodes[id.index()];
        node.has_error = true;
        if node.error_message.is_none() {
            node.error_message = Some(message.into());
        }
    }

    /// Records the inferred data type annotation.
    pub fn set_data_type(&mut self, id: NodeId, data_type: impl Into<String>) {
        self.nodes[id.index()].data_type = Some(data_type.into());
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over `(id, node)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &AstNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId::new(i), n))
    }

    /// Counts nodes carrying an error annotation.
    pub fn error_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.has_error).count()
    }
}
