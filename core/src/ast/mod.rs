//! Index-addressed syntax tree consumed by the escape analyzer.
//!
//! The tree is produced by the parser and handed over as a flat arena of
//! [`AstNode`]s addressed by [`NodeIndex`], together with the [`StringPool`]
//! that interns every identifier the tree mentions. The analyzer only reads
//! it. The whole structure is serde-friendly so that hosts can exchange it as
//! JSON or YAML.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

mod builder;
mod pool;

pub use builder::AstBuilder;
pub use pool::{StrId, StringPool};


/// Opaque handle of a syntax-tree node inside an [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(u32);

impl NodeIndex {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Source position of a syntax-tree node (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Literal payload of a `literal` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(StrId),
}

/// Per-construct payload of a syntax-tree node.
///
/// Tags the analyzer does not model deserialize into [`NodeData::Other`] and
/// are ignored for escape purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum NodeData {
    Root {
        statements: Vec<NodeIndex>,
    },
    Block {
        statements: Vec<NodeIndex>,
    },
    FunctionDecl {
        name: StrId,
        #[serde(default)]
        params: Vec<StrId>,
        body: NodeIndex,
    },
    Assignment {
        target: NodeIndex,
        value: NodeIndex,
    },
    ObjectInstantiation {
        class_name: StrId,
        #[serde(default)]
        args: Vec<NodeIndex>,
    },
    ArrayInit {
        #[serde(default)]
        elements: Vec<NodeIndex>,
    },
    ReturnStmt {
        #[serde(default)]
        value: Option<NodeIndex>,
    },
    FunctionCall {
        name: StrId,
        #[serde(default)]
        args: Vec<NodeIndex>,
    },
    MethodCall {
        object: NodeIndex,
        method: StrId,
        #[serde(default)]
        args: Vec<NodeIndex>,
    },
    PropertyAccess {
        object: NodeIndex,
        property: StrId,
    },
    ArrayAccess {
        array: NodeIndex,
        /// `None` for the append form `$a[] = v`.
        #[serde(default)]
        index: Option<NodeIndex>,
    },
    Closure {
        #[serde(default)]
        params: Vec<StrId>,
        #[serde(default)]
        captures: Vec<StrId>,
        body: NodeIndex,
    },
    Variable {
        name: StrId,
    },
    IfStmt {
        condition: NodeIndex,
        then_branch: NodeIndex,
        #[serde(default)]
        else_branch: Option<NodeIndex>,
    },
    WhileStmt {
        condition: NodeIndex,
        body: NodeIndex,
    },
    ForStmt {
        #[serde(default)]
        init: Vec<NodeIndex>,
        #[serde(default)]
        condition: Option<NodeIndex>,
        #[serde(default)]
        update: Vec<NodeIndex>,
        body: NodeIndex,
    },
    ForeachStmt {
        iterable: NodeIndex,
        #[serde(default)]
        key: Option<StrId>,
        value: StrId,
        body: NodeIndex,
    },
    ThrowStmt {
        value: NodeIndex,
    },
    Literal {
        value: Literal,
    },
    /// `global $a, $b;` inside a function body.
    Global {
        names: Vec<StrId>,
    },
    #[serde(other)]
    Other,
}

impl NodeData {
    /// Tag name as it appears in the serialized form.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeData::Root { .. } => "root",
            NodeData::Block { .. } => "block",
            NodeData::FunctionDecl { .. } => "function_decl",
            NodeData::Assignment { .. } => "assignment",
            NodeData::ObjectInstantiation { .. } => "object_instantiation",
            NodeData::ArrayInit { .. } => "array_init",
            NodeData::ReturnStmt { .. } => "return_stmt",
            NodeData::FunctionCall { .. } => "function_call",
            NodeData::MethodCall { .. } => "method_call",
            NodeData::PropertyAccess { .. } => "property_access",
            NodeData::ArrayAccess { .. } => "array_access",
            NodeData::Closure { .. } => "closure",
            NodeData::Variable { .. } => "variable",
            NodeData::IfStmt { .. } => "if_stmt",
            NodeData::WhileStmt { .. } => "while_stmt",
            NodeData::ForStmt { .. } => "for_stmt",
            NodeData::ForeachStmt { .. } => "foreach_stmt",
            NodeData::ThrowStmt { .. } => "throw_stmt",
            NodeData::Literal { .. } => "literal",
            NodeData::Global { .. } => "global",
            NodeData::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Position>,
}

/// A complete syntax tree: node arena, root handle and interned strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ast {
    root: NodeIndex,
    #[serde(default)]
    strings: StringPool,
    nodes: Vec<AstNode>,
}

impl Ast {
    pub fn new(root: NodeIndex, nodes: Vec<AstNode>, strings: StringPool) -> Self {
        Self { root, strings, nodes }
    }

    pub fn root(&self) -> NodeIndex {
        self.root
    }

    pub fn get(&self, idx: NodeIndex) -> Option<&AstNode> {
        self.nodes.get(idx.index())
    }

    pub fn data(&self, idx: NodeIndex) -> Option<&NodeData> {
        self.get(idx).map(|node| &node.data)
    }

    pub fn span(&self, idx: NodeIndex) -> Option<Position> {
        self.get(idx).and_then(|node| node.span)
    }

    pub fn strings(&self) -> &StringPool {
        &self.strings
    }

    /// Resolve an interned name, falling back to `"?"` for ids the pool does not know.
    pub fn name(&self, id: StrId) -> &str {
        self.strings.resolve(id).unwrap_or("?")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn from_json_str(src: &str) -> Result<Self, Error> {
        serde_json::from_str(src).map_err(|e| Error::format("<json>", e))
    }

    pub fn from_yaml_str(src: &str) -> Result<Self, Error> {
        serde_yaml::from_str(src).map_err(|e| Error::format("<yaml>", e))
    }

    /// Load a tree from disk; the extension selects JSON or YAML.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let src = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let display = path.display().to_string();
        match extension(path).as_deref() {
            Some("json") => serde_json::from_str(&src).map_err(|e| Error::format(&display, e)),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&src).map_err(|e| Error::format(&display, e)),
            other => Err(Error::UnsupportedFormat {
                path: display,
                extension: other.map(str::to_string),
            }),
        }
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::format("<json>", e))
    }
}

pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
