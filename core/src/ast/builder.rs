use super::{Ast, AstNode, Literal, NodeData, NodeIndex, Position, StringPool};

/// Programmatic construction of an [`Ast`], used by embedders that already
/// hold a parsed program in another shape, and by tests and benches.
///
/// Every helper appends one node and returns its index. Names are interned on
/// the fly.
#[derive(Debug, Default)]
pub struct AstBuilder {
    nodes: Vec<AstNode>,
    strings: StringPool,
    line: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subsequent nodes are stamped with this line (column 1).
    pub fn at_line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    pub fn push(&mut self, data: NodeData) -> NodeIndex {
        let idx = NodeIndex::new(self.nodes.len() as u32);
        let span = (self.line > 0).then(|| Position::new(self.line, 1));
        self.nodes.push(AstNode { data, span });
        idx
    }

    pub fn intern(&mut self, name: &str) -> super::StrId {
        self.strings.intern(name)
    }

    pub fn var(&mut self, name: &str) -> NodeIndex {
        let name = self.intern(name);
        self.push(NodeData::Variable { name })
    }

    pub fn int(&mut self, value: i64) -> NodeIndex {
        self.push(NodeData::Literal {
            value: Literal::Int(value),
        })
    }

    pub fn string(&mut self, value: &str) -> NodeIndex {
        let id = self.intern(value);
        self.push(NodeData::Literal {
            value: Literal::String(id),
        })
    }

    pub fn null(&mut self) -> NodeIndex {
        self.push(NodeData::Literal { value: Literal::Null })
    }

    pub fn new_object(&mut self, class_name: &str, args: Vec<NodeIndex>) -> NodeIndex {
        let class_name = self.intern(class_name);
        self.push(NodeData::ObjectInstantiation { class_name, args })
    }

    pub fn array(&mut self, elements: Vec<NodeIndex>) -> NodeIndex {
        self.push(NodeData::ArrayInit { elements })
    }

    pub fn assign(&mut self, target: NodeIndex, value: NodeIndex) -> NodeIndex {
        self.push(NodeData::Assignment { target, value })
    }

    /// `$name = value;`
    pub fn assign_var(&mut self, name: &str, value: NodeIndex) -> NodeIndex {
        let target = self.var(name);
        self.assign(target, value)
    }

    pub fn prop(&mut self, object: NodeIndex, property: &str) -> NodeIndex {
        let property = self.intern(property);
        self.push(NodeData::PropertyAccess { object, property })
    }

    /// `$var->property`
    pub fn var_prop(&mut self, var: &str, property: &str) -> NodeIndex {
        let object = self.var(var);
        self.prop(object, property)
    }

    pub fn index(&mut self, array: NodeIndex, index: Option<NodeIndex>) -> NodeIndex {
        self.push(NodeData::ArrayAccess { array, index })
    }

    pub fn call(&mut self, name: &str, args: Vec<NodeIndex>) -> NodeIndex {
        let name = self.intern(name);
        self.push(NodeData::FunctionCall { name, args })
    }

    pub fn method_call(&mut self, object: NodeIndex, method: &str, args: Vec<NodeIndex>) -> NodeIndex {
        let method = self.intern(method);
        self.push(NodeData::MethodCall { object, method, args })
    }

    pub fn ret(&mut self, value: Option<NodeIndex>) -> NodeIndex {
        self.push(NodeData::ReturnStmt { value })
    }

    pub fn throw(&mut self, value: NodeIndex) -> NodeIndex {
        self.push(NodeData::ThrowStmt { value })
    }

    pub fn block(&mut self, statements: Vec<NodeIndex>) -> NodeIndex {
        self.push(NodeData::Block { statements })
    }

    pub fn function(&mut self, name: &str, params: &[&str], body: Vec<NodeIndex>) -> NodeIndex {
        let name = self.intern(name);
        let params = params.iter().map(|p| self.strings.intern(p)).collect();
        let body = self.block(body);
        self.push(NodeData::FunctionDecl { name, params, body })
    }

    pub fn closure(&mut self, params: &[&str], captures: &[&str], body: Vec<NodeIndex>) -> NodeIndex {
        let params = params.iter().map(|p| self.strings.intern(p)).collect();
        let captures = captures.iter().map(|c| self.strings.intern(c)).collect();
        let body = self.block(body);
        self.push(NodeData::Closure { params, captures, body })
    }

    pub fn if_stmt(&mut self, condition: NodeIndex, then_body: Vec<NodeIndex>, else_body: Option<Vec<NodeIndex>>) -> NodeIndex {
        let then_branch = self.block(then_body);
        let else_branch = else_body.map(|stmts| self.block(stmts));
        self.push(NodeData::IfStmt {
            condition,
            then_branch,
            else_branch,
        })
    }

    pub fn while_stmt(&mut self, condition: NodeIndex, body: Vec<NodeIndex>) -> NodeIndex {
        let body = self.block(body);
        self.push(NodeData::WhileStmt { condition, body })
    }

    pub fn for_stmt(
        &mut self,
        init: Vec<NodeIndex>,
        condition: Option<NodeIndex>,
        update: Vec<NodeIndex>,
        body: Vec<NodeIndex>,
    ) -> NodeIndex {
        let body = self.block(body);
        self.push(NodeData::ForStmt {
            init,
            condition,
            update,
            body,
        })
    }

    pub fn foreach(&mut self, iterable: NodeIndex, key: Option<&str>, value: &str, body: Vec<NodeIndex>) -> NodeIndex {
        let key = key.map(|k| self.intern(k));
        let value = self.intern(value);
        let body = self.block(body);
        self.push(NodeData::ForeachStmt {
            iterable,
            key,
            value,
            body,
        })
    }

    pub fn global(&mut self, names: &[&str]) -> NodeIndex {
        let names = names.iter().map(|n| self.strings.intern(n)).collect();
        self.push(NodeData::Global { names })
    }

    pub fn other(&mut self) -> NodeIndex {
        self.push(NodeData::Other)
    }

    /// Wrap `statements` in a root node and produce the tree.
    pub fn finish(mut self, statements: Vec<NodeIndex>) -> Ast {
        let root = self.push(NodeData::Root { statements });
        Ast::new(root, self.nodes, self.strings)
    }
}
