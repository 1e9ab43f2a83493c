//! Variable extraction from Tera templates.
//!
//! The template is parsed into Tera's syntax tree and walked exhaustively:
//! variable blocks, `if`/`elif`/`else` branches, `for` bodies and empty
//! bodies, `block` and `filter` sections, macro definitions, `set`
//! assignments, and every sub-expression including function, filter and
//! macro keyword arguments. Each identifier is reported in its source
//! spelling (`NAME`, `parent.NAME`, `ns.lxc.web.NAME`).
//!
//! Names the template binds itself are skipped: loop variables (and
//! `loop`), `set` targets, macro arguments, the render-data root `data`,
//! and Tera's `__tera_context`.

use std::collections::{BTreeSet, HashSet};
use tera::ast::{Expr, ExprVal, FunctionCall, Node};

use super::error::{TemplateError, WITHHELD_MESSAGE, format_tera_error, line_from_tera_error};
use crate::constants::TEMPLATE_DATA_ROOT;

const TERA_CONTEXT_IDENT: &str = "__tera_context";
const LOOP_IDENT: &str = "loop";

/// Result of parsing a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTemplate {
    /// Distinct variable tokens, in source spelling.
    pub variables: BTreeSet<String>,
    /// The template reads `data` or calls a function, so it renders even
    /// without variables.
    pub uses_render_data: bool,
}

/// Parse `content` and collect its variable tokens.
///
/// `label` names the template in errors. With `withhold` set, Tera's message
/// (which quotes template text) is replaced.
pub fn parse_template(
    label: &str,
    content: &str,
    withhold: bool,
) -> Result<ParsedTemplate, TemplateError> {
    let template = tera::Template::new(label, None, content).map_err(|e| {
        TemplateError::SyntaxError {
            template: label.to_string(),
            message: if withhold {
                WITHHELD_MESSAGE.to_string()
            } else {
                format_tera_error(&e)
            },
            line: line_from_tera_error(&e),
        }
    })?;

    let mut walker = Walker::new(&template.ast);
    walker.walk_nodes(&template.ast);

    Ok(ParsedTemplate {
        variables: walker.variables,
        uses_render_data: walker.uses_render_data,
    })
}

/// Collect the distinct variable tokens of a template.
pub fn extract_variables(content: &str) -> Result<BTreeSet<String>, TemplateError> {
    parse_template("template", content, false).map(|parsed| parsed.variables)
}

struct Walker {
    variables: BTreeSet<String>,
    /// Names bound anywhere by `set`; Tera lets them escape their block.
    assigned: HashSet<String>,
    /// Loop and macro argument scopes.
    scopes: Vec<Vec<String>>,
    uses_render_data: bool,
}

impl Walker {
    fn new(ast: &[Node]) -> Self {
        let mut assigned = HashSet::new();
        collect_set_targets(ast, &mut assigned);
        Self {
            variables: BTreeSet::new(),
            assigned,
            scopes: Vec::new(),
            uses_render_data: false,
        }
    }

    fn is_bound(&self, root: &str) -> bool {
        root == TEMPLATE_DATA_ROOT
            || root == TERA_CONTEXT_IDENT
            || self.assigned.contains(root)
            || self.scopes.iter().any(|scope| scope.iter().any(|name| name == root))
    }

    fn add_ident(&mut self, ident: &str) {
        // `a.b[c]` indexes into `a.b`; the index expression is not walked
        let token = ident.split('[').next().unwrap_or(ident);
        let root = token.split('.').next().unwrap_or(token);
        if root == TEMPLATE_DATA_ROOT {
            self.uses_render_data = true;
        }
        if token.is_empty() || self.is_bound(root) {
            return;
        }
        self.variables.insert(token.to_string());
    }

    fn with_scope(&mut self, names: Vec<String>, body: impl FnOnce(&mut Self)) {
        self.scopes.push(names);
        body(self);
        self.scopes.pop();
    }

    fn walk_nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.walk_node(node);
        }
    }

    fn walk_node(&mut self, node: &Node) {
        match node {
            Node::VariableBlock(_, expr) => self.walk_expr(expr),
            Node::Set(_, set) => self.walk_expr(&set.value),
            Node::If(branches, _) => {
                for (_, condition, body) in &branches.conditions {
                    self.walk_expr(condition);
                    self.walk_nodes(body);
                }
                if let Some((_, body)) = &branches.otherwise {
                    self.walk_nodes(body);
                }
            }
            Node::Forloop(_, forloop, _) => {
                self.walk_expr(&forloop.container);
                let mut names = vec![forloop.value.clone(), LOOP_IDENT.to_string()];
                names.extend(forloop.key.clone());
                self.with_scope(names, |walker| {
                    walker.walk_nodes(&forloop.body);
                });
                if let Some(empty_body) = &forloop.empty_body {
                    self.walk_nodes(empty_body);
                }
            }
            Node::Block(_, block, _) => self.walk_nodes(&block.body),
            Node::FilterSection(_, section, _) => {
                self.walk_call(&section.filter);
                self.walk_nodes(&section.body);
            }
            Node::MacroDefinition(_, definition, _) => {
                for default in definition.args.values().flatten() {
                    self.walk_expr(default);
                }
                let names = definition.args.keys().cloned().collect();
                self.with_scope(names, |walker| walker.walk_nodes(&definition.body));
            }
            // Terminals: text, raw blocks, comments, includes and imports
            // name templates rather than variables
            Node::Super
            | Node::Text(_)
            | Node::Raw(..)
            | Node::Comment(..)
            | Node::Extends(..)
            | Node::Include(..)
            | Node::ImportMacro(..)
            | Node::Break(_)
            | Node::Continue(_) => {}
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        self.walk_val(&expr.val);
        for filter in &expr.filters {
            self.walk_call(filter);
        }
    }

    fn walk_call(&mut self, call: &FunctionCall) {
        for arg in call.args.values() {
            self.walk_expr(arg);
        }
    }

    fn walk_val(&mut self, val: &ExprVal) {
        match val {
            ExprVal::Ident(ident) => self.add_ident(ident),
            ExprVal::Math(math) => {
                self.walk_expr(&math.lhs);
                self.walk_expr(&math.rhs);
            }
            ExprVal::Logic(logic) => {
                self.walk_expr(&logic.lhs);
                self.walk_expr(&logic.rhs);
            }
            ExprVal::Test(test) => {
                self.add_ident(&test.ident);
                for arg in &test.args {
                    self.walk_expr(arg);
                }
            }
            ExprVal::MacroCall(call) => {
                for arg in call.args.values() {
                    self.walk_expr(arg);
                }
            }
            ExprVal::FunctionCall(call) => {
                self.uses_render_data = true;
                self.walk_call(call);
            }
            ExprVal::Array(items) => {
                for item in items {
                    self.walk_expr(item);
                }
            }
            ExprVal::StringConcat(concat) => {
                for value in &concat.values {
                    self.walk_val(value);
                }
            }
            ExprVal::In(in_expr) => {
                self.walk_expr(&in_expr.lhs);
                self.walk_expr(&in_expr.rhs);
            }
            ExprVal::String(_) | ExprVal::Int(_) | ExprVal::Float(_) | ExprVal::Bool(_) => {}
        }
    }
}

fn collect_set_targets(nodes: &[Node], assigned: &mut HashSet<String>) {
    for node in nodes {
        match node {
            Node::Set(_, set) => {
                assigned.insert(set.key.clone());
            }
            Node::If(branches, _) => {
                for (_, _, body) in &branches.conditions {
                    collect_set_targets(body, assigned);
                }
                if let Some((_, body)) = &branches.otherwise {
                    collect_set_targets(body, assigned);
                }
            }
            Node::Forloop(_, forloop, _) => {
                collect_set_targets(&forloop.body, assigned);
                if let Some(empty_body) = &forloop.empty_body {
                    collect_set_targets(empty_body, assigned);
                }
            }
            Node::Block(_, block, _) => collect_set_targets(&block.body, assigned),
            Node::FilterSection(_, section, _) => collect_set_targets(&section.body, assigned),
            Node::MacroDefinition(_, definition, _) => {
                collect_set_targets(&definition.body, assigned);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(content: &str) -> Vec<String> {
        extract_variables(content).unwrap().into_iter().collect()
    }

    #[test]
    fn test_simple_placeholders() {
        assert_eq!(vars("Hello {{ name }}, key={{ SECRET_API_KEY }}"), ["SECRET_API_KEY", "name"]);
    }

    #[test]
    fn test_namespace_tokens_keep_spelling() {
        assert_eq!(
            vars("{{ parent.DOMAIN }} {{ ns.lxc.db.PORT }} {{ PORT }}"),
            ["PORT", "ns.lxc.db.PORT", "parent.DOMAIN"]
        );
    }

    #[test]
    fn test_conditional_branches_are_walked() {
        let template = "{% if A %}{{ B }}{% elif C %}{{ D }}{% else %}{{ E }}{% endif %}";
        assert_eq!(vars(template), ["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn test_function_and_filter_arguments_are_walked() {
        let template = r#"{{ domain_for_app(app=APP) }} {{ X | default(value=FALLBACK) }} {{ "a" ~ SUFFIX }}"#;
        assert_eq!(vars(template), ["APP", "FALLBACK", "SUFFIX", "X"]);
    }

    #[test]
    fn test_loop_and_set_bindings_are_not_variables() {
        let template = "{% set greeting = PREFIX %}{% for item in ITEMS %}{{ item }}{{ loop.index }}{{ greeting }}{% else %}{{ EMPTY }}{% endfor %}";
        assert_eq!(vars(template), ["EMPTY", "ITEMS", "PREFIX"]);
    }

    #[test]
    fn test_tests_and_membership() {
        let template = "{% if FLAG is defined and NAME in NAMES %}x{% endif %}";
        assert_eq!(vars(template), ["FLAG", "NAME", "NAMES"]);
    }

    #[test]
    fn test_data_root_is_reserved() {
        assert!(vars("{{ data.hostname }}").is_empty());
    }

    #[test]
    fn test_render_data_detection() {
        let parsed = parse_template("t", "{# note #}{{ 1 + 2 }}{% raw %}{{ x }}{% endraw %}", false).unwrap();
        assert!(!parsed.uses_render_data);
        assert!(parsed.variables.is_empty());

        assert!(parse_template("t", "{{ data.hostname }}", false).unwrap().uses_render_data);
        assert!(parse_template("t", "{{ domain_for_container() }}", false).unwrap().uses_render_data);
        assert!(!parse_template("t", "{{ NAME | upper }}", false).unwrap().uses_render_data);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let template = "{% for x in LIST %}{{ x }}{{ A }}{% endfor %}{{ B | upper }}{% if C %}{% endif %}";
        assert_eq!(extract_variables(template).unwrap(), extract_variables(template).unwrap());
    }

    #[test]
    fn test_syntax_error_can_withhold_message() {
        let err = parse_template("value of SECRET_X", "{{ oops", true).unwrap_err();
        match err {
            TemplateError::SyntaxError {
                message,
                ..
            } => assert_eq!(message, WITHHELD_MESSAGE),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
