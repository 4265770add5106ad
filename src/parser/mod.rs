//! Tree-sitter based method boundary detection.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tree_sitter::{Language as TsLanguage, Node, Parser as TsParser, Tree};

use crate::core::{Error, Language, Result};

/// A method's identity and line range in one version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpan {
    /// Method name.
    pub name: String,
    /// Enclosing types and methods, name and parameter list, whitespace
    /// collapsed (`Outer.Inner.run(int x)`). Repeats within one file get a
    /// `#n` suffix in source order.
    pub signature: String,
    /// First line (1-indexed).
    pub start_line: u32,
    /// Last line (1-indexed, inclusive).
    pub end_line: u32,
}

impl MethodSpan {
    pub fn contains(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Finds method boundaries in source text.
pub trait MethodLocator: Send + Sync {
    /// Methods declared in `source`, the contents of `path`, in source order.
    fn methods(&self, path: &str, source: &[u8]) -> Result<Vec<MethodSpan>>;
}

/// Thread-safe parser pool for multi-language parsing.
pub struct Parser {
    /// Cached parsers per language.
    parsers: Mutex<HashMap<Language, TsParser>>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            parsers: Mutex::new(HashMap::new()),
        }
    }

    /// Parse content with explicit language.
    pub fn parse(&self, content: &[u8], lang: Language, path: &Path) -> Result<ParseResult> {
        let parse_error = |message: String| Error::Parse {
            path: path.to_path_buf(),
            message,
        };

        let tree = {
            let mut parsers = self.parsers.lock();
            let parser = match parsers.entry(lang) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let mut parser = TsParser::new();
                    parser
                        .set_language(&get_tree_sitter_language(lang))
                        .map_err(|e| parse_error(format!("Incompatible grammar: {e}")))?;
                    entry.insert(parser)
                }
            };

            parser
                .parse(content, None)
                .ok_or_else(|| parse_error("Failed to parse file".to_string()))?
        };

        Ok(ParseResult {
            tree: Arc::new(tree),
            source: content.to_vec(),
            language: lang,
            path: path.to_path_buf(),
        })
    }
}

impl MethodLocator for Parser {
    fn methods(&self, path: &str, source: &[u8]) -> Result<Vec<MethodSpan>> {
        let lang = Language::detect(path).ok_or_else(|| Error::UnsupportedLanguage {
            path: PathBuf::from(path),
        })?;
        let result = self.parse(source, lang, Path::new(path))?;
        Ok(extract_methods(&result))
    }
}

/// Result of parsing a source file.
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// The parsed syntax tree.
    pub tree: Arc<Tree>,
    /// Original source content.
    pub source: Vec<u8>,
    /// Detected language.
    pub language: Language,
    /// File path.
    pub path: PathBuf,
}

impl ParseResult {
    /// Get the root node of the tree.
    pub fn root_node(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

/// Get tree-sitter language for a Language enum value.
pub fn get_tree_sitter_language(lang: Language) -> TsLanguage {
    let ts_lang = match lang {
        Language::Go => tree_sitter_go::LANGUAGE,
        Language::Rust => tree_sitter_rust::LANGUAGE,
        Language::TypeScript | Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX,
        Language::JavaScript | Language::Jsx => tree_sitter_javascript::LANGUAGE,
        Language::Java => tree_sitter_java::LANGUAGE,
        Language::C => tree_sitter_c::LANGUAGE,
        Language::Cpp => tree_sitter_cpp::LANGUAGE,
        Language::CSharp => tree_sitter_c_sharp::LANGUAGE,
    };
    ts_lang.into()
}

fn method_node_types(lang: Language) -> &'static [&'static str] {
    match lang {
        Language::Go => &["function_declaration", "method_declaration"],
        Language::Rust => &["function_item"],
        Language::TypeScript | Language::JavaScript | Language::Tsx | Language::Jsx => {
            &["function_declaration", "method_definition"]
        }
        Language::Java | Language::CSharp => &["method_declaration", "constructor_declaration"],
        Language::C | Language::Cpp => &["function_definition"],
    }
}

/// Extract method spans from a parse result, in source order.
pub fn extract_methods(result: &ParseResult) -> Vec<MethodSpan> {
    let mut methods = Vec::new();
    let kinds = method_node_types(result.language);

    fn visit(
        node: Node<'_>,
        source: &[u8],
        kinds: &[&str],
        scope: &mut Vec<String>,
        methods: &mut Vec<MethodSpan>,
    ) {
        let segment = if kinds.contains(&node.kind()) {
            method_span(&node, source, scope).map(|method| {
                let name = method.name.clone();
                methods.push(method);
                name
            })
        } else {
            scope_segment(&node, source)
        };

        let pushed = segment.is_some();
        scope.extend(segment);
        for child in node.children(&mut node.walk()) {
            visit(child, source, kinds, scope, methods);
        }
        if pushed {
            scope.pop();
        }
    }

    visit(result.root_node(), &result.source, kinds, &mut Vec::new(), &mut methods);

    let mut seen: HashMap<String, u32> = HashMap::new();
    for method in &mut methods {
        let count = seen.entry(method.signature.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            method.signature = format!("{}#{count}", method.signature);
        }
    }
    methods
}

/// Name a type-like node adds to the signatures of the methods it encloses.
fn scope_segment(node: &Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "class_declaration"
        | "abstract_class_declaration"
        | "interface_declaration"
        | "enum_declaration"
        | "record_declaration"
        | "struct_declaration"
        | "class"
        | "class_specifier"
        | "struct_specifier"
        | "trait_item"
        | "mod_item" => Some(node_text(&node.child_by_field_name("name")?, source)),
        "impl_item" => {
            let ty = node_text(&node.child_by_field_name("type")?, source);
            Some(match node.child_by_field_name("trait") {
                Some(t) => format!("{} for {ty}", node_text(&t, source)),
                None => ty,
            })
        }
        // anonymous class: `new Runnable() { ... }`
        "object_creation_expression" => {
            let anonymous = node
                .children(&mut node.walk())
                .any(|child| child.kind() == "class_body");
            if !anonymous {
                return None;
            }
            let ty = node_text(&node.child_by_field_name("type")?, source);
            Some(format!("new {ty}"))
        }
        _ => None,
    }
}

fn method_span(node: &Node<'_>, source: &[u8], scope: &[String]) -> Option<MethodSpan> {
    // C and C++ keep the name and parameters inside nested declarators
    let declarator = function_declarator(node);
    let holder = declarator.as_ref().unwrap_or(node);

    let name = match declarator {
        Some(d) => declarator_name(&d, source)?,
        None => node_text(&node.child_by_field_name("name")?, source),
    };

    let params = holder
        .child_by_field_name("parameters")
        .map(|p| node_text(&p, source))
        .unwrap_or_default();

    let signature = match node.child_by_field_name("receiver") {
        Some(receiver) => format!("{} {name}{params}", node_text(&receiver, source)),
        None if scope.is_empty() => format!("{name}{params}"),
        None => format!("{}.{name}{params}", scope.join(".")),
    };

    Some(MethodSpan {
        name,
        signature: collapse_whitespace(&signature),
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
    })
}

/// The `function_declarator` under a C/C++ `function_definition`.
fn function_declarator<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    if node.kind() != "function_definition" {
        return None;
    }
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        if current.kind() == "function_declarator" {
            return Some(current);
        }
        current = current.child_by_field_name("declarator")?;
    }
}

fn declarator_name(declarator: &Node<'_>, source: &[u8]) -> Option<String> {
    let mut current = declarator.child_by_field_name("declarator")?;
    loop {
        match current.kind() {
            "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
            | "operator_name" => return Some(node_text(&current, source)),
            _ => current = current.child_by_field_name("declarator")?,
        }
    }
}

fn node_text(node: &Node<'_>, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
