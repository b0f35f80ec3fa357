//! AST Validator (spec.md §4.9): a thin abstraction over per-language
//! adapters, selected by file extension, following the same object-safe
//! trait + registry shape as [`crate::provider::ProviderRegistry`].
//!
//! Adapters here are regex-based structural heuristics, not real parsers:
//! the criterion text only asks "is there a function/class/export/decorator
//! matching roughly this name", which a source-level pattern answers well
//! enough, and nothing in this workspace's dependency stack carries a real
//! per-language parser.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;

/// Per-language structural query interface (spec.md §4.9).
pub trait AstAdapter: Send + Sync {
    /// File extensions this adapter claims (without the leading dot).
    fn extensions(&self) -> &'static [&'static str];

    fn has_function(&self, source: &str, name: Option<&str>) -> bool;
    fn has_class(&self, source: &str, name: Option<&str>) -> bool;
    fn has_interface(&self, source: &str, name: Option<&str>) -> bool;
    fn has_export(&self, source: &str, name: Option<&str>) -> bool;
    fn has_import(&self, source: &str, from_module: Option<&str>) -> bool;
    fn has_decorator(&self, source: &str, target: Option<&str>) -> bool;
}

fn matches_optional_name(re_template: &str, name: Option<&str>, source: &str) -> bool {
    let pattern = match name {
        Some(n) => re_template.replace("{name}", &regex::escape(n)),
        None => re_template.replace("{name}", r"\w+"),
    };
    Regex::new(&pattern).map(|re| re.is_match(source)).unwrap_or(false)
}

struct RustAdapter;
impl AstAdapter for RustAdapter {
    fn extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }
    fn has_function(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bfn\s+{name}\s*[(<]", name, source)
    }
    fn has_class(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\b(struct|enum)\s+{name}\b", name, source)
    }
    fn has_interface(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\btrait\s+{name}\b", name, source)
    }
    fn has_export(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bpub\s+(fn|struct|enum|trait|mod)\s+{name}\b", name, source)
    }
    fn has_import(&self, source: &str, from_module: Option<&str>) -> bool {
        matches_optional_name(r"\buse\s+{name}", from_module, source)
    }
    fn has_decorator(&self, source: &str, target: Option<&str>) -> bool {
        matches_optional_name(r"#\[{name}", target, source)
    }
}

struct TypeScriptAdapter;
impl AstAdapter for TypeScriptAdapter {
    fn extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "js", "jsx"]
    }
    fn has_function(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bfunction\s+{name}\s*\(", name, source)
            || matches_optional_name(r"\bconst\s+{name}\s*=\s*(\(|async)", name, source)
    }
    fn has_class(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bclass\s+{name}\b", name, source)
    }
    fn has_interface(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\binterface\s+{name}\b", name, source)
    }
    fn has_export(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bexport\s+(default\s+)?(function|class|const|interface)\s+{name}\b", name, source)
    }
    fn has_import(&self, source: &str, from_module: Option<&str>) -> bool {
        match from_module {
            Some(m) => source.contains(&format!("from \"{m}\"")) || source.contains(&format!("from '{m}'")),
            None => source.contains("import "),
        }
    }
    fn has_decorator(&self, source: &str, target: Option<&str>) -> bool {
        matches_optional_name(r"@{name}\b", target, source)
    }
}

struct PythonAdapter;
impl AstAdapter for PythonAdapter {
    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }
    fn has_function(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bdef\s+{name}\s*\(", name, source)
    }
    fn has_class(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\bclass\s+{name}\b", name, source)
    }
    fn has_interface(&self, _source: &str, _name: Option<&str>) -> bool {
        false
    }
    fn has_export(&self, source: &str, name: Option<&str>) -> bool {
        matches_optional_name(r"\b(def|class)\s+{name}\b", name, source)
    }
    fn has_import(&self, source: &str, from_module: Option<&str>) -> bool {
        matches_optional_name(r"\bimport\s+{name}\b", from_module, source)
    }
    fn has_decorator(&self, source: &str, target: Option<&str>) -> bool {
        matches_optional_name(r"@{name}\b", target, source)
    }
}

/// Extension-keyed adapter registry (spec.md §4.9: "Adapters register
/// themselves and are selected by file extension").
pub struct AstRegistry {
    by_extension: HashMap<&'static str, &'static dyn AstAdapter>,
}

impl AstRegistry {
    pub fn with_builtin_adapters() -> Self {
        static RUST: RustAdapter = RustAdapter;
        static TS: TypeScriptAdapter = TypeScriptAdapter;
        static PY: PythonAdapter = PythonAdapter;

        let mut by_extension: HashMap<&'static str, &'static dyn AstAdapter> = HashMap::new();
        for adapter in [&RUST as &dyn AstAdapter, &TS as &dyn AstAdapter, &PY as &dyn AstAdapter] {
            for ext in adapter.extensions() {
                by_extension.insert(ext, adapter);
            }
        }
        Self { by_extension }
    }

    /// Whether any registered adapter claims this path's extension.
    pub fn supports(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()).map(|e| self.by_extension.contains_key(e)).unwrap_or(false)
    }

    pub fn adapter_for(&self, path: &Path) -> Option<&'static dyn AstAdapter> {
        path.extension().and_then(|e| e.to_str()).and_then(|e| self.by_extension.get(e)).copied()
    }
}

impl Default for AstRegistry {
    fn default() -> Self {
        Self::with_builtin_adapters()
    }
}

/// Structural query kinds inferred from criterion text (spec.md §4.8 "regex
/// hints: `function|method|class|export|@decorator`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstQueryKind {
    Function,
    Class,
    Interface,
    Export,
    Decorator,
}

/// Infer which structural query a criterion is asking for, if any.
pub fn infer_query_kind(criterion: &str) -> Option<AstQueryKind> {
    let lower = criterion.to_lowercase();
    if lower.contains('@') || lower.contains("decorator") {
        Some(AstQueryKind::Decorator)
    } else if lower.contains("export") {
        Some(AstQueryKind::Export)
    } else if lower.contains("interface") {
        Some(AstQueryKind::Interface)
    } else if lower.contains("class") {
        Some(AstQueryKind::Class)
    } else if lower.contains("function") || lower.contains("method") {
        Some(AstQueryKind::Function)
    } else {
        None
    }
}

/// Run the inferred query against one file's source, unsupported files
/// deferring to the caller's rule-based fallback (spec.md §4.9: "Unsupported
/// files return `false` and defer to rule-based checks").
pub fn run_query(registry: &AstRegistry, path: &Path, source: &str, kind: AstQueryKind, name: Option<&str>) -> bool {
    let Some(adapter) = registry.adapter_for(path) else {
        return false;
    };
    match kind {
        AstQueryKind::Function => adapter.has_function(source, name),
        AstQueryKind::Class => adapter.has_class(source, name),
        AstQueryKind::Interface => adapter.has_interface(source, name),
        AstQueryKind::Export => adapter.has_export(source, name),
        AstQueryKind::Decorator => adapter.has_decorator(source, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_adapter_finds_named_function() {
        let registry = AstRegistry::with_builtin_adapters();
        let path = Path::new("src/lib.rs");
        let source = "pub fn handle_login(req: Request) -> Response { todo!() }";
        assert!(run_query(&registry, path, source, AstQueryKind::Function, Some("handle_login")));
        assert!(!run_query(&registry, path, source, AstQueryKind::Function, Some("handle_logout")));
    }

    #[test]
    fn typescript_adapter_finds_export_class() {
        let registry = AstRegistry::with_builtin_adapters();
        let path = Path::new("src/UserService.ts");
        let source = "export class UserService { constructor() {} }";
        assert!(run_query(&registry, path, source, AstQueryKind::Export, Some("UserService")));
    }

    #[test]
    fn unsupported_extension_defers() {
        let registry = AstRegistry::with_builtin_adapters();
        let path = Path::new("README.md");
        assert!(!registry.supports(path));
        assert!(!run_query(&registry, path, "# fn foo", AstQueryKind::Function, None));
    }

    #[test]
    fn infers_query_kind_from_criterion_text() {
        assert_eq!(infer_query_kind("must export a function named login"), Some(AstQueryKind::Export));
        assert_eq!(infer_query_kind("has a class UserService"), Some(AstQueryKind::Class));
        assert_eq!(infer_query_kind("uses a @Component decorator"), Some(AstQueryKind::Decorator));
        assert_eq!(infer_query_kind("the README should mention setup"), None);
    }
}
