//! Runtime data model: the `serde_json::Value` tree flowing into
//! `Render`/`RenderFragments`, variable scoping, and the opaque-pipeline
//! executor backing `with`, `{{$x := ...}}`, and function-call pipelines.
//!
//! The analyzer treats all of this as opaque (spec.md §4.1) — it only sees
//! the outermost path a pipeline touches. The executor below is what
//! actually *runs* such a pipeline at render time, via a small built-in
//! function table plus an optional caller-supplied [`FuncMap`], mirroring
//! Go `html/template`'s `Funcs` extension point (SPEC_FULL.md §2.1).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ast::Pipeline;
use crate::error::Error;
use crate::path::{parse_dotted_path, FieldPath, PathSegment};

/// A function callable from an opaque pipeline, e.g. `{{printf "%s!" .Name}}`.
pub type TemplateFunc = Arc<dyn Fn(&[Value]) -> Result<Value, Error> + Send + Sync>;

/// A table of named functions available to opaque pipelines, in addition
/// to the small built-in set (`printf`, `len`, `upper`, `lower`, `eq`, `not`).
#[derive(Clone, Default)]
pub struct FuncMap(HashMap<String, TemplateFunc>);

impl FuncMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, Error> + Send + Sync + 'static,
    ) {
        self.0.insert(name.into(), Arc::new(func));
    }

    fn get(&self, name: &str) -> Option<&TemplateFunc> {
        self.0.get(name)
    }
}

/// The current dot plus any `{{$x := ...}}` bindings visible at this point
/// in the template, chained to an enclosing scope the way Go template
/// variables are visible to nested blocks.
pub struct Scope<'p> {
    pub dot: Value,
    vars: HashMap<String, Value>,
    parent: Option<&'p Scope<'p>>,
}

impl<'p> Scope<'p> {
    pub fn root(dot: Value) -> Self {
        Scope {
            dot,
            vars: HashMap::new(),
            parent: None,
        }
    }

    pub fn bind(&mut self, name: String, value: Value) {
        self.vars.insert(name, value);
    }

    fn lookup_var(&self, name: &str) -> Option<&Value> {
        self.vars
            .get(name)
            .or_else(|| self.parent.and_then(|p| p.lookup_var(name)))
    }

    fn collect_vars(&self, out: &mut HashMap<String, Value>) {
        if let Some(parent) = self.parent {
            parent.collect_vars(out);
        }
        for (k, v) in &self.vars {
            out.insert(k.clone(), v.clone());
        }
    }

    /// A scope rooted at a new dot (entering `range`/`with`) that still sees
    /// every variable bound so far, flattened into an owned map so the
    /// renderer doesn't have to thread lifetimes through nested bodies.
    pub fn child_with_owned_dot(&self, dot: Value) -> Scope<'static> {
        let mut vars = HashMap::new();
        self.collect_vars(&mut vars);
        Scope {
            dot,
            vars,
            parent: None,
        }
    }
}

/// Evaluate a [`Pipeline`] (bare field path or opaque source) against a scope.
pub fn eval_pipeline(pipeline: &Pipeline, scope: &Scope, funcs: &FuncMap) -> Result<Value, Error> {
    match pipeline {
        Pipeline::Field(path) => Ok(get_path(&scope.dot, path).cloned().unwrap_or(Value::Null)),
        Pipeline::Opaque(raw) => eval_opaque(raw, scope, funcs),
    }
}

/// Resolve a [`FieldPath`] against a value. `PathSegment::Index` is a
/// dependency-analysis marker only; it never appears in a path built by
/// [`crate::path::parse_dotted_path`], so it is skipped here (defensive,
/// not reachable from the parser).
pub fn get_path<'a>(value: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path.segments() {
        match seg {
            PathSegment::Field(name) => cur = cur.get(name)?,
            PathSegment::Index => {}
        }
    }
    Some(cur)
}

/// Default escaping: the four-entity HTML minimum any template engine in
/// this corpus applies before interpolating a scalar into markup.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a value the way a scalar action prints it, before escaping.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Evaluate an opaque pipeline's raw source against a scope, i.e. the
/// runtime half of `Pipeline::Opaque`. Supports `|`-chained stages, string
/// literals, numbers, `.dotted.paths`, `$variables`, and function calls
/// resolved first against `funcs` then against the built-in table.
pub fn eval_opaque(raw: &str, scope: &Scope, funcs: &FuncMap) -> Result<Value, Error> {
    let mut acc: Option<Value> = None;
    for stage in split_top_level(raw, '|') {
        let tokens = tokenize(stage.trim());
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() == 1 {
            let value = eval_token(&tokens[0], scope)?;
            // a single-token stage overrides: same as Go's pass-through
            acc = Some(value);
            continue;
        }
        let func_name = &tokens[0];
        let mut args = Vec::with_capacity(tokens.len());
        for tok in &tokens[1..] {
            args.push(eval_token(tok, scope)?);
        }
        if let Some(prev) = acc.take() {
            args.push(prev);
        }
        acc = Some(call_func(func_name, &args, funcs)?);
    }
    Ok(acc.unwrap_or(Value::Null))
}

fn split_top_level(raw: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth_quote = false;
    let mut start = 0;
    for (i, c) in raw.char_indices() {
        match c {
            '"' => depth_quote = !depth_quote,
            c if c == sep && !depth_quote => {
                parts.push(&raw[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn tokenize(stage: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = stage.char_indices().peekable();
    let bytes = stage.as_bytes();
    let _ = bytes;
    let mut cur = String::new();
    let mut in_quote = false;
    while let Some((_, c)) = chars.next() {
        if in_quote {
            cur.push(c);
            if c == '"' {
                in_quote = false;
                tokens.push(std::mem::take(&mut cur));
            }
            continue;
        }
        match c {
            '"' => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
                cur.push(c);
                in_quote = true;
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

fn eval_token(tok: &str, scope: &Scope) -> Result<Value, Error> {
    if let Some(stripped) = tok.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(Value::String(stripped.to_string()));
    }
    if tok == "$" || tok == "." {
        return Ok(scope.dot.clone());
    }
    if let Some(rest) = tok.strip_prefix('$') {
        let mut parts = rest.splitn(2, '.');
        let var = parts.next().unwrap_or_default();
        let base = scope
            .lookup_var(&format!("${var}"))
            .cloned()
            .unwrap_or(Value::Null);
        return Ok(match parts.next() {
            Some(field_chain) => {
                let path = parse_dotted_path(&format!(".{field_chain}"))
                    .ok_or_else(|| Error::TemplateParse(format!("bad variable path: {tok}")))?;
                get_path(&base, &path).cloned().unwrap_or(Value::Null)
            }
            None => base,
        });
    }
    if tok.starts_with('.') {
        let path = parse_dotted_path(tok)
            .ok_or_else(|| Error::TemplateParse(format!("bad field path: {tok}")))?;
        return Ok(get_path(&scope.dot, &path).cloned().unwrap_or(Value::Null));
    }
    if let Ok(n) = tok.parse::<f64>() {
        return Ok(serde_json::json!(n));
    }
    if tok == "true" {
        return Ok(Value::Bool(true));
    }
    if tok == "false" {
        return Ok(Value::Bool(false));
    }
    Err(Error::TemplateParse(format!("unrecognized token: {tok}")))
}

fn call_func(name: &str, args: &[Value], funcs: &FuncMap) -> Result<Value, Error> {
    if let Some(f) = funcs.get(name) {
        return f(args);
    }
    match name {
        "printf" => builtin_printf(args),
        "len" => builtin_len(args),
        "upper" => Ok(Value::String(stringify(args.first().unwrap_or(&Value::Null)).to_uppercase())),
        "lower" => Ok(Value::String(stringify(args.first().unwrap_or(&Value::Null)).to_lowercase())),
        "eq" => Ok(Value::Bool(args.first() == args.get(1))),
        "not" => Ok(Value::Bool(!truthy(args.first().unwrap_or(&Value::Null)))),
        other => Err(Error::TemplateExecution {
            fragment: String::new(),
            message: format!("unknown function: {other}"),
        }),
    }
}

fn builtin_printf(args: &[Value]) -> Result<Value, Error> {
    let Some(Value::String(fmt)) = args.first() else {
        return Err(Error::TemplateExecution {
            fragment: String::new(),
            message: "printf requires a format string".into(),
        });
    };
    let mut out = String::new();
    let mut arg_idx = 1;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('%') => out.push('%'),
                Some(_spec) => {
                    if let Some(v) = args.get(arg_idx) {
                        out.push_str(&stringify(v));
                    }
                    arg_idx += 1;
                }
                None => out.push('%'),
            }
        } else {
            out.push(c);
        }
    }
    Ok(Value::String(out))
}

fn builtin_len(args: &[Value]) -> Result<Value, Error> {
    let len = match args.first() {
        Some(Value::Array(a)) => a.len(),
        Some(Value::Object(o)) => o.len(),
        Some(Value::String(s)) => s.chars().count(),
        _ => 0,
    };
    Ok(serde_json::json!(len as u64))
}

/// Go-template truthiness: used by `if`/`range` to decide branch/iteration.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_dotted_path() {
        let value = json!({"User": {"Name": "Ada"}});
        let path = parse_dotted_path(".User.Name").unwrap();
        assert_eq!(get_path(&value, &path), Some(&json!("Ada")));
    }

    #[test]
    fn escapes_html_entities() {
        assert_eq!(escape_html("<b>"), "&lt;b&gt;");
    }

    #[test]
    fn evaluates_printf() {
        let scope = Scope::root(json!({"Name": "World"}));
        let funcs = FuncMap::new();
        let value = eval_opaque(r#"printf "Hello %s!" .Name"#, &scope, &funcs).unwrap();
        assert_eq!(value, json!("Hello World!"));
    }

    #[test]
    fn evaluates_len() {
        let scope = Scope::root(json!({"Items": [1, 2, 3]}));
        let funcs = FuncMap::new();
        let value = eval_opaque("len .Items", &scope, &funcs).unwrap();
        assert_eq!(value, json!(3));
    }

    #[test]
    fn custom_func_map_overrides_builtin() {
        let scope = Scope::root(Value::Null);
        let mut funcs = FuncMap::new();
        funcs.insert("shout", |args| {
            Ok(Value::String(format!("{}!!!", stringify(args.first().unwrap_or(&Value::Null)))))
        });
        let value = eval_opaque(r#"shout "hi""#, &scope, &funcs).unwrap();
        assert_eq!(value, json!("hi!!!"));
    }

    #[test]
    fn variable_binding_and_lookup() {
        let mut root = Scope::root(json!({"User": {"Name": "Ada"}}));
        let user = get_path(&root.dot, &parse_dotted_path(".User").unwrap())
            .cloned()
            .unwrap();
        root.bind("$u".to_string(), user);
        let value = eval_token("$u.Name", &root).unwrap();
        assert_eq!(value, json!("Ada"));
    }
}
