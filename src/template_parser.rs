//! Parser for the `{{ }}` action language described in SPEC_FULL.md §2.1.
//!
//! Grounded on the teacher's `tokenizer.rs` two-pass shape (raw lexical
//! tokens first, then a recursive-descent structural pass), simplified from
//! HTML5 tag tokenizing down to this crate's much smaller action grammar.

use crate::ast::{Node, Pipeline};
use crate::error::Error;

#[derive(Debug, Clone)]
enum RawToken {
    Text(String),
    Tag(String),
}

fn lex(source: &str) -> Vec<RawToken> {
    let mut tokens = Vec::new();
    let mut rest = source;
    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    tokens.push(RawToken::Text(rest.to_string()));
                }
                break;
            }
            Some(start) => {
                if start > 0 {
                    tokens.push(RawToken::Text(rest[..start].to_string()));
                }
                let after_open = &rest[start + 2..];
                match after_open.find("}}") {
                    None => {
                        // Unterminated tag: treat the rest as literal text,
                        // matching a lenient, forgiving-parser stance.
                        tokens.push(RawToken::Text(rest[start..].to_string()));
                        break;
                    }
                    Some(end) => {
                        tokens.push(RawToken::Tag(after_open[..end].trim().to_string()));
                        rest = &after_open[end + 2..];
                    }
                }
            }
        }
    }
    tokens
}

/// Parse a template source string into its top-level node list.
pub fn parse_template(source: &str) -> Result<Vec<Node>, Error> {
    let tokens = lex(source);
    let mut pos = 0;
    let (nodes, terminator) = parse_nodes(&tokens, &mut pos)?;
    if terminator.is_some() {
        return Err(Error::TemplateParse(
            "unmatched {{end}} or {{else}} at top level".into(),
        ));
    }
    Ok(nodes)
}

/// What ended a `parse_nodes` run: `None` means end-of-input (only valid at
/// the template root), `Some("end")`/`Some("else")` means the caller's
/// enclosing block should consume that keyword.
type Terminator = Option<&'static str>;

fn parse_nodes(tokens: &[RawToken], pos: &mut usize) -> Result<(Vec<Node>, Terminator), Error> {
    let mut nodes = Vec::new();
    while *pos < tokens.len() {
        match &tokens[*pos] {
            RawToken::Text(text) => {
                nodes.push(Node::Text(text.clone()));
                *pos += 1;
            }
            RawToken::Tag(tag) => {
                let tag = tag.trim();
                if tag == "end" {
                    *pos += 1;
                    return Ok((nodes, Some("end")));
                }
                if tag == "else" {
                    *pos += 1;
                    return Ok((nodes, Some("else")));
                }
                if let Some(rest) = tag.strip_prefix("if ") {
                    *pos += 1;
                    let cond = Pipeline::parse(rest);
                    let (then_branch, term) = parse_nodes(tokens, pos)?;
                    let else_branch = match term {
                        Some("else") => {
                            let (else_nodes, term2) = parse_nodes(tokens, pos)?;
                            if term2 != Some("end") {
                                return Err(Error::TemplateParse(
                                    "if/else block missing {{end}}".into(),
                                ));
                            }
                            Some(else_nodes)
                        }
                        Some("end") => None,
                        _ => {
                            return Err(Error::TemplateParse(
                                "unterminated {{if}} block".into(),
                            ))
                        }
                    };
                    nodes.push(Node::If {
                        cond,
                        then_branch,
                        else_branch,
                    });
                    continue;
                }
                if let Some(rest) = tag.strip_prefix("range ") {
                    *pos += 1;
                    let source = Pipeline::parse(rest);
                    let (body, term) = parse_nodes(tokens, pos)?;
                    if term != Some("end") {
                        return Err(Error::TemplateParse(
                            "unterminated {{range}} block".into(),
                        ));
                    }
                    nodes.push(Node::Range { source, body });
                    continue;
                }
                if let Some(rest) = tag.strip_prefix("with ") {
                    *pos += 1;
                    let source = Pipeline::parse(rest);
                    let (body, term) = parse_nodes(tokens, pos)?;
                    if term != Some("end") {
                        return Err(Error::TemplateParse(
                            "unterminated {{with}} block".into(),
                        ));
                    }
                    nodes.push(Node::With { source, body });
                    continue;
                }
                if let Some(rest) = tag.strip_prefix("template ") {
                    *pos += 1;
                    let (name, arg) = parse_template_call(rest)?;
                    nodes.push(Node::TemplateInvocation {
                        name,
                        arg: Pipeline::parse(&arg),
                    });
                    continue;
                }
                if let Some(assign) = parse_var_assign(tag) {
                    *pos += 1;
                    nodes.push(assign);
                    continue;
                }
                *pos += 1;
                nodes.push(Node::Action(Pipeline::parse(tag)));
            }
        }
    }
    Ok((nodes, None))
}

fn parse_template_call(rest: &str) -> Result<(String, String), Error> {
    let rest = rest.trim();
    if !rest.starts_with('"') {
        return Err(Error::TemplateParse(format!(
            "{{{{template}}}} requires a quoted name, got: {rest}"
        )));
    }
    let after_quote = &rest[1..];
    let end = after_quote.find('"').ok_or_else(|| {
        Error::TemplateParse("unterminated string in {{template}} name".into())
    })?;
    let name = after_quote[..end].to_string();
    let arg = after_quote[end + 1..].trim();
    let arg = if arg.is_empty() { "." } else { arg };
    Ok((name, arg.to_string()))
}

/// `{{$x := pipeline}}` — returns `None` for anything else, notably a bare
/// `{{$x}}` reference (which is just an opaque action, not an assignment).
fn parse_var_assign(tag: &str) -> Option<Node> {
    if !tag.starts_with('$') {
        return None;
    }
    let sep = tag.find(":=")?;
    let name = tag[..sep].trim();
    if !name.starts_with('$') || name.len() < 2 {
        return None;
    }
    let pipeline = tag[sep + 2..].trim();
    Some(Node::VarAssign {
        name: name.to_string(),
        pipeline: Pipeline::parse(pipeline),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FieldPath;

    #[test]
    fn parses_plain_text() {
        let nodes = parse_template("hello world").unwrap();
        assert_eq!(nodes, vec![Node::Text("hello world".into())]);
    }

    #[test]
    fn parses_scalar_action() {
        let nodes = parse_template("<p>Hello {{.Name}}!</p>").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("<p>Hello ".into()),
                Node::Action(Pipeline::Field(FieldPath::field("Name"))),
                Node::Text("!</p>".into()),
            ]
        );
    }

    #[test]
    fn parses_if_else() {
        let nodes = parse_template("{{if .On}}ON{{else}}OFF{{end}}").unwrap();
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Node::If {
                then_branch,
                else_branch,
                ..
            } => {
                assert_eq!(then_branch, &vec![Node::Text("ON".into())]);
                assert_eq!(else_branch, &Some(vec![Node::Text("OFF".into())]));
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_range() {
        let nodes = parse_template("<ul>{{range .Items}}<li>{{.}}</li>{{end}}</ul>").unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[1], Node::Range { .. }));
    }

    #[test]
    fn parses_with_as_opaque() {
        let nodes = parse_template("{{with .User}}{{.Name}}{{end}}").unwrap();
        assert!(nodes[0].is_opaque_construct());
    }

    #[test]
    fn parses_var_assign() {
        let nodes = parse_template("{{$x := .User}}{{$x.Name}}").unwrap();
        assert!(matches!(nodes[0], Node::VarAssign { .. }));
        assert!(nodes[0].is_opaque_construct());
    }

    #[test]
    fn parses_template_invocation() {
        let nodes = parse_template(r#"{{template "header" .}}"#).unwrap();
        assert_eq!(
            nodes,
            vec![Node::TemplateInvocation {
                name: "header".into(),
                arg: Pipeline::Field(FieldPath::dot()),
            }]
        );
    }

    #[test]
    fn rejects_unterminated_if() {
        assert!(parse_template("{{if .On}}ON").is_err());
    }
}
