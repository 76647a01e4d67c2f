//! Logic tag grammar: recognising `{% ... %}` bodies and the rules for how
//! tags nest.

use std::rc::Rc;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::ast::{ExprToken, LogicKind, MacroParameter, TagType};
use crate::error::{TwigError, TwigResult};
use crate::expression;
use crate::interface::Context;
use crate::value::Value;

/// A user-defined logic tag.
///
/// A block tag is registered together with its closing tag: for example a
/// `cache` tag whose [`CustomTag::next`] is `["endcache"]`, and an `endcache`
/// tag whose [`CustomTag::open`] is `false`.
pub trait CustomTag {
    /// The tag type, used in `next` lists and error messages.
    fn name(&self) -> &str;

    /// Matched against the trimmed tag body.
    fn pattern(&self) -> &Regex;

    /// Tag names that may follow this one. Empty for standalone tags.
    fn next(&self) -> Vec<String> {
        Vec::new()
    }

    /// `false` for tags that close or continue an earlier tag.
    fn open(&self) -> bool {
        true
    }

    /// Returns expression sources taken from the match. They are compiled
    /// once and evaluated into [`TagCall::arguments`] on every render.
    ///
    /// # Errors
    /// - If the match is not a valid use of the tag.
    fn compile(&self, _captures: &Captures<'_>) -> TwigResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Runs the tag.
    ///
    /// # Errors
    /// - If the tag fails; the error is handled like any other render error.
    fn parse(&self, call: TagCall<'_>) -> TwigResult<TagOutcome> {
        Ok(TagOutcome {
            chain: call.chain,
            output: TagOutput::Nothing,
        })
    }
}

pub struct TagCall<'a> {
    pub arguments: Vec<Value>,
    pub context: &'a Context,
    /// Whether an `else`-style continuation would still run.
    pub chain: bool,
}

pub struct TagOutcome {
    pub chain: bool,
    pub output: TagOutput,
}

pub enum TagOutput {
    /// Emitted as-is; a promise is settled first.
    Value(Value),
    /// Render the tag body in the calling context.
    Body,
    Nothing,
}

/// How a tag participates in the compile-time logic stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TagRules {
    pub open: bool,
    pub next: Vec<TagType>,
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("tag pattern is valid"));
    };
}

pattern!(IF, r"^if\s?([\s\S]+)$");
pattern!(ELSE_IF, r"^elseif\s?([^\s].*)$");
pattern!(
    FOR,
    r"^for\s+([a-zA-Z0-9_,\s]+)\s+in\s+([\S\s]+?)(?:\s+if\s+([^\s].*))?$"
);
pattern!(SET, r"^set\s+([a-zA-Z0-9_,\s]+)\s*=\s*([\s\S]+)$");
pattern!(SET_CAPTURE, r"^set\s+([a-zA-Z0-9_,\s]+)$");
pattern!(FILTER, r"^filter\s+(.+)$");
pattern!(BLOCK, r"^block\s+([a-zA-Z0-9_]+)$");
pattern!(SHORT_BLOCK, r"^block\s+([a-zA-Z0-9_]+)\s+(.+)$");
pattern!(END_BLOCK, r"^endblock(?:\s+([a-zA-Z0-9_]+))?$");
pattern!(EXTENDS, r"^extends\s+(.+)$");
pattern!(USE, r"^use\s+(.+)$");
pattern!(
    INCLUDE,
    r"^include\s+(.+?)(?:\s|$)(ignore missing(?:\s|$))?(?:with\s+([\S\s]+?))?(?:\s|$)(only)?$"
);
pattern!(
    MACRO,
    r"^macro\s+([a-zA-Z0-9_]+)\s*\(\s*((?:[a-zA-Z0-9_]+(?:\s*=\s*([\s\S]+))?(?:,\s*)?)*)\s*\)$"
);
pattern!(IMPORT, r"^import\s+(.+)\s+as\s+([a-zA-Z0-9_]+)$");
pattern!(FROM, r"^from\s+(.+)\s+import\s+([a-zA-Z0-9_, ]+)$");
pattern!(
    EMBED,
    r"^embed\s+(.+?)(?:\s+(ignore missing))?(?:\s+with\s+([\S\s]+?))?(?:\s+(only))?$"
);
pattern!(WITH, r"^(?:with\s+([\S\s]+?))(?:\s|$)(only)?$");
pattern!(LIST_SEPARATOR, r"\s*,\s*");
pattern!(DEFAULT_SEPARATOR, r"\s*=\s*");
pattern!(IMPORT_ALIAS, r"^([a-zA-Z0-9_]+)\s+as\s+([a-zA-Z0-9_]+)$");
pattern!(IMPORT_NAME, r"^[a-zA-Z0-9_]+$");

const END_TAGS: [(&str, TagType); 9] = [
    ("endif", TagType::EndIf),
    ("endfor", TagType::EndFor),
    ("endset", TagType::EndSet),
    ("endfilter", TagType::EndFilter),
    ("endspaceless", TagType::EndSpaceless),
    ("endmacro", TagType::EndMacro),
    ("endembed", TagType::EndEmbed),
    ("endwith", TagType::EndWith),
    ("endverbatim", TagType::EndVerbatim),
];

fn group<'h>(captures: &Captures<'h>, index: usize) -> &'h str {
    captures.get(index).map_or("", |m| m.as_str())
}

fn optional_expression(captures: &Captures<'_>, index: usize) -> TwigResult<Option<Vec<ExprToken>>> {
    captures
        .get(index)
        .map(|m| expression::compile(m.as_str().trim()))
        .transpose()
}

/// Compiles a trimmed tag body into its kind and nesting rules.
pub(crate) fn compile_tag(
    body: &str,
    custom: &[Rc<dyn CustomTag>],
) -> TwigResult<(LogicKind, TagRules)> {
    let body = body.trim();
    if let Some(kind) = compile_builtin(body)? {
        let rules = builtin_rules(&kind.tag_type());
        return Ok((kind, rules));
    }

    let Some((tag, captures)) = custom
        .iter()
        .find_map(|tag| tag.pattern().captures(body).map(|captures| (tag, captures)))
    else {
        return Err(TwigError::syntax(format!("Unable to parse '{}'", body)));
    };
    let arguments = tag
        .compile(&captures)?
        .iter()
        .map(|source| expression::compile(source))
        .collect::<TwigResult<Vec<_>>>()?;
    let rules = TagRules {
        open: tag.open(),
        next: tag.next().iter().map(|name| TagType::named(name)).collect(),
    };
    Ok((
        LogicKind::Custom {
            name: tag.name().to_string(),
            arguments,
        },
        rules,
    ))
}

fn compile_builtin(body: &str) -> TwigResult<Option<LogicKind>> {
    if let Some((_, tag)) = END_TAGS.iter().find(|(word, _)| *word == body) {
        return Ok(Some(LogicKind::End(tag.clone())));
    }
    if body == "else" {
        return Ok(Some(LogicKind::Else));
    }
    if body == "spaceless" {
        return Ok(Some(LogicKind::Spaceless));
    }

    let kind = if let Some(c) = ELSE_IF.captures(body) {
        LogicKind::ElseIf {
            condition: expression::compile(group(&c, 1))?,
        }
    } else if let Some(c) = IF.captures(body) {
        LogicKind::If {
            condition: expression::compile(group(&c, 1))?,
        }
    } else if let Some(c) = FOR.captures(body) {
        compile_for(&c)?
    } else if let Some(c) = SET.captures(body) {
        LogicKind::Set {
            key: group(&c, 1).trim().to_string(),
            expression: expression::compile(group(&c, 2))?,
        }
    } else if let Some(c) = SET_CAPTURE.captures(body) {
        LogicKind::SetCapture {
            key: group(&c, 1).trim().to_string(),
        }
    } else if let Some(c) = FILTER.captures(body) {
        LogicKind::Filter {
            filters: expression::compile(&format!("|{}", group(&c, 1).trim()))?,
        }
    } else if let Some(c) = BLOCK.captures(body) {
        LogicKind::Block {
            name: group(&c, 1).to_string(),
        }
    } else if let Some(c) = SHORT_BLOCK.captures(body) {
        LogicKind::ShortBlock {
            name: group(&c, 1).to_string(),
            expression: expression::compile(group(&c, 2).trim())?,
        }
    } else if END_BLOCK.is_match(body) {
        LogicKind::End(TagType::EndBlock)
    } else if let Some(c) = EXTENDS.captures(body) {
        LogicKind::Extends {
            expression: expression::compile(group(&c, 1).trim())?,
        }
    } else if let Some(c) = USE.captures(body) {
        LogicKind::Use {
            expression: expression::compile(group(&c, 1).trim())?,
        }
    } else if let Some(c) = INCLUDE.captures(body) {
        LogicKind::Include {
            expression: expression::compile(group(&c, 1).trim())?,
            ignore_missing: c.get(2).is_some(),
            with: optional_expression(&c, 3)?,
            only: c.get(4).is_some(),
        }
    } else if let Some(c) = MACRO.captures(body) {
        compile_macro(&c)?
    } else if let Some(c) = IMPORT.captures(body) {
        let source = group(&c, 1).trim();
        LogicKind::Import {
            source: source.to_string(),
            expression: expression::compile(source)?,
            alias: group(&c, 2).trim().to_string(),
        }
    } else if let Some(c) = FROM.captures(body) {
        compile_from(&c)?
    } else if let Some(c) = EMBED.captures(body) {
        LogicKind::Embed {
            expression: expression::compile(group(&c, 1).trim())?,
            ignore_missing: c.get(2).is_some(),
            with: optional_expression(&c, 3)?,
            only: c.get(4).is_some(),
        }
    } else if let Some(c) = WITH.captures(body) {
        LogicKind::With {
            with: optional_expression(&c, 1)?,
            only: c.get(2).is_some(),
        }
    } else if body.starts_with("verbatim") {
        LogicKind::Verbatim
    } else {
        return Ok(None);
    };
    Ok(Some(kind))
}

fn compile_for(c: &Captures<'_>) -> TwigResult<LogicKind> {
    let variables = group(c, 1);
    let (key_var, value_var) = if variables.contains(',') {
        match variables.split(',').collect::<Vec<_>>().as_slice() {
            [key, value] => (Some(key.trim().to_string()), value.trim().to_string()),
            _ => {
                return Err(TwigError::syntax(format!(
                    "Invalid expression in for loop: {}",
                    variables
                )));
            }
        }
    } else {
        (None, variables.trim().to_string())
    };

    Ok(LogicKind::For {
        key_var,
        value_var,
        expression: expression::compile(group(c, 2))?,
        conditional: optional_expression(c, 3)?,
    })
}

fn compile_macro(c: &Captures<'_>) -> TwigResult<LogicKind> {
    let mut parameters: Vec<MacroParameter> = Vec::new();
    for raw in LIST_SEPARATOR.split(group(c, 2)) {
        let mut parts = DEFAULT_SEPARATOR.splitn(raw, 2);
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            continue;
        }
        if parameters.iter().any(|p| p.name == name) {
            return Err(TwigError::syntax(format!(
                "Duplicate arguments for parameter: {}",
                name
            )));
        }
        let default = parts
            .next()
            .filter(|source| !source.trim().is_empty())
            .map(expression::compile)
            .transpose()?;
        parameters.push(MacroParameter {
            name: name.to_string(),
            default,
        });
    }

    Ok(LogicKind::Macro {
        name: group(c, 1).to_string(),
        parameters,
    })
}

fn compile_from(c: &Captures<'_>) -> TwigResult<LogicKind> {
    let source = group(c, 1).trim();
    let names = LIST_SEPARATOR
        .split(group(c, 2).trim())
        .filter_map(|entry| {
            if let Some(alias) = IMPORT_ALIAS.captures(entry) {
                Some((
                    group(&alias, 1).to_string(),
                    group(&alias, 2).to_string(),
                ))
            } else if IMPORT_NAME.is_match(entry) {
                Some((entry.to_string(), entry.to_string()))
            } else {
                None
            }
        })
        .collect();

    Ok(LogicKind::From {
        source: source.to_string(),
        expression: expression::compile(source)?,
        names,
    })
}

fn rules(open: bool, next: &[TagType]) -> TagRules {
    TagRules {
        open,
        next: next.to_vec(),
    }
}

fn builtin_rules(tag: &TagType) -> TagRules {
    use TagType as T;
    match tag {
        T::If => rules(true, &[T::Else, T::ElseIf, T::EndIf]),
        T::ElseIf => rules(false, &[T::Else, T::ElseIf, T::EndIf]),
        T::Else => rules(false, &[T::EndIf, T::EndFor]),
        T::For => rules(true, &[T::Else, T::EndFor]),
        T::SetCapture => rules(true, &[T::EndSet]),
        T::Filter => rules(true, &[T::EndFilter]),
        T::Block => rules(true, &[T::EndBlock]),
        T::Spaceless => rules(true, &[T::EndSpaceless]),
        T::Macro => rules(true, &[T::EndMacro]),
        T::Embed => rules(true, &[T::EndEmbed]),
        T::With => rules(true, &[T::EndWith]),
        T::Verbatim => rules(true, &[T::EndVerbatim]),
        T::Set
        | T::ShortBlock
        | T::Extends
        | T::Use
        | T::Include
        | T::Import
        | T::From
        | T::Custom(_) => rules(true, &[]),
        T::EndIf
        | T::EndFor
        | T::EndSet
        | T::EndFilter
        | T::EndBlock
        | T::EndSpaceless
        | T::EndMacro
        | T::EndEmbed
        | T::EndWith
        | T::EndVerbatim => rules(false, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(body: &str) -> LogicKind {
        compile_tag(body, &[]).unwrap().0
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_variables() {
        let LogicKind::For {
            key_var,
            value_var,
            conditional,
            ..
        } = compile("for k, v in items if v")
        else {
            panic!("expected a for tag");
        };
        assert_eq!(key_var.as_deref(), Some("k"));
        assert_eq!(value_var, "v");
        assert!(conditional.is_some());

        assert_eq!(
            compile_tag("for a, b, c in items", &[]).unwrap_err().to_string(),
            "Invalid expression in for loop: a, b, c"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_set_and_capture() {
        assert!(matches!(compile("set x = 1"), LogicKind::Set { key, .. } if key == "x"));
        assert!(matches!(compile("set x"), LogicKind::SetCapture { key } if key == "x"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_include_options() {
        let LogicKind::Include {
            ignore_missing,
            with,
            only,
            ..
        } = compile("include 'a.twig' ignore missing with {x: 1} only")
        else {
            panic!("expected an include tag");
        };
        assert!(ignore_missing);
        assert!(with.is_some());
        assert!(only);

        assert!(matches!(
            compile("include 'a.twig'"),
            LogicKind::Include {
                ignore_missing: false,
                with: None,
                only: false,
                ..
            }
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_macro_parameters() {
        let LogicKind::Macro { name, parameters } = compile("macro input(name, type = 'text')") else {
            panic!("expected a macro tag");
        };
        assert_eq!(name, "input");
        assert_eq!(parameters.len(), 2);
        assert!(parameters.first().is_some_and(|p| p.default.is_none()));
        assert!(parameters.get(1).is_some_and(|p| p.default.is_some()));

        assert_eq!(
            compile_tag("macro m(a, a)", &[]).unwrap_err().to_string(),
            "Duplicate arguments for parameter: a"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_from_import_names() {
        let LogicKind::From { source, names, .. } = compile("from 'forms.twig' import input as field, label")
        else {
            panic!("expected a from tag");
        };
        assert_eq!(source, "'forms.twig'");
        assert_eq!(
            names,
            vec![
                ("input".to_string(), "field".to_string()),
                ("label".to_string(), "label".to_string()),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_forms() {
        assert!(matches!(compile("block title"), LogicKind::Block { name } if name == "title"));
        assert!(matches!(compile("block title 'x'"), LogicKind::ShortBlock { name, .. } if name == "title"));
        assert!(matches!(compile("endblock title"), LogicKind::End(TagType::EndBlock)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_rules() {
        let (_, rules) = compile_tag("else", &[]).unwrap();
        assert!(!rules.open);
        assert_eq!(rules.next, vec![TagType::EndIf, TagType::EndFor]);
        assert_eq!(
            compile_tag("frobnicate", &[]).unwrap_err().to_string(),
            "Unable to parse 'frobnicate'"
        );
    }

    struct Shout {
        pattern: Regex,
    }

    impl CustomTag for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn pattern(&self) -> &Regex {
            &self.pattern
        }

        fn compile(&self, captures: &Captures<'_>) -> TwigResult<Vec<String>> {
            Ok(vec![group(captures, 1).to_string()])
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_tag() {
        let tag: Rc<dyn CustomTag> = Rc::new(Shout {
            pattern: Regex::new(r"^shout\s+(.+)$").unwrap(),
        });
        let (kind, rules) = compile_tag("shout name", &[tag]).unwrap();
        assert!(matches!(
            kind,
            LogicKind::Custom { ref name, ref arguments } if name == "shout" && arguments.len() == 1
        ));
        assert!(rules.open);
        assert!(rules.next.is_empty());
    }
}
