use std::collections::VecDeque;
use std::rc::Rc;

use crate::{
    ast::{LogicKind, LogicToken, TagType, Token},
    error::{ParseError, ParseErrorKind, TwigError, TwigResult},
    expression,
    logic::{self, CustomTag},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawKind {
    /// Plain text, or the body of a `raw`/`verbatim` block.
    Raw,
    OutputWhitespacePre,
    OutputWhitespacePost,
    OutputWhitespaceBoth,
    LogicWhitespacePre,
    LogicWhitespacePost,
    LogicWhitespaceBoth,
    Output,
    Logic,
    Comment,
}

impl RawKind {
    const fn is_logic(self) -> bool {
        matches!(
            self,
            Self::Logic | Self::LogicWhitespacePre | Self::LogicWhitespacePost | Self::LogicWhitespaceBoth
        )
    }

    const fn is_output(self) -> bool {
        matches!(
            self,
            Self::Output
                | Self::OutputWhitespacePre
                | Self::OutputWhitespacePost
                | Self::OutputWhitespaceBoth
        )
    }

    /// `{{-` / `{%-`
    const fn trims_before(self) -> bool {
        matches!(
            self,
            Self::OutputWhitespacePre
                | Self::OutputWhitespaceBoth
                | Self::LogicWhitespacePre
                | Self::LogicWhitespaceBoth
        )
    }

    /// `-}}` / `-%}`
    const fn trims_after(self) -> bool {
        matches!(
            self,
            Self::OutputWhitespacePost
                | Self::OutputWhitespaceBoth
                | Self::LogicWhitespacePost
                | Self::LogicWhitespaceBoth
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawToken {
    pub kind: RawKind,
    pub value: String,
}

struct Delimiter {
    kind: RawKind,
    open: &'static str,
    close: &'static str,
}

/// Checked in order; ties are broken in [`Tokenizer::find_start`].
const DELIMITERS: [Delimiter; 11] = [
    Delimiter {
        kind: RawKind::Raw,
        open: "{% raw %}",
        close: "{% endraw %}",
    },
    Delimiter {
        kind: RawKind::Raw,
        open: "{% verbatim %}",
        close: "{% endverbatim %}",
    },
    Delimiter {
        kind: RawKind::OutputWhitespacePre,
        open: "{{-",
        close: "}}",
    },
    Delimiter {
        kind: RawKind::OutputWhitespacePost,
        open: "{{",
        close: "-}}",
    },
    Delimiter {
        kind: RawKind::OutputWhitespaceBoth,
        open: "{{-",
        close: "-}}",
    },
    Delimiter {
        kind: RawKind::LogicWhitespacePre,
        open: "{%-",
        close: "%}",
    },
    Delimiter {
        kind: RawKind::LogicWhitespacePost,
        open: "{%",
        close: "-%}",
    },
    Delimiter {
        kind: RawKind::LogicWhitespaceBoth,
        open: "{%-",
        close: "-%}",
    },
    Delimiter {
        kind: RawKind::Output,
        open: "{{",
        close: "}}",
    },
    Delimiter {
        kind: RawKind::Logic,
        open: "{%",
        close: "%}",
    },
    Delimiter {
        kind: RawKind::Comment,
        open: "{#",
        close: "#}",
    },
];

struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Tokenizer { input, pos: 0 }
    }

    #[inline]
    fn make_error(&self, offset: usize, kind: ParseErrorKind) -> ParseError {
        ParseError::at(self.input, offset, kind)
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.pos..).unwrap_or_default()
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Finds the earliest opening delimiter in `template`. At equal positions
    /// a longer opening wins, then a closing that exists and comes sooner.
    fn find_start(template: &str) -> Option<(usize, &'static Delimiter)> {
        let mut best: Option<(usize, &'static Delimiter, Option<usize>)> = None;

        for delimiter in &DELIMITERS {
            let Some(open_at) = template.find(delimiter.open) else {
                continue;
            };
            let close_at = template.find(delimiter.close);
            if delimiter.open.len() != delimiter.close.len() && close_at.is_none() {
                continue;
            }

            let replace = match best {
                None => true,
                Some((position, current, current_close)) => {
                    let closes_sooner = matches!(
                        (close_at, current_close),
                        (Some(close), Some(current)) if close < current
                    );
                    open_at < position
                        || (open_at == position
                            && (delimiter.open.len() > current.open.len()
                                || (delimiter.open.len() == current.open.len() && closes_sooner)))
                }
            };
            if replace {
                best = Some((open_at, delimiter, close_at));
            }
        }

        best.map(|(position, delimiter, _)| (position, delimiter))
    }

    /// Finds the closing delimiter in `template` (the text after the opening
    /// delimiter), skipping over quoted strings in expression tags. `start`
    /// is the absolute offset of `template`.
    fn find_end(&self, template: &str, delimiter: &Delimiter, start: usize) -> Result<usize, ParseError> {
        let mut offset = 0;
        loop {
            let Some(end) = template
                .get(offset..)
                .and_then(|rest| rest.find(delimiter.close))
                .map(|found| found.saturating_add(offset))
            else {
                return Err(self.make_error(
                    start,
                    ParseErrorKind::UnclosedTag {
                        close: delimiter.close.to_string(),
                        position: start,
                    },
                ));
            };

            if matches!(delimiter.kind, RawKind::Comment | RawKind::Raw) {
                return Ok(end);
            }

            let Some((string_start, quote)) = template
                .get(offset..end)
                .and_then(|inside| inside.char_indices().find(|(_, c)| *c == '"' || *c == '\''))
                .map(|(index, quote)| (index.saturating_add(offset), quote))
            else {
                return Ok(end);
            };

            let mut search = string_start.saturating_add(1);
            loop {
                let Some(string_end) = template
                    .get(search..)
                    .and_then(|rest| rest.find(quote))
                    .map(|found| found.saturating_add(search))
                else {
                    return Err(self.make_error(
                        start.saturating_add(string_start),
                        ParseErrorKind::UnclosedString,
                    ));
                };
                let escaped = template
                    .get(..string_end)
                    .is_some_and(|before| before.ends_with('\\'));
                search = string_end.saturating_add(1);
                if !escaped {
                    offset = search;
                    break;
                }
            }
        }
    }

    fn next_tokens(&mut self, tokens: &mut Vec<RawToken>) -> Result<(), ParseError> {
        let template = self.rest();
        let Some((position, delimiter)) = Self::find_start(template) else {
            tokens.push(RawToken {
                kind: RawKind::Raw,
                value: template.to_string(),
            });
            self.pos = self.input.len();
            return Ok(());
        };

        if position > 0 {
            tokens.push(RawToken {
                kind: RawKind::Raw,
                value: template.get(..position).unwrap_or_default().to_string(),
            });
        }

        let body_start = position.saturating_add(delimiter.open.len());
        let body = template.get(body_start..).unwrap_or_default();
        let absolute = self.pos.saturating_add(body_start);
        let end = self.find_end(body, delimiter, absolute)?;

        log::trace!("found {:?} token at {}", delimiter.kind, absolute);
        tokens.push(RawToken {
            kind: delimiter.kind,
            value: body.get(..end).unwrap_or_default().trim().to_string(),
        });

        let mut consumed = end.saturating_add(delimiter.close.len());
        if delimiter.kind.is_logic()
            && body.get(consumed..).is_some_and(|after| after.starts_with('\n'))
        {
            consumed = consumed.saturating_add(1);
        }
        self.pos = absolute.saturating_add(consumed);
        Ok(())
    }
}

/// Splits a template into raw tokens: text, tags, and comments.
pub(crate) fn tokenize(input: &str) -> Result<Vec<RawToken>, ParseError> {
    let mut tokenizer = Tokenizer::new(input);
    let mut tokens = Vec::new();
    while !tokenizer.eof() {
        tokenizer.next_tokens(&mut tokens)?;
    }
    Ok(tokens)
}

/// An open logic tag waiting for its closing tag.
struct Frame {
    kind: LogicKind,
    next: Vec<TagType>,
    output: Vec<Token>,
}

struct Compiler<'t> {
    tags: &'t [Rc<dyn CustomTag>],
    output: Vec<Token>,
    stack: Vec<Frame>,
    /// Tokens between the innermost open tag and whatever comes next.
    intermediate: Vec<Token>,
}

impl<'t> Compiler<'t> {
    fn emit(&mut self, token: Token) {
        if self.stack.is_empty() {
            self.output.push(token);
        } else {
            self.intermediate.push(token);
        }
    }

    /// Trims the raw text directly before a `{{-` or `{%-` tag.
    fn trim_previous(&mut self) {
        let target = if self.stack.is_empty() {
            &mut self.output
        } else {
            &mut self.intermediate
        };
        if let Some(Token::Raw(text)) = target.last_mut() {
            if text.trim().is_empty() {
                target.pop();
            } else {
                *text = text.trim().to_string();
            }
        }
    }

    fn compile_logic(&mut self, body: &str) -> TwigResult<()> {
        let (kind, rules) = logic::compile_tag(body, self.tags)?;
        let tag = kind.tag_type();
        log::trace!("compiled logic tag {} (open: {}, next: {:?})", tag, rules.open, rules.next);

        if !rules.open {
            let Some(previous) = self.stack.pop() else {
                return Err(TwigError::syntax(format!(
                    "{} not expected outside of a tag",
                    tag
                )));
            };
            if !previous.next.contains(&tag) {
                return Err(TwigError::syntax(format!(
                    "{} not expected after a {}",
                    tag,
                    previous.kind.tag_type()
                )));
            }
            let mut output = previous.output;
            output.append(&mut self.intermediate);
            self.emit(Token::Logic(LogicToken {
                kind: previous.kind,
                output,
            }));
        }

        if !rules.next.is_empty() {
            if let Some(top) = self.stack.last_mut() {
                top.output.append(&mut self.intermediate);
            }
            self.stack.push(Frame {
                kind,
                next: rules.next,
                output: Vec::new(),
            });
        } else if rules.open {
            self.emit(Token::Logic(LogicToken {
                kind,
                output: Vec::new(),
            }));
        }
        Ok(())
    }

    fn finish(mut self) -> TwigResult<Vec<Token>> {
        if let Some(unclosed) = self.stack.pop() {
            let expected: Vec<&str> = unclosed.next.iter().map(TagType::as_str).collect();
            return Err(TwigError::syntax(format!(
                "Unable to find an end tag for {}, expecting one of {}",
                unclosed.kind.tag_type(),
                expected.join(",")
            )));
        }
        Ok(self.output)
    }
}

/// Trims the raw text directly after a `-}}` or `-%}` tag.
fn trim_next(tokens: &mut VecDeque<RawToken>) {
    if let Some(next) = tokens.front_mut() {
        if next.kind == RawKind::Raw {
            if next.value.trim().is_empty() {
                tokens.pop_front();
            } else {
                next.value = next.value.trim().to_string();
            }
        }
    }
}

/// Re-assembles the source between a whitespace-controlled `verbatim` tag
/// and its `endverbatim`. Returns the text and the kind of the closing tag.
fn collect_verbatim(tokens: &mut VecDeque<RawToken>) -> TwigResult<(String, RawKind)> {
    let mut body = String::new();
    while let Some(token) = tokens.pop_front() {
        let (open, close) = match token.kind {
            RawKind::Raw => {
                body.push_str(&token.value);
                continue;
            }
            kind if kind.is_logic() && token.value == "endverbatim" => {
                return Ok((body, kind));
            }
            RawKind::Output => ("{{ ", " }}"),
            RawKind::OutputWhitespacePre => ("{{- ", " }}"),
            RawKind::OutputWhitespacePost => ("{{ ", " -}}"),
            RawKind::OutputWhitespaceBoth => ("{{- ", " -}}"),
            RawKind::Logic => ("{% ", " %}"),
            RawKind::LogicWhitespacePre => ("{%- ", " %}"),
            RawKind::LogicWhitespacePost => ("{% ", " -%}"),
            RawKind::LogicWhitespaceBoth => ("{%- ", " -%}"),
            RawKind::Comment => ("{# ", " #}"),
        };
        body.push_str(open);
        body.push_str(&token.value);
        body.push_str(close);
    }
    Err(TwigError::syntax(
        "Unable to find an end tag for verbatim, expecting one of endverbatim",
    ))
}

/// Compiles template source into a token tree.
pub(crate) fn compile(source: &str, tags: &[Rc<dyn CustomTag>]) -> TwigResult<Vec<Token>> {
    let mut tokens: VecDeque<RawToken> = tokenize(source)?.into();
    let mut compiler = Compiler {
        tags,
        output: Vec::new(),
        stack: Vec::new(),
        intermediate: Vec::new(),
    };

    while let Some(token) = tokens.pop_front() {
        let mut kind = token.kind;
        match kind {
            RawKind::Raw => compiler.emit(Token::Raw(token.value)),
            RawKind::Comment => {}
            _ => {
                if kind.trims_before() {
                    compiler.trim_previous();
                }
                if kind.is_output() {
                    compiler.emit(Token::Output(expression::compile(&token.value)?));
                } else if token.value.starts_with("verbatim") {
                    let (body, end_kind) = collect_verbatim(&mut tokens)?;
                    compiler.emit(Token::Logic(LogicToken {
                        kind: LogicKind::Verbatim,
                        output: vec![Token::Raw(body)],
                    }));
                    kind = end_kind;
                } else {
                    compiler.compile_logic(&token.value)?;
                }
                if kind.trims_after() {
                    trim_next(&mut tokens);
                }
            }
        }
    }

    compiler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprToken;

    macro_rules! raw {
        ($kind:ident, $value:expr) => {
            RawToken {
                kind: RawKind::$kind,
                value: $value.to_string(),
            }
        };
    }

    fn text(value: &str) -> Token {
        Token::Raw(value.to_string())
    }

    fn print(name: &str) -> Token {
        Token::Output(vec![ExprToken::Variable(name.to_string())])
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_input() {
        assert_eq!(tokenize("").unwrap(), vec![]);
        assert_eq!(compile("", &[]).unwrap(), vec![]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_text_and_output() {
        assert_eq!(
            tokenize("Hello {{ name }}!").unwrap(),
            vec![raw!(Raw, "Hello "), raw!(Output, "name"), raw!(Raw, "!")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_delimiters() {
        assert_eq!(
            tokenize("{{- a }}{{ b -}}{{- c -}}{%- if x -%}").unwrap(),
            vec![
                raw!(OutputWhitespacePre, "a"),
                raw!(OutputWhitespacePost, "b"),
                raw!(OutputWhitespaceBoth, "c"),
                raw!(LogicWhitespaceBoth, "if x"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_close_delimiter_inside_string() {
        assert_eq!(
            tokenize("{{ 'a }} b' }}").unwrap(),
            vec![raw!(Output, "'a }} b'")],
            "closing brackets inside a string are skipped"
        );
        assert_eq!(
            tokenize(r#"{{ "say \"}}\"" }}"#).unwrap(),
            vec![raw!(Output, r#""say \"}}\"""#)],
            "escaped quotes do not end the string"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_comment_ignores_quotes() {
        assert_eq!(
            tokenize("{# don't #}x").unwrap(),
            vec![raw!(Comment, "don't"), raw!(Raw, "x")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_raw_block() {
        assert_eq!(
            tokenize("{% raw %}{{ x }}{% endraw %}").unwrap(),
            vec![raw!(Raw, "{{ x }}")]
        );
        assert_eq!(
            tokenize("{% verbatim %}{% if %}{% endverbatim %}").unwrap(),
            vec![raw!(Raw, "{% if %}")]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_newline_after_logic_is_consumed() {
        assert_eq!(
            tokenize("{% set a = 1 %}\nx\n{{ a }}\ny").unwrap(),
            vec![
                raw!(Logic, "set a = 1"),
                raw!(Raw, "x\n"),
                raw!(Output, "a"),
                raw!(Raw, "\ny"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_tag() {
        let err = tokenize("ab\n{{ x").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnclosedTag {
                close: "}}".to_string(),
                position: 5
            }
        );
        assert_eq!(err.line, 2);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unclosed_string() {
        let err = tokenize("{{ 'abc }}").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnclosedString);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_control_trims_neighbours() {
        assert_eq!(
            compile("a  {{- b -}}  c", &[]).unwrap(),
            vec![text("a"), print("b"), text("c")]
        );
        assert_eq!(
            compile("   {{- b -}}   ", &[]).unwrap(),
            vec![print("b")],
            "whitespace-only neighbours are dropped"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_if_else_become_siblings() {
        let tokens = compile("{% if a %}x{% else %}y{% endif %}", &[]).unwrap();
        assert_eq!(tokens.len(), 2, "if and else are siblings");
        assert!(matches!(
            tokens.first(),
            Some(Token::Logic(LogicToken { kind: LogicKind::If { .. }, output })) if output == &vec![text("x")]
        ));
        assert!(matches!(
            tokens.get(1),
            Some(Token::Logic(LogicToken { kind: LogicKind::Else, output })) if output == &vec![text("y")]
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_blocks() {
        let tokens = compile("{% for i in items %}{% if i %}{{ i }}{% endif %}{% endfor %}", &[]).unwrap();
        let Some(Token::Logic(LogicToken {
            kind: LogicKind::For { .. },
            output,
        })) = tokens.first()
        else {
            panic!("expected a for loop, got {:?}", tokens);
        };
        assert!(matches!(
            output.first(),
            Some(Token::Logic(LogicToken { kind: LogicKind::If { .. }, output })) if output == &vec![print("i")]
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_whitespace_controlled_verbatim() {
        assert_eq!(
            compile("a {%- verbatim %}{{ x }}{% endverbatim -%} b", &[]).unwrap(),
            vec![
                text("a"),
                Token::Logic(LogicToken {
                    kind: LogicKind::Verbatim,
                    output: vec![text("{{ x }}")],
                }),
                text("b"),
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_unexpected_and_missing_end_tags() {
        assert_eq!(
            compile("{% for a in b %}{% endif %}", &[]).unwrap_err().to_string(),
            "endif not expected after a for"
        );
        assert_eq!(
            compile("{% if a %}x", &[]).unwrap_err().to_string(),
            "Unable to find an end tag for if, expecting one of else,elseif,endif"
        );
        assert!(compile("{% endif %}", &[]).is_err());
    }
}
