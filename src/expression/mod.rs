//! Expression compilation.
//!
//! An expression is split into lexemes by [`lexer`] and then rearranged into
//! reverse polish order with the shunting-yard algorithm. Parenthesised
//! argument lists are folded into the call they belong to, so the renderer
//! never has to look backwards.

pub(crate) mod lexer;
pub(crate) mod operator;

use crate::ast::{ExprToken, ObjectKey, Operator};
use crate::error::{TwigError, TwigResult};
use crate::value::format_number;

use lexer::{LexKind, Lexeme};
use operator::{Associativity, COLON_PRECEDENCE};

/// Compiles an expression into reverse polish order.
pub(crate) fn compile(expression: &str) -> TwigResult<Vec<ExprToken>> {
    log::trace!("compiling expression {:?}", expression);
    let mut compiler = Compiler::default();
    for lexeme in lexer::tokenize(expression)? {
        compiler.push(lexeme)?;
    }
    compiler.finish(expression)
}

#[derive(Default)]
struct Compiler {
    output: Vec<ExprToken>,
    /// Pending operators and the group markers they are nested in.
    stack: Vec<ExprToken>,
}

impl Compiler {
    fn push(&mut self, lexeme: Lexeme) -> TwigResult<()> {
        let Lexeme {
            kind,
            value,
            mut groups,
        } = lexeme;
        let mut group = |index: usize| {
            groups
                .get_mut(index)
                .and_then(Option::take)
                .unwrap_or_default()
        };

        match kind {
            LexKind::Comma => self.pop_operators(),
            LexKind::Number => {
                let number = value
                    .parse::<f64>()
                    .map_err(|_| TwigError::syntax(format!("Invalid number {}", value)))?;
                self.output.push(ExprToken::Number(number));
            }
            LexKind::BinaryOperator | LexKind::UnaryOperator => self.operator(value.trim())?,
            LexKind::String => {
                let quote = group(0);
                self.output.push(ExprToken::String(unquote(&value, &quote)));
            }
            LexKind::SubexpressionStart => self.push_both(ExprToken::SubexpressionStart),
            LexKind::ParameterStart => self.push_both(ExprToken::ParameterStart),
            LexKind::ArrayStart => self.push_both(ExprToken::ArrayStart),
            LexKind::ObjectStart => self.push_both(ExprToken::ObjectStart),
            LexKind::SubexpressionEnd => {
                let inner = self.close_group(&ExprToken::SubexpressionStart)?;
                self.output.push(ExprToken::SubexpressionEnd(inner));
            }
            LexKind::ParameterEnd => {
                let inner = self.close_group(&ExprToken::ParameterStart)?;
                match self.output.last_mut() {
                    Some(
                        ExprToken::Function { params, .. }
                        | ExprToken::Filter { params, .. }
                        | ExprToken::Test { params, .. }
                        | ExprToken::KeyBrackets { params, .. },
                    ) => *params = Some(inner),
                    _ => self.output.push(ExprToken::ParameterEnd(inner)),
                }
            }
            LexKind::Slice => {
                let range = group(0);
                let (start, end) = range.split_once(':').unwrap_or((range.as_str(), ""));
                self.output.push(ExprToken::Slice {
                    start: start.parse().ok(),
                    end: end.parse().ok().filter(|end| *end != 0),
                });
            }
            LexKind::ArrayEnd => {
                self.pop_until(&ExprToken::ArrayStart);
                self.output.push(ExprToken::ArrayEnd);
            }
            LexKind::ObjectEnd => {
                self.pop_until(&ExprToken::ObjectStart);
                self.output.push(ExprToken::ObjectEnd);
            }
            LexKind::Filter => self.output.push(ExprToken::Filter {
                name: group(0),
                params: None,
            }),
            LexKind::Function => self.output.push(ExprToken::Function {
                name: group(0),
                params: None,
            }),
            LexKind::Test => {
                let negated = group(0) == "not";
                self.output.push(ExprToken::Test {
                    name: group(1),
                    negated,
                    params: None,
                });
            }
            LexKind::Variable => self.output.push(ExprToken::Variable(value)),
            LexKind::KeyPeriod => self.output.push(ExprToken::KeyPeriod(group(0))),
            LexKind::KeyBrackets => {
                let key = compile(&group(0))?;
                self.output.push(ExprToken::KeyBrackets { key, params: None });
            }
            LexKind::Null => self.output.push(ExprToken::Null),
            LexKind::Context => self.output.push(ExprToken::Context),
            LexKind::Bool => self
                .output
                .push(ExprToken::Bool(value.eq_ignore_ascii_case("true"))),
        }
        Ok(())
    }

    fn push_both(&mut self, marker: ExprToken) {
        self.output.push(marker.clone());
        self.stack.push(marker);
    }

    /// Moves pending operators to the output, stopping at the innermost group.
    fn pop_operators(&mut self) {
        while let Some(ExprToken::Operator(_)) = self.stack.last() {
            if let Some(top) = self.stack.pop() {
                self.output.push(top);
            }
        }
    }

    /// Moves everything above `marker` to the output and drops the marker.
    fn pop_until(&mut self, marker: &ExprToken) -> bool {
        while let Some(top) = self.stack.pop() {
            if top == *marker {
                return true;
            }
            self.output.push(top);
        }
        false
    }

    /// Closes a parenthesised group and returns the tokens it contains.
    fn close_group(&mut self, start: &ExprToken) -> TwigResult<Vec<ExprToken>> {
        let missing = || TwigError::syntax("Expected end of parameter set.");
        if !self.pop_until(start) {
            return Err(missing());
        }
        let position = self
            .output
            .iter()
            .rposition(|token| token == start)
            .ok_or_else(missing)?;
        let inner = self.output.split_off(position.saturating_add(1));
        self.output.pop();
        Ok(inner)
    }

    fn operator(&mut self, symbol: &str) -> TwigResult<()> {
        let operator = if symbol == ":" {
            None
        } else {
            Some(Operator::lookup(symbol)?)
        };
        let (precedence, associativity) = operator.map_or(
            (COLON_PRECEDENCE, Associativity::RightToLeft),
            |op| (op.precedence(), op.associativity()),
        );

        while let Some(ExprToken::Operator(top)) = self.stack.last() {
            let pops = match associativity {
                Associativity::LeftToRight => precedence >= top.precedence(),
                Associativity::RightToLeft => precedence > top.precedence(),
            };
            if !pops {
                break;
            }
            if let Some(top) = self.stack.pop() {
                self.output.push(top);
            }
        }

        match operator {
            Some(operator) => self.stack.push(ExprToken::Operator(operator)),
            None => {
                if let Some(ExprToken::Operator(Operator::Conditional { has_else })) =
                    self.stack.last_mut()
                {
                    if !*has_else {
                        *has_else = true;
                        return Ok(());
                    }
                }
                let key = self.object_key()?;
                self.output.push(ExprToken::ObjectKey(key));
            }
        }
        Ok(())
    }

    /// A `:` outside a ternary turns the preceding value into an object key.
    fn object_key(&mut self) -> TwigResult<ObjectKey> {
        match self.output.pop() {
            Some(ExprToken::String(name) | ExprToken::Variable(name)) => Ok(ObjectKey::Name(name)),
            Some(ExprToken::Number(n)) => Ok(ObjectKey::Name(format_number(n))),
            Some(ExprToken::ParameterEnd(inner) | ExprToken::SubexpressionEnd(inner)) => {
                Ok(ObjectKey::Expression(inner))
            }
            Some(other) => Err(TwigError::syntax(format!(
                "Unexpected value before ':' of {:?}",
                other
            ))),
            None => Err(TwigError::syntax("Unexpected ':' at start of expression")),
        }
    }

    fn finish(mut self, expression: &str) -> TwigResult<Vec<ExprToken>> {
        while let Some(top) = self.stack.pop() {
            if !matches!(top, ExprToken::Operator(_)) {
                return Err(TwigError::syntax(format!(
                    "Unbalanced brackets in expression '{}'",
                    expression.trim()
                )));
            }
            self.output.push(top);
        }
        log::trace!("compiled expression to {:?}", self.output);
        Ok(self.output)
    }
}

/// Strips the quotes and resolves `\<quote>`, `\n` and `\r` escapes.
fn unquote(literal: &str, quote: &str) -> String {
    let inner = literal
        .get(quote.len()..literal.len().saturating_sub(quote.len()))
        .unwrap_or_default();
    inner
        .replace(&format!("\\{}", quote), quote)
        .replace("\\n", "\n")
        .replace("\\r", "\r")
}
