
use fixtures::render;
use regex::{Captures, Regex};
use serde_json::json;
use twiglet::{
    Context, CustomTag, EscapeStrategy, Function, TagCall, TagOutcome, TagOutput,
    TemplateOptions, TwigEngine, TwigError, TwigInterface, TwigResult, Value,
};

#[test]
#[ntest::timeout(100)]
fn test_basic_substitution() {
    let mut engine = TwigEngine::new();
    engine
        .add_template("Template A", "Hello, {{ name }}!")
        .unwrap();

    let mut context = Context::new();
    context.insert("name", "Jessica");

    let rendered = engine.render("Template A", Some(&context)).unwrap();
    assert_eq!(
        rendered, "Hello, Jessica!",
        "Rendered string should match the template."
    );

    let again = engine.render("Template A", Some(&context)).unwrap();
    assert_eq!(rendered, again, "Rendering twice gives the same output");
}

#[test]
#[ntest::timeout(100)]
fn test_missing_variables_render_empty() {
    assert_eq!(
        render("[{{ nope }}][{{ nope.deeper }}]", json!({})),
        "[][]",
        "undefined renders as nothing"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_operator_precedence() {
    assert_eq!(render("{{ 1 + 2 * 3 }}", json!({})), "7", "multiplication first");
    assert_eq!(render("{{ (1 + 2) * 3 }}", json!({})), "9", "parentheses group");
    assert_eq!(render("{{ 0 ?: 2 }}", json!({})), "2", "elvis falls through");
    assert_eq!(
        render("{{ 2 ** 3 ~ '!' }}", json!({})),
        "8!",
        "power binds tighter than concatenation"
    );
    assert_eq!(
        render("{{ flag ? 'yes' : 'no' }}", json!({"flag": false})),
        "no",
        "ternary"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_empty_array_arithmetic() {
    assert_eq!(render("{{ [] + 1 }}", json!({})), "1", "literal counts as zero");
    assert_eq!(render("{{ a + 1 }}", json!({"a": []})), "1", "variable counts as zero");
}

#[test]
#[ntest::timeout(100)]
fn test_containment() {
    assert_eq!(render("{{ 'ell' in 'hello' }}", json!({})), "true", "substring");
    assert_eq!(render("{{ 5 in [1, 2, 3] }}", json!({})), "false", "array member");
    assert_eq!(
        render("{{ 2 in {a: 1, b: 2} }}", json!({})),
        "true",
        "object values"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_for_loops() {
    assert_eq!(
        render("{% for i in [3,1,2] %}{{ i }}{% endfor %}", json!({})),
        "312",
        "iteration keeps order"
    );
    assert_eq!(
        render("{% for i in [] %}{{i}}{% else %}empty{% endfor %}", json!({})),
        "empty",
        "else branch on empty"
    );
    assert_eq!(
        render(
            "{% for x in items %}{{ loop.index }}{{ loop.first ? 'F' : '' }}{{ x }}{% if not loop.last %},{% endif %}{% endfor %}",
            json!({"items": ["a", "b"]})
        ),
        "1Fa,2b",
        "loop variables"
    );
    assert_eq!(
        render(
            "{% for key, value in {a: 1, b: 2} %}{{ key }}={{ value }};{% endfor %}",
            json!({})
        ),
        "a=1;b=2;",
        "key and value"
    );
    assert_eq!(
        render("{% for i in 1..4 if i is even %}{{ i }}{% endfor %}", json!({})),
        "24",
        "range with a condition"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_set_inside_for() {
    let rendered = render(
        "{% set total = 0 %}{% for i in [1,2,3] %}{% set total = total + i %}{% set inner = i %}{% endfor %}{{ total }}{{ inner is defined ? 'leak' : 'clean' }}",
        json!({}),
    );
    assert_eq!(
        rendered, "6clean",
        "existing variables keep the last value and new ones stay in the loop"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_filter_chains() {
    assert_eq!(render("{{ \"Hello\"|upper|lower }}", json!({})), "hello", "chained");
    assert_eq!(
        render("{{ items|join(', ') }}", json!({"items": [1, 2, 3]})),
        "1, 2, 3",
        "join"
    );
    assert_eq!(
        render("{{ missing|default('fallback') }}", json!({})),
        "fallback",
        "default"
    );
    assert_eq!(
        render("{{ [3, 1, 2]|sort|reverse|first }}", json!({})),
        "3",
        "sort then reverse"
    );
    assert_eq!(
        render("{% filter upper %}quiet {{ word }}{% endfilter %}", json!({"word": "please"})),
        "QUIET PLEASE",
        "filter tag"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_autoescape() {
    let mut engine = TwigEngine::new();
    engine.set_default_options(TemplateOptions::new().autoescape(Some(EscapeStrategy::Html)));
    engine
        .add_template("t", "<p>{{ x }}</p>{{ x|raw }}")
        .unwrap();

    let mut context = Context::new();
    context.insert("x", "<b>");
    assert_eq!(
        engine.render("t", Some(&context)).unwrap(),
        "<p>&lt;b&gt;</p><b>",
        "output is escaped unless marked raw"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_whitespace_control() {
    assert_eq!(render("a  {{- 'b' -}}  c", json!({})), "abc", "both sides trimmed");
    assert_eq!(
        render(
            "{% spaceless %}<ul>\n  <li>x</li>\n</ul>{% endspaceless %}",
            json!({})
        ),
        "<ul><li>x</li></ul>",
        "spaceless"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_set_capture_and_context() {
    assert_eq!(
        render("{% set greeting %}Hi {{ name }}{% endset %}[{{ greeting }}]", json!({"name": "Al"})),
        "[Hi Al]",
        "captured block"
    );
    assert_eq!(
        render("{{ _context.name }}", json!({"name": "ctx"})),
        "ctx",
        "_context snapshot"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_macros() {
    assert_eq!(
        render(
            "{% macro greet(name, greeting='Hi') %}{{ greeting }} {{ name }}{% endmacro %}{% import _self as m %}{{ m.greet('Bob') }}",
            json!({})
        ),
        "Hi Bob",
        "default parameter"
    );
    assert_eq!(
        render(
            "{% macro pair(a, b) %}{{ a }}{{ b }}{% endmacro %}{% from _self import pair as p %}{{ p(1, 2) }}",
            json!({})
        ),
        "12",
        "from import"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_verbatim() {
    assert_eq!(
        render("{% verbatim %}{{ not parsed }}{% endverbatim %}", json!({})),
        "{{ not parsed }}",
        "verbatim"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_context_functions() {
    let mut engine = TwigEngine::new();
    engine.add_template("t", "{{ double(21) }}").unwrap();

    let mut context = Context::new();
    context.insert(
        "double",
        Function::new(|args: &[Value]| {
            Ok(Value::from(args.first().map_or(0.0, Value::to_number) * 2.0))
        }),
    );
    assert_eq!(
        engine.render("t", Some(&context)).unwrap(),
        "42",
        "context callable"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_error_policy() {
    let mut engine = TwigEngine::new();
    engine.add_template("t", "a{{ x|nope }}b").unwrap();
    assert_eq!(
        engine.render("t", None).unwrap(),
        "",
        "errors are logged and swallowed"
    );

    engine.set_debug(true);
    assert_eq!(
        engine.render("t", None).unwrap(),
        "TwigException: Unable to find filter nope",
        "debug writes the error"
    );

    let mut engine = TwigEngine::new();
    engine.set_default_options(TemplateOptions::new().rethrow(true));
    engine.add_template("t", "a{{ x|nope }}b").unwrap();
    let err = engine.render("t", None).unwrap_err();
    assert_eq!(
        err.root_cause(),
        &TwigError::UnknownFilter {
            name: "nope".to_string()
        },
        "rethrown"
    );
    assert_eq!(
        err.to_string(),
        "Unable to find filter nope (in template t)",
        "names the template"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_strict_variables() {
    let mut engine = TwigEngine::new();
    engine.set_default_options(
        TemplateOptions::new()
            .strict_variables(true)
            .rethrow(true),
    );
    engine.add_template("t", "{{ user.name }}").unwrap();
    let err = engine.render("t", None).unwrap_err();
    assert_eq!(
        err.root_cause(),
        &TwigError::NullKeyAccess {
            key: "name".to_string()
        },
        "strict key access"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_syntax_errors() {
    let mut engine = TwigEngine::new();
    assert!(
        engine.add_template("open", "{% if x %}never closed").is_err(),
        "unclosed tag"
    );
    assert!(
        matches!(
            engine.add_template("tag", "{{ unterminated"),
            Err(TwigError::Parse(_))
        ),
        "unterminated output"
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
        Ok(captures
            .get(1)
            .map(|expression| expression.as_str().to_string())
            .into_iter()
            .collect())
    }

    fn parse(&self, call: TagCall<'_>) -> TwigResult<TagOutcome> {
        let text = call
            .arguments
            .first()
            .map(|value| value.to_string().to_uppercase())
            .unwrap_or_default();
        Ok(TagOutcome {
            chain: call.chain,
            output: TagOutput::Value(Value::from(text)),
        })
    }
}

#[test]
#[ntest::timeout(100)]
fn test_custom_tag() {
    let mut engine = TwigEngine::new();
    engine.add_tag(Shout {
        pattern: Regex::new(r"^shout\s+(.+)$").unwrap(),
    });
    engine
        .add_template("t", "{% shout 'hey ' ~ name %}")
        .unwrap();

    let mut context = Context::new();
    context.insert("name", "you");
    assert_eq!(
        engine.render("t", Some(&context)).unwrap(),
        "HEY YOU",
        "custom tag output"
    );
}
