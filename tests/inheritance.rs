
use std::rc::Rc;

use fixtures::{memory_engine, template_path};
use twiglet::{
    Context, OutputKind, RenderParams, Rendered, Template, TemplateOptions, TemplateParams,
    TemplateSource, TwigEngine, TwigError, TwigInterface, Value,
};

/// Loads `name` through the `memory` loader without any async work.
fn load(engine: &TwigEngine, name: &str) -> Rc<Template> {
    futures_util::FutureExt::now_or_never(
        engine.load_template(name, TemplateParams::new().method("memory")),
    )
    .unwrap()
    .unwrap()
}

#[test]
#[ntest::timeout(100)]
fn test_extends_with_parent() {
    let engine = memory_engine(&[
        (
            "layout",
            "<h1>{% block title %}Base{% endblock %}</h1>{% block body %}{% endblock %}",
        ),
        (
            "child",
            "{% extends 'layout' %}{% block title %}Child {{ parent() }}{% endblock %}{% block body %}{{ text }}{% endblock %}",
        ),
    ]);
    let template = load(&engine, "child");

    let mut context = Context::new();
    context.insert("text", "B");
    assert_eq!(
        engine.render_template(&template, Some(&context)).unwrap(),
        "<h1>Child Base</h1>B",
        "child blocks fill the layout"
    );
    assert!(
        engine.template("layout").is_some(),
        "the layout was loaded and registered"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_multi_level_extends() {
    let engine = memory_engine(&[
        ("base", "[{% block a %}base{% endblock %}]"),
        ("middle", "{% extends 'base' %}{% block a %}middle {{ parent() }}{% endblock %}"),
        ("leaf", "{% extends 'middle' %}{% block a %}leaf {{ parent() }}{% endblock %}"),
    ]);
    let template = load(&engine, "leaf");
    assert_eq!(
        engine.render_template(&template, None).unwrap(),
        "[leaf middle base]",
        "parent() chains through every level"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_include() {
    let engine = memory_engine(&[
        (
            "page",
            "{% include 'item' with {x: 1} only %}|{% include 'item' %}|{% include 'missing' ignore missing %}|",
        ),
        ("item", "{{ x }}{{ y }}"),
    ]);
    let template = load(&engine, "page");

    let mut context = Context::new();
    context.insert("x", 5).insert("y", 2);
    assert_eq!(
        engine.render_template(&template, Some(&context)).unwrap(),
        "1|52||",
        "only hides the outer scope and missing includes are skipped"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_use_and_block_function() {
    let engine = memory_engine(&[
        ("blocks", "{% block a %}A{% endblock %}{% block b %}B{% endblock %}"),
        (
            "page",
            "{% use 'blocks' %}{% block b %}mine{% endblock %}{{ block('a') }}",
        ),
    ]);
    let template = load(&engine, "page");
    assert_eq!(
        engine.render_template(&template, None).unwrap(),
        "mineA",
        "imported blocks can be overridden and rendered"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_embed() {
    let engine = memory_engine(&[
        (
            "card",
            "<div>{% block header %}head{% endblock %}:{% block content %}empty{% endblock %}</div>",
        ),
        (
            "page",
            "{% embed 'card' %}{% block content %}full{% endblock %}{% endembed %}",
        ),
    ]);
    let template = load(&engine, "page");
    assert_eq!(
        engine.render_template(&template, None).unwrap(),
        "<div>head:full</div>",
        "embed overrides only the blocks it defines"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_imported_macros() {
    let engine = memory_engine(&[
        (
            "macros",
            "{% macro hi(name) %}Hi {{ name }}{% endmacro %}{% macro bye() %}Bye{% endmacro %}",
        ),
        (
            "page",
            "{% import 'macros' as m %}{% from 'macros' import bye %}{{ m.hi('x') }} {{ bye() }}",
        ),
    ]);
    let template = load(&engine, "page");
    assert_eq!(
        engine.render_template(&template, None).unwrap(),
        "Hi x Bye",
        "macros from another template"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_inline_includes() {
    let mut engine = TwigEngine::new();
    engine.set_default_options(TemplateOptions::new().allow_inline_includes(true));
    engine.add_template("part", "P{{ n }}").unwrap();
    engine
        .add_template("page", "<{% include 'part' with {n: 1} %}>")
        .unwrap();
    assert_eq!(
        engine.render("page", None).unwrap(),
        "<P1>",
        "registered templates are found by id"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_inline_template_cannot_extend() {
    let engine = TwigEngine::new();
    engine.set_default_options(TemplateOptions::new().rethrow(true));
    let template = engine
        .create_template("{% extends 'layout' %}", TemplateParams::new())
        .unwrap();
    assert_eq!(
        engine.render_template(&template, None).unwrap_err().root_cause(),
        &TwigError::Runtime("Cannot extend an inline template.".to_string()),
        "no location to resolve against"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_filesystem_templates() {
    let engine = TwigEngine::new();
    let template = futures_util::FutureExt::now_or_never(
        engine.load_template(&template_path("page.twig"), TemplateParams::new()),
    )
    .unwrap()
    .unwrap();
    assert_eq!(
        template.path(),
        Some(template_path("page.twig").as_str()),
        "path defaults to the location"
    );

    let mut context = Context::new();
    context.insert("heading", "Home");
    assert_eq!(
        engine.render_template(&template, Some(&context)).unwrap(),
        "<title>Home | Default</title>\n<li>one</li>",
        "extends and include resolve relative to the file"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_namespaces() {
    let engine = memory_engine(&[("lib/partial", "ns"), ("page", "{% include 'lib::partial' %}")]);
    engine.set_default_options(TemplateOptions::new().namespace("lib", "lib/"));
    let template = load(&engine, "page");
    assert_eq!(
        engine.render_template(&template, None).unwrap(),
        "ns",
        "namespace prefix is expanded"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_precompiled_tokens() {
    let engine = TwigEngine::new();
    let original = Template::new("{{ a }}-{{ b }}").unwrap();
    let template = engine
        .create_template(
            TemplateSource::Compiled(original.tokens().to_vec()),
            TemplateParams::new().id("precompiled"),
        )
        .unwrap();

    let mut context = Context::new();
    context.insert("a", 1).insert("b", Value::from("two"));
    assert_eq!(
        engine.render("precompiled", Some(&context)).unwrap(),
        "1-two",
        "tokens render without recompiling"
    );
    assert_eq!(template.id(), Some("precompiled"), "keeps the id");
}

#[test]
#[ntest::timeout(100)]
fn test_child_blocks_output() {
    let engine = memory_engine(&[
        ("layout", "{% block a %}layout{% endblock %}{% block b %}B{% endblock %}"),
        ("child", "{% extends 'layout' %}{% block a %}child{% endblock %}"),
    ]);
    let template = load(&engine, "child");
    let Rendered::Blocks(blocks) = engine
        .render_with_params(
            &template,
            None,
            RenderParams {
                output: OutputKind::Blocks,
                ..RenderParams::default()
            },
        )
        .unwrap()
    else {
        panic!("expected blocks");
    };
    assert_eq!(blocks.get("a"), Some(&Value::from("child")), "child wins");
    assert_eq!(blocks.get("b"), Some(&Value::from("B")), "layout fills the rest");
}
