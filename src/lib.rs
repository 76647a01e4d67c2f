//! A Twig template engine.
//!
//! Templates are compiled once into a token tree and rendered any number of
//! times, either synchronously or cooperatively on a single-threaded async
//! runtime when extensions return [`Promise`]s.
//!
//! ```
//! use twiglet::{Context, TwigEngine, TwigInterface};
//!
//! let mut engine = TwigEngine::new();
//! engine
//!     .add_template("list", "{% for item in items %}{{ loop.index }}.{{ item|upper }} {% endfor %}")
//!     .unwrap();
//!
//! let mut context = Context::new();
//! context.insert("items", vec!["a", "b"]);
//! assert_eq!(engine.render("list", Some(&context)).unwrap(), "1.A 2.B ");
//! ```

pub mod ast;
mod engine;
mod error;
mod expression;
mod interface;
mod logic;
mod parser;
mod path;
mod promise;
mod registry;
mod render;
mod template;
mod value;

// Public exports.
pub use engine::{OutputKind, RenderParams, Rendered, TwigEngine};
pub use error::{ParseError, ParseErrorKind, TwigError, TwigResult};
pub use interface::{
    Accessor, Context, FileSystemLoader, GetterProbing, LoadFuture, LoadRequest, Loader,
    Namespaces, TemplateSource, TwigInterface,
};
pub use logic::{CustomTag, TagCall, TagOutcome, TagOutput};
pub use promise::{ExecutionMode, Promise, PromiseState, Resolver};
pub use registry::{Call, FilterFn, FunctionFn, TestFn};
pub use template::{Template, TemplateOptions, TemplateParams};
pub use value::{EscapeStrategy, Function, Macro, Markup, Object, Value, format_number};
