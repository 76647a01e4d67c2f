//! The filters, functions, tests and custom tags available to templates.

pub(crate) mod date;
pub(crate) mod filters;
pub(crate) mod functions;
pub(crate) mod php;
pub(crate) mod predicates;

use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::TwigEngine;
use crate::error::TwigResult;
use crate::interface::Context;
use crate::logic::CustomTag;
use crate::template::{Template, TemplateOptions};
use crate::value::Value;

pub type FilterFn = Rc<dyn Fn(&Value, &[Value]) -> TwigResult<Value>>;
pub type FunctionFn = Rc<dyn Fn(&Call<'_>, &[Value]) -> TwigResult<Value>>;
pub type TestFn = Rc<dyn Fn(&Value, &[Value]) -> TwigResult<Value>>;

/// What a function sees of the render that called it.
pub struct Call<'a> {
    pub(crate) context: &'a Context,
    pub(crate) engine: &'a TwigEngine,
    pub(crate) template: &'a Rc<Template>,
    pub(crate) options: &'a Rc<TemplateOptions>,
}

impl Call<'_> {
    pub const fn context(&self) -> &Context {
        self.context
    }

    pub const fn engine(&self) -> &TwigEngine {
        self.engine
    }

    pub fn template(&self) -> &Template {
        self.template
    }

    pub fn options(&self) -> &TemplateOptions {
        self.options
    }
}

pub(crate) struct Registry {
    pub filters: HashMap<String, FilterFn>,
    pub functions: HashMap<String, FunctionFn>,
    pub tests: HashMap<String, TestFn>,
    pub tags: Vec<Rc<dyn CustomTag>>,
}

impl Default for Registry {
    fn default() -> Self {
        let filters = filters::FILTERS
            .iter()
            .map(|(name, f)| ((*name).to_string(), Rc::new(*f) as FilterFn))
            .collect();
        let functions = functions::FUNCTIONS
            .iter()
            .map(|(name, f)| ((*name).to_string(), Rc::new(*f) as FunctionFn))
            .collect();
        let tests = predicates::TESTS
            .iter()
            .map(|(name, f)| ((*name).to_string(), Rc::new(*f) as TestFn))
            .collect();
        Self {
            filters,
            functions,
            tests,
            tags: Vec::new(),
        }
    }
}

impl Registry {
    pub fn filter(&self, name: &str) -> Option<FilterFn> {
        self.filters.get(name).map(Rc::clone)
    }

    pub fn function(&self, name: &str) -> Option<FunctionFn> {
        self.functions.get(name).map(Rc::clone)
    }

    pub fn test(&self, name: &str) -> Option<TestFn> {
        self.tests.get(name).map(Rc::clone)
    }

    /// Registers a tag, replacing an earlier one of the same name.
    pub fn add_tag(&mut self, tag: Rc<dyn CustomTag>) {
        self.tags.retain(|existing| existing.name() != tag.name());
        self.tags.push(tag);
    }
}
