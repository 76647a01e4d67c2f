//! Resolving template references against the template that makes them.

use crate::error::{TwigError, TwigResult};
use crate::template::Template;

const SEPARATOR: &str = "/";

/// Resolves `file` against `template`, expanding `name::file` and
/// `@name/file` namespace references first.
pub(crate) fn parse_path(template: &Template, file: &str) -> TwigResult<String> {
    for (name, prefix) in &template.options.namespaces {
        if !file.contains(name.as_str()) {
            continue;
        }
        if let Some(rest) = file.strip_prefix(&format!("{}::", name)) {
            return Ok(format!("{}{}", prefix, rest));
        }
        if let Some(rest) = file.strip_prefix(&format!("@{}", name)) {
            return Ok(format!("{}{}", prefix, rest));
        }
    }
    relative_path(template, file)
}

/// Resolves `file` relative to the location `template` was loaded from.
pub(crate) fn relative_path(template: &Template, file: &str) -> TwigResult<String> {
    let mut file = file.to_string();
    let base = if let Some(url) = &template.url {
        match &template.base {
            Some(base) if base.ends_with(SEPARATOR) => base.clone(),
            Some(base) => format!("{}{}", base, SEPARATOR),
            None => url.clone(),
        }
    } else if let Some(path) = &template.path {
        let relative = file.starts_with("./") || file.starts_with("../");
        let base = match &template.base {
            Some(base) if !relative => {
                file = file.replacen(base.as_str(), "", 1);
                format!("{}{}", base, SEPARATOR)
            }
            Some(_) | None => path.clone(),
        };
        base.replace("//", SEPARATOR)
    } else {
        let origin = template.name.as_ref().or(template.id.as_ref());
        match (origin, template.method.as_deref()) {
            (Some(origin), Some(method)) if method != "fs" && method != "ajax" => {
                template.base.clone().unwrap_or_else(|| origin.clone())
            }
            _ => return Err(TwigError::runtime("Cannot extend an inline template.")),
        }
    };

    let mut segments: Vec<&str> = base.split(SEPARATOR).collect();
    segments.pop();
    segments.extend(file.split(SEPARATOR));

    let mut resolved: Vec<&str> = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment {
            "." => {}
            ".." if resolved.last().is_some_and(|last| *last != "..") => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved.join(SEPARATOR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{TemplateOptions, TemplateParams};

    fn template(params: TemplateParams) -> Template {
        Template::from_tokens(Vec::new(), params, TemplateOptions::default())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_relative_to_path() {
        let t = template(TemplateParams::new().path("views/pages/home.twig"));
        assert_eq!(
            relative_path(&t, "../layout.twig").unwrap(),
            "views/layout.twig",
            "parent directory"
        );
        assert_eq!(
            relative_path(&t, "./part.twig").unwrap(),
            "views/pages/part.twig",
            "current directory"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_relative_to_base() {
        let t = template(TemplateParams::new().path("views/home.twig").base("views"));
        assert_eq!(
            relative_path(&t, "layout.twig").unwrap(),
            "views/layout.twig",
            "resolved from base"
        );
        assert_eq!(
            relative_path(&t, "../shared/a.twig").unwrap(),
            "shared/a.twig",
            "relative files ignore base"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_relative_to_url() {
        let t = template(TemplateParams::new().url("http://x.test/t/home.twig"));
        assert_eq!(
            relative_path(&t, "layout.twig").unwrap(),
            "http://x.test/t/layout.twig",
            "sibling url"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_loader_and_inline() {
        let t = template(TemplateParams::new().id("db/home").method("db"));
        assert_eq!(relative_path(&t, "base").unwrap(), "db/base", "custom method");

        let inline = template(TemplateParams::new());
        assert_eq!(
            relative_path(&inline, "x.twig").unwrap_err().to_string(),
            "Cannot extend an inline template.",
            "inline templates have no location"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_namespaces() {
        let options = TemplateOptions::new().namespace("theme", "src/theme/");
        let t = template(TemplateParams::new().options(options));
        assert_eq!(
            parse_path(&t, "theme::a.twig").unwrap(),
            "src/theme/a.twig",
            "double colon"
        );
        assert_eq!(
            parse_path(&t, "@theme/a.twig").unwrap(),
            "src/theme//a.twig",
            "at sign keeps the following separator"
        );
    }
}
