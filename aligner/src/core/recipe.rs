//! Build recipe rendering: install directives injected after the anchor line.

use std::collections::BTreeMap;

use minijinja::{Environment, context};

use crate::error::AlignError;

/// Default directive installing one pinned package plus the test extras.
pub const DEFAULT_INSTALL_DIRECTIVE: &str =
    "RUN pip install {{ package }}=={{ version }}{% for extra in extras %} {{ extra }}{% endfor %}";

/// Renders one install directive per `(package, version)` pair.
#[derive(Debug, Clone)]
pub struct DirectiveRenderer {
    template: String,
    extras: Vec<String>,
}

impl DirectiveRenderer {
    /// Compile-check `template` so a bad configuration fails before any build.
    pub fn new(template: &str, extras: &[String]) -> Result<Self, String> {
        Environment::new()
            .template_from_str(template)
            .map_err(|err| format!("invalid install directive template: {err}"))?;
        Ok(Self {
            template: template.to_string(),
            extras: extras.to_vec(),
        })
    }

    pub fn render(&self, package: &str, version: &str) -> Result<String, String> {
        let line = Environment::new()
            .render_str(
                &self.template,
                context! { package => package, version => version, extras => &self.extras },
            )
            .map_err(|err| format!("render install directive for {package}: {err}"))?;
        if line.contains('\n') {
            return Err(format!(
                "install directive for {package} must render to a single line"
            ));
        }
        Ok(line)
    }
}

/// Turns a project's recipe template plus version overrides into a buildable recipe.
#[derive(Debug, Clone)]
pub struct RecipeRenderer {
    anchor: String,
    directives: DirectiveRenderer,
}

impl RecipeRenderer {
    pub fn new(anchor: impl Into<String>, directives: DirectiveRenderer) -> Self {
        Self {
            anchor: anchor.into(),
            directives,
        }
    }

    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    /// One install directive per override (in package name order), placed
    /// after the anchor line of `template`.
    pub fn render(
        &self,
        project: &str,
        template: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<String, AlignError> {
        let template_error = |reason: String| AlignError::Template {
            project: project.to_string(),
            reason,
        };
        let directives = overrides
            .iter()
            .map(|(package, version)| self.directives.render(package, version))
            .collect::<Result<Vec<_>, _>>()
            .map_err(template_error)?;
        inject_directives(template, &self.anchor, &directives).map_err(template_error)
    }
}

/// Insert `directives` right after the single line starting with `anchor`.
///
/// Every other line is passed through byte for byte. A template with no anchor,
/// or with more than one, has no well-defined injection point.
pub fn inject_directives(template: &str, anchor: &str, directives: &[String]) -> Result<String, String> {
    let anchors = template
        .lines()
        .filter(|line| line.trim_start().starts_with(anchor))
        .count();
    match anchors {
        0 => return Err(format!("injection anchor `{anchor}` not found")),
        1 => {}
        n => return Err(format!("injection anchor `{anchor}` appears {n} times")),
    }

    let mut out = String::with_capacity(template.len() + directives.len() * 48);
    for line in template.split_inclusive('\n') {
        out.push_str(line);
        if line.trim_start().starts_with(anchor) {
            if !line.ends_with('\n') {
                out.push('\n');
            }
            for directive in directives {
                out.push_str(directive);
                out.push('\n');
            }
        }
    }
    Ok(out)
}
