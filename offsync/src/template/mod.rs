//! Mapping template loading, rendering and output parsing.

mod helpers;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use handlebars::{no_escape, Handlebars};
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

pub use helpers::names as helper_names;

use crate::{Error, TemplateContext};

/// Where a template's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Inline(String),
    /// Read on every render, so edits apply without rebuilding resolvers.
    File(PathBuf),
}

/// A named mapping template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    name: String,
    source: TemplateSource,
}

impl Template {
    pub fn inline<N, S>(name: N, text: S) -> Self
    where
        N: AsRef<str>,
        S: AsRef<str>,
    {
        Self {
            name: name.as_ref().to_string(),
            source: TemplateSource::Inline(text.as_ref().to_string()),
        }
    }

    /// A template backed by `dir/name`. The file must exist.
    pub fn from_file<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self, Error> {
        let path = dir.as_ref().join(name);
        if !path.is_file() {
            return Err(Error::TemplateNotFound(path));
        }
        Ok(Self {
            name: name.to_string(),
            source: TemplateSource::File(path),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    /// The template's current text.
    pub fn text(&self) -> Result<String, Error> {
        match &self.source {
            TemplateSource::Inline(s) => Ok(s.clone()),
            TemplateSource::File(path) => fs::read_to_string(path).map_err(|e| {
                Error::Io(format!("while trying to read template {}", path.display()), e)
            }),
        }
    }
}

/// Why a renderer failed to produce output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFailure(pub String);

impl fmt::Display for RenderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Turns template text plus an evaluation context into text.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, context: &TemplateContext) -> Result<String, RenderFailure>;
}

/// The default renderer. Templates are [Handlebars](https://handlebarsjs.com/)
/// with the utility namespace registered as helpers; output is never
/// HTML-escaped.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlebarsRenderer;

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, context: &TemplateContext) -> Result<String, RenderFailure> {
        // Helpers are bound to this render's context, so each render gets its
        // own registry.
        let mut hb = Handlebars::new();
        hb.register_escape_fn(no_escape);
        helpers::register(&mut hb, context);
        hb.render_template(template, &context.to_json())
            .map_err(|e| RenderFailure(e.to_string()))
    }
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$\{(\w+)\}").unwrap();
}

/// Replaces every `${name}` placeholder for which a non-empty substitution
/// exists. Other placeholders are left as they are.
pub fn substitute(text: &str, substitutions: &BTreeMap<String, String>) -> String {
    if substitutions.is_empty() {
        return text.to_string();
    }
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match substitutions.get(&caps[1]) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Renders a mapping template and parses its output.
///
/// If the render fails and the template recorded errors through the utility
/// namespace, those errors are returned instead of the renderer's failure.
/// Errors recorded by a render that otherwise succeeded (`appendError`) are
/// returned too.
pub fn render_mapping(
    renderer: &dyn TemplateRenderer,
    template: &Template,
    context: &TemplateContext,
    substitutions: &BTreeMap<String, String>,
) -> Result<JsonValue, Error> {
    let text = substitute(&template.text()?, substitutions);
    let rendered = renderer.render(&text, context);
    let util = context.util();
    let rendered = match rendered {
        Ok(rendered) => rendered,
        Err(failure) => {
            if util.has_errors() {
                debug!(
                    "Suppressing renderer failure of {} in favor of recorded errors: {}",
                    template.name(),
                    failure
                );
                return Err(Error::Raised(util.errors()));
            }
            return Err(Error::TemplateEvaluation(
                template.name().to_string(),
                failure.0,
            ));
        }
    };
    if util.has_errors() {
        return Err(Error::Raised(util.errors()));
    }
    trace!("Rendered {}:\n{}", template.name(), rendered);
    parse_relaxed(&rendered).map_err(|e| {
        Error::RenderedJson(template.name().to_string(), rendered.clone(), e.to_string())
    })
}

/// Parses JSON that may contain trailing commas in lists and objects.
pub fn parse_relaxed(text: &str) -> Result<JsonValue, serde_json::Error> {
    serde_json::from_str(&strip_trailing_commas(text))
}

fn strip_trailing_commas(text: &str) -> String {
    let chars = text.chars().collect::<Vec<char>>();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
