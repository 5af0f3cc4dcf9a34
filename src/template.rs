//! Interprets templated string values (`{{...}}`) inside parameters, with
//! two-phase resolution: secret placeholders first, then general context
//! expressions. Whole-template strings preserve their native type instead of
//! being stringified.

use handlebars::{Context, Handlebars, Helper, HelperResult, Output, RenderContext};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::context::ExecutionContext;

static HANDLEBARS: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);
    hb.register_helper("basename", Box::new(basename_helper));
    hb
});

fn basename_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let path = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    out.write(base)?;
    Ok(())
}

/// Resolves any value that may be a templated string or a nested container.
pub struct TemplateResolver;

impl TemplateResolver {
    /// `Resolve(any) -> any`: strings go through `resolve_string`, mappings
    /// and lists are walked recursively, everything else returns as-is.
    pub fn resolve(value: &Value, ctx: &ExecutionContext) -> Value {
        match value {
            Value::String(s) => Self::resolve_string(s, ctx),
            Value::Object(map) => {
                Value::Object(map.iter().map(|(k, v)| (k.clone(), Self::resolve(v, ctx))).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| Self::resolve(v, ctx)).collect()),
            other => other.clone(),
        }
    }

    /// Resolve the `parameters` map of a node in one pass.
    pub fn resolve_params(params: &Map<String, Value>, ctx: &ExecutionContext) -> Map<String, Value> {
        params
            .iter()
            .map(|(k, v)| (k.clone(), Self::resolve(v, ctx)))
            .collect()
    }

    fn resolve_string(s: &str, ctx: &ExecutionContext) -> Value {
        let post_secrets = Self::resolve_secrets(s, ctx);

        if !(post_secrets.contains("{{") && post_secrets.contains("}}")) {
            return Value::String(post_secrets);
        }

        let trimmed = post_secrets.trim();
        if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
            let inner = trimmed[2..trimmed.len() - 2].trim();
            if let Some(segments) = parse_shortcut_path(inner) {
                let data = ctx.to_map();
                if let Some(value) = traverse(&data, &segments)
                    && !value.is_null()
                {
                    return value;
                }
            }
        }

        Self::render_interpolated(&post_secrets, ctx)
    }

    /// Secret phase: `{{SECRETS.*}}` is resolved through the configured
    /// provider first. A provider error is a soft failure — logged, and the
    /// original string is returned so downstream fails with a clearer error.
    fn resolve_secrets(s: &str, ctx: &ExecutionContext) -> String {
        if !s.contains("{{SECRETS.") {
            return s.to_string();
        }
        let Some(provider) = ctx.secrets() else {
            return s.to_string();
        };
        match provider.resolve_template(s) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!(error = %err, template = s, "secret template resolution failed");
                s.to_string()
            }
        }
    }

    fn render_interpolated(s: &str, ctx: &ExecutionContext) -> Value {
        let data = Value::Object(ctx.to_map());
        match HANDLEBARS.render_template(s, &data) {
            Ok(rendered) => Value::String(rendered),
            Err(err) => {
                tracing::debug!(error = %err, template = s, "template parse/execute failed; returning input unchanged");
                Value::String(s.to_string())
            }
        }
    }
}

/// Recognizes `.a.b.c` (dotted path) and `index . "k1" "k2" ...` (quoted-key
/// path). Returns `None` when `inner` is neither form.
fn parse_shortcut_path(inner: &str) -> Option<Vec<String>> {
    if let Some(rest) = inner.strip_prefix('.') {
        if rest.is_empty() {
            return Some(Vec::new());
        }
        return Some(rest.split('.').map(str::to_string).collect());
    }
    if let Some(rest) = inner.strip_prefix("index .") {
        let mut segments = Vec::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            if c != '"' {
                continue;
            }
            let mut segment = String::new();
            for next in chars.by_ref() {
                if next == '"' {
                    break;
                }
                segment.push(next);
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return None;
        }
        return Some(segments);
    }
    None
}

/// Traverse `data` as nested mappings along `segments`; `None` if any
/// segment is missing or the current value is not a mapping.
fn traverse(data: &Map<String, Value>, segments: &[String]) -> Option<Value> {
    if segments.is_empty() {
        return Some(Value::Object(data.clone()));
    }
    let mut current = data.get(&segments[0])?.clone();
    for segment in &segments[1..] {
        current = match current {
            Value::Object(ref map) => map.get(segment)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}
