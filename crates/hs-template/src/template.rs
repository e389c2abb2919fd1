//! Template segments, the builder API and the template-language parser.

use hs_types::{is_valid_parameter_name, ParameterKind, SearchSpace, TemplateError};
use serde::{Deserialize, Serialize};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// The syntactic slot a marker fills in the generated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarkerContext {
    /// Any literal is acceptable.
    #[default]
    Any,
    /// A bare numeric literal is required.
    Number,
    /// A string literal is required.
    Text,
    /// A boolean literal is required.
    Bool,
}

impl MarkerContext {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "any" => Some(Self::Any),
            "number" => Some(Self::Number),
            "string" => Some(Self::Text),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Number => "number",
            Self::Text => "string",
            Self::Bool => "bool",
        }
    }

    /// Whether every value `kind` can produce fits this context.
    pub fn accepts(&self, kind: &ParameterKind) -> bool {
        match (self, kind) {
            (Self::Any, _) => true,
            (Self::Number, kind) => kind.is_numeric(),
            (Self::Text, ParameterKind::Choice { values }) => values.iter().all(|v| v.is_string()),
            (Self::Bool, ParameterKind::Choice { values }) => values.iter().all(|v| v.is_boolean()),
            _ => false,
        }
    }
}

/// A named substitution point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub context: MarkerContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Segment {
    Text(String),
    Marker(Marker),
}

/// A parameterized program: literal text interleaved with markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::new()
    }

    /// Parse the template language.
    ///
    /// Markers are written `{{name}}` or `{{name:context}}` where `context` is
    /// one of `any`, `number`, `string` or `bool`. Everything else is literal
    /// text. A literal `{{` can only be produced through [`TemplateBuilder`].
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut builder = TemplateBuilder::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            builder = builder.text(&rest[..start]);
            let body_start = start + OPEN.len();
            let Some(len) = rest[body_start..].find(CLOSE) else {
                return Err(malformed(format!(
                    "unterminated marker at byte {}",
                    offset + start
                )));
            };
            let body = &rest[body_start..body_start + len];
            builder = builder.push_marker(parse_marker(body, offset + start)?);

            let consumed = body_start + len + CLOSE.len();
            rest = &rest[consumed..];
            offset += consumed;
        }

        Ok(builder.text(rest).build())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Markers in template order (repeats included).
    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Marker(m) => Some(m),
            Segment::Text(_) => None,
        })
    }

    /// Static check against a search space: every marker must name a declared
    /// parameter whose kind fits the marker's context.
    pub fn check(&self, space: &SearchSpace) -> Result<(), TemplateError> {
        for marker in self.markers() {
            let Some(spec) = space.get(&marker.name) else {
                return Err(TemplateError::UnresolvedParameter {
                    name: marker.name.clone(),
                });
            };
            if !marker.context.accepts(&spec.kind) {
                return Err(malformed(format!(
                    "marker {} requires a {} literal but its parameter is {}",
                    marker.name,
                    marker.context.as_str(),
                    describe_kind(&spec.kind)
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn literal_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Text(t) => t.len(),
                Segment::Marker(_) => 0,
            })
            .sum()
    }
}

/// Structural template declaration.
#[derive(Debug, Clone, Default)]
pub struct TemplateBuilder {
    segments: Vec<Segment>,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal text, merging with a preceding text segment.
    pub fn text(mut self, text: &str) -> Self {
        if text.is_empty() {
            return self;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
        self
    }

    /// Append a marker accepting any literal.
    pub fn marker(self, name: impl Into<String>) -> Self {
        self.marker_in(name, MarkerContext::Any)
    }

    /// Append a marker restricted to `context`.
    pub fn marker_in(self, name: impl Into<String>, context: MarkerContext) -> Self {
        self.push_marker(Marker {
            name: name.into(),
            context,
        })
    }

    fn push_marker(mut self, marker: Marker) -> Self {
        self.segments.push(Segment::Marker(marker));
        self
    }

    pub fn build(self) -> Template {
        Template {
            segments: self.segments,
        }
    }
}

fn parse_marker(body: &str, at: usize) -> Result<Marker, TemplateError> {
    let (name, context) = match body.split_once(':') {
        Some((name, context)) => {
            let context = context.trim();
            let parsed = MarkerContext::parse(context).ok_or_else(|| {
                malformed(format!("unknown marker context {context:?} at byte {at}"))
            })?;
            (name.trim(), parsed)
        }
        None => (body.trim(), MarkerContext::Any),
    };

    if !is_valid_parameter_name(name) {
        return Err(malformed(format!("invalid marker name {name:?} at byte {at}")));
    }

    Ok(Marker {
        name: name.to_string(),
        context,
    })
}

fn describe_kind(kind: &ParameterKind) -> String {
    match kind {
        ParameterKind::Choice { values } => format!("a choice over {values:?}"),
        ParameterKind::Uniform { low, high } => format!("uniform over [{low}, {high})"),
        ParameterKind::IntRange { low, high } => format!("an integer in [{low}, {high}]"),
        ParameterKind::LogUniform { low, high } => format!("log-uniform over [{low}, {high})"),
    }
}

fn malformed(message: String) -> TemplateError {
    TemplateError::MalformedTemplate { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn marker(name: &str, context: MarkerContext) -> Segment {
        Segment::Marker(Marker {
            name: name.to_string(),
            context,
        })
    }

    #[test]
    fn parses_text_and_markers() {
        let template = Template::parse("Dense({{ units:number }}, activation={{act}})").unwrap();
        assert_eq!(
            template.segments(),
            &[
                Segment::Text("Dense(".into()),
                marker("units", MarkerContext::Number),
                Segment::Text(", activation=".into()),
                marker("act", MarkerContext::Any),
                Segment::Text(")".into()),
            ]
        );
    }

    #[test]
    fn parse_matches_builder() {
        let parsed = Template::parse("f({{x}}) + {{y:bool}}").unwrap();
        let built = Template::builder()
            .text("f(")
            .marker("x")
            .text(") + ")
            .marker_in("y", MarkerContext::Bool)
            .build();
        assert_eq!(parsed, built);
    }

    #[test]
    fn text_without_markers_is_one_segment() {
        let template = Template::parse("model.fit(x, y) }} done").unwrap();
        assert_eq!(template.segments().len(), 1);
        assert_eq!(template.markers().count(), 0);
    }

    #[test]
    fn rejects_malformed_markers() {
        for source in [
            "f({{x)",
            "f({{}})",
            "f({{1x}})",
            "f({{x:float}})",
            "f({{choice(['a', 'b'])}})",
        ] {
            assert!(
                matches!(
                    Template::parse(source),
                    Err(TemplateError::MalformedTemplate { .. })
                ),
                "expected malformed: {source}"
            );
        }
    }

    #[test]
    fn builder_can_emit_literal_braces() {
        let template = Template::builder().text("d = {{").marker("x").text("}}").build();
        assert_eq!(template.markers().count(), 1);
        assert_eq!(template.literal_len(), "d = {{}}".len());
    }

    #[test]
    fn check_reports_undeclared_marker() {
        let space = SearchSpace::new().add_uniform("rate", 0.0, 1.0);
        let template = Template::parse("Dropout({{rate}}), Dense({{width}})").unwrap();
        assert_eq!(
            template.check(&space),
            Err(TemplateError::UnresolvedParameter {
                name: "width".into()
            })
        );
    }

    #[test]
    fn check_enforces_marker_context() {
        let space = SearchSpace::new()
            .add_flag("shuffle")
            .add_choice("act", vec![json!("relu"), json!("sigmoid")])
            .add_choice("width", vec![json!(64), json!(128)])
            .add_uniform("rate", 0.0, 1.0);

        let ok = Template::parse(
            "{{width:number}} {{rate:number}} {{act:string}} {{shuffle:bool}} {{act}}",
        )
        .unwrap();
        assert!(ok.check(&space).is_ok());

        for source in ["{{shuffle:number}}", "{{rate:string}}", "{{width:bool}}"] {
            let template = Template::parse(source).unwrap();
            assert!(matches!(
                template.check(&space),
                Err(TemplateError::MalformedTemplate { .. })
            ));
        }
    }
}
