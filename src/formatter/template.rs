use crate::error::TemplateError;
use std::str::FromStr;

/// A value a template can refer to with `{{.Name}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Timestamp,
    Level,
    User,
    Pid,
    Line,
}

impl Field {
    fn from_action(action: &str) -> Result<Self, TemplateError> {
        match action.strip_prefix('.') {
            Some("Timestamp") => Ok(Field::Timestamp),
            Some("Level") => Ok(Field::Level),
            Some("User") => Ok(Field::User),
            Some("PID") => Ok(Field::Pid),
            Some("Line") => Ok(Field::Line),
            _ => Err(TemplateError::UnknownField {
                name: action.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// Values substituted into a [PrefixTemplate].
#[derive(Debug, Clone, Copy)]
pub(crate) struct TemplateData<'a> {
    pub timestamp: &'a str,
    pub level: &'a str,
    pub user: &'a str,
    pub pid: &'a str,
    pub line: &'a str,
}

/// A parsed prefix template such as `[{{.Timestamp}}] [{{.Level}}] `.
///
/// Actions are written as `{{.Name}}`, whitespace inside the braces is ignored. Known names are
/// `Timestamp`, `Level`, `User`, `PID` and `Line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixTemplate {
    segments: Vec<Segment>,
}

impl PrefixTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let action = &rest[start + 2..];
            let Some(end) = action.find("}}") else {
                return Err(TemplateError::UnclosedAction {
                    position: offset + start,
                });
            };
            segments.push(Segment::Field(Field::from_action(action[..end].trim())?));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub(crate) fn render_into(&self, data: &TemplateData<'_>, out: &mut String) {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::Timestamp) => out.push_str(data.timestamp),
                Segment::Field(Field::Level) => out.push_str(data.level),
                Segment::Field(Field::User) => out.push_str(data.user),
                Segment::Field(Field::Pid) => out.push_str(data.pid),
                Segment::Field(Field::Line) => out.push_str(data.line),
            }
        }
    }
}

impl FromStr for PrefixTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
