//! # Field Directives
//!
//! Parses the directive DSL that controls how records are fragmented
//! into hashable field groups:
//!
//! ```text
//! directive := group ( ';' group )*
//! group     := [ '&' ] field ( ',' field )*
//! field     := NAME [ '%' DIGITS ]
//! ```
//!
//! `&` marks a whole group as required (never deleted by the group-level
//! neighborhood); `%N` requests a string deletion neighborhood of depth
//! `N` for that field's value. Several directive strings combine as OR
//! alternatives.

use crate::error::Error;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One field inside a group, with its string-expansion depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Depth of the character-deletion neighborhood applied to this
    /// field's value before fingerprinting.
    pub expand: u32,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, expand: u32) -> Self {
        Self {
            name: name.into(),
            expand,
        }
    }
}

/// A comma-separated tuple of fields hashed together as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    /// Required groups survive every group-level deletion.
    pub required: bool,
    pub fields: Vec<FieldSpec>,
}

/// One directive string, parsed: an ordered list of field groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub groups: Vec<FieldGroup>,
}

impl Alternative {
    /// Every distinct field name referenced by this alternative, in
    /// first-appearance order.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for group in &self.groups {
            for field in &group.fields {
                if !names.contains(&field.name.as_str()) {
                    names.push(field.name.as_str());
                }
            }
        }
        names
    }
}

/// Parsed, normalised form of the directive input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub alternatives: Vec<Alternative>,
}

impl Plan {
    /// Parse one or more directive strings into an OR-combined plan.
    pub fn parse<I, S>(directives: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut alternatives = Vec::new();
        for directive in directives {
            alternatives.push(parse_alternative(directive.as_ref())?);
        }
        if alternatives.is_empty() {
            return Err(Error::DirectiveEmpty.into());
        }
        Ok(Self { alternatives })
    }

    /// Parse a single directive string into a one-alternative plan.
    pub fn parse_one(directive: &str) -> Result<Self> {
        Self::parse([directive])
    }
}

fn parse_alternative(directive: &str) -> Result<Alternative> {
    // Whitespace carries no meaning anywhere in the DSL.
    let text: String = directive.chars().filter(|c| !c.is_whitespace()).collect();

    let mut groups = Vec::new();
    for group_text in text.split(';') {
        groups.push(parse_group(group_text)?);
    }

    let mut alternative = Alternative { groups };
    normalize_expansions(&mut alternative);
    Ok(alternative)
}

fn parse_group(group_text: &str) -> Result<FieldGroup> {
    let (required, body) = match group_text.strip_prefix('&') {
        Some(rest) => (true, rest),
        None => (false, group_text),
    };

    if body.contains('&') {
        return Err(Error::DirectiveSyntax(format!(
            "required indicator on individual field in group '{}'",
            group_text
        ))
        .into());
    }
    if body.is_empty() {
        return Err(Error::DirectiveSyntax("empty group".to_string()).into());
    }

    let mut fields = Vec::new();
    for field_text in body.split(',') {
        fields.push(parse_field(field_text)?);
    }
    Ok(FieldGroup { required, fields })
}

fn parse_field(field_text: &str) -> Result<FieldSpec> {
    let (name, expand) = match field_text.split_once('%') {
        Some((name, digits)) => {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::DirectiveSyntax(format!(
                    "expansion depth must be decimal digits in field '{}'",
                    field_text
                ))
                .into());
            }
            let depth: u32 = digits
                .parse()
                .map_err(|_| Error::InvalidEditDistance(format!("'{}' overflows", digits)))?;
            (name, depth)
        }
        None => (field_text, 0),
    };

    if name.is_empty() {
        return Err(Error::DirectiveSyntax("empty field name".to_string()).into());
    }
    Ok(FieldSpec::new(name, expand))
}

/// A field name repeated across groups of the same alternative gets the
/// maximum of its requested expansion depths, at every occurrence.
fn normalize_expansions(alternative: &mut Alternative) {
    let mut max_expand: Vec<(String, u32)> = Vec::new();
    for group in &alternative.groups {
        for field in &group.fields {
            match max_expand.iter_mut().find(|(name, _)| *name == field.name) {
                Some((_, depth)) => *depth = (*depth).max(field.expand),
                None => max_expand.push((field.name.clone(), field.expand)),
            }
        }
    }
    for group in &mut alternative.groups {
        for field in &mut group.fields {
            if let Some((_, depth)) = max_expand.iter().find(|(name, _)| *name == field.name) {
                field.expand = *depth;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_err(result: Result<Plan>) -> bool {
        matches!(
            result.unwrap_err().downcast_ref::<Error>(),
            Some(Error::DirectiveSyntax(_))
        )
    }

    #[test]
    fn parses_groups_fields_and_flags() {
        let plan = Plan::parse_one("&postal;fname%1,lname;city").unwrap();
        assert_eq!(plan.alternatives.len(), 1);
        let groups = &plan.alternatives[0].groups;
        assert_eq!(groups.len(), 3);
        assert!(groups[0].required);
        assert_eq!(groups[0].fields, vec![FieldSpec::new("postal", 0)]);
        assert!(!groups[1].required);
        assert_eq!(
            groups[1].fields,
            vec![FieldSpec::new("fname", 1), FieldSpec::new("lname", 0)]
        );
        assert_eq!(groups[2].fields, vec![FieldSpec::new("city", 0)]);
    }

    #[test]
    fn strips_whitespace_before_parsing() {
        let spaced = Plan::parse_one("  &postal ; fname %1 , lname ").unwrap();
        let compact = Plan::parse_one("&postal;fname%1,lname").unwrap();
        assert_eq!(spaced, compact);
    }

    #[test]
    fn repeated_field_takes_max_expansion() {
        let plan = Plan::parse_one("fname%2,lname;fname%1;city").unwrap();
        let groups = &plan.alternatives[0].groups;
        assert_eq!(groups[0].fields[0].expand, 2);
        assert_eq!(groups[1].fields[0].expand, 2);
    }

    #[test]
    fn multiple_directives_become_alternatives() {
        let plan = Plan::parse(["fname;lname", "lname;city"]).unwrap();
        assert_eq!(plan.alternatives.len(), 2);
        assert_eq!(plan.alternatives[1].field_names(), vec!["lname", "city"]);
    }

    #[test]
    fn rejects_required_indicator_mid_group() {
        assert!(syntax_err(Plan::parse_one("fname,&lname")));
        assert!(syntax_err(Plan::parse_one("&fname,&lname")));
    }

    #[test]
    fn rejects_empty_groups_and_names() {
        assert!(syntax_err(Plan::parse_one("")));
        assert!(syntax_err(Plan::parse_one("fname;;lname")));
        assert!(syntax_err(Plan::parse_one("fname,,lname")));
        assert!(syntax_err(Plan::parse_one("&")));
        assert!(syntax_err(Plan::parse_one("%2")));
    }

    #[test]
    fn rejects_non_digit_expansion() {
        assert!(syntax_err(Plan::parse_one("fname%x")));
        assert!(syntax_err(Plan::parse_one("fname%")));
        assert!(syntax_err(Plan::parse_one("fname%1a")));
    }

    #[test]
    fn zero_alternatives_is_its_own_error() {
        let err = Plan::parse(Vec::<&str>::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DirectiveEmpty)
        ));
    }
}
