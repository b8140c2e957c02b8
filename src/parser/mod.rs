//! Record parser built around one composite regular expression.
//!
//! Every term definition contributes an alternative; a position table maps
//! each capture group back to the definition that owns it, so a successful
//! match can be handed to the right builder with only that definition's
//! groups in view.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::{debug, trace};

use crate::core::SpfError;
use crate::core::grammar::QUALIFIER;
use crate::terms::{
    Directive, MatcherConfiguration, Modifier, Qualifier, SpfRecord, Term, TermDefinition,
    mechanism_definitions, modifier_definitions,
};

const SPF_VERSION: &str = "v=spf1";

static GRAMMAR: LazyLock<Grammar> = LazyLock::new(Grammar::build);

struct Grammar {
    term: Regex,
    definitions: Vec<TermDefinition>,
    /// Owning definition index for every capture group, `None` for structural groups.
    positions: Vec<Option<usize>>,
    modifier_pos: usize,
    qualifier_pos: usize,
    mechanism_pos: usize,
}

impl Grammar {
    fn build() -> Self {
        let modifiers = modifier_definitions();
        let mechanisms = mechanism_definitions();

        let modifier_regex = format!("({})", alternation(&modifiers));
        let directive_regex = format!("({QUALIFIER}?)({})", alternation(&mechanisms));
        let pattern = format!("^(?:{modifier_regex}|{directive_regex})$");

        let mut positions = vec![None];
        let modifier_pos = positions.len();
        positions.push(None);
        let mut definitions = Vec::with_capacity(modifiers.len() + mechanisms.len());
        for definition in modifiers {
            push_definition(&mut positions, &mut definitions, definition);
        }
        let qualifier_pos = positions.len();
        positions.push(None);
        let mechanism_pos = positions.len();
        positions.push(None);
        for definition in mechanisms {
            push_definition(&mut positions, &mut definitions, definition);
        }

        let term = Regex::new(&pattern).expect("SPF term grammar compiles");
        debug_assert_eq!(term.captures_len(), positions.len());
        debug!(groups = positions.len(), "compiled SPF term grammar");

        Self {
            term,
            definitions,
            positions,
            modifier_pos,
            qualifier_pos,
            mechanism_pos,
        }
    }

    /// Finds the first participating group after `start` and builds its term.
    fn create_term(&self, captures: &Captures<'_>, start: usize) -> Result<Term, SpfError> {
        for index in start + 1..captures.len() {
            if index == self.qualifier_pos || captures.get(index).is_none() {
                continue;
            }
            if let Some(Some(owner)) = self.positions.get(index) {
                let definition = &self.definitions[*owner];
                trace!(term = definition.name(), group = index, "matched term");
                let config = MatcherConfiguration::new(captures, index, definition.match_size());
                return definition.build(&config);
            }
        }
        Err(SpfError::perm(format!(
            "Unknown term: {}",
            captures.get(0).map(|m| m.as_str()).unwrap_or_default()
        )))
    }
}

/// Each definition owns one wrapper group plus its own groups.
fn push_definition(
    positions: &mut Vec<Option<usize>>,
    definitions: &mut Vec<TermDefinition>,
    definition: TermDefinition,
) {
    let owner = definitions.len();
    positions.push(Some(owner));
    for _ in 0..definition.match_size() {
        positions.push(Some(owner));
    }
    definitions.push(definition);
}

fn alternation(definitions: &[TermDefinition]) -> String {
    let alternatives: Vec<String> = definitions
        .iter()
        .map(|definition| format!("({})", definition.pattern()))
        .collect();
    format!("(?:{})", alternatives.join("|"))
}

/// True when `record` announces SPF version 1.
pub fn is_spf1_record(record: &str) -> bool {
    let lower = record.trim_start().to_ascii_lowercase();
    lower == SPF_VERSION || lower.starts_with(&format!("{SPF_VERSION} "))
}

/// Turns record text into an [`SpfRecord`].
///
/// The grammar is compiled once per process and shared; the parser itself
/// carries no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordParser;

impl RecordParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses a TXT/SPF record.
    ///
    /// Returns [`SpfError::None`] when the text is not an SPF version 1
    /// record, [`SpfError::Neutral`] for a bare `v=spf1` and
    /// [`SpfError::PermError`] for any syntax error.
    pub fn parse(&self, record: &str) -> Result<SpfRecord, SpfError> {
        let grammar = &*GRAMMAR;
        let trimmed = record.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower == SPF_VERSION {
            return Err(SpfError::neutral("Empty SPF Record"));
        }
        if !lower.starts_with(&format!("{SPF_VERSION} ")) {
            return Err(SpfError::none(format!("No valid SPF Record: {record}")));
        }

        let mut directives = Vec::new();
        let mut modifiers: Vec<Modifier> = Vec::new();
        for text in trimmed[SPF_VERSION.len()..].split(' ').filter(|t| !t.is_empty()) {
            let captures = grammar
                .term
                .captures(text)
                .ok_or_else(|| SpfError::perm(format!("Term [{text}] is not syntactically valid")))?;

            if captures.get(grammar.modifier_pos).is_some() {
                let Term::Modifier(modifier) = grammar.create_term(&captures, grammar.modifier_pos)?
                else {
                    return Err(SpfError::perm(format!("Unknown modifier: {text}")));
                };
                if modifier.is_single_instance()
                    && modifiers.iter().any(|existing| existing.same_kind(&modifier))
                {
                    return Err(SpfError::perm(format!(
                        "More than one {} found in SPF-Record",
                        modifier.name()
                    )));
                }
                modifiers.push(modifier);
            } else {
                let prefix = captures
                    .get(grammar.qualifier_pos)
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let qualifier = Qualifier::from_prefix(prefix)
                    .ok_or_else(|| SpfError::perm(format!("Invalid qualifier: {prefix}")))?;
                let Term::Mechanism(mechanism) =
                    grammar.create_term(&captures, grammar.mechanism_pos)?
                else {
                    return Err(SpfError::perm(format!("Unknown mechanism: {text}")));
                };
                directives.push(Directive::new(qualifier, mechanism));
            }
        }

        Ok(SpfRecord::new(directives, modifiers))
    }
}
