//! Agent id selection expressions such as `"1-10,!5"`.

use std::collections::BTreeSet;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Invalid selector token '{token}': {reason}")]
    InvalidSelector { token: String, reason: &'static str },
}

/// A parsed selection expression.
///
/// Comma-separated tokens, each an id (`12`), an inclusive range (`2-5`) or
/// either form negated with `!`. Spaces and parentheses are ignored. The
/// match is the union of positive tokens (every present id when there are
/// none) minus the union of negated tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentSelector {
    include: Vec<(i64, i64)>,
    exclude: Vec<(i64, i64)>,
}

impl AgentSelector {
    /// Selects every present id.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let mut selector = Self::default();
        for raw in expression.split(',') {
            let token: String = raw
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
                .collect();
            if token.is_empty() {
                continue;
            }
            let (negated, body) = match token.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, token.as_str()),
            };
            let range = parse_range(body).map_err(|reason| SelectorError::InvalidSelector {
                token: raw.trim().to_string(),
                reason,
            })?;
            if negated {
                selector.exclude.push(range);
            } else {
                selector.include.push(range);
            }
        }
        Ok(selector)
    }

    pub fn has_positive_tokens(&self) -> bool {
        !self.include.is_empty()
    }

    fn included(&self, id: i64) -> bool {
        self.include.is_empty() || self.include.iter().any(|&(a, b)| a <= id && id <= b)
    }

    fn excluded(&self, id: i64) -> bool {
        self.exclude.iter().any(|&(a, b)| a <= id && id <= b)
    }

    pub fn matches(&self, id: i64) -> bool {
        self.included(id) && !self.excluded(id)
    }

    /// The selected ids among `present`. `invert` complements the result
    /// over `present`.
    pub fn select(&self, present: &[i64], invert: bool) -> BTreeSet<i64> {
        present
            .iter()
            .copied()
            .filter(|&id| self.matches(id) != invert)
            .collect()
    }
}

impl FromStr for AgentSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_range(body: &str) -> Result<(i64, i64), &'static str> {
    match body.split_once('-') {
        Some((start, end)) => {
            let start = parse_id(start)?;
            let end = parse_id(end)?;
            if start > end {
                return Err("range start is greater than its end");
            }
            Ok((start, end))
        }
        None => {
            let id = parse_id(body)?;
            Ok((id, id))
        }
    }
}

fn parse_id(text: &str) -> Result<i64, &'static str> {
    if text.is_empty() {
        return Err("missing number");
    }
    text.parse::<i64>().map_err(|_| "not an integer")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(expression: &str, present: &[i64], invert: bool) -> Vec<i64> {
        AgentSelector::parse(expression)
            .unwrap()
            .select(present, invert)
            .into_iter()
            .collect()
    }

    #[test]
    fn test_list() {
        let present: Vec<i64> = (0..30).collect();
        assert_eq!(select("10,15,20", &present, false), vec![10, 15, 20]);
    }

    #[test]
    fn test_range_inclusive() {
        let present: Vec<i64> = (0..30).collect();
        assert_eq!(select("2-5", &present, false), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_negation_only() {
        let present: Vec<i64> = (0..13).collect();
        let expected: Vec<i64> = (0..13).filter(|&i| i != 5 && i != 11).collect();
        assert_eq!(select("!5,!11", &present, false), expected);
    }

    #[test]
    fn test_range_minus_exclusion() {
        let present: Vec<i64> = (0..20).collect();
        assert_eq!(select("1-10,!5", &present, false), vec![1, 2, 3, 4, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_invert_complements() {
        let present = [0, 1, 2, 3];
        assert_eq!(select("1-2", &present, false), vec![1, 2]);
        assert_eq!(select("!1-2", &present, false), vec![0, 3]);
        assert_eq!(select("!1-2", &present, true), vec![1, 2]);
        assert_eq!(select("1-2", &present, true), vec![0, 3]);
    }

    #[test]
    fn test_only_present_ids() {
        assert_eq!(select("1-100", &[3, 50, 200], false), vec![3, 50]);
    }

    #[test]
    fn test_empty_selects_all() {
        assert_eq!(select("", &[4, 2], false), vec![2, 4]);
        assert_eq!(select(" , ", &[4, 2], true), Vec::<i64>::new());
    }

    #[test]
    fn test_spaces_and_parentheses_ignored() {
        assert_eq!(select(" (1 - 3) , !2", &[1, 2, 3, 4], false), vec![1, 3]);
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(matches!(
            AgentSelector::parse("1,abc"),
            Err(SelectorError::InvalidSelector { .. })
        ));
        assert!(AgentSelector::parse("5-2").is_err());
        assert!(AgentSelector::parse("!").is_err());
        assert!(AgentSelector::parse("3-").is_err());
        assert!("7".parse::<AgentSelector>().is_ok());
    }
}
