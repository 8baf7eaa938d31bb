//! Template rules, modes and the conflict policy.
//!
//! Each mode keeps its rules in rank order: import precedence first, then
//! priority, then declaration order. Matching walks the chain from the
//! highest rank; what happens when several rules of the same rank match
//! is governed by the recovery policy.

use tracing::warn;

use crate::error::{Error, ErrorCode};
use crate::expr::ExprId;
use crate::model::{NodeInfo, QName};
use crate::pattern::Pattern;

/// Index of a template in the executable's template table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(pub usize);

/// A compiled template: the body expression plus the frame size its local
/// variables need. Named templates are callable; templates with a match
/// pattern participate in their mode's rule chain (one template can be
/// both).
#[derive(Debug, Clone)]
pub struct Template {
    pub name: Option<QName>,
    pub body: ExprId,
    pub slot_count: usize,
}

/// What to do when several template rules of equal precedence and
/// priority match the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    /// Report the ambiguity as an error.
    DoNotRecover,
    /// Pick the last declared rule and emit a warning.
    RecoverWithWarnings,
    /// Pick the last declared rule silently.
    RecoverSilently,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Pattern,
    pub template: TemplateId,
    pub precedence: i32,
    pub priority: f64,
    /// Declaration sequence number, the final tiebreak.
    pub sequence: usize,
}

impl Rule {
    fn outranks(&self, other: &Rule) -> bool {
        (self.precedence, self.priority) > (other.precedence, other.priority)
    }

    fn same_rank(&self, other: &Rule) -> bool {
        self.precedence == other.precedence && self.priority == other.priority
    }
}

/// One mode's rule chain.
#[derive(Debug, Default, Clone)]
pub struct Mode {
    rules: Vec<Rule>,
}

impl Mode {
    pub fn add_rule(&mut self, pattern: Pattern, template: TemplateId, precedence: i32, priority: Option<f64>) {
        let priority = priority.unwrap_or_else(|| pattern.default_priority());
        let sequence = self.rules.len();
        self.rules.push(Rule {
            pattern,
            template,
            precedence,
            priority,
            sequence,
        });
        // Highest rank first; later declarations win ties, so within a
        // rank the most recent comes first.
        self.rules.sort_by(|a, b| {
            (b.precedence, b.priority)
                .partial_cmp(&(a.precedence, a.priority))
                .unwrap_or(core::cmp::Ordering::Equal)
                .then(b.sequence.cmp(&a.sequence))
        });
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find the rule for `node`, applying the ambiguity policy when more
    /// than one rule of the winning rank matches.
    pub fn match_rule<N: NodeInfo>(
        &self,
        node: &N,
        policy: RecoveryPolicy,
    ) -> Result<Option<&Rule>, Error> {
        let mut winner: Option<&Rule> = None;
        for rule in &self.rules {
            if let Some(w) = winner {
                if w.outranks(rule) || !w.same_rank(rule) {
                    break;
                }
            }
            if !rule.pattern.matches(node) {
                continue;
            }
            match winner {
                None => winner = Some(rule),
                Some(w) => {
                    // Same rank, both match: the chain is ordered so `w`
                    // is the later declaration.
                    match policy {
                        RecoveryPolicy::DoNotRecover => {
                            return Err(Error::dynamic(
                                ErrorCode::XTRE0540,
                                format!(
                                    "ambiguous rule match for {:?} (two rules with priority {})",
                                    node, w.priority
                                ),
                            ));
                        }
                        RecoveryPolicy::RecoverWithWarnings => {
                            warn!(
                                priority = w.priority,
                                "ambiguous rule match; choosing the last declared rule"
                            );
                            return Ok(Some(w));
                        }
                        RecoveryPolicy::RecoverSilently => return Ok(Some(w)),
                    }
                }
            }
        }
        Ok(winner)
    }
}
