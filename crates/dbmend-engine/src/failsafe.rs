//! Mass-deletion failsafe
//!
//! A detection query that suddenly matches a large part of a table is far
//! more likely to be a bug (or a misconfigured module) than real corruption.
//! Before deleting, a module compares its candidate count to the size of a
//! reference population and refuses to touch anything when the candidates
//! exceed `ratio * population`.

use dbmend_store::{Ident, Session, StoreError};
use std::fmt;

/// Result of a failsafe check
#[derive(Debug, Clone, PartialEq)]
pub enum FailsafeVerdict {
    Allowed,
    Refused {
        candidates: usize,
        population: i64,
        limit: f64,
    },
}

impl FailsafeVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl fmt::Display for FailsafeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Refused {
                candidates,
                population,
                limit,
            } => write!(
                f,
                "failsafe tripped: {} candidates out of {} rows exceeds the limit of {}",
                candidates, population, limit
            ),
        }
    }
}

/// Threshold on the fraction of a population one run may delete
#[derive(Debug, Clone, PartialEq)]
pub struct Failsafe {
    ratio: f64,
    population: Ident,
}

impl Failsafe {
    pub fn new(ratio: f64, population: Ident) -> Self {
        Self { ratio, population }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn population_table(&self) -> &Ident {
        &self.population
    }

    /// Pure threshold comparison
    pub fn evaluate(&self, candidates: usize, population: i64) -> FailsafeVerdict {
        let limit = self.ratio * population as f64;
        if candidates == 0 || candidates as f64 <= limit {
            FailsafeVerdict::Allowed
        } else {
            FailsafeVerdict::Refused {
                candidates,
                population,
                limit,
            }
        }
    }

    /// Count the population and evaluate
    pub async fn check(&self, session: &Session, candidates: usize) -> Result<FailsafeVerdict, StoreError> {
        if candidates == 0 {
            return Ok(FailsafeVerdict::Allowed);
        }
        let b = session.builder();
        let mut stmt = b.statement();
        stmt.push_sql("SELECT COUNT(*) FROM ").push_sql(&b.table(&self.population));
        let population = session.query_int(&stmt).await?;
        Ok(self.evaluate(candidates, population))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failsafe(ratio: f64) -> Failsafe {
        Failsafe::new(ratio, Ident::new("relationships").unwrap())
    }

    #[test]
    fn trips_above_ratio() {
        let verdict = failsafe(0.5).evaluate(60, 100);
        assert!(!verdict.is_allowed());
        assert!(verdict.to_string().contains("60 candidates out of 100"));
    }

    #[test]
    fn allows_at_or_below_ratio() {
        assert!(failsafe(0.5).evaluate(40, 100).is_allowed());
        assert!(failsafe(0.5).evaluate(50, 100).is_allowed());
        assert!(failsafe(1.0).evaluate(100, 100).is_allowed());
    }

    #[test]
    fn nothing_to_delete_is_always_allowed() {
        assert!(failsafe(0.5).evaluate(0, 0).is_allowed());
    }

    #[test]
    fn empty_population_refuses_candidates() {
        assert!(!failsafe(0.5).evaluate(1, 0).is_allowed());
    }
}
