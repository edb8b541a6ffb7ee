//! Rule persistence.

pub mod rule_file;

pub use rule_file::YamlRuleFile;

use crate::error::RulesError;
use crate::pipeline::types::RuleSet;

/// Loads and saves the whole rule set.
pub trait RuleStore {
    /// The stored rules, or `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<RuleSet>, RulesError>;

    /// Replace the stored rules. Readers never observe a partial write.
    fn save(&self, rules: &RuleSet) -> Result<(), RulesError>;
}
