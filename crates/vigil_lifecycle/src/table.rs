//! State tables
//!
//! A [`StateTable`] decides which [`StateKind`] a component gets for a
//! `(context, key)` pair and which context follows which. Lookups try the
//! exact pair first, then the context with any key, then the key in any
//! context.
//!
//! Tables are built in code or loaded from TOML:
//!
//! ```toml
//! standard = true            # start from the standard table
//!
//! [[state]]
//! context = "Splash"
//! key = "Normal"
//! kind = "Wait"
//! delay_ms = 1500
//! target = { context = "Load", key = "Normal" }
//!
//! [[state]]
//! key = "Maintenance"        # any context
//! kind = "Static"
//!
//! [next]
//! Initial = "Splash"
//! Splash = "ParamValidation"
//! ```

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{LifecycleError, Result};
use crate::id::{contexts, keys, StateId};
use crate::kind::{DelaySource, RequestKind, StateKind, WaitSpec};

/// Matches any context or any key
pub const WILDCARD: &str = "*";

/// Maps `(context, key)` pairs to state kinds
#[derive(Clone, Debug, Default)]
pub struct StateTable {
    states: FxHashMap<StateId, StateKind>,
    next: FxHashMap<String, String>,
}

impl StateTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The table most widgets use
    ///
    /// `Initial → ParamValidation → Load → Normal`, with `Reload` and `Reset`
    /// leading back to `Normal`, and the error, parking and polling keys
    /// available in every context.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table
            .define(contexts::INITIAL, keys::NORMAL, StateKind::Initial)
            .define(
                contexts::PARAM_VALIDATION,
                keys::NORMAL,
                StateKind::ParamValidationTimeout,
            )
            .define(contexts::LOAD, keys::NORMAL, StateKind::Request(RequestKind::Load))
            .define(
                contexts::NORMAL,
                keys::NORMAL,
                StateKind::Request(RequestKind::NormalRequest),
            )
            .define_context(contexts::RELOAD, StateKind::Request(RequestKind::Reload))
            .define_context(contexts::RESET, StateKind::Reset)
            .define_context(contexts::BEFORE_DESTRUCTION, StateKind::BeforeDestruction)
            .define_key(keys::ERROR, StateKind::Error)
            .define_key(keys::NOT_APPLICABLE, StateKind::NotApplicable)
            .define_key(keys::STOP, StateKind::Stop)
            .define_key(keys::STATIC, StateKind::Static)
            .define_key(keys::TEMPORARY, StateKind::Request(RequestKind::Temporary))
            .define_key(keys::DELAY, StateKind::Request(RequestKind::Delay))
            .define_key(
                keys::TRANSIENT_ERROR,
                StateKind::Request(RequestKind::TransientError),
            )
            .define_key(
                keys::NOT_AVAILABLE,
                StateKind::Request(RequestKind::NotAvailable),
            )
            .chain(contexts::INITIAL, contexts::PARAM_VALIDATION)
            .chain(contexts::PARAM_VALIDATION, contexts::LOAD)
            .chain(contexts::LOAD, contexts::NORMAL)
            .chain(contexts::RELOAD, contexts::NORMAL)
            .chain(contexts::RESET, contexts::NORMAL);

        // Terminal keys keep their own state inside the re-entrant contexts
        for context in contexts::REENTRANT {
            table
                .define(context, keys::ERROR, StateKind::Error)
                .define(context, keys::NOT_APPLICABLE, StateKind::NotApplicable)
                .define(context, keys::STOP, StateKind::Stop)
                .define(context, keys::STATIC, StateKind::Static);
        }
        table
    }

    /// Define the state for an exact pair
    pub fn define(&mut self, context: &str, key: &str, kind: StateKind) -> &mut Self {
        self.states.insert(StateId::new(context, key), kind);
        self
    }

    /// Define the state for `key` in any context
    pub fn define_key(&mut self, key: &str, kind: StateKind) -> &mut Self {
        self.define(WILDCARD, key, kind)
    }

    /// Define the state for any key in `context`
    pub fn define_context(&mut self, context: &str, kind: StateKind) -> &mut Self {
        self.define(context, WILDCARD, kind)
    }

    /// Make `to` the context that follows `from`
    pub fn chain(&mut self, from: &str, to: &str) -> &mut Self {
        self.next.insert(from.to_string(), to.to_string());
        self
    }

    /// Kind of the state for `id`
    pub fn resolve(&self, id: &StateId) -> Result<StateKind> {
        let candidates = [
            StateId::new(id.context(), id.key()),
            StateId::new(id.context(), WILDCARD),
            StateId::new(WILDCARD, id.key()),
        ];
        candidates
            .iter()
            .find_map(|candidate| self.states.get(candidate))
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownState {
                context: id.context().to_string(),
                key: id.key().to_string(),
            })
    }

    /// Context that follows `context`
    pub fn next_context(&self, context: &str) -> Result<&str> {
        self.next
            .get(context)
            .map(String::as_str)
            .ok_or_else(|| LifecycleError::NoNextContext(context.to_string()))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Defined pairs, wildcards included, in sorted order
    pub fn entries(&self) -> Vec<(&StateId, &StateKind)> {
        let mut entries: Vec<_> = self.states.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Context chain, in sorted order
    pub fn successors(&self) -> Vec<(&str, &str)> {
        let mut chain: Vec<_> = self
            .next
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        chain.sort();
        chain
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Parse a TOML table definition
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(content)?;
        let mut table = if file.standard {
            Self::standard()
        } else {
            Self::new()
        };

        for entry in file.state {
            let (context, key) = (entry.context.clone(), entry.key.clone());
            if context == WILDCARD && key == WILDCARD {
                return Err(LifecycleError::InvalidTable(format!(
                    "entry for `{}` must name a context or a key",
                    entry.kind
                )));
            }
            let kind = entry.into_kind()?;
            table.define(&context, &key, kind);
        }
        for (from, to) in file.next {
            table.chain(&from, &to);
        }

        tracing::debug!(
            states = table.len(),
            successors = table.next.len(),
            "state table loaded"
        );
        Ok(table)
    }

    /// Load a TOML table definition from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TableFile {
    #[serde(default)]
    standard: bool,
    #[serde(default)]
    state: Vec<EntryFile>,
    #[serde(default)]
    next: FxHashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryFile {
    #[serde(default = "wildcard")]
    context: String,
    #[serde(default = "wildcard")]
    key: String,
    kind: String,
    #[serde(default)]
    target: Option<StateId>,
    #[serde(default)]
    delay_ms: Option<u64>,
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

impl EntryFile {
    fn into_kind(self) -> Result<StateKind> {
        let kind: StateKind = self.kind.parse()?;
        let place = format!("{}/{}", self.context, self.key);

        match kind {
            StateKind::Wait(_) => {
                let delay = self
                    .delay_ms
                    .map(DelaySource::Fixed)
                    .unwrap_or(DelaySource::Zero);
                let spec = match self.target {
                    Some(target) => WaitSpec::to(target, delay),
                    None => WaitSpec::next_context(delay),
                };
                Ok(StateKind::Wait(spec))
            }
            _ if self.delay_ms.is_some() => Err(LifecycleError::InvalidTable(format!(
                "`delay_ms` is only valid for Wait states ({place})"
            ))),
            StateKind::NoAction { .. } => Ok(StateKind::NoAction {
                target: self.target,
            }),
            _ if self.target.is_some() => Err(LifecycleError::InvalidTable(format!(
                "`target` is only valid for Wait and NoAction states ({place})"
            ))),
            kind => Ok(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = StateTable::standard();

        let load = table.resolve(&StateId::new(contexts::LOAD, keys::NORMAL)).unwrap();
        assert_eq!(load.request_kind(), Some(RequestKind::Load));

        // Error keys resolve in every context
        for context in [contexts::LOAD, contexts::NORMAL, "Custom"] {
            let kind = table.resolve(&StateId::new(context, keys::TEMPORARY)).unwrap();
            assert_eq!(kind.request_kind(), Some(RequestKind::Temporary));
        }

        let teardown = table
            .resolve(&StateId::new(contexts::BEFORE_DESTRUCTION, keys::NORMAL))
            .unwrap();
        assert!(matches!(teardown, StateKind::BeforeDestruction));

        // Reload and Reset win over the error keys, but not over terminal ones
        let reload = table
            .resolve(&StateId::new(contexts::RELOAD, keys::TEMPORARY))
            .unwrap();
        assert_eq!(reload.request_kind(), Some(RequestKind::Reload));
        let reset = table
            .resolve(&StateId::new(contexts::RESET, keys::TRANSIENT_ERROR))
            .unwrap();
        assert!(matches!(reset, StateKind::Reset));
        let stop = table
            .resolve(&StateId::new(contexts::RELOAD, keys::STOP))
            .unwrap();
        assert!(matches!(stop, StateKind::Stop));

        assert_eq!(table.next_context(contexts::INITIAL).unwrap(), contexts::PARAM_VALIDATION);
        assert_eq!(table.next_context(contexts::RESET).unwrap(), contexts::NORMAL);
        assert!(matches!(
            table.next_context(contexts::NORMAL),
            Err(LifecycleError::NoNextContext(_))
        ));
    }

    #[test]
    fn test_exact_beats_wildcards() {
        let mut table = StateTable::new();
        table
            .define_key(keys::ERROR, StateKind::Error)
            .define_context("Maintenance", StateKind::Static)
            .define("Maintenance", keys::STOP, StateKind::Stop);

        let stop = table.resolve(&StateId::new("Maintenance", keys::STOP)).unwrap();
        assert!(matches!(stop, StateKind::Stop));

        // Context wildcard wins over key wildcard
        let error = table.resolve(&StateId::new("Maintenance", keys::ERROR)).unwrap();
        assert!(matches!(error, StateKind::Static));

        let error = table.resolve(&StateId::new(contexts::LOAD, keys::ERROR)).unwrap();
        assert!(matches!(error, StateKind::Error));
    }

    #[test]
    fn test_unknown_state() {
        let table = StateTable::standard();
        let err = table
            .resolve(&StateId::new(contexts::NORMAL, "Unheard"))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownState { .. }));
    }

    #[test]
    fn test_from_toml() {
        let table = StateTable::from_toml_str(
            r#"
            standard = true

            [[state]]
            context = "Splash"
            key = "Normal"
            kind = "WaitState"
            delay_ms = 1500
            target = { context = "Load", key = "Normal" }

            [[state]]
            key = "Maintenance"
            kind = "Static"

            [[state]]
            context = "Skip"
            key = "Normal"
            kind = "NoAction"

            [next]
            Initial = "Splash"
            "#,
        )
        .unwrap();

        match table.resolve(&StateId::new("Splash", keys::NORMAL)).unwrap() {
            StateKind::Wait(spec) => {
                assert_eq!(spec.target, Some(StateId::new(contexts::LOAD, keys::NORMAL)));
                assert!(matches!(spec.delay, DelaySource::Fixed(1500)));
            }
            other => panic!("expected a wait state, got {other}"),
        }
        assert!(matches!(
            table.resolve(&StateId::new(contexts::NORMAL, "Maintenance")).unwrap(),
            StateKind::Static
        ));
        assert!(matches!(
            table.resolve(&StateId::new("Skip", keys::NORMAL)).unwrap(),
            StateKind::NoAction { target: None }
        ));
        assert_eq!(table.next_context(contexts::INITIAL).unwrap(), "Splash");
        // Standard entries survive
        assert!(table.resolve(&StateId::new(contexts::LOAD, keys::NORMAL)).is_ok());
    }

    #[test]
    fn test_toml_rejects_abstract_and_misplaced_fields() {
        let abstract_kind = StateTable::from_toml_str(
            r#"
            [[state]]
            context = "Load"
            key = "Normal"
            kind = "RequestState"
            "#,
        );
        assert!(matches!(abstract_kind, Err(LifecycleError::AbstractState(_))));

        let stray_delay = StateTable::from_toml_str(
            r#"
            [[state]]
            context = "Load"
            key = "Normal"
            kind = "Load"
            delay_ms = 10
            "#,
        );
        assert!(matches!(stray_delay, Err(LifecycleError::InvalidTable(_))));

        let all_wildcard = StateTable::from_toml_str(
            r#"
            [[state]]
            kind = "Static"
            "#,
        );
        assert!(matches!(all_wildcard, Err(LifecycleError::InvalidTable(_))));

        let bad_toml = StateTable::from_toml_str("[[state]\nkind=");
        assert!(matches!(bad_toml, Err(LifecycleError::TableParse(_))));
    }
}
