//! Runtime configuration: knobs read once at bootstrap from the process
//! environment, with an in-process override for tests that can't reasonably
//! fork a new process per `env::set_var` call.

use once_cell::sync::OnceCell;
use std::sync::RwLock;

/// Environment variable controlling [`Config::automerge`]. Named after the
/// source runtime's own `CALI_CALIPER_AUTOMERGE` knob.
const AUTOMERGE_ENV: &str = "CONTEXTRT_AUTOMERGE";

/// Process-wide runtime configuration.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Whether auto-combineable attributes (see
    /// [`crate::attribute::Properties::is_auto_combineable`]) are folded
    /// into shared tree nodes at all. Disabling this is a debugging knob:
    /// every annotation gets its own node, trading away the interning that
    /// makes snapshots cheap in exchange for every node's ancestry matching
    /// its call site one-to-one.
    pub automerge: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config { automerge: read_automerge_env() }
    }
}

fn read_automerge_env() -> bool {
    match std::env::var(AUTOMERGE_ENV) {
        Ok(v) => v != "0" && !v.eq_ignore_ascii_case("false"),
        Err(_) => true,
    }
}

static OVERRIDE: OnceCell<RwLock<Option<Config>>> = OnceCell::new();

/// The effective configuration: the in-process test override if one has
/// been installed via [`set_override`], otherwise a fresh read of the
/// environment.
pub fn current() -> Config {
    let cell = OVERRIDE.get_or_init(|| RwLock::new(None));
    match *cell.read().unwrap() {
        Some(cfg) => cfg,
        None => Config::default(),
    }
}

/// Install an in-process override, bypassing the environment. Intended for
/// tests exercising both `automerge` settings in the same process; not part
/// of the crate's steady-state public API.
#[doc(hidden)]
pub fn set_override(cfg: Config) {
    let cell = OVERRIDE.get_or_init(|| RwLock::new(None));
    *cell.write().unwrap() = Some(cfg);
}

#[doc(hidden)]
pub fn clear_override() {
    let cell = OVERRIDE.get_or_init(|| RwLock::new(None));
    *cell.write().unwrap() = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence_over_environment() {
        set_override(Config { automerge: false });
        assert!(!current().automerge);
        clear_override();
    }
}
