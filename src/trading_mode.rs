//! Process-wide PAPER/LIVE governance (spec §10).
//!
//! Grounded on `original_source/src/web/trading_mode.py::TradingModeManager`. Defaults to PAPER
//! regardless of any persisted prior state — a safety default, not a resumed preference.

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }
}

/// Outcome of a `set_mode` call, mirroring the original's status strings so CLI/API callers can
/// distinguish "already there" from "needs confirmation" from "switched".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSwitchOutcome {
    AlreadyInMode,
    ConfirmationRequired,
    Switched { previous: &'static str },
}

type ModeChangeCallback = Box<dyn Fn(TradingMode, TradingMode) + Send + Sync>;

pub struct TradingModeManager {
    current: Mutex<TradingMode>,
    callbacks: Mutex<Vec<ModeChangeCallback>>,
}

impl Default for TradingModeManager {
    fn default() -> Self {
        info!("trading mode manager initialized, default mode PAPER");
        Self { current: Mutex::new(TradingMode::Paper), callbacks: Mutex::new(Vec::new()) }
    }
}

impl TradingModeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mode(&self) -> TradingMode {
        *self.current.lock()
    }

    pub fn is_paper_mode(&self) -> bool {
        self.get_mode() == TradingMode::Paper
    }

    pub fn is_live_mode(&self) -> bool {
        self.get_mode() == TradingMode::Live
    }

    /// Switching to LIVE requires `user_confirmation`; switching back to PAPER never does.
    pub fn set_mode(&self, new_mode: TradingMode, user_confirmation: bool) -> ModeSwitchOutcome {
        let mut current = self.current.lock();
        if *current == new_mode {
            return ModeSwitchOutcome::AlreadyInMode;
        }

        if new_mode == TradingMode::Live && !user_confirmation {
            return ModeSwitchOutcome::ConfirmationRequired;
        }

        let old_mode = *current;
        *current = new_mode;
        drop(current);

        warn!("trading mode switched: {} -> {}", old_mode.as_str(), new_mode.as_str());
        for callback in self.callbacks.lock().iter() {
            callback(old_mode, new_mode);
        }

        ModeSwitchOutcome::Switched { previous: old_mode.as_str() }
    }

    pub fn register_mode_change_callback(&self, callback: ModeChangeCallback) {
        self.callbacks.lock().push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn defaults_to_paper() {
        let manager = TradingModeManager::new();
        assert!(manager.is_paper_mode());
    }

    #[test]
    fn live_switch_without_confirmation_is_rejected() {
        let manager = TradingModeManager::new();
        let outcome = manager.set_mode(TradingMode::Live, false);
        assert_eq!(outcome, ModeSwitchOutcome::ConfirmationRequired);
        assert!(manager.is_paper_mode());
    }

    #[test]
    fn live_switch_with_confirmation_succeeds_and_fires_callback() {
        let manager = TradingModeManager::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        manager.register_mode_change_callback(Box::new(move |_old, _new| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let outcome = manager.set_mode(TradingMode::Live, true);
        assert!(matches!(outcome, ModeSwitchOutcome::Switched { .. }));
        assert!(manager.is_live_mode());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn switching_back_to_paper_never_requires_confirmation() {
        let manager = TradingModeManager::new();
        manager.set_mode(TradingMode::Live, true);
        let outcome = manager.set_mode(TradingMode::Paper, false);
        assert!(matches!(outcome, ModeSwitchOutcome::Switched { .. }));
    }
}
