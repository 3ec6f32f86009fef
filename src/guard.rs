use crate::action::{Action, ActionKind, HistoryEntry};

/// Detects the model stalling on the same action.
#[derive(Clone, Debug)]
pub struct RepeatGuard {
    /// Occurrences (including the candidate) that count as a stall.
    pub threshold: usize,
    /// How many trailing executed entries are inspected.
    pub window: usize,
    /// Per-axis slack when comparing normalized pointer coordinates.
    pub tolerance: f64,
}

impl Default for RepeatGuard {
    fn default() -> Self {
        Self { threshold: 3, window: 6, tolerance: 0.01 }
    }
}

impl RepeatGuard {
    pub fn should_stop(&self, history: &[HistoryEntry], candidate: &Action) -> Option<String> {
        if matches!(candidate.kind, ActionKind::Done | ActionKind::Unknown(_)) {
            return None;
        }
        let repeats = history
            .iter()
            .filter_map(HistoryEntry::executed)
            .rev()
            .take(self.window)
            .filter(|prev| self.same_action(prev, candidate))
            .count();
        if repeats + 1 >= self.threshold {
            Some(format!(
                "repeat-guard: {} issued {} times within the last {} steps",
                describe(candidate),
                repeats + 1,
                self.window
            ))
        } else {
            None
        }
    }

    fn same_action(&self, a: &Action, b: &Action) -> bool {
        if a.kind != b.kind {
            return false;
        }
        match a.kind {
            ActionKind::Click | ActionKind::DoubleClick | ActionKind::RightClick => {
                self.near(a.x, b.x) && self.near(a.y, b.y)
            }
            ActionKind::Type => a.text == b.text,
            ActionKind::Press => eq_ignore_case(a.key.as_deref(), b.key.as_deref()),
            ActionKind::Hotkey => {
                a.keys.len() == b.keys.len()
                    && a.keys.iter().zip(&b.keys).all(|(l, r)| l.eq_ignore_ascii_case(r))
            }
            ActionKind::Scroll => a.amount == b.amount,
            // Repeated waiting is stagnation too.
            ActionKind::Wait | ActionKind::Noop => true,
            ActionKind::Done | ActionKind::Unknown(_) => false,
        }
    }

    fn near(&self, a: Option<f64>, b: Option<f64>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => (a - b).abs() <= self.tolerance,
            _ => false,
        }
    }
}

fn eq_ignore_case(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

fn describe(action: &Action) -> String {
    match (&action.kind, action.x, action.y) {
        (kind, Some(x), Some(y)) if kind.is_pointer() => format!("{kind}({x:.3}, {y:.3})"),
        (ActionKind::Type, _, _) => format!("TYPE({:?})", action.text.as_deref().unwrap_or("")),
        (kind, _, _) => kind.to_string(),
    }
}
