//! Tap ordering: stable sort by `stage`, then a best-effort pass that moves
//! `before`-constrained taps ahead of the taps they name.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapKind {
    Normal,
    Before(Vec<String>),
    Stage(i32),
}

fn stage_of(kind: &TapKind) -> i32 {
    match kind {
        TapKind::Stage(s) => *s,
        _ => 0,
    }
}

/// Returns the indices into `entries` in the order taps should run.
///
/// `entries` is `(name, kind)` in registration order. The sort by stage is
/// stable, so ties keep registration order for free; `before` constraints are
/// then applied as a bounded number of local moves.
pub fn resolve_order(entries: &[(String, TapKind)]) -> Vec<usize> {
    let n = entries.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| stage_of(&entries[i].1));

    for _ in 0..n {
        let mut moved = false;
        'outer: for idx in 0..order.len() {
            let i = order[idx];
            if let TapKind::Before(befores) = &entries[i].1 {
                for scan in (idx + 1)..order.len() {
                    let j = order[scan];
                    if befores.iter().any(|b| b == &entries[j].0) {
                        let val = order.remove(idx);
                        let target = scan - 1;
                        order.insert(target, val);
                        moved = true;
                        break 'outer;
                    }
                }
            }
        }
        if !moved {
            break;
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(order: &[usize], entries: &[(String, TapKind)]) -> Vec<String> {
        order.iter().map(|&i| entries[i].0.clone()).collect()
    }

    #[test]
    fn registration_order_is_preserved_by_default() {
        let entries = vec![
            ("a".to_string(), TapKind::Normal),
            ("b".to_string(), TapKind::Normal),
            ("c".to_string(), TapKind::Normal),
        ];
        assert_eq!(names(&resolve_order(&entries), &entries), vec!["a", "b", "c"]);
    }

    #[test]
    fn lower_stage_runs_first() {
        let entries = vec![
            ("a".to_string(), TapKind::Stage(5)),
            ("b".to_string(), TapKind::Stage(-1)),
            ("c".to_string(), TapKind::Normal),
        ];
        assert_eq!(names(&resolve_order(&entries), &entries), vec!["b", "c", "a"]);
    }

    #[test]
    fn before_moves_a_tap_ahead_of_its_target() {
        let entries = vec![
            ("a".to_string(), TapKind::Normal),
            ("b".to_string(), TapKind::Normal),
            ("c".to_string(), TapKind::Before(vec!["a".to_string()])),
        ];
        assert_eq!(names(&resolve_order(&entries), &entries), vec!["c", "a", "b"]);
    }

    #[test]
    fn before_is_noop_when_target_already_precedes() {
        let entries = vec![
            ("a".to_string(), TapKind::Normal),
            ("b".to_string(), TapKind::Before(vec!["does-not-exist".to_string()])),
        ];
        assert_eq!(names(&resolve_order(&entries), &entries), vec!["a", "b"]);
    }
}
