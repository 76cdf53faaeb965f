//! Pin piece version ranges in a flow version to concrete versions.
//!
//! Steps reference pieces through `settings.pieceName` and
//! `settings.pieceVersion`. Workers must execute exactly the same piece code
//! on every run, so ranges (`^1.2.0`, `~1.2.0`) are resolved against the
//! catalogue before a version is handed out.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CoreResult;
use crate::flow::{FlowVersion, FlowVersionState};
use crate::store::PieceRegistry;

/// A (piece name, version or range) reference found in a flow graph.
pub type PieceRef = (String, String);

type SemVer = (u64, u64, u64);

fn parse_version(raw: &str) -> Option<SemVer> {
    let core = raw.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    Some((major, minor, patch))
}

/// Resolve one range against the published versions of a piece.
///
/// `^x.y.z` keeps the major, `~x.y.z` keeps major.minor, anything else is
/// taken as exact. Unresolvable ranges pin to their own base version.
pub fn resolve_range(range: &str, available: &[String]) -> String {
    let (prefix, base_raw) = match range.chars().next() {
        Some(c @ ('^' | '~')) => (Some(c), &range[1..]),
        _ => (None, range),
    };
    let Some(base) = parse_version(base_raw) else {
        return base_raw.to_string();
    };

    let compatible = |v: SemVer| match prefix {
        Some('^') => v.0 == base.0 && v >= base,
        Some('~') => v.0 == base.0 && v.1 == base.1 && v >= base,
        _ => v == base,
    };

    available
        .iter()
        .filter_map(|raw| parse_version(raw).map(|v| (v, raw)))
        .filter(|(v, _)| compatible(*v))
        .max_by_key(|(v, _)| *v)
        .map(|(_, raw)| raw.clone())
        .unwrap_or_else(|| base_raw.to_string())
}

/// Collect every piece reference in a step graph.
pub fn collect_piece_refs(node: &serde_json::Value) -> BTreeSet<PieceRef> {
    let mut refs = BTreeSet::new();
    walk(node, &mut refs);
    refs
}

fn walk(node: &serde_json::Value, refs: &mut BTreeSet<PieceRef>) {
    match node {
        serde_json::Value::Object(map) => {
            if let Some(piece) = piece_ref(node) {
                refs.insert(piece);
            }
            for value in map.values() {
                walk(value, refs);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                walk(item, refs);
            }
        }
        _ => {}
    }
}

fn piece_ref(node: &serde_json::Value) -> Option<PieceRef> {
    let settings = node.get("settings")?;
    let name = settings.get("pieceName")?.as_str()?;
    let version = settings.get("pieceVersion")?.as_str()?;
    Some((name.to_string(), version.to_string()))
}

/// Rewrite every `settings.pieceVersion` according to `locked`.
pub fn apply_locked_versions(node: &mut serde_json::Value, locked: &BTreeMap<PieceRef, String>) {
    if let Some(pinned) = piece_ref(node).and_then(|key| locked.get(&key)) {
        if let Some(settings) = node.get_mut("settings").and_then(|s| s.as_object_mut()) {
            settings.insert(
                "pieceVersion".to_string(),
                serde_json::Value::String(pinned.clone()),
            );
        }
    }
    match node {
        serde_json::Value::Object(map) => {
            for value in map.values_mut() {
                apply_locked_versions(value, locked);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                apply_locked_versions(item, locked);
            }
        }
        _ => {}
    }
}

/// Return `version` with every piece pinned and its state set to LOCKED.
pub async fn lock_piece_versions(
    mut version: FlowVersion,
    registry: &dyn PieceRegistry,
) -> CoreResult<FlowVersion> {
    let mut locked = BTreeMap::new();
    for (name, range) in collect_piece_refs(&version.trigger) {
        let available = registry.versions(&name).await?;
        let pinned = resolve_range(&range, &available);
        locked.insert((name, range), pinned);
    }
    apply_locked_versions(&mut version.trigger, &locked);
    version.state = FlowVersionState::Locked;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalogue() -> Vec<String> {
        ["0.3.0", "0.3.4", "0.4.1", "1.0.0", "1.2.3", "1.9.0", "2.0.0"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn caret_keeps_major() {
        assert_eq!(resolve_range("^1.0.0", &catalogue()), "1.9.0");
    }

    #[test]
    fn tilde_keeps_minor() {
        assert_eq!(resolve_range("~0.3.0", &catalogue()), "0.3.4");
    }

    #[test]
    fn exact_stays_exact() {
        assert_eq!(resolve_range("1.2.3", &catalogue()), "1.2.3");
    }

    #[test]
    fn unresolvable_range_pins_to_base() {
        assert_eq!(resolve_range("^3.1.0", &catalogue()), "3.1.0");
    }

    #[test]
    fn collects_nested_steps() {
        let trigger = serde_json::json!({
            "name": "trigger",
            "settings": { "pieceName": "webhook", "pieceVersion": "~0.3.0" },
            "nextAction": {
                "name": "step_1",
                "settings": { "pieceName": "slack", "pieceVersion": "^1.0.0" },
                "onSuccessAction": {
                    "name": "step_2",
                    "settings": { "pieceName": "slack", "pieceVersion": "^1.0.0" }
                }
            }
        });
        let refs = collect_piece_refs(&trigger);
        assert_eq!(refs.len(), 2);

        let mut locked = BTreeMap::new();
        locked.insert(("slack".to_string(), "^1.0.0".to_string()), "1.9.0".to_string());
        locked.insert(("webhook".to_string(), "~0.3.0".to_string()), "0.3.4".to_string());
        let mut trigger = trigger;
        apply_locked_versions(&mut trigger, &locked);

        assert_eq!(trigger["settings"]["pieceVersion"], "0.3.4");
        assert_eq!(trigger["nextAction"]["settings"]["pieceVersion"], "1.9.0");
        assert_eq!(
            trigger["nextAction"]["onSuccessAction"]["settings"]["pieceVersion"],
            "1.9.0"
        );
    }

    #[tokio::test]
    async fn locking_pins_versions_and_marks_locked() {
        let registry = crate::memory::InMemoryPieceRegistry::new();
        for v in ["1.0.0", "1.4.2", "2.0.0"] {
            registry.publish("gmail", v).await;
        }
        let now = chrono::Utc::now();
        let version = FlowVersion {
            id: 1,
            flow_id: 1,
            display_name: "Send mail".into(),
            trigger: serde_json::json!({
                "settings": { "pieceName": "gmail", "pieceVersion": "^1.0.0" }
            }),
            state: FlowVersionState::Draft,
            created_at: now,
            updated_at: now,
        };

        let locked = lock_piece_versions(version, &registry).await.unwrap();
        assert_eq!(locked.state, FlowVersionState::Locked);
        assert_eq!(locked.trigger["settings"]["pieceVersion"], "1.4.2");
    }
}
