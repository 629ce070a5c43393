//! Correlation of related comments.
//!
//! Stage A links comments citing the same guideline/memory set. Stage B asks
//! the model to cluster the remaining generic comments. A final sweep clears
//! any correlation id left with a single member.

use crate::{ReviewError, Result};
use apiview_prompt::{CallScope, PromptInputs, PromptRunner};
use apiview_protocol::{ClusterDecision, Comment, GroupingAudit, Language, SignatureGroup};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const GROUP_GENERIC_PROMPT: &str = "group_generic_comments";

fn fresh_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `sha256(sorted(guideline_ids) ∥ sorted(memory_ids))`, hex encoded.
pub fn signature(comment: &Comment) -> Option<String> {
    if comment.guideline_ids.is_empty() && comment.memory_ids.is_empty() {
        return None;
    }
    let guidelines: BTreeSet<&str> = comment.guideline_ids.iter().map(String::as_str).collect();
    let memories: BTreeSet<&str> = comment.memory_ids.iter().map(String::as_str).collect();

    let mut hasher = Sha256::new();
    for id in guidelines {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0xffu8]);
    for id in memories {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    Some(
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect(),
    )
}

/// Stage A.
pub fn group_by_signature(comments: &mut [Comment]) -> Vec<SignatureGroup> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, comment) in comments.iter().enumerate() {
        if comment.correlation_id.is_some() {
            continue;
        }
        if let Some(sig) = signature(comment) {
            groups.entry(sig).or_default().push(idx);
        }
    }

    let mut audit = Vec::new();
    for (sig, members) in groups {
        if members.len() < 2 {
            continue;
        }
        let correlation_id = fresh_correlation_id();
        for &idx in &members {
            comments[idx].correlation_id = Some(correlation_id.clone());
        }
        audit.push(SignatureGroup {
            signature: sig,
            correlation_id,
            line_nos: members.iter().map(|&i| comments[i].line_no).collect(),
        });
    }
    audit
}

/// Parse `{"clusters": [{"indices": [...], "reason": "..."}]}` into decisions,
/// applying accepted clusters to `comments` (indexed through `candidates`).
fn apply_clusters(
    reply: &Value,
    comments: &mut [Comment],
    candidates: &[usize],
) -> Vec<ClusterDecision> {
    let clusters = reply
        .get("clusters")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut claimed: BTreeSet<usize> = BTreeSet::new();
    let mut decisions = Vec::new();
    for cluster in clusters {
        let reason = cluster
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let proposed: Vec<u64> = cluster
            .get("indices")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_u64).collect())
            .unwrap_or_default();

        let mut members: Vec<usize> = Vec::new();
        for raw in &proposed {
            let Some(&idx) = usize::try_from(*raw).ok().and_then(|i| candidates.get(i)) else {
                continue;
            };
            if !claimed.contains(&idx) && !members.contains(&idx) {
                members.push(idx);
            }
        }
        let proposed_lines = proposed
            .iter()
            .filter_map(|raw| usize::try_from(*raw).ok())
            .filter_map(|i| candidates.get(i))
            .map(|&idx| comments[idx].line_no)
            .collect();

        if members.len() < 2 {
            decisions.push(ClusterDecision {
                line_nos: proposed_lines,
                accepted: false,
                reason: format!("rejected: fewer than two unclaimed members ({reason})"),
                correlation_id: None,
            });
            continue;
        }

        let correlation_id = fresh_correlation_id();
        for &idx in &members {
            claimed.insert(idx);
            comments[idx].correlation_id = Some(correlation_id.clone());
        }
        decisions.push(ClusterDecision {
            line_nos: members.iter().map(|&i| comments[i].line_no).collect(),
            accepted: true,
            reason,
            correlation_id: Some(correlation_id),
        });
    }
    decisions
}

/// Clear correlation ids carried by fewer than two comments.
pub fn clear_orphans(comments: &mut [Comment]) -> usize {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for id in comments.iter().filter_map(|c| c.correlation_id.as_ref()) {
        *counts.entry(id.clone()).or_default() += 1;
    }
    let mut cleared = 0;
    for comment in comments.iter_mut() {
        let orphaned = comment
            .correlation_id
            .as_ref()
            .is_some_and(|id| counts.get(id).copied().unwrap_or(0) < 2);
        if orphaned {
            comment.correlation_id = None;
            cleared += 1;
        }
    }
    cleared
}

/// Run both stages over the final comment set.
pub async fn group_comments(
    runner: &PromptRunner,
    folder: &str,
    language: Language,
    comments: &mut [Comment],
    scope: &CallScope,
) -> Result<GroupingAudit> {
    let mut audit = GroupingAudit {
        signature_groups: group_by_signature(comments),
        ..GroupingAudit::default()
    };

    let candidates: Vec<usize> = comments
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_generic && c.correlation_id.is_none())
        .map(|(i, _)| i)
        .collect();

    if candidates.len() >= 2 {
        let listing: Vec<Value> = candidates
            .iter()
            .enumerate()
            .map(|(n, &idx)| {
                serde_json::json!({
                    "index": n,
                    "line_no": comments[idx].line_no,
                    "text": comments[idx].text,
                })
            })
            .collect();
        let mut inputs = PromptInputs::new();
        inputs.insert("language".into(), language.display_name().into());
        inputs.insert(
            "comments".into(),
            serde_json::to_string_pretty(&listing).unwrap_or_default(),
        );

        match runner
            .run_json(folder, GROUP_GENERIC_PROMPT, &inputs, scope)
            .await
        {
            Ok(reply) => audit.generic_clusters = apply_clusters(&reply, comments, &candidates),
            Err(err) if err.is_cancelled() => return Err(ReviewError::Cancelled),
            Err(err) => {
                log::warn!("generic comment grouping skipped: {err}");
                audit.generic_stage_skipped = true;
            }
        }
    }

    audit.orphaned_ids_cleared = clear_orphans(comments);
    Ok(audit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiview_protocol::{CommentSource, Severity};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn comment(line_no: u32, guidelines: &[&str], memories: &[&str]) -> Comment {
        let mut c = Comment {
            line_no,
            code_excerpt: String::new(),
            text: format!("comment {line_no}"),
            severity: Severity::Should,
            guideline_ids: guidelines.iter().map(|s| s.to_string()).collect(),
            memory_ids: memories.iter().map(|s| s.to_string()).collect(),
            confidence: 0.9,
            is_generic: false,
            correlation_id: None,
            suggestion: None,
            source: CommentSource::Generic,
        };
        c.normalize_generic();
        c
    }

    #[test]
    fn signature_ignores_id_order() {
        let a = comment(1, &["g2", "g1"], &["m1"]);
        let b = comment(2, &["g1", "g2"], &["m1"]);
        let c = comment(3, &["g1", "g2"], &[]);
        assert_eq!(signature(&a), signature(&b));
        assert_ne!(signature(&a), signature(&c));
        assert_eq!(signature(&comment(4, &[], &[])), None);
    }

    #[test]
    fn stage_a_links_only_groups_of_two_or_more() {
        let mut comments = vec![
            comment(10, &["g1"], &[]),
            comment(11, &["g1"], &[]),
            comment(12, &["g2"], &[]),
            comment(13, &[], &[]),
        ];
        let groups = group_by_signature(&mut comments);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].line_nos, vec![10, 11]);
        assert!(comments[0].correlation_id.is_some());
        assert_eq!(comments[0].correlation_id, comments[1].correlation_id);
        assert_eq!(comments[2].correlation_id, None);
        assert_eq!(comments[3].correlation_id, None);
    }

    #[test]
    fn clusters_reject_singletons_and_double_claims() {
        let mut comments = vec![
            comment(1, &[], &[]),
            comment(2, &[], &[]),
            comment(3, &[], &[]),
        ];
        let candidates = vec![0, 1, 2];
        let reply = json!({"clusters": [
            {"indices": [0, 1], "reason": "same naming issue"},
            {"indices": [1, 2], "reason": "overlaps"},
            {"indices": [7], "reason": "out of range"}
        ]});
        let decisions = apply_clusters(&reply, &mut comments, &candidates);
        assert_eq!(decisions.len(), 3);
        assert!(decisions[0].accepted);
        assert!(!decisions[1].accepted);
        assert!(!decisions[2].accepted);
        assert_eq!(comments[0].correlation_id, comments[1].correlation_id);
        assert_eq!(comments[2].correlation_id, None);
    }

    #[test]
    fn orphans_are_cleared() {
        let mut comments = vec![comment(1, &[], &[]), comment(2, &[], &[])];
        comments[0].correlation_id = Some("lonely".into());
        assert_eq!(clear_orphans(&mut comments), 1);
        assert_eq!(comments[0].correlation_id, None);
    }
}
