//! Bidirectional links between guidelines, examples and memories.

use crate::database::DocumentStore;
use crate::error::{Result, StoreError};
use crate::record::ContainerName;
use apiview_protocol::{Example, Guideline, Memory};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub container: ContainerName,
    pub id: String,
}

impl ItemRef {
    pub fn new(container: ContainerName, id: impl Into<String>) -> Self {
        Self {
            container,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub linked: Vec<String>,
    pub already_linked: Vec<String>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOp {
    Link,
    Unlink,
}

/// Link field on a record of `owner` pointing at `target` rows.
async fn apply_to_field(
    store: &DocumentStore,
    owner: &ItemRef,
    target: ContainerName,
    value: String,
    op: LinkOp,
) -> Result<bool> {
    let mut changed = false;
    let mut edit = |field: &mut Vec<String>| {
        changed = false;
        match op {
            LinkOp::Link if !field.contains(&value) => {
                field.push(value.clone());
                changed = true;
            }
            LinkOp::Unlink if field.contains(&value) => {
                field.retain(|v| v != &value);
                changed = true;
            }
            _ => {}
        }
    };

    match (owner.container, target) {
        (ContainerName::Guidelines, ContainerName::Guidelines) => {
            store
                .update::<Guideline, _>(&owner.id, |g| {
                    edit(&mut g.related_guidelines);
                    Ok(())
                })
                .await?;
        }
        (ContainerName::Guidelines, ContainerName::Examples) => {
            store
                .update::<Guideline, _>(&owner.id, |g| {
                    edit(&mut g.examples);
                    Ok(())
                })
                .await?;
        }
        (ContainerName::Guidelines, ContainerName::Memories) => {
            store
                .update::<Guideline, _>(&owner.id, |g| {
                    edit(&mut g.related_memories);
                    Ok(())
                })
                .await?;
        }
        (ContainerName::Examples, ContainerName::Guidelines) => {
            store
                .update::<Example, _>(&owner.id, |e| {
                    edit(&mut e.guideline_ids);
                    Ok(())
                })
                .await?;
        }
        (ContainerName::Examples, ContainerName::Memories) => {
            store
                .update::<Example, _>(&owner.id, |e| {
                    edit(&mut e.memory_ids);
                    Ok(())
                })
                .await?;
        }
        (ContainerName::Memories, ContainerName::Guidelines) => {
            store
                .update::<Memory, _>(&owner.id, |m| {
                    edit(&mut m.related_guideline_ids);
                    Ok(())
                })
                .await?;
        }
        (ContainerName::Memories, ContainerName::Examples) => {
            store
                .update::<Memory, _>(&owner.id, |m| {
                    edit(&mut m.related_example_ids);
                    Ok(())
                })
                .await?;
        }
        (from, to) => {
            return Err(StoreError::invalid_input(format!(
                "{from} cannot link to {to}"
            )))
        }
    }
    Ok(changed)
}

async fn exists(store: &DocumentStore, item: &ItemRef) -> Result<bool> {
    Ok(store
        .get_raw(item.container, &item.id)
        .await?
        .is_some_and(|row| !row.is_deleted))
}

fn check_linkable(container: ContainerName) -> Result<()> {
    if container.is_indexed() {
        Ok(())
    } else {
        Err(StoreError::invalid_input(format!(
            "{container} rows cannot carry links"
        )))
    }
}

async fn relink(
    store: &DocumentStore,
    source: &ItemRef,
    targets: &[ItemRef],
    op: LinkOp,
) -> Result<LinkReport> {
    check_linkable(source.container)?;
    if !exists(store, source).await? {
        return Err(StoreError::not_found(source.container, source.id.clone()));
    }

    let mut report = LinkReport::default();
    for target in targets {
        check_linkable(target.container)?;
        if target == source {
            return Err(StoreError::invalid_input("an item cannot link to itself"));
        }
        if !exists(store, target).await? {
            report.not_found.push(target.id.clone());
            continue;
        }

        let forward = apply_to_field(store, source, target.container, target.id.clone(), op).await?;
        let backward = apply_to_field(store, target, source.container, source.id.clone(), op).await?;
        if forward || backward {
            report.linked.push(target.id.clone());
        } else {
            report.already_linked.push(target.id.clone());
        }
    }
    Ok(report)
}

/// Add links in both directions. Targets that are missing are reported, not created.
pub async fn link_items(
    store: &DocumentStore,
    source: &ItemRef,
    targets: &[ItemRef],
) -> Result<LinkReport> {
    relink(store, source, targets, LinkOp::Link).await
}

/// Remove links in both directions. `linked` lists the targets actually unlinked.
pub async fn unlink_items(
    store: &DocumentStore,
    source: &ItemRef,
    targets: &[ItemRef],
) -> Result<LinkReport> {
    relink(store, source, targets, LinkOp::Unlink).await
}
