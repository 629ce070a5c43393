use crate::error::Result;
use apiview_protocol::{Example, Guideline, GuidelineLayout, Language, LayoutExample};
use apiview_store::DocumentStore;
use std::collections::HashMap;

/// Live guidelines that apply to `language`, in the shared on-disk layout.
pub async fn export_guidelines(store: &DocumentStore, language: Language) -> Result<Vec<GuidelineLayout>> {
    let guidelines = store
        .query::<Guideline>(|g| language.accepts(&g.language))
        .await?;
    let examples: HashMap<String, Example> = store
        .list::<Example>()
        .await?
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect();

    Ok(guidelines
        .into_iter()
        .map(|g| GuidelineLayout {
            examples: g
                .examples
                .iter()
                .filter_map(|id| examples.get(id))
                .filter(|e| e.has_code())
                .map(|e| LayoutExample {
                    good_code: e.good_code.clone(),
                    bad_code: e.bad_code.clone(),
                })
                .collect(),
            id: g.id,
            title: g.title,
            text: g.text,
            category: g.category,
            language: g.language,
            related_guidelines: g.related_guidelines,
        })
        .collect())
}
