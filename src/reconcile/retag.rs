//! 批量换标签：带 from 标签的条目改为 to 标签

use crate::backend::{Item, TagId};
use crate::reconcile::plan::{MutationReason, TagMutation};
use crate::reconcile::shuffle::Shuffler;

/// 候选打乱后按 cap 截断；新旧标签集相同的条目不产生改写
pub fn plan_retag<S: Shuffler>(
    items: &[Item],
    from: TagId,
    to: TagId,
    cap: Option<usize>,
    shuffler: &mut S,
) -> Vec<TagMutation> {
    let mut mutations: Vec<TagMutation> = items
        .iter()
        .filter(|item| item.id.0 > 0 && item.has_tag(from))
        .filter_map(|item| {
            let mut next = item.tags.clone();
            next.remove(&from);
            next.insert(to);
            (next != item.tags).then(|| TagMutation {
                item: item.id,
                display_name: item.display_name.clone(),
                from: item.tags.clone(),
                to: next,
                reason: MutationReason::Retag,
            })
        })
        .collect();

    shuffler.shuffle(&mut mutations);
    if let Some(cap) = cap {
        mutations.truncate(cap);
    }
    mutations
}
