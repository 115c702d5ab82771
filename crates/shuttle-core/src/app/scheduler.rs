//! Scheduler - queued task を受け取る worker の選択
//!
//! # 選択ルール
//! 1. 候補: `online` かつ `claude_cli` かつ `active_leases < max_concurrency`
//! 2. `context_id` が同じ active lease を持つ候補がいれば、その worker（sticky）
//! 3. それ以外は空き容量の多い順、同じなら worker id の昇順で先頭
//!
//! ここは純粋関数。`active_leases` は呼び出し側が同じ snapshot から数え直して渡す。

use crate::domain::{Lease, WorkerNode};

pub fn pick_worker<'a>(
    workers: &'a [WorkerNode],
    context_id: Option<&str>,
    active_leases: &[Lease],
) -> Option<&'a WorkerNode> {
    let mut eligible: Vec<&WorkerNode> = workers.iter().filter(|w| w.is_eligible()).collect();

    if let Some(context_id) = context_id {
        let sticky = active_leases
            .iter()
            .filter(|l| l.status.is_active() && l.context_id.as_deref() == Some(context_id))
            .find_map(|l| eligible.iter().copied().find(|w| w.id == l.worker_id));
        if sticky.is_some() {
            return sticky;
        }
    }

    eligible.sort_by(|a, b| {
        b.free_capacity()
            .cmp(&a.free_capacity())
            .then_with(|| a.id.cmp(&b.id))
    });
    eligible.first().copied()
}
