//! Trace-replay contract (§6): drive a [`RunQueue`] from a recorded kernel
//! reference log and report where the two diverge.

use crate::entity::{Entity, EntityId};
use crate::error::SchedResult;
use crate::fixed::Fixed;
use crate::runqueue::RunQueue;

/// One recorded event from the reference trace, in the order it occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A new entity entered the run queue, carrying `lag` from any prior era.
    Place {
        id: EntityId,
        weight: u64,
        slice_ns: u64,
        carried_lag: Fixed,
    },
    /// An entity left the run queue (blocked, exited, or migrated away).
    Dequeue { id: EntityId },
    /// An entity's weight changed (e.g. `nice` or cgroup shares changed).
    ChangeWeight { id: EntityId, new_weight: u64 },
    /// The scheduler tick fired with `curr` having run for `delta_ns`.
    Tick { delta_ns: u64 },
    /// The reference scheduler picked `expected` as the next `curr`.
    Pick { expected: EntityId },
}

/// A point where replaying the trace produced a different outcome than the
/// reference log recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub event_index: usize,
    pub kind: DiscrepancyKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscrepancyKind {
    /// `pick` chose a different entity than the trace recorded. Fatal only
    /// if `fatal_on_pick_mismatch` is set on the caller's policy; CFS's own
    /// epsilon-granularity ties mean occasional pick drift is tolerable
    /// (§6).
    PickMismatch {
        expected: EntityId,
        actual: EntityId,
    },
    /// An operation that the trace expected to succeed was refused by the
    /// run queue (always fatal: it means the replay state diverged from the
    /// reference's).
    OperationRefused {
        event: TraceEvent,
        error: crate::error::SchedError,
    },
}

/// Replay `events` against `rq`, optionally refusing to continue as soon as
/// `curr` no longer matches the trace. `entities` supplies the freshly-born
/// [`Entity`] for each `Place` event (by id) since the trace only records
/// weight/slice, not the full entity value; callers typically build this
/// with `Entity::new(id, weight, slice)` on demand.
pub fn replay_trace<F>(
    rq: &mut RunQueue,
    events: &[TraceEvent],
    fatal_on_pick_mismatch: bool,
    mut make_entity: F,
) -> SchedResult<Vec<Discrepancy>>
where
    F: FnMut(EntityId, u64, u64) -> Entity,
{
    let mut discrepancies = Vec::new();

    for (index, event) in events.iter().enumerate() {
        match event {
            TraceEvent::Place {
                id,
                weight,
                slice_ns,
                carried_lag,
            } => {
                let entity = make_entity(*id, *weight, *slice_ns);
                if let Err(error) = rq.place(entity, *carried_lag) {
                    discrepancies.push(Discrepancy {
                        event_index: index,
                        kind: DiscrepancyKind::OperationRefused {
                            event: event.clone(),
                            error,
                        },
                    });
                }
            }
            TraceEvent::Dequeue { id } => {
                if let Err(error) = rq.dequeue(*id) {
                    discrepancies.push(Discrepancy {
                        event_index: index,
                        kind: DiscrepancyKind::OperationRefused {
                            event: event.clone(),
                            error,
                        },
                    });
                }
            }
            TraceEvent::ChangeWeight { id, new_weight } => {
                if let Err(error) = rq.change_weight(*id, *new_weight) {
                    discrepancies.push(Discrepancy {
                        event_index: index,
                        kind: DiscrepancyKind::OperationRefused {
                            event: event.clone(),
                            error,
                        },
                    });
                }
            }
            TraceEvent::Tick { delta_ns } => {
                // A trace-reported tick with no current entity is itself a
                // sign of prior drift, not fresh information; `tick` already
                // treats it as a logged no-op rather than an error.
                rq.tick(*delta_ns)?;
            }
            TraceEvent::Pick { expected } => {
                let actual = rq.pick()?;
                if actual != *expected {
                    discrepancies.push(Discrepancy {
                        event_index: index,
                        kind: DiscrepancyKind::PickMismatch {
                            expected: *expected,
                            actual,
                        },
                    });
                    if fatal_on_pick_mismatch {
                        break;
                    }
                    // Re-anchor to the trace's choice so later events are
                    // replayed against the reference's own frame of
                    // reference rather than compounding the divergence.
                    rq.force_curr(*expected)?;
                }
            }
        }
    }

    Ok(discrepancies)
}
