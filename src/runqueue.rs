//! The operations layer (§4.2–4.6): `place`, `dequeue`, `change_weight`,
//! `tick`, and `pick`, plus the run-queue state they operate on.

use std::collections::BTreeMap;

use crate::config::{SchedConfig, Variant};
use crate::entity::{Entity, EntityId, Request};
use crate::error::{SchedError, SchedResult};
use crate::fixed::Fixed;
use crate::index::{BTreeRequestIndex, RequestIndex};

/// The scheduling state (§3): members, the virtual clock, both load counters
/// (always maintained regardless of variant, since `change_weight` needs
/// `total_weight` even under the averaged variant's weight-aware mean), the
/// current entity, and the reschedule flag.
pub struct RunQueue {
    config: SchedConfig,
    v: Fixed,
    total_weight: u64,
    running_count: u64,
    members: BTreeMap<EntityId, Entity>,
    curr: Option<EntityId>,
    need_resched: bool,
    index: BTreeRequestIndex,
    next_seq: u64,
}

fn issue_request(v: Fixed, weight: u64, slice: u64, time_gotten_in_slice: u64, seq: u64) -> Request {
    let eligible = v - Fixed::div_u64(time_gotten_in_slice, weight);
    let deadline = eligible + Fixed::div_u64(slice, weight);
    Request {
        eligible,
        deadline,
        seq,
    }
}

impl RunQueue {
    pub fn new(config: SchedConfig) -> Self {
        RunQueue {
            config,
            v: Fixed::ZERO,
            total_weight: 0,
            running_count: 0,
            members: BTreeMap::new(),
            curr: None,
            need_resched: false,
            index: BTreeRequestIndex::new(),
            next_seq: 0,
        }
    }

    pub fn config(&self) -> SchedConfig {
        self.config
    }

    pub fn virtual_time(&self) -> Fixed {
        self.v
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched
    }

    pub fn curr(&self) -> Option<EntityId> {
        self.curr
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.members.get(&id)
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn running_count(&self) -> u64 {
        self.running_count
    }

    /// lag(e) per §4.1, dispatched on the configured variant.
    pub fn lag(&self, e: &Entity) -> Fixed {
        match self.config.variant {
            Variant::Weighted => {
                let ideal = (self.v - e.virt_time_placed()).mul_u64(e.weight());
                ideal - Fixed::from_int(e.runtime_since_placed() as i64)
            }
            Variant::Averaged => self.v - e.vruntime(),
        }
    }

    pub fn lag_of(&self, id: EntityId) -> Option<Fixed> {
        self.members.get(&id).map(|e| self.lag(e))
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Weight-aware mean of `vruntime` over all current members, optionally
    /// excluding one (used by `change_weight` in the averaged variant to
    /// mirror the weighted variant's "shift, then reinsert" two-step).
    fn weighted_mean_vruntime(&self, exclude: Option<EntityId>) -> Fixed {
        let mut weight_sum: u64 = 0;
        let mut acc = Fixed::ZERO;
        for (id, e) in self.members.iter() {
            if Some(*id) == exclude {
                continue;
            }
            weight_sum += e.weight();
            acc += e.vruntime().mul_u64(e.weight());
        }
        if weight_sum == 0 {
            self.v
        } else {
            acc.div_int(weight_sum)
        }
    }

    /// §4.2: add `entity` to the run queue, honoring carried lag from its
    /// most recent `dequeue` (or `Fixed::ZERO` on first birth).
    pub fn place(&mut self, mut entity: Entity, carried_lag: Fixed) -> SchedResult<()> {
        if entity.weight() == 0 {
            return Err(SchedError::InvalidWeight { weight: 0 });
        }
        if entity.slice() == 0 {
            return Err(SchedError::InvalidSlice { slice: 0 });
        }
        let id = entity.id;
        if self.members.contains_key(&id) {
            return Err(SchedError::AlreadyPlaced { id });
        }

        let carried_lag = if self.config.place_lag {
            carried_lag
        } else {
            Fixed::ZERO
        };

        self.total_weight += entity.weight();
        self.running_count += 1;

        match self.config.variant {
            Variant::Weighted => {
                let v_before = self.v;
                let own_weight = entity.weight();
                self.v = v_before - carried_lag.div_int(self.total_weight);
                entity.reset_era_a(v_before - carried_lag.div_int(own_weight));
                self.members.insert(id, entity);
            }
            Variant::Averaged => {
                let v_before = self.v;
                entity.set_vruntime(v_before - carried_lag);
                self.members.insert(id, entity);
                self.v = self.weighted_mean_vruntime(None);
            }
        }

        let seq = self.allocate_seq();
        let v = self.v;
        let place_rel_deadline = self.config.place_rel_deadline;
        let e = self.members.get_mut(&id).expect("just inserted");

        let request = match (place_rel_deadline, e.stashed_rel_deadline.take()) {
            (true, Some(rel)) => {
                let deadline = v + rel;
                let eligible = deadline - Fixed::div_u64(e.slice(), e.weight());
                Request {
                    eligible,
                    deadline,
                    seq,
                }
            }
            _ => issue_request(v, e.weight(), e.slice(), e.time_gotten_in_slice(), seq),
        };
        e.set_request(request);
        self.index.insert(id, request);

        self.debug_check_invariants();
        Ok(())
    }

    /// §4.3: remove `id` from the run queue, returning it together with the
    /// lag it accrued this era so the caller can hand both back to the next
    /// `place`.
    pub fn dequeue(&mut self, id: EntityId) -> SchedResult<(Entity, Fixed)> {
        if !self.members.contains_key(&id) {
            return Err(SchedError::UnknownEntity { id });
        }
        if self.curr == Some(id) {
            self.curr = None;
        }

        let p_lag = self.lag(self.members.get(&id).unwrap());
        let weight = self.members.get(&id).unwrap().weight();

        let mut entity = self.members.remove(&id).unwrap();
        self.total_weight -= weight;
        self.running_count -= 1;
        self.index.remove(id);

        match self.config.variant {
            Variant::Weighted => {
                if self.total_weight > 0 {
                    self.v = self.v + p_lag.div_int(self.total_weight);
                }
                // else: leave V unchanged, no eligibility test remains meaningful (§9).
            }
            Variant::Averaged => {
                if self.running_count > 0 {
                    self.v = self.weighted_mean_vruntime(None);
                }
            }
        }

        if self.config.place_rel_deadline {
            entity.stashed_rel_deadline = Some(entity.request().deadline - self.v);
        }

        self.debug_check_invariants();
        Ok((entity, p_lag))
    }

    /// §4.4: change `id`'s weight, bracketing the V update so `lag(id)` is
    /// preserved across the change.
    pub fn change_weight(&mut self, id: EntityId, new_weight: u64) -> SchedResult<()> {
        if new_weight == 0 {
            return Err(SchedError::InvalidWeight { weight: 0 });
        }
        if !self.members.contains_key(&id) {
            return Err(SchedError::UnknownEntity { id });
        }

        let old_weight = self.members.get(&id).unwrap().weight();

        match self.config.variant {
            Variant::Weighted => {
                let lag_before = self.lag(self.members.get(&id).unwrap());
                let denom_before = self.total_weight - old_weight;
                if denom_before > 0 {
                    self.v = self.v + lag_before.div_int(denom_before);
                }

                self.total_weight = self.total_weight - old_weight + new_weight;
                self.members.get_mut(&id).unwrap().set_weight(new_weight);

                let lag_after = self.lag(self.members.get(&id).unwrap());
                self.v = self.v - lag_after.div_int(self.total_weight);
            }
            Variant::Averaged => {
                if self.total_weight - old_weight > 0 {
                    self.v = self.weighted_mean_vruntime(Some(id));
                }
                self.total_weight = self.total_weight - old_weight + new_weight;
                self.members.get_mut(&id).unwrap().set_weight(new_weight);
                self.v = self.weighted_mean_vruntime(None);
            }
        }

        let seq = self.allocate_seq();
        let v = self.v;
        let e = self.members.get_mut(&id).unwrap();
        let request = issue_request(v, e.weight(), e.slice(), e.time_gotten_in_slice(), seq);
        e.set_request(request);
        self.index.insert(id, request);

        self.debug_check_invariants();
        Ok(())
    }

    /// §4.5: run `curr` for `delta_ns`, advancing V and reissuing `curr`'s
    /// request if its slice is exhausted. Returns whether a reschedule was
    /// requested. `curr == None` is a reported no-op, not an error.
    pub fn tick(&mut self, delta_ns: u64) -> SchedResult<bool> {
        let Some(curr_id) = self.curr else {
            log::warn!("tick called with no current entity; ignoring");
            return Ok(false);
        };
        if delta_ns == 0 {
            return Ok(false);
        }

        self.members
            .get_mut(&curr_id)
            .expect("curr must be a member")
            .run_for(delta_ns);

        match self.config.variant {
            Variant::Weighted => {
                self.v += Fixed::div_u64(delta_ns, self.total_weight);
            }
            Variant::Averaged => {
                self.v += Fixed::div_u64(delta_ns, self.running_count);
            }
        }

        let tolerance = self.config.deadline_tolerance;
        let slice_exhausted = {
            let e = self.members.get(&curr_id).unwrap();
            e.time_gotten_in_slice() + tolerance >= e.slice()
        };

        self.need_resched = slice_exhausted;

        if slice_exhausted {
            let seq = self.allocate_seq();
            let e = self.members.get_mut(&curr_id).unwrap();
            let prev_deadline = e.request().deadline;
            let new_deadline = prev_deadline + Fixed::div_u64(e.slice(), e.weight());
            let request = Request {
                eligible: prev_deadline,
                deadline: new_deadline,
                seq,
            };
            e.set_request(request);
            e.carry_overshoot();
            self.index.insert(curr_id, request);
        }

        self.debug_check_invariants();
        Ok(slice_exhausted)
    }

    /// §4.6: select the eligible member with the smallest deadline.
    pub fn pick(&mut self) -> SchedResult<EntityId> {
        if self.members.is_empty() {
            return Err(SchedError::EmptyRunQueue);
        }

        let v = self.v;
        let picked = self
            .index
            .pick_eligible_min_deadline(|id| {
                let e = self.members.get(&id).unwrap();
                v >= e.request().eligible || self.lag(e).is_positive()
            })
            .or_else(|| self.index.min_deadline_any())
            .expect("nonempty members implies nonempty index");

        self.curr = Some(picked);
        self.need_resched = false;
        Ok(picked)
    }

    /// Used only by the replay harness (§6): override `curr` to the
    /// trace-specified choice after a discrepancy, without touching the
    /// index or reissuing a request, so downstream comparisons continue
    /// against the trace's own frame of reference.
    pub fn force_curr(&mut self, id: EntityId) -> SchedResult<()> {
        if !self.members.contains_key(&id) {
            return Err(SchedError::UnknownEntity { id });
        }
        self.curr = Some(id);
        self.need_resched = false;
        Ok(())
    }

    fn debug_check_invariants(&self) {
        if cfg!(debug_assertions) {
            if let Some(curr) = self.curr {
                debug_assert!(
                    self.members.contains_key(&curr),
                    "invariant 1 (membership) violated: curr not in members"
                );
            }
            let total_weight: u64 = self.members.values().map(|e| e.weight()).sum();
            debug_assert_eq!(
                total_weight, self.total_weight,
                "invariant 2 (load consistency) violated"
            );
            debug_assert_eq!(
                self.running_count as usize,
                self.members.len(),
                "invariant 3 (counter consistency) violated"
            );
            for e in self.members.values() {
                let req = e.request();
                debug_assert!(
                    req.eligible <= req.deadline,
                    "invariant 4 (request domain) violated for entity {}",
                    e.id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedConfig;

    fn rq() -> RunQueue {
        RunQueue::new(SchedConfig::weighted())
    }

    #[test]
    fn place_rejects_zero_weight_and_slice() {
        let mut q = rq();
        assert_eq!(
            q.place(Entity::new(1, 0, 100), Fixed::ZERO),
            Err(SchedError::InvalidWeight { weight: 0 })
        );
        assert_eq!(
            q.place(Entity::new(1, 100, 0), Fixed::ZERO),
            Err(SchedError::InvalidSlice { slice: 0 })
        );
    }

    #[test]
    fn place_rejects_double_placement() {
        let mut q = rq();
        q.place(Entity::new(1, 1024, 4_000_000), Fixed::ZERO).unwrap();
        assert_eq!(
            q.place(Entity::new(1, 2048, 4_000_000), Fixed::ZERO),
            Err(SchedError::AlreadyPlaced { id: 1 })
        );
    }

    #[test]
    fn single_entity_is_always_eligible_and_picked() {
        let mut q = rq();
        q.place(Entity::new(1, 1024, 4_000_000), Fixed::ZERO).unwrap();
        assert_eq!(q.pick().unwrap(), 1);
    }

    #[test]
    fn tick_on_empty_curr_is_a_warned_no_op() {
        let mut q = rq();
        q.place(Entity::new(1, 1024, 4_000_000), Fixed::ZERO).unwrap();
        assert_eq!(q.tick(1_000_000).unwrap(), false);
        assert_eq!(q.virtual_time(), Fixed::ZERO);
    }

    #[test]
    fn dequeue_unknown_entity_is_refused() {
        let mut q = rq();
        assert_eq!(
            q.dequeue(42),
            Err(SchedError::UnknownEntity { id: 42 })
        );
    }

    #[test]
    fn pick_on_empty_run_queue_is_refused() {
        let mut q = rq();
        assert_eq!(q.pick(), Err(SchedError::EmptyRunQueue));
    }

    #[test]
    fn dequeue_leaves_v_unchanged_when_queue_empties() {
        let mut q = rq();
        q.place(Entity::new(1, 1024, 4_000_000), Fixed::ZERO).unwrap();
        q.pick().unwrap();
        q.tick(4_000_000).unwrap();
        let v_before = q.virtual_time();
        let (_, _lag) = q.dequeue(1).unwrap();
        assert_eq!(q.virtual_time(), v_before);
    }
}
