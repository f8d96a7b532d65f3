//! Runs the same operation sequence through both variants, asserting each
//! independently satisfies its own invariants rather than that the two
//! variants agree with each other; they are different scheduling
//! disciplines by design (§9 Design Notes).

use eevdf_sched::{Entity, Fixed, RunQueue, SchedConfig, Variant};

fn drive(variant: Variant) -> RunQueue {
    let mut rq = RunQueue::new(SchedConfig {
        variant,
        ..SchedConfig::default()
    });

    rq.place(Entity::new(1, 1024, 4_000_000), Fixed::ZERO).unwrap();
    rq.place(Entity::new(2, 2048, 4_000_000), Fixed::ZERO).unwrap();
    rq.place(Entity::new(3, 1024, 2_000_000), Fixed::ZERO).unwrap();

    for _ in 0..12 {
        let picked = rq.pick().unwrap();
        let e = rq.get(picked).unwrap();
        let slice = e.slice();
        rq.tick(slice).unwrap();
    }

    rq.change_weight(3, 4096).unwrap();
    rq.tick(1_000_000).unwrap();

    let (_, lag) = rq.dequeue(2).unwrap();
    rq.place(Entity::new(2, 2048, 4_000_000), lag).unwrap();

    rq
}

#[test]
fn weighted_variant_keeps_load_consistent_across_the_sequence() {
    let rq = drive(Variant::Weighted);
    let total_weight: u64 = [1, 2, 3]
        .into_iter()
        .filter_map(|id| rq.get(id))
        .map(|e| e.weight())
        .sum();
    assert_eq!(total_weight, rq.total_weight());
    assert_eq!(rq.running_count() as usize, rq.len());
}

#[test]
fn averaged_variant_keeps_counters_consistent_across_the_sequence() {
    let rq = drive(Variant::Averaged);
    assert_eq!(rq.running_count() as usize, rq.len());
    let total_weight: u64 = [1, 2, 3]
        .into_iter()
        .filter_map(|id| rq.get(id))
        .map(|e| e.weight())
        .sum();
    assert_eq!(total_weight, rq.total_weight());
}

#[test]
fn both_variants_keep_every_members_request_domain_valid() {
    for variant in [Variant::Weighted, Variant::Averaged] {
        let rq = drive(variant);
        for id in [1, 2, 3] {
            if let Some(e) = rq.get(id) {
                let req = e.request();
                assert!(req.eligible <= req.deadline, "variant {variant:?} entity {id}");
            }
        }
    }
}

#[test]
fn both_variants_produce_a_pickable_member_after_the_sequence() {
    for variant in [Variant::Weighted, Variant::Averaged] {
        let mut rq = drive(variant);
        assert!(rq.pick().is_ok());
    }
}
