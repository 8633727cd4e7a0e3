use super::mock_test_prelude::*;

fn churn(fixture: &mut MutatorFixture, collections: usize) {
    let _keep = Root::new(Some(new_tagged(fixture, 0, 0)));
    while fixture.g1.gc_count() < collections {
        fixture.new_object(0, 200);
    }
}

#[test]
fn generous_goal_keeps_the_largest_eden() {
    let mut fixture = MutatorFixture::with(32, |o| {
        o.concurrent_marking = false;
        o.enable_pause_time_goal = true;
        o.max_gc_pause_millis = 1000;
        o.gc_pause_interval_millis = 2000;
    });
    churn(&mut fixture, 3);
    let space = fixture.g1.space();
    assert_eq!(space.desired_eden_length(), space.max_eden_length());
}

#[test]
fn eden_length_stays_in_bounds_under_a_tight_goal() {
    let mut fixture = MutatorFixture::with(32, |o| {
        o.concurrent_marking = false;
        o.enable_pause_time_goal = true;
        o.max_gc_pause_millis = 1;
        o.gc_pause_interval_millis = 1;
    });
    churn(&mut fixture, 4);
    let space = fixture.g1.space();
    let desired = space.desired_eden_length();
    assert!(desired >= 1 && desired <= space.max_eden_length());
    assert_eq!(fixture.g1.stats().collections[GCKind::Young], 4);
}
